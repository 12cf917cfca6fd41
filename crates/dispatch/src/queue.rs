//! Retry queue for requests parked behind an authorization cycle
//!
//! The queue is a plain FIFO with one twist: `drain_all` detaches the whole
//! sequence at once. Whatever is enqueued after the detach lands in a fresh
//! queue that the next cycle will drain. The queue does no locking of its own;
//! the dispatcher only touches it while holding its state lock.

use tokio::sync::oneshot;
use tracing::debug;
use transport::Request;

use crate::error::Outcome;

/// Single-use completion for a parked request.
///
/// Consuming `complete` guarantees at most one delivery; dropping an
/// undelivered completion makes the waiting caller observe `Abandoned`.
#[derive(Debug)]
pub struct Completion(oneshot::Sender<Outcome>);

impl Completion {
    /// Deliver the outcome. A caller that has gone away is not an error.
    pub fn complete(self, outcome: Outcome) {
        if self.0.send(outcome).is_err() {
            debug!("caller dropped before completion was delivered");
        }
    }

    /// Whether the waiting caller has dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// A request waiting for re-authorization, paired with its completion.
///
/// Not `Clone`: a parked request is owned by exactly one queue until drained.
#[derive(Debug)]
pub struct PendingRequest {
    request: Request,
    completion: Completion,
}

impl PendingRequest {
    /// Park `request`, returning the receiver its caller waits on.
    pub fn new(request: Request) -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                request,
                completion: Completion(tx),
            },
            rx,
        )
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn is_abandoned(&self) -> bool {
        self.completion.is_closed()
    }

    /// Complete without replaying (used when authorization failed).
    pub fn complete(self, outcome: Outcome) {
        self.completion.complete(outcome);
    }

    pub fn into_parts(self) -> (Request, Completion) {
        (self.request, self.completion)
    }
}

/// FIFO of parked requests. Insertion order is replay order.
#[derive(Debug, Default)]
pub struct RetryQueue {
    pending: Vec<PendingRequest>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail.
    pub fn enqueue(&mut self, pending: PendingRequest) {
        self.pending.push(pending);
    }

    /// Detach and return every parked request in FIFO order, leaving the
    /// queue empty.
    pub fn drain_all(&mut self) -> Vec<PendingRequest> {
        std::mem::take(&mut self.pending)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
