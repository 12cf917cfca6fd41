//! Single-flight authorization coordinator
//!
//! However many requests fail authorization at once, only one authorization
//! attempt runs. Requests that fail (or arrive) while it is in flight are
//! parked on the retry queue. When the attempt completes, the state goes back
//! to `Idle` and the queue is detached under the same lock, then:
//! - success: every parked request is re-signed and replayed once, in order,
//!   with retries disabled
//! - failure: every parked request is completed with `AuthorizationDenied`
//!
//! Resetting before replaying means a replay that hits 401 again is reported
//! to its caller instead of being parked behind a cycle that already ended.

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use transport::{AuthorizeError, Credential, Request};

use crate::dispatcher::{Dispatcher, RetryPolicy, Signing};
use crate::error::{DispatchError, Outcome};
use crate::queue::{PendingRequest, RetryQueue};

/// Whether an authorization attempt is in flight.
///
/// Transitions:
/// - Idle → Authorizing (first authorization failure, or explicit attempt)
/// - Authorizing → Idle (attempt completed, before the queue is drained)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthorizationState {
    #[default]
    Idle,
    Authorizing,
}

/// Everything the dispatcher mutates, guarded by one lock.
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    pub(crate) state: AuthorizationState,
    pub(crate) queue: RetryQueue,
    /// Most recent credential from a successful authorization.
    pub(crate) credential: Option<Credential>,
}

impl SharedState {
    pub(crate) fn is_authorizing(&self) -> bool {
        self.state == AuthorizationState::Authorizing
    }

    /// Test-and-set `Idle → Authorizing`. Returns false if an attempt is
    /// already in flight.
    pub(crate) fn begin_authorization(&mut self) -> bool {
        if self.is_authorizing() {
            return false;
        }
        self.state = AuthorizationState::Authorizing;
        true
    }

    /// Back to `Idle`, then detach everything parked during the attempt.
    pub(crate) fn finish_authorization(&mut self) -> Vec<PendingRequest> {
        self.state = AuthorizationState::Idle;
        self.queue.drain_all()
    }
}

impl Dispatcher {
    /// Start an authorization attempt unless one is already in flight.
    ///
    /// A no-op while authorizing: the running attempt drains everything,
    /// including requests parked after this call. Must be called from within
    /// a tokio runtime.
    pub fn attempt_authorization(&self) {
        let start = self.shared().begin_authorization();
        if start {
            self.spawn_authorization_cycle();
        } else {
            debug!("authorization already in flight");
        }
    }

    /// Park `request` and make sure an authorization attempt will drain it.
    ///
    /// Enqueue and test-and-set happen under one lock acquisition so the
    /// request cannot slip between a finishing cycle's drain and a new one.
    pub(crate) fn park_and_authorize(&self, request: Request) -> oneshot::Receiver<Outcome> {
        let (pending, receiver) = PendingRequest::new(request);
        let start = {
            let mut shared = self.shared();
            shared.queue.enqueue(pending);
            shared.begin_authorization()
        };
        metrics::counter!("dispatch_requests_parked_total").increment(1);
        if start {
            self.spawn_authorization_cycle();
        }
        receiver
    }

    fn spawn_authorization_cycle(&self) {
        tokio::spawn(self.clone().run_authorization_cycle());
    }

    async fn run_authorization_cycle(self) {
        info!(parked = self.queued(), "authorization started");

        // Run the authorizer on its own task so a panic inside it still
        // resets the state and settles every parked request.
        let authorizer = Arc::clone(&self.inner.authorizer);
        let result = match tokio::spawn(async move { authorizer.authorize().await }).await {
            Ok(result) => result,
            Err(e) => Err(AuthorizeError::Unavailable(format!(
                "authorization task failed: {e}"
            ))),
        };

        let drained = {
            let mut shared = self.shared();
            if let Ok(credential) = &result {
                shared.credential = Some(credential.clone());
            }
            shared.finish_authorization()
        };

        match result {
            Ok(credential) => {
                metrics::counter!("dispatch_authorization_attempts_total", "result" => "success")
                    .increment(1);
                info!(
                    parked = drained.len(),
                    "authorization succeeded, replaying parked requests"
                );
                self.replay(drained, credential).await;
            }
            Err(e) => {
                metrics::counter!("dispatch_authorization_attempts_total", "result" => "failure")
                    .increment(1);
                metrics::counter!("dispatch_requests_denied_total")
                    .increment(drained.len() as u64);
                warn!(
                    error = %e,
                    parked = drained.len(),
                    "authorization failed, denying parked requests"
                );
                for pending in drained {
                    pending.complete(Err(DispatchError::AuthorizationDenied(e.clone())));
                }
            }
        }
    }

    /// Re-sign and resubmit drained requests in queue order.
    ///
    /// Replays run concurrently, but each one reaches the transport on its
    /// first poll and `FuturesUnordered` polls new entries in push order.
    async fn replay(&self, drained: Vec<PendingRequest>, credential: Credential) {
        let mut replays = FuturesUnordered::new();

        for pending in drained {
            if pending.is_abandoned() {
                debug!(url = %pending.request().url, "caller gone, skipping replay");
                continue;
            }
            let (mut request, completion) = pending.into_parts();
            if let Err(e) = self.inner.signer.sign(&mut request, &credential) {
                warn!(error = %e, url = %request.url, "failed to sign parked request");
                completion.complete(Err(DispatchError::Signing(e)));
                continue;
            }

            metrics::counter!("dispatch_requests_replayed_total").increment(1);
            let outcome = self.execute(request, RetryPolicy::Never, Signing::AlreadySigned);
            replays.push(async move { completion.complete(outcome.await) });
        }

        while replays.next().await.is_some() {}
    }
}
