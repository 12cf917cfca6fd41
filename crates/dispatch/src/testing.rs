//! Scripted collaborators for dispatcher tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Barrier, Notify};
use transport::header::AUTHORIZATION;
use transport::{
    AuthorizeError, Authorizer, BearerSigner, Credential, Request, Response, Transport,
    TransportError,
};

use crate::config::DispatcherConfig;
use crate::dispatcher::Dispatcher;

/// One recorded call to `ScriptedTransport::send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Sent {
    pub url: String,
    pub authorization: Option<String>,
}

enum Mode {
    /// 200 (body = URL) for `Bearer <token>`, otherwise the reject status.
    Accept { token: String },
    RejectAll,
    Fail(TransportError),
}

/// Upstream stand-in that accepts exactly one bearer token and records every
/// send in call order. Responses are ready immediately unless a rejection
/// barrier holds rejected requests until `n` of them are in flight.
pub(crate) struct ScriptedTransport {
    mode: Mode,
    reject_status: u16,
    barrier: Option<Barrier>,
    sends: Mutex<Vec<Sent>>,
}

impl ScriptedTransport {
    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            reject_status: 401,
            barrier: None,
            sends: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn accepting(token: &str) -> Self {
        Self::with_mode(Mode::Accept {
            token: token.to_string(),
        })
    }

    pub(crate) fn rejecting_all(status: u16) -> Self {
        Self::with_mode(Mode::RejectAll).rejecting_with(status)
    }

    pub(crate) fn failing(error: TransportError) -> Self {
        Self::with_mode(Mode::Fail(error))
    }

    pub(crate) fn rejecting_with(mut self, status: u16) -> Self {
        self.reject_status = status;
        self
    }

    pub(crate) fn with_rejection_barrier(mut self, n: usize) -> Self {
        self.barrier = Some(Barrier::new(n));
        self
    }

    pub(crate) fn sends(&self) -> Vec<Sent> {
        self.sends.lock().unwrap().clone()
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.sends().into_iter().map(|s| s.url).collect()
    }
}

impl Transport for ScriptedTransport {
    fn send<'a>(
        &'a self,
        request: &'a Request,
    ) -> Pin<Box<dyn Future<Output = Result<Response, TransportError>> + Send + 'a>> {
        let authorization = request
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let accepted = match &self.mode {
            Mode::Accept { token } => authorization.as_deref() == Some(&format!("Bearer {token}")),
            Mode::RejectAll | Mode::Fail(_) => false,
        };
        self.sends.lock().unwrap().push(Sent {
            url: request.url.clone(),
            authorization,
        });

        Box::pin(async move {
            if let Mode::Fail(e) = &self.mode {
                return Err(e.clone());
            }
            if accepted {
                return Ok(Response::new(200).with_body(request.url.clone()));
            }
            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            }
            Ok(Response::new(self.reject_status))
        })
    }
}

/// Authorizer that counts calls and, when gated, holds each attempt until
/// `release` is called.
pub(crate) struct GatedAuthorizer {
    /// `None` panics inside the attempt.
    result: Mutex<Option<Result<Credential, AuthorizeError>>>,
    gated: bool,
    gate: Notify,
    calls: AtomicUsize,
}

impl GatedAuthorizer {
    fn build(result: Option<Result<Credential, AuthorizeError>>, gated: bool) -> Self {
        Self {
            result: Mutex::new(result),
            gated,
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn open(result: Result<Credential, AuthorizeError>) -> Self {
        Self::build(Some(result), false)
    }

    pub(crate) fn gated(result: Result<Credential, AuthorizeError>) -> Self {
        Self::build(Some(result), true)
    }

    pub(crate) fn panicking() -> Self {
        Self::build(None, false)
    }

    /// Replace what later attempts return.
    pub(crate) fn set_result(&self, result: Result<Credential, AuthorizeError>) {
        *self.result.lock().unwrap() = Some(result);
    }

    pub(crate) fn release(&self) {
        self.gate.notify_one();
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Authorizer for GatedAuthorizer {
    fn authorize(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Credential, AuthorizeError>> + Send + '_>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if self.gated {
                self.gate.notified().await;
            }
            let result = self.result.lock().unwrap().clone();
            match result {
                Some(result) => result,
                None => panic!("authorizer exploded"),
            }
        })
    }
}

pub(crate) fn dispatcher(
    transport: &Arc<ScriptedTransport>,
    authorizer: &Arc<GatedAuthorizer>,
    config: DispatcherConfig,
) -> Dispatcher {
    Dispatcher::new(
        transport.clone(),
        authorizer.clone(),
        Arc::new(BearerSigner),
        config,
    )
}

/// Yield to spawned tasks until `condition` holds.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
