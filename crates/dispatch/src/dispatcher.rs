//! Authenticated request executor
//!
//! `Dispatcher::perform` is the public entry point. A request either runs
//! straight through the transport, or (while an authorization attempt is in
//! flight, or after it hits 401) is parked until the coordinator replays or
//! denies it. The caller just awaits an `Outcome` and never sees the refresh.
//!
//! Per-request lifecycle:
//!
//! ```text
//! Unstarted → Dispatched → Completed
//!                        ↘ Queued → Dispatched (once, retries disabled) → Completed
//! Unstarted → Queued (authorization already in flight)
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, warn};
use transport::{Authorizer, Credential, Request, Signer, Transport};

use crate::classify::{Classification, classify};
use crate::config::DispatcherConfig;
use crate::coordinator::{AuthorizationState, SharedState};
use crate::error::{DispatchError, Outcome};
use crate::queue::PendingRequest;

/// Whether an authorization failure may be retried after re-authorizing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Park, re-authorize, and replay once.
    #[default]
    Once,
    /// Report the authorization failure to the caller as-is.
    ///
    /// A request with this policy that arrives while authorization is in
    /// flight is still parked and replayed after the attempt.
    Never,
}

/// How `execute` treats the request's credential before the first send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signing {
    /// Sign with the current credential, if one is known.
    Current,
    /// The coordinator already signed it with the refreshed credential.
    AlreadySigned,
}

pub(crate) struct Inner {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) authorizer: Arc<dyn Authorizer>,
    pub(crate) signer: Arc<dyn Signer>,
    pub(crate) config: DispatcherConfig,
    pub(crate) shared: Mutex<SharedState>,
}

/// Cheap, cloneable handle to one dispatcher instance.
///
/// Clones share the authorization state, retry queue, and current credential.
#[derive(Clone)]
pub struct Dispatcher {
    pub(crate) inner: Arc<Inner>,
}

/// Result of the admission check made under the state lock.
enum Admission {
    Parked(oneshot::Receiver<Outcome>),
    Proceed(Request, Option<Credential>),
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        authorizer: Arc<dyn Authorizer>,
        signer: Arc<dyn Signer>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                authorizer,
                signer,
                config,
                shared: Mutex::new(SharedState::default()),
            }),
        }
    }

    /// Seed the credential used to sign first dispatches. Without one,
    /// requests go out as built until the first authorization succeeds.
    pub fn with_credential(self, credential: Credential) -> Self {
        self.shared().credential = Some(credential);
        self
    }

    /// Execute `request`, re-authorizing and replaying once on 401.
    pub async fn perform(&self, request: Request) -> Outcome {
        self.perform_with(request, RetryPolicy::Once).await
    }

    /// Execute `request` with explicit control over retry-on-auth-failure.
    pub async fn perform_with(&self, request: Request, policy: RetryPolicy) -> Outcome {
        self.execute(request, policy, Signing::Current).await
    }

    /// Callback form of `perform_with`: runs on a spawned task and invokes
    /// `callback` exactly once with the outcome.
    pub fn submit<F>(
        &self,
        request: Request,
        policy: RetryPolicy,
        callback: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let outcome = self.execute(request, policy, Signing::Current);
        tokio::spawn(async move { callback(outcome.await) })
    }

    pub fn state(&self) -> AuthorizationState {
        self.shared().state
    }

    pub fn is_authorizing(&self) -> bool {
        self.shared().is_authorizing()
    }

    /// Number of requests currently parked.
    pub fn queued(&self) -> usize {
        self.shared().queue.len()
    }

    /// The state lock. Never held across an await point.
    pub(crate) fn shared(&self) -> MutexGuard<'_, SharedState> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Admission check, dispatch, and classification for one request.
    ///
    /// Returns a boxed future: replays re-enter here from the coordinator,
    /// which itself is spawned from here.
    pub(crate) fn execute(
        &self,
        request: Request,
        policy: RetryPolicy,
        signing: Signing,
    ) -> Pin<Box<dyn Future<Output = Outcome> + Send>> {
        let this = self.clone();
        Box::pin(async move {
            let admission = {
                let mut shared = this.shared();
                if shared.is_authorizing() {
                    let (pending, receiver) = PendingRequest::new(request);
                    shared.queue.enqueue(pending);
                    Admission::Parked(receiver)
                } else {
                    Admission::Proceed(request, shared.credential.clone())
                }
            };

            let (mut request, credential) = match admission {
                Admission::Parked(receiver) => {
                    metrics::counter!("dispatch_requests_parked_total").increment(1);
                    debug!("authorization in flight, request parked");
                    return wait(receiver).await;
                }
                Admission::Proceed(request, credential) => (request, credential),
            };

            if signing == Signing::Current
                && let Some(credential) = &credential
                && let Err(e) = this.inner.signer.sign(&mut request, credential)
            {
                // A stored credential that cannot sign never draws a 401, so
                // nothing else would replace it.
                return match policy {
                    RetryPolicy::Once => {
                        warn!(
                            error = %e,
                            url = %request.url,
                            "current credential cannot sign request, re-authorizing"
                        );
                        let receiver = this.park_and_authorize(request);
                        wait(receiver).await
                    }
                    RetryPolicy::Never => Err(DispatchError::Signing(e)),
                };
            }

            let result = this.inner.transport.send(&request).await;
            match classify(result, this.inner.config.also_intercept_forbidden) {
                Classification::Success(response) => Ok(response),
                Classification::OtherFailure(e) => {
                    debug!(error = %e, url = %request.url, "transport failure, not retried");
                    Err(DispatchError::Transport(e))
                }
                Classification::AuthorizationFailure(response) => match policy {
                    RetryPolicy::Never => {
                        debug!(
                            status = response.status,
                            url = %request.url,
                            "authorization failure, retry not allowed"
                        );
                        Err(DispatchError::Unauthorized(response))
                    }
                    RetryPolicy::Once => {
                        debug!(
                            status = response.status,
                            url = %request.url,
                            "authorization failure, parking for re-authorization"
                        );
                        let receiver = this.park_and_authorize(request);
                        wait(receiver).await
                    }
                },
            }
        })
    }
}

/// Await a parked request's completion. A dropped completion means the
/// coordinator went away without settling it.
async fn wait(receiver: oneshot::Receiver<Outcome>) -> Outcome {
    receiver.await.unwrap_or(Err(DispatchError::Abandoned))
}
