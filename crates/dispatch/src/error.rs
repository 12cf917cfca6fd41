//! Error types delivered to dispatcher callers

use transport::{AuthorizeError, Response, SignError, TransportError};

/// Why a dispatched request did not produce a successful outcome.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The endpoint rejected the credential and the request may not be
    /// retried (retries disabled, or this already was the retry). Carries the
    /// response as received.
    #[error("unauthorized: upstream returned {}", .0.status)]
    Unauthorized(Response),

    /// The authorizer failed; every request parked behind it gets this.
    #[error("authorization denied: {0}")]
    AuthorizationDenied(#[source] AuthorizeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to sign request: {0}")]
    Signing(#[from] SignError),

    /// The completion was dropped before a value was delivered.
    #[error("request abandoned before completion")]
    Abandoned,
}

/// What every caller receives, exactly once.
pub type Outcome = std::result::Result<Response, DispatchError>;
