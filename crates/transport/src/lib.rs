//! Collaborator contracts for the authenticated request dispatcher
//!
//! The dispatcher never talks to the network, obtains credentials, or edits
//! headers itself. It delegates those concerns to three traits:
//! - `Transport` sends a request and returns the completed response
//! - `Authorizer` obtains a fresh credential (one call per refresh cycle)
//! - `Signer` attaches a credential to an outgoing request
//!
//! `ReqwestTransport` and `BearerSigner` are the stock implementations used by
//! the proxy service. Tests substitute scripted fakes.
//!
//! Trait methods return `Pin<Box<dyn Future>>` so collaborators can be held as
//! `Arc<dyn Transport>` / `Arc<dyn Authorizer>`.

pub mod bearer;
pub mod http;
pub mod reqwest_transport;

pub use bearer::BearerSigner;
pub use http::{Request, Response};
pub use reqwest_transport::ReqwestTransport;
pub use reqwest::{Method, header};

use common::Secret;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Credential material returned by an `Authorizer`.
///
/// The token is wrapped in `Secret` so it never shows up in logs or Debug
/// output; call `token()` at the point of signing.
#[derive(Debug, Clone)]
pub struct Credential {
    token: Secret<String>,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Secret::new(token.into()),
        }
    }

    pub fn token(&self) -> &str {
        self.token.expose()
    }
}

/// Transport-level failures: the request never produced a readable response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("transport error: {0}")]
    Other(String),
}

/// Errors from an authorization attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorizeError {
    #[error("credential unavailable: {0}")]
    Unavailable(String),

    #[error("authorization rejected: {0}")]
    Rejected(String),

    #[error("authorization timed out after {0:?}")]
    TimedOut(Duration),
}

/// Errors from attaching a credential to a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignError {
    #[error("credential cannot be encoded as a header: {0}")]
    InvalidCredential(String),
}

/// Sends a request and returns the completed response.
///
/// Any non-transport outcome (including 4xx/5xx statuses) must be returned as
/// `Ok(Response)`; the dispatcher classifies statuses itself.
pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        request: &'a Request,
    ) -> Pin<Box<dyn Future<Output = Result<Response, TransportError>> + Send + 'a>>;
}

/// Obtains a fresh credential. The dispatcher calls this at most once per
/// refresh cycle and never concurrently with itself.
///
/// Implementations are responsible for bounding their own running time: if
/// `authorize` never completes, requests parked behind it stay parked.
pub trait Authorizer: Send + Sync {
    fn authorize(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Credential, AuthorizeError>> + Send + '_>>;
}

/// Attaches credential material to an outgoing request, replacing any
/// credential a previous signing attached.
pub trait Signer: Send + Sync {
    fn sign(&self, request: &mut Request, credential: &Credential) -> Result<(), SignError>;
}
