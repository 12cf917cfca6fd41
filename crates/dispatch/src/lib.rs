//! Authenticated request dispatcher
//!
//! Executes requests against a protected endpoint and hides credential expiry
//! from callers. When a response says the credential was rejected (401, and
//! optionally 403), the request is parked, a single re-authorization runs no
//! matter how many requests tripped it, and every parked request is replayed
//! once, in order, with the fresh credential. If re-authorization fails, every
//! parked request is told so.
//!
//! Components, leaves first:
//! 1. `classify` decides whether a transport outcome is an authorization failure
//! 2. `queue::RetryQueue` holds parked requests with detach-all draining
//! 3. `coordinator` runs at most one authorization attempt at a time
//! 4. `Dispatcher` is the entry point callers use
//!
//! Transport, authorization, and signing are collaborators from the
//! `transport` crate.

pub mod classify;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod queue;

#[cfg(test)]
mod testing;

pub use classify::{Classification, classify, is_authorization_failure};
pub use config::DispatcherConfig;
pub use coordinator::AuthorizationState;
pub use dispatcher::{Dispatcher, RetryPolicy};
pub use error::{DispatchError, Outcome};
pub use queue::{PendingRequest, RetryQueue};
