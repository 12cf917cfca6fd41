//! Authorization failure detection for completed responses
//!
//! Only 401 (and, when configured, 403) sends a request down the
//! re-authorization path. Every other HTTP status is a normal response and is
//! handed back to the caller untouched; transport failures pass straight
//! through and never trigger authorization.

use transport::{Response, TransportError};

/// Result of classifying one transport outcome.
#[derive(Debug)]
pub enum Classification {
    /// A readable response that is not an authorization failure (any status).
    Success(Response),
    /// The endpoint rejected the credential.
    AuthorizationFailure(Response),
    /// The transport failed before a response could be read.
    OtherFailure(TransportError),
}

/// Whether an HTTP status means the credential was rejected.
///
/// 401 always does. 403 does only when `also_intercept_forbidden` is set;
/// otherwise a forbidden response is an ordinary response.
pub fn is_authorization_failure(status: u16, also_intercept_forbidden: bool) -> bool {
    match status {
        401 => true,
        403 => also_intercept_forbidden,
        _ => false,
    }
}

/// Classify a transport outcome. Pure function of its inputs.
pub fn classify(
    result: Result<Response, TransportError>,
    also_intercept_forbidden: bool,
) -> Classification {
    match result {
        Ok(response) if is_authorization_failure(response.status, also_intercept_forbidden) => {
            Classification::AuthorizationFailure(response)
        }
        Ok(response) => Classification::Success(response),
        Err(e) => Classification::OtherFailure(e),
    }
}
