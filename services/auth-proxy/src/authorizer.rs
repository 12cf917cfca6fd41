//! File-backed authorizer
//!
//! Re-reads the bearer token from disk on every authorization. Pairs with a
//! secret mount or sidecar that rotates the file; how the token gets there is
//! not this service's concern.

use common::Secret;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;
use tracing::{info, instrument};
use transport::{AuthorizeError, Authorizer, Credential};

/// Reads the credential from `path`, bounded by `timeout`.
pub struct FileAuthorizer {
    path: PathBuf,
    timeout: Duration,
}

impl FileAuthorizer {
    pub fn new(path: PathBuf, timeout: Duration) -> Self {
        Self { path, timeout }
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    async fn read_credential(&self) -> Result<Credential, AuthorizeError> {
        let contents = tokio::time::timeout(self.timeout, tokio::fs::read_to_string(&self.path))
            .await
            .map_err(|_| AuthorizeError::TimedOut(self.timeout))?
            .map_err(|e| {
                AuthorizeError::Unavailable(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                ))
            })?;
        let contents = Secret::new(contents);

        let token = contents.expose().trim();
        if token.is_empty() {
            return Err(AuthorizeError::Unavailable(format!(
                "credential file {} is empty",
                self.path.display()
            )));
        }

        info!("credential loaded from file");
        Ok(Credential::new(token))
    }
}

impl Authorizer for FileAuthorizer {
    fn authorize(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Credential, AuthorizeError>> + Send + '_>> {
        Box::pin(self.read_credential())
    }
}
