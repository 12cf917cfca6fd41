//! Bearer token signer

use crate::{Credential, Request, SignError, Signer};
use reqwest::header::{AUTHORIZATION, HeaderValue};

/// Sets `Authorization: Bearer <token>`, replacing whatever was there.
///
/// The header value is marked sensitive so hyper/reqwest never log it.
#[derive(Debug, Clone, Default)]
pub struct BearerSigner;

impl Signer for BearerSigner {
    fn sign(&self, request: &mut Request, credential: &Credential) -> Result<(), SignError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", credential.token()))
            .map_err(|e| SignError::InvalidCredential(e.to_string()))?;
        value.set_sensitive(true);
        request.headers.insert(AUTHORIZATION, value);
        Ok(())
    }
}
