//! Credential acquisition for the Drive API.
//!
//! Authentication lives behind [`CredentialProvider`] so the rest of the crate
//! only ever sees a ready [`Credential`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use drive3::oauth2;
use drive3::oauth2::authenticator::{Authenticator, DefaultHyperClient, HyperClientBuilder};
use thiserror::Error;

/// Authenticator as built by the yup-oauth2 builders with their default client.
pub type Credential = Authenticator<<DefaultHyperClient as HyperClientBuilder>::Connector>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credentials configured: set GOOGLE_SERVICE_ACCOUNT_KEY or --client-secret")]
    NotConfigured,

    #[error("invalid service account key: {0}")]
    InvalidKey(String),

    #[error("failed to read client secret {path}: {source}")]
    ClientSecret {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build authenticator: {0}")]
    Authenticator(#[source] std::io::Error),

    #[error("failed to remove token file {path}: {source}")]
    TokenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where credentials come from.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// URL-safe base64 of a service account JSON key.
    ServiceAccount { encoded_key: String },
    /// OAuth client secret for the installed-app (browser redirect) flow.
    InstalledApp { client_secret: PathBuf },
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn acquire(&self) -> Result<Credential, AuthError>;

    /// Drops any cached token so the next `acquire` starts fresh.
    fn invalidate(&self) -> Result<(), AuthError>;
}

/// Provider that caches tokens in a single token file shared by every run.
#[derive(Debug, Clone)]
pub struct TokenFileProvider {
    source: CredentialSource,
    token_file: PathBuf,
}

impl TokenFileProvider {
    pub fn new(source: CredentialSource, token_file: impl Into<PathBuf>) -> Self {
        Self {
            source,
            token_file: token_file.into(),
        }
    }

    pub fn token_file(&self) -> &Path {
        &self.token_file
    }
}

#[async_trait]
impl CredentialProvider for TokenFileProvider {
    async fn acquire(&self) -> Result<Credential, AuthError> {
        match &self.source {
            CredentialSource::ServiceAccount { encoded_key } => {
                let key = decode_service_account_key(encoded_key)?;
                oauth2::ServiceAccountAuthenticator::builder(key)
                    .persist_tokens_to_disk(&self.token_file)
                    .build()
                    .await
                    .map_err(AuthError::Authenticator)
            }
            CredentialSource::InstalledApp { client_secret } => {
                let secret = oauth2::read_application_secret(client_secret)
                    .await
                    .map_err(|source| AuthError::ClientSecret {
                        path: client_secret.clone(),
                        source,
                    })?;
                oauth2::InstalledFlowAuthenticator::builder(
                    secret,
                    oauth2::InstalledFlowReturnMethod::HTTPRedirect,
                )
                .persist_tokens_to_disk(&self.token_file)
                .build()
                .await
                .map_err(AuthError::Authenticator)
            }
        }
    }

    fn invalidate(&self) -> Result<(), AuthError> {
        match std::fs::remove_file(&self.token_file) {
            Ok(()) => {
                tracing::info!(path = %self.token_file.display(), "removed cached token");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(AuthError::TokenFile {
                path: self.token_file.clone(),
                source,
            }),
        }
    }
}

/// Decodes the base64 key and parses it as a service account key.
pub fn decode_service_account_key(encoded: &str) -> Result<oauth2::ServiceAccountKey, AuthError> {
    let bytes = URL_SAFE
        .decode(encoded.trim().as_bytes())
        .map_err(|e| AuthError::InvalidKey(format!("not base64: {e}")))?;
    let json = String::from_utf8(bytes).map_err(|e| AuthError::InvalidKey(e.to_string()))?;
    oauth2::parse_service_account_key(json).map_err(|e| AuthError::InvalidKey(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage_keys() {
        assert!(matches!(
            decode_service_account_key("%%%"),
            Err(AuthError::InvalidKey(_))
        ));

        let not_a_key = URL_SAFE.encode(b"{\"hello\": 1}");
        assert!(matches!(
            decode_service_account_key(&not_a_key),
            Err(AuthError::InvalidKey(_))
        ));
    }

    #[test]
    fn invalidate_removes_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let token = dir.path().join("token.json");
        std::fs::write(&token, "{}").unwrap();

        let provider = TokenFileProvider::new(
            CredentialSource::InstalledApp {
                client_secret: dir.path().join("secret.json"),
            },
            &token,
        );
        provider.invalidate().unwrap();
        assert!(!token.exists());

        // A second call has nothing left to delete.
        provider.invalidate().unwrap();
    }
}
