//! Resolution of the Harbor endpoint and credential for a declared object.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::{ErrorKind, RemoteError};
use crate::resource::HarborTarget;

#[derive(Debug, Error)]
pub enum TargetError {
    #[error("harbor target apiUrl is required")]
    ApiUrlRequired,

    #[error("harbor target username is required")]
    UsernameRequired,

    #[error("harbor target needs either password or passwordFile")]
    CredentialRequired,

    #[error("failed to read password file {path}: {source}")]
    PasswordFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// No client could be built for the resolved endpoint.
    #[error("harbor client: {0}")]
    Client(#[source] RemoteError),
}

impl TargetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TargetError::PasswordFile { .. } => ErrorKind::Transient,
            TargetError::Client(e) => e.kind,
            _ => ErrorKind::Validation,
        }
    }
}

/// Secret string that never shows up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Resolved Harbor endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarborEndpoint {
    /// API base URL, e.g. `https://harbor.example/api/v2.0`.
    pub url: String,
    pub username: String,
    pub secret: Secret,
}

#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve(&self, target: &HarborTarget) -> Result<HarborEndpoint, TargetError>;
}

/// Reads the credential from the declared target itself: inline `password`
/// first, then the contents of `passwordFile`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecTargetResolver;

#[async_trait]
impl TargetResolver for SpecTargetResolver {
    async fn resolve(&self, target: &HarborTarget) -> Result<HarborEndpoint, TargetError> {
        let url = target.api_url.trim().trim_end_matches('/');
        if url.is_empty() {
            return Err(TargetError::ApiUrlRequired);
        }
        if target.username.trim().is_empty() {
            return Err(TargetError::UsernameRequired);
        }

        let secret = match (&target.password, &target.password_file) {
            (Some(password), _) if !password.is_empty() => password.clone(),
            (_, Some(path)) => tokio::fs::read_to_string(path)
                .await
                .map(|s| s.trim_end_matches(['\r', '\n']).to_string())
                .map_err(|source| TargetError::PasswordFile {
                    path: path.display().to_string(),
                    source,
                })?,
            _ => return Err(TargetError::CredentialRequired),
        };

        Ok(HarborEndpoint {
            url: url.to_string(),
            username: target.username.clone(),
            secret: Secret::new(secret),
        })
    }
}
