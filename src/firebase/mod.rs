//! Firebase REST adapters for the collaborator traits.
//!
//! - [`RealtimeDatabase`]: Realtime Database REST API ([`crate::store::Database`])
//! - [`IdentityToolkit`]: Identity Toolkit REST API ([`crate::identity::IdentityProvider`])
//!
//! Topic messaging lives in [`crate::notify::FcmClient`].

mod database;
mod identity;

pub use database::RealtimeDatabase;
pub use identity::IdentityToolkit;

use crate::config::Config;
use std::path::PathBuf;
use std::time::Duration;

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// OAuth2 bearer token sent on admin calls.
///
/// Google access tokens expire after about an hour. A `File` source is
/// re-read on every call, so whatever refreshes the file (a sidecar running
/// `gcloud auth print-access-token` on a timer, a mounted secret) rotates
/// the token without a restart. A `Static` token has to be replaced by
/// restarting with a new `FIREBASE_ACCESS_TOKEN`.
#[derive(Debug, Clone)]
pub enum AccessToken {
    Static(String),
    File(PathBuf),
}

/// Token file could not be used
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("cannot read access token file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("access token file {} is empty", .0.display())]
    Empty(PathBuf),
}

impl AccessToken {
    /// `FIREBASE_ACCESS_TOKEN_FILE` takes precedence over `FIREBASE_ACCESS_TOKEN`
    pub fn from_config(config: &Config) -> Option<Self> {
        config
            .firebase_access_token_file
            .clone()
            .map(Self::File)
            .or_else(|| config.firebase_access_token.clone().map(Self::Static))
    }

    /// The token to send right now
    pub async fn current(&self) -> Result<String, TokenError> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::File(path) => {
                let raw = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| TokenError::Read {
                        path: path.clone(),
                        source,
                    })?;
                let token = raw.trim();
                if token.is_empty() {
                    return Err(TokenError::Empty(path.clone()));
                }
                Ok(token.to_string())
            }
        }
    }
}
