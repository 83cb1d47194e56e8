//! Cloud identity credentials
//!
//! This module produces bearer access tokens for a requested scope. The
//! [`TokenCredential`] trait is the seam the credential exchange depends on;
//! [`DefaultAzureCredential`] resolves a token by trying each configured
//! source in order, the way the platform SDK chains do.

pub mod environment;
pub mod managed_identity;

pub use environment::EnvironmentCredential;
pub use managed_identity::ManagedIdentityCredential;

use crate::error::{PullerError, Result};
use async_trait::async_trait;
use std::fmt;
use std::time::SystemTime;

/// Bearer access token with its expiry
///
/// The token value is deliberately excluded from `Debug` output; callers
/// log its length at most.
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: Option<SystemTime>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &format!("<redacted, {} chars>", self.token.len()))
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// A source of bearer access tokens for a given scope
///
/// Implementations must be safe for concurrent use; the credential exchange
/// may request tokens for several hosts at once.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn get_token(&self, scope: &str) -> Result<AccessToken>;
}

/// Chain credential that tries each source in order per call
///
/// No token is cached between calls; a failure of every source is reported
/// as a single identity error naming what was attempted.
pub struct DefaultAzureCredential {
    sources: Vec<(&'static str, Box<dyn TokenCredential>)>,
}

impl DefaultAzureCredential {
    pub fn new(client: reqwest::Client) -> Self {
        let sources: Vec<(&'static str, Box<dyn TokenCredential>)> = vec![
            (
                "EnvironmentCredential",
                Box::new(EnvironmentCredential::from_env(client.clone())),
            ),
            (
                "ManagedIdentityCredential",
                Box::new(ManagedIdentityCredential::new(client)),
            ),
        ];
        Self { sources }
    }

    /// Build a chain from explicit sources, first match wins
    pub fn with_sources(sources: Vec<(&'static str, Box<dyn TokenCredential>)>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl TokenCredential for DefaultAzureCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let mut attempts = Vec::new();

        for (name, source) in &self.sources {
            match source.get_token(scope).await {
                Ok(token) => return Ok(token),
                Err(err) => attempts.push(format!("{}: {}", name, err)),
            }
        }

        Err(PullerError::Identity(format!(
            "no credential source succeeded: [{}]",
            attempts.join("; ")
        )))
    }
}

/// Fixed-token credential, used to wire tests without network access
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn get_token(&self, _scope: &str) -> Result<AccessToken> {
        Ok(AccessToken {
            token: self.token.clone(),
            expires_on: None,
        })
    }
}
