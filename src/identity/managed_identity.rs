//! Managed identity credential via the instance metadata service

use crate::error::{PullerError, Result};
use crate::identity::{AccessToken, TokenCredential};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, SystemTime};

const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";

/// IMDS returns numeric fields as JSON strings
#[derive(Debug, Deserialize)]
struct ImdsTokenResponse {
    access_token: String,
    expires_in: Option<String>,
}

pub struct ManagedIdentityCredential {
    client: reqwest::Client,
    endpoint: String,
}

impl ManagedIdentityCredential {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            endpoint: IMDS_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// The metadata service speaks resource URIs, not scopes
fn resource_from_scope(scope: &str) -> &str {
    scope.strip_suffix("/.default").unwrap_or(scope)
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let response = self
            .client
            .get(&self.endpoint)
            .header("Metadata", "true")
            .query(&[
                ("api-version", IMDS_API_VERSION),
                ("resource", resource_from_scope(scope)),
            ])
            .send()
            .await
            .map_err(|e| {
                PullerError::Identity(format!("instance metadata service unreachable: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PullerError::Identity(format!(
                "instance metadata service rejected the request with status {}",
                status.as_u16()
            )));
        }

        let body: ImdsTokenResponse = response
            .json()
            .await
            .map_err(|e| PullerError::Identity(format!("malformed metadata response: {}", e)))?;

        let expires_on = body
            .expires_in
            .as_deref()
            .and_then(|secs| secs.parse::<u64>().ok())
            .map(|secs| SystemTime::now() + Duration::from_secs(secs));

        Ok(AccessToken {
            token: body.access_token,
            expires_on,
        })
    }
}
