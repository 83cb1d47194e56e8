//! Service principal credential configured from the environment
//!
//! Performs the OAuth2 client-credentials grant against the identity
//! provider's token endpoint using `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`,
//! and `AZURE_CLIENT_SECRET`.

use crate::error::{PullerError, Result};
use crate::identity::{AccessToken, TokenCredential};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, SystemTime};

const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

#[derive(Debug, Clone)]
struct ServicePrincipal {
    tenant_id: String,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

pub struct EnvironmentCredential {
    client: reqwest::Client,
    authority: String,
    principal: Option<ServicePrincipal>,
}

impl EnvironmentCredential {
    /// Read the service principal from the environment; an incomplete
    /// environment is not an error until a token is actually requested
    pub fn from_env(client: reqwest::Client) -> Self {
        let principal = match (
            std::env::var("AZURE_TENANT_ID"),
            std::env::var("AZURE_CLIENT_ID"),
            std::env::var("AZURE_CLIENT_SECRET"),
        ) {
            (Ok(tenant_id), Ok(client_id), Ok(client_secret))
                if !tenant_id.is_empty() && !client_id.is_empty() && !client_secret.is_empty() =>
            {
                Some(ServicePrincipal {
                    tenant_id,
                    client_id,
                    client_secret,
                })
            }
            _ => None,
        };

        Self {
            client,
            authority: DEFAULT_AUTHORITY.to_string(),
            principal,
        }
    }

    pub fn with_values(
        client: reqwest::Client,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            authority: DEFAULT_AUTHORITY.to_string(),
            principal: Some(ServicePrincipal {
                tenant_id: tenant_id.into(),
                client_id: client_id.into(),
                client_secret: client_secret.into(),
            }),
        }
    }

    /// Redirect token requests, e.g. at a local listener in tests
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }
}

#[async_trait]
impl TokenCredential for EnvironmentCredential {
    async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let principal = self.principal.as_ref().ok_or_else(|| {
            PullerError::Identity(
                "environment is not configured (AZURE_TENANT_ID, AZURE_CLIENT_ID, AZURE_CLIENT_SECRET)"
                    .to_string(),
            )
        })?;

        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority, principal.tenant_id
        );
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", principal.client_id.as_str()),
            ("client_secret", principal.client_secret.as_str()),
            ("scope", scope),
        ];

        let response = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| PullerError::Identity(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PullerError::Identity(format!(
                "token request rejected with status {}",
                status.as_u16()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| PullerError::Identity(format!("malformed token response: {}", e)))?;

        Ok(AccessToken {
            token: body.access_token,
            expires_on: body
                .expires_in
                .map(|secs| SystemTime::now() + Duration::from_secs(secs)),
        })
    }
}
