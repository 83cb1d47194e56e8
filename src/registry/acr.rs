//! Refresh-token exchange against the registry's token endpoint
//!
//! Implements the documented exchange: an identity-provider access token is
//! POSTed to `https://{host}/oauth2/exchange` and traded for a registry
//! refresh token, which then acts as the password for registry
//! authentication. The username accompanying it is the nil UUID, the
//! registry's marker for "this password is a token".

use crate::error::{PullerError, Result};
use crate::identity::TokenCredential;
use crate::logging::Logger;
use crate::registry::policy::HostPolicy;
use crate::transfer::{CredentialResolver, Credentials};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Scope requested from the identity provider for the exchange
pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";

/// Upper bound on the exchange response body
const EXCHANGE_BODY_LIMIT: usize = 1 << 20;

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    refresh_token: String,
}

/// Resolves per-host registry credentials through the token exchange
///
/// Hosts outside the [`HostPolicy`] resolve to empty credentials without
/// any network traffic; the transfer engine treats that as anonymous
/// access. Safe for concurrent use across hosts.
pub struct AcrCredentialResolver {
    client: reqwest::Client,
    credential: Arc<dyn TokenCredential>,
    policy: HostPolicy,
    cancel: CancellationToken,
    output: Logger,
    exchange_base: Option<String>,
}

impl AcrCredentialResolver {
    pub fn builder(
        client: reqwest::Client,
        credential: Arc<dyn TokenCredential>,
    ) -> AcrCredentialResolverBuilder {
        AcrCredentialResolverBuilder::new(client, credential)
    }

    fn exchange_url(&self, host: &str) -> String {
        match &self.exchange_base {
            Some(base) => format!("{}/oauth2/exchange", base.trim_end_matches('/')),
            None => format!("https://{}/oauth2/exchange", host),
        }
    }

    async fn exchange(&self, host: &str) -> Result<Credentials> {
        let token = self.credential.get_token(MANAGEMENT_SCOPE).await?;
        self.output.detail(&format!(
            "Access token obtained for {} (length: {} chars)",
            host,
            token.token.len()
        ));

        let params = [
            ("grant_type", "access_token"),
            ("service", host),
            ("access_token", token.token.as_str()),
        ];

        let response = self
            .client
            .post(self.exchange_url(host))
            .form(&params)
            .send()
            .await
            .map_err(|e| PullerError::Network(format!("token exchange with {}: {}", host, e)))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(PullerError::ExchangeStatus {
                host: host.to_string(),
                status: status.as_u16(),
            });
        }

        let body = read_body_capped(response, EXCHANGE_BODY_LIMIT).await?;
        let parsed: ExchangeResponse = serde_json::from_slice(&body).map_err(|e| {
            PullerError::ExchangeProtocol {
                host: host.to_string(),
                message: format!("malformed exchange response: {}", e),
            }
        })?;

        self.output
            .detail(&format!("Refresh token obtained for {}", host));

        Ok(Credentials {
            username: token_username(),
            secret: parsed.refresh_token,
        })
    }
}

#[async_trait]
impl CredentialResolver for AcrCredentialResolver {
    async fn get_credentials(&self, _image_ref: &str, host: &str) -> Result<Credentials> {
        if !self.policy.applies_to(host) {
            self.output
                .detail(&format!("{} is outside the registry policy, using anonymous access", host));
            return Ok(Credentials::default());
        }

        tokio::select! {
            _ = self.cancel.cancelled() => Err(PullerError::Cancelled),
            result = self.exchange(host) => result,
        }
    }
}

pub struct AcrCredentialResolverBuilder {
    client: reqwest::Client,
    credential: Arc<dyn TokenCredential>,
    policy: HostPolicy,
    cancel: CancellationToken,
    output: Logger,
    exchange_base: Option<String>,
}

impl AcrCredentialResolverBuilder {
    pub fn new(client: reqwest::Client, credential: Arc<dyn TokenCredential>) -> Self {
        Self {
            client,
            credential,
            policy: HostPolicy::default(),
            cancel: CancellationToken::new(),
            output: Logger::new_quiet(),
            exchange_base: None,
        }
    }

    pub fn with_policy(mut self, policy: HostPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_logger(mut self, output: Logger) -> Self {
        self.output = output;
        self
    }

    /// Redirect the exchange POST to a fixed base URL; the `service` form
    /// field still carries the real host
    pub fn with_exchange_base(mut self, base: impl Into<String>) -> Self {
        self.exchange_base = Some(base.into());
        self
    }

    pub fn build(self) -> AcrCredentialResolver {
        AcrCredentialResolver {
            client: self.client,
            credential: self.credential,
            policy: self.policy,
            cancel: self.cancel,
            output: self.output,
            exchange_base: self.exchange_base,
        }
    }
}

/// Sentinel username telling the registry the secret is a token
pub fn token_username() -> String {
    Uuid::nil().to_string()
}

/// Read at most `cap` bytes of the response body
///
/// Reading stops at the cap; whatever was collected becomes the parse
/// input. The response is dropped on return, which releases the
/// connection on every path.
async fn read_body_capped(mut response: reqwest::Response, cap: usize) -> Result<Vec<u8>> {
    let mut body: Vec<u8> = Vec::new();

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| PullerError::Network(format!("reading exchange response: {}", e)))?
    {
        let remaining = cap - body.len();
        if chunk.len() >= remaining {
            body.extend_from_slice(&chunk[..remaining]);
            break;
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}
