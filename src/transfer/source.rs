//! Registry-backed transfer source
//!
//! Speaks the Docker Registry HTTP API v2: bearer-challenge
//! authentication, manifest resolution with index platform selection, and
//! digest-verified blob download. Credentials come from the injected
//! resolver; empty credentials mean the token request runs anonymously.

use crate::error::{PullerError, Result};
use crate::logging::Logger;
use crate::reference::ImageReference;
use crate::transfer::CredentialResolver;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

const ACCEPTED_MANIFEST_TYPES: &[&str] = &[
    "application/vnd.docker.distribution.manifest.v2+json",
    "application/vnd.oci.image.manifest.v1+json",
    "application/vnd.docker.distribution.manifest.list.v2+json",
    "application/vnd.oci.image.index.v1+json",
];

#[derive(Debug, Clone, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType", default)]
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    platform: Option<Platform>,
}

#[derive(Debug, Clone, Deserialize)]
struct Platform {
    architecture: String,
    os: String,
}

#[derive(Debug, Deserialize)]
struct ImageManifest {
    config: Descriptor,
    layers: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct ImageIndex {
    manifests: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct RealmTokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

#[derive(Debug)]
struct BearerChallenge {
    realm: String,
    service: String,
}

/// A resolved manifest plus everything needed to fetch its blobs
#[derive(Debug)]
pub struct ResolvedImage {
    pub digest: String,
    pub manifest_bytes: Vec<u8>,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

pub struct OciRegistrySource {
    client: reqwest::Client,
    reference: ImageReference,
    resolver: Arc<dyn CredentialResolver>,
    cancel: CancellationToken,
    output: Logger,
    use_http: bool,
    bearer: OnceCell<Option<String>>,
}

impl OciRegistrySource {
    pub fn new(
        client: reqwest::Client,
        reference: ImageReference,
        resolver: Arc<dyn CredentialResolver>,
        cancel: CancellationToken,
        output: Logger,
    ) -> Self {
        Self {
            client,
            reference,
            resolver,
            cancel,
            output,
            use_http: false,
            bearer: OnceCell::new(),
        }
    }

    /// Talk plain HTTP to the registry, for local registries and tests
    pub fn with_http(mut self, use_http: bool) -> Self {
        self.use_http = use_http;
        self
    }

    pub fn reference(&self) -> &ImageReference {
        &self.reference
    }

    fn base_url(&self) -> String {
        let scheme = if self.use_http { "http" } else { "https" };
        format!("{}://{}", scheme, self.reference.host)
    }

    /// Race a request against the governing cancellation signal
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(PullerError::Cancelled),
            response = request.send() => {
                response.map_err(|e| PullerError::Network(e.to_string()))
            }
        }
    }

    /// Resolve the manifest the reference points at
    ///
    /// A manifest index is narrowed to the linux/amd64 entry (first entry
    /// as fallback) and re-fetched by digest.
    pub async fn resolve(&self) -> Result<ResolvedImage> {
        let target = self
            .reference
            .digest
            .clone()
            .unwrap_or_else(|| self.reference.tag.clone());

        let (bytes, digest) = self.fetch_manifest(&target).await?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| PullerError::Registry(format!("malformed manifest: {}", e)))?;

        if value.get("manifests").is_some() {
            let index: ImageIndex = serde_json::from_value(value)
                .map_err(|e| PullerError::Registry(format!("malformed manifest index: {}", e)))?;
            let chosen = select_platform(&index)?;
            self.output.detail(&format!(
                "Manifest index narrowed to {}",
                chosen.digest
            ));
            let (bytes, digest) = self.fetch_manifest(&chosen.digest).await?;
            return self.parse_resolved(bytes, digest);
        }

        self.parse_resolved(bytes, digest)
    }

    fn parse_resolved(&self, bytes: Vec<u8>, digest: String) -> Result<ResolvedImage> {
        let manifest: ImageManifest = serde_json::from_slice(&bytes)
            .map_err(|e| PullerError::Registry(format!("malformed manifest: {}", e)))?;
        Ok(ResolvedImage {
            digest,
            manifest_bytes: bytes,
            config: manifest.config,
            layers: manifest.layers,
        })
    }

    async fn fetch_manifest(&self, target: &str) -> Result<(Vec<u8>, String)> {
        let token = self.bearer_token().await?;
        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.base_url(),
            self.reference.repository,
            target
        );
        self.output.detail(&format!("Fetching manifest {}", url));

        let mut request = self
            .client
            .get(&url)
            .header("Accept", ACCEPTED_MANIFEST_TYPES.join(", "));
        if let Some(token) = &token {
            request = request.bearer_auth(token);
        }

        let response = self.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PullerError::Registry(format!(
                "manifest request for {} failed with status {}",
                self.reference, status.as_u16()
            )));
        }

        let header_digest = response
            .headers()
            .get("Docker-Content-Digest")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PullerError::Network(e.to_string()))?
            .to_vec();

        // Some registries omit the digest header; hash the payload instead
        let digest = header_digest
            .unwrap_or_else(|| format!("sha256:{}", hex::encode(Sha256::digest(&bytes))));

        Ok((bytes, digest))
    }

    /// Download one blob to `dest`, verifying its digest on the way through
    pub async fn download_blob(&self, digest: &str, dest: &Path) -> Result<u64> {
        let token = self.bearer_token().await?;
        let url = format!(
            "{}/v2/{}/blobs/{}",
            self.base_url(),
            self.reference.repository,
            digest
        );

        let mut request = self.client.get(&url);
        if let Some(token) = &token {
            request = request.bearer_auth(token);
        }

        let mut response = self.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PullerError::Registry(format!(
                "blob request for {} failed with status {}",
                digest, status.as_u16()
            )));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut hasher = Sha256::new();
        let mut written: u64 = 0;

        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => {
                    drop(file);
                    let _ = tokio::fs::remove_file(dest).await;
                    return Err(PullerError::Cancelled);
                }
                chunk = response.chunk() => {
                    chunk.map_err(|e| PullerError::Network(e.to_string()))?
                }
            };
            let Some(chunk) = chunk else { break };
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        let computed = format!("sha256:{}", hex::encode(hasher.finalize()));
        if digest.starts_with("sha256:") && computed != digest {
            let _ = tokio::fs::remove_file(dest).await;
            return Err(PullerError::Transfer(format!(
                "digest mismatch for {}: downloaded content hashes to {}",
                digest, computed
            )));
        }

        Ok(written)
    }

    /// Fetch the pull-scoped bearer token once per source, lazily
    ///
    /// An open registry (no challenge on `/v2/`) needs no token and the
    /// credential resolver is never consulted.
    async fn bearer_token(&self) -> Result<Option<String>> {
        self.bearer
            .get_or_try_init(|| self.authorize())
            .await
            .map(|token| token.clone())
    }

    async fn authorize(&self) -> Result<Option<String>> {
        let url = format!("{}/v2/", self.base_url());
        let response = self.send(self.client.get(&url)).await?;

        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            self.output
                .detail("Registry answered without a challenge, proceeding unauthenticated");
            return Ok(None);
        }

        let challenge = response
            .headers()
            .get("www-authenticate")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer_challenge);
        let Some(challenge) = challenge else {
            self.output
                .detail("No bearer challenge offered, proceeding unauthenticated");
            return Ok(None);
        };

        let realm = url::Url::parse(&challenge.realm)
            .map_err(|e| PullerError::Registry(format!("invalid challenge realm: {}", e)))?;

        let credentials = self
            .resolver
            .get_credentials(&self.reference.to_string(), &self.reference.host)
            .await?;

        let scope = format!("repository:{}:pull", self.reference.repository);
        let mut params = vec![("scope", scope.as_str())];
        if !challenge.service.is_empty() {
            params.push(("service", challenge.service.as_str()));
        }

        let mut request = self.client.get(realm).query(&params);
        if credentials.is_empty() {
            self.output.detail("Requesting anonymous pull token");
        } else {
            self.output.detail(&format!(
                "Requesting pull token as {}",
                credentials.username
            ));
            request = request.basic_auth(&credentials.username, Some(&credentials.secret));
        }

        let response = self.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PullerError::Registry(format!(
                "token request for {} failed with status {}",
                self.reference.host, status.as_u16()
            )));
        }

        let body: RealmTokenResponse = response
            .json()
            .await
            .map_err(|e| PullerError::Registry(format!("malformed token response: {}", e)))?;
        let token = body.token.or(body.access_token).ok_or_else(|| {
            PullerError::Registry("token response carried no usable token".to_string())
        })?;

        self.output
            .detail(&format!("Pull token obtained (length: {} chars)", token.len()));
        Ok(Some(token))
    }
}

/// Parse `Bearer realm="...",service="..."` challenge headers
fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let params_str = header.strip_prefix("Bearer ")?;
    let mut params = HashMap::new();

    for param in params_str.split(',') {
        let param = param.trim();
        if let Some(eq_pos) = param.find('=') {
            let key = param[..eq_pos].trim();
            let value = param[eq_pos + 1..].trim().trim_matches('"');
            params.insert(key, value);
        }
    }

    params.get("realm").map(|realm| BearerChallenge {
        realm: realm.to_string(),
        service: params.get("service").unwrap_or(&"").to_string(),
    })
}

fn select_platform(index: &ImageIndex) -> Result<&Descriptor> {
    index
        .manifests
        .iter()
        .find(|d| {
            d.platform
                .as_ref()
                .is_some_and(|p| p.os == "linux" && p.architecture == "amd64")
        })
        .or_else(|| index.manifests.first())
        .ok_or_else(|| PullerError::Registry("manifest index is empty".to_string()))
}
