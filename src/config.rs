//! Configuration management module
//!
//! Defaults are resolved once at startup from the environment plus
//! compiled-in values; the rest of the crate only ever sees the resulting
//! [`PullConfig`].

use crate::error::{PullerError, Result};
use serde::{Deserialize, Serialize};

/// Environment override for the image store endpoint
pub const ADDRESS_ENV: &str = "CONTAINERD_ADDRESS";
/// Environment override for the store namespace
pub const NAMESPACE_ENV: &str = "CONTAINERD_NAMESPACE";

/// Compiled-in store endpoint, used when the environment is silent
pub const DEFAULT_ADDRESS: &str = ".acr-pull";
pub const DEFAULT_NAMESPACE: &str = "default";

/// Pull operation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullConfig {
    /// Image store endpoint (a local content-store root)
    pub address: String,
    /// Namespace for store objects
    pub namespace: String,
    /// Timeout for individual network operations, in seconds
    pub timeout: u64,
    /// Concurrent layer download workers
    pub concurrency: usize,
    /// Skip TLS certificate verification
    pub skip_tls: bool,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            timeout: 300,
            concurrency: 3,
            skip_tls: false,
        }
    }
}

impl PullConfig {
    /// Create config from environment variables and compiled defaults
    pub fn from_env() -> Self {
        Self::from_parts(
            std::env::var(ADDRESS_ENV).ok(),
            std::env::var(NAMESPACE_ENV).ok(),
        )
    }

    /// Resolve address and namespace overrides, treating empty values as unset
    pub fn from_parts(address: Option<String>, namespace: Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = address {
            if !addr.is_empty() {
                config.address = addr;
            }
        }
        if let Some(ns) = namespace {
            if !ns.is_empty() {
                config.namespace = ns;
            }
        }

        config
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_skip_tls(mut self, skip_tls: bool) -> Self {
        self.skip_tls = skip_tls;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(PullerError::Config(
                "Store address cannot be empty".to_string(),
            ));
        }
        if self.namespace.is_empty() {
            return Err(PullerError::Config(
                "Namespace cannot be empty".to_string(),
            ));
        }
        if self.timeout == 0 {
            return Err(PullerError::Config(
                "Timeout must be greater than 0".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(PullerError::Config(
                "Concurrency must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
