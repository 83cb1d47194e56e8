//! Host authorization policy
//!
//! Decides, per registry host, whether cloud-identity authentication
//! applies at all. Hosts outside the policy get anonymous access.

/// Domain suffixes of the registry service, public cloud first
const DEFAULT_SUFFIXES: &[&str] = &["azurecr.io", "azurecr.cn", "azurecr.us", "azurecr.de"];

/// Suffix policy over registry hostnames
///
/// Matching is on whole domain labels: the host must be a true subdomain of
/// a configured suffix. `registry.azurecr.io` matches; `azurecr.io` itself,
/// `notazurecr.io`, and `foo.azurecr.io.evil.com` do not.
#[derive(Debug, Clone)]
pub struct HostPolicy {
    suffixes: Vec<String>,
}

impl Default for HostPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect())
    }
}

impl HostPolicy {
    pub fn new(suffixes: Vec<String>) -> Self {
        Self {
            suffixes: suffixes.into_iter().map(|s| s.to_ascii_lowercase()).collect(),
        }
    }

    /// True iff the host requires identity-based authentication
    pub fn applies_to(&self, host: &str) -> bool {
        let host = host.split(':').next().unwrap_or(host).to_ascii_lowercase();
        let labels: Vec<&str> = host.split('.').collect();

        self.suffixes.iter().any(|suffix| {
            let suffix_labels: Vec<&str> = suffix.split('.').collect();
            labels.len() > suffix_labels.len()
                && labels[labels.len() - suffix_labels.len()..] == suffix_labels[..]
        })
    }
}
