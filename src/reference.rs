//! Image reference parsing
//!
//! Splits `host/repository[:tag][@digest]` into its parts, applying the
//! usual defaults: Docker Hub when no registry host is named, `library/`
//! for bare official-image names, `latest` when no tag is given.

use crate::error::{PullerError, Result};
use std::fmt;

const DEFAULT_REGISTRY_HOST: &str = "registry-1.docker.io";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    original: String,
    pub host: String,
    pub repository: String,
    pub tag: String,
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn parse(reference: &str) -> Result<Self> {
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(PullerError::Parse(
                "image reference cannot be empty".to_string(),
            ));
        }

        let (rest, digest) = match trimmed.split_once('@') {
            Some((rest, digest)) => (rest, Some(digest.to_string())),
            None => (trimmed, None),
        };

        // The first segment is a registry host only if it looks like one
        let (host, remainder) = match rest.split_once('/') {
            Some((first, remainder))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), remainder)
            }
            _ => (DEFAULT_REGISTRY_HOST.to_string(), rest),
        };
        let host = if host == "docker.io" {
            DEFAULT_REGISTRY_HOST.to_string()
        } else {
            host
        };

        let (repository, tag) = match remainder.rsplit_once(':') {
            Some((repository, tag)) => (repository.to_string(), tag.to_string()),
            None => (remainder.to_string(), "latest".to_string()),
        };
        if repository.is_empty() {
            return Err(PullerError::Parse(format!(
                "image reference {} has no repository",
                reference
            )));
        }

        let repository = if host == DEFAULT_REGISTRY_HOST && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository
        };

        Ok(Self {
            original: trimmed.to_string(),
            host,
            repository,
            tag,
            digest,
        })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_reference() {
        let parsed = ImageReference::parse("foo.azurecr.io/team/app:v1").unwrap();
        assert_eq!(parsed.host, "foo.azurecr.io");
        assert_eq!(parsed.repository, "team/app");
        assert_eq!(parsed.tag, "v1");
        assert_eq!(parsed.digest, None);
    }

    #[test]
    fn test_bare_name_gets_hub_defaults() {
        let parsed = ImageReference::parse("ubuntu").unwrap();
        assert_eq!(parsed.host, DEFAULT_REGISTRY_HOST);
        assert_eq!(parsed.repository, "library/ubuntu");
        assert_eq!(parsed.tag, "latest");
    }

    #[test]
    fn test_user_repository_stays_unprefixed() {
        let parsed = ImageReference::parse("someuser/app:2.0").unwrap();
        assert_eq!(parsed.host, DEFAULT_REGISTRY_HOST);
        assert_eq!(parsed.repository, "someuser/app");
        assert_eq!(parsed.tag, "2.0");
    }

    #[test]
    fn test_docker_io_normalizes_to_registry_host() {
        let parsed = ImageReference::parse("docker.io/library/alpine:3.20").unwrap();
        assert_eq!(parsed.host, DEFAULT_REGISTRY_HOST);
        assert_eq!(parsed.repository, "library/alpine");
    }

    #[test]
    fn test_localhost_with_port() {
        let parsed = ImageReference::parse("localhost:5000/app").unwrap();
        assert_eq!(parsed.host, "localhost:5000");
        assert_eq!(parsed.repository, "app");
        assert_eq!(parsed.tag, "latest");
    }

    #[test]
    fn test_digest_reference() {
        let parsed =
            ImageReference::parse("foo.azurecr.io/app@sha256:abcdef").unwrap();
        assert_eq!(parsed.repository, "app");
        assert_eq!(parsed.digest.as_deref(), Some("sha256:abcdef"));
    }

    #[test]
    fn test_display_preserves_the_original() {
        let parsed = ImageReference::parse("foo.azurecr.io/app:v1").unwrap();
        assert_eq!(parsed.to_string(), "foo.azurecr.io/app:v1");
    }

    #[test]
    fn test_empty_reference_is_rejected() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("   ").is_err());
    }
}
