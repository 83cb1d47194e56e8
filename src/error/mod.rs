//! Error types for identity, exchange, and transfer operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PullerError>;

#[derive(Debug, Error)]
pub enum PullerError {
    /// Bad or unusable configuration, detected before any network work
    #[error("Configuration error: {0}")]
    Config(String),

    /// No usable cloud credential source, or the token request was rejected
    #[error("Identity error: {0}")]
    Identity(String),

    /// The registry token endpoint answered with an unexpected status
    #[error("Token exchange with {host} failed: unexpected status code {status}")]
    ExchangeStatus { host: String, status: u16 },

    /// The registry token endpoint answered 200 but the body was unusable
    #[error("Token exchange with {host} failed: {message}")]
    ExchangeProtocol { host: String, message: String },

    /// Registry protocol errors unrelated to authentication
    #[error("Registry error: {0}")]
    Registry(String),

    /// Transfer engine errors (storage, digest mismatch, interrupted streams)
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Network related errors
    #[error("Network error: {0}")]
    Network(String),

    /// Parse errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// File IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// The governing operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<std::io::Error> for PullerError {
    fn from(err: std::io::Error) -> Self {
        PullerError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PullerError {
    fn from(err: serde_json::Error) -> Self {
        PullerError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for PullerError {
    fn from(err: reqwest::Error) -> Self {
        PullerError::Network(err.to_string())
    }
}

impl From<url::ParseError> for PullerError {
    fn from(err: url::ParseError) -> Self {
        PullerError::Parse(err.to_string())
    }
}
