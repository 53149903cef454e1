//! Error types for the cache and discovery core.
//!
//! Only failures that a caller can act on are surfaced. Corrupt snapshots and
//! failed write-through persistence are logged and recovered locally; "nothing
//! found" and "nothing embeddable" are not errors at all but
//! [`Resolution`](crate::discovery::Resolution) variants.

use std::time::Duration;
use thiserror::Error;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for the core.
#[derive(Error, Debug)]
pub enum Error {
    /// A persisted snapshot could not be parsed
    #[error("Cache corruption: {0}")]
    CacheCorruption(String),

    /// Write-through to the key-value store failed
    #[error("Persistence write failure: {0}")]
    PersistenceWriteFailure(#[from] StorageError),

    /// Upstream API or search provider failure
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON encoding/decoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure talking to a rate-limited upstream (metadata API or search provider).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Upstream timeout")]
    Timeout,

    /// The caller should back off; never retried internally.
    #[error("Rate limited by upstream (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Upstream returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Malformed upstream response: {0}")]
    Malformed(String),
}

impl UpstreamError {
    /// Short classification used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Network(_) => "network",
            Self::Status { .. } => "status",
            Self::Malformed(_) => "malformed",
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Whether a later attempt by the caller may succeed.
    ///
    /// Client errors (4xx other than 429) and malformed payloads won't fix
    /// themselves; everything else is transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::RateLimited { .. } | Self::Network(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Malformed(_) => false,
        }
    }

    /// Maps an HTTP status code the way upstream clients report it.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        if status == 429 {
            Self::RateLimited { retry_after: None }
        } else {
            Self::Status {
                status,
                message: message.into(),
            }
        }
    }
}

/// Failure of a [`KeyValueStore`](crate::storage::KeyValueStore) operation.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid storage key: {0:?}")]
    InvalidKey(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_classification() {
        assert!(UpstreamError::Timeout.is_retryable());
        assert!(UpstreamError::from_status(429, "slow down").is_rate_limited());
        assert!(UpstreamError::from_status(503, "unavailable").is_retryable());
        assert!(!UpstreamError::from_status(404, "missing").is_retryable());
        assert!(!UpstreamError::Malformed("bad json".into()).is_retryable());
        assert_eq!(UpstreamError::Network("reset".into()).kind(), "network");
    }

    #[test]
    fn test_error_conversions() {
        let err: Error = UpstreamError::Timeout.into();
        assert!(matches!(err, Error::Upstream(UpstreamError::Timeout)));

        let err: Error = StorageError::InvalidKey(String::new()).into();
        assert!(err.to_string().starts_with("Persistence write failure"));
    }
}
