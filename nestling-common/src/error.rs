//! Common error types for Nestling

use thiserror::Error;

/// Common result type for Nestling operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the Nestling client core
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed stage descriptor (bad stage type or unparseable value).
    /// The only variant that surfaces to the UI layer.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network-level failure talking to the backend
    #[error("Network error: {0}")]
    Network(String),

    /// Remote call exceeded its bounded timeout
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Persisted cache could not read or write its backing storage
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error (wraps serde_json::Error)
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a retry of the same operation could plausibly succeed.
    ///
    /// Only transport-level failures are recoverable; validation and
    /// storage errors are not retried.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_and_timeout_are_recoverable() {
        assert!(Error::Network("connection refused".to_string()).is_recoverable());
        assert!(Error::Timeout(25_000).is_recoverable());
    }

    #[test]
    fn test_validation_is_not_recoverable() {
        assert!(!Error::Validation("bad stage value".to_string()).is_recoverable());
        assert!(!Error::Storage("disk full".to_string()).is_recoverable());
    }
}
