//! Error types for the push storage layer.

use thiserror::Error;

/// Result type alias for push storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the push storage layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Errors reported by the backing key-value store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// A record is missing a field the operation needs.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// The startup round-trip against the store did not behave as expected.
    #[error("preflight check failed: {0}")]
    Preflight(String),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors surfaced by a [`KeyValueStore`](crate::kv::KeyValueStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The requested key does not exist.
    #[error("item not found")]
    NotFound,

    /// A conditional write's guard did not hold.
    #[error("conditional check failed")]
    ConditionFailed,

    /// The store's provisioned throughput was exceeded.
    #[error("provisioned throughput exceeded")]
    Throttled,

    /// The store returned a malformed or unexpected response.
    #[error("malformed store response: {0}")]
    TransportAnomaly(String),
}

impl Error {
    /// Whether this is a missing-key error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Store(StoreError::NotFound))
    }

    /// Whether this is a failed conditional write.
    pub fn is_condition_failed(&self) -> bool {
        matches!(self, Error::Store(StoreError::ConditionFailed))
    }

    /// Whether the store rejected the request for capacity reasons.
    pub fn is_throttled(&self) -> bool {
        matches!(self, Error::Store(StoreError::Throttled))
    }

    /// Whether the store answered with something that could not be understood.
    pub fn is_transport_anomaly(&self) -> bool {
        matches!(self, Error::Store(StoreError::TransportAnomaly(_)))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Store(StoreError::TransportAnomaly(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(Error::from(StoreError::NotFound).is_not_found());
        assert!(Error::from(StoreError::ConditionFailed).is_condition_failed());
        assert!(Error::from(StoreError::Throttled).is_throttled());
        assert!(!Error::Config("x".into()).is_throttled());
    }

    #[test]
    fn test_bincode_errors_are_transport_anomalies() {
        let err: bincode::Error = bincode::deserialize::<String>(&[0xff]).unwrap_err();
        assert!(Error::from(err).is_transport_anomaly());
    }
}
