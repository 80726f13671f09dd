//! Protocol-wide error taxonomy.
//!
//! Every subsystem crate defines its own `thiserror` enum and converts into
//! [`Error`], so callers can branch on the class of failure without knowing
//! which subsystem raised it.

use thiserror::Error;

/// Class of a protocol failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed, unsigned or stale input. Rejected at the boundary.
    Validation,
    /// Unknown ride, candidacy, profile or record.
    NotFound,
    /// Duplicate ride id, double completion, duplicate vote.
    Conflict,
    /// Relay unreachable or timed out. Retry or serve from cache.
    TransientNetwork,
    /// Unauthorized dispute resolution.
    Arbitration,
    /// Storage collaborator failure.
    Storage,
    /// Invalid configuration.
    Config,
}

impl ErrorKind {
    /// Whether the caller may retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransientNetwork)
    }
}

/// Core error type for RideMesh
#[derive(Debug, Error)]
pub enum Error {
    /// Input failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation conflicts with existing state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Relay network unavailable
    #[error("Network unavailable: {0}")]
    TransientNetwork(String),

    /// Caller is not allowed to arbitrate
    #[error("Arbitration error: {0}")]
    Arbitration(String),

    /// Storage collaborator error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::TransientNetwork(_) => ErrorKind::TransientNetwork,
            Error::Arbitration(_) => ErrorKind::Arbitration,
            Error::Storage(_) => ErrorKind::Storage,
            Error::Config(_) => ErrorKind::Config,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Validation(format!("malformed payload: {}", err))
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(Error::Conflict("x".into()).kind(), ErrorKind::Conflict);
        assert_eq!(Error::Arbitration("x".into()).kind(), ErrorKind::Arbitration);
    }

    #[test]
    fn test_only_network_errors_are_retryable() {
        assert!(ErrorKind::TransientNetwork.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Conflict.is_retryable());
    }

    #[test]
    fn test_json_errors_become_validation() {
        let err: Error = serde_json::from_str::<u64>("not-json").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
