//! Error types for relay operations.

use ridemesh_crypto::KeyStoreError;
use thiserror::Error;

/// Errors that can occur while publishing, querying or subscribing.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Event is structurally invalid (unknown kind, bad encoding)
    #[error("Invalid event: {reason}")]
    InvalidEvent { reason: String },

    /// Event id does not match its contents
    #[error("Event id mismatch for {event_id}")]
    IdMismatch { event_id: String },

    /// Signature does not verify against the embedded public key
    #[error("Signature verification failed for event {event_id}")]
    InvalidSignature { event_id: String },

    /// A single endpoint refused or is offline
    #[error("Relay unavailable: {url}")]
    Unavailable { url: String },

    /// A single endpoint did not answer in time
    #[error("Relay timed out: {url}")]
    Timeout { url: String },

    /// No endpoint accepted a publish
    #[error("Publish failed on all {attempted} relays")]
    AllRelaysFailed { attempted: usize },

    /// No endpoint answered a query or subscription
    #[error("No relay answered")]
    NoAnswer,

    /// Signing the event failed
    #[error("Signing error: {0}")]
    Signing(#[from] KeyStoreError),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RelayError {
    /// Whether this is a connectivity failure rather than bad data.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            RelayError::Unavailable { .. }
                | RelayError::Timeout { .. }
                | RelayError::AllRelaysFailed { .. }
                | RelayError::NoAnswer
        )
    }
}

impl From<RelayError> for ridemesh_core::Error {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Signing(inner) => inner.into(),
            e if e.is_network() => ridemesh_core::Error::TransientNetwork(e.to_string()),
            e => ridemesh_core::Error::Validation(e.to_string()),
        }
    }
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
