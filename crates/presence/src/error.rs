//! Presence attestation errors.

use ridemesh_crypto::KeyStoreError;
use thiserror::Error;

/// Why a presence token was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenRejection {
    #[error("Signature does not verify against the embedded public key")]
    InvalidSignature,

    #[error("Token too old: {age_secs} seconds (max: {max_secs} seconds)")]
    Expired { age_secs: u64, max_secs: u64 },

    #[error("Token timestamp too far in future: {ahead_secs} seconds ahead (max: {max_secs} seconds)")]
    FromFuture { ahead_secs: u64, max_secs: u64 },

    #[error("Token is for ride {got}, expected {expected}")]
    WrongRide { expected: String, got: String },

    #[error("Token signer {public_key} is not a participant of this ride")]
    NotParticipant { public_key: String },

    #[error("Token was already presented")]
    Replayed,

    #[error("Participant {public_key} already presented an END token")]
    DuplicateEnd { public_key: String },
}

impl TokenRejection {
    /// Message suitable for showing to the person holding the phone.
    pub fn user_message(&self) -> &'static str {
        match self {
            TokenRejection::InvalidSignature => {
                "This code could not be verified. Ask the other person to show a fresh code."
            }
            TokenRejection::Expired { .. } => {
                "This code has expired. Ask the other person to generate a new one."
            }
            TokenRejection::FromFuture { .. } => {
                "The other phone's clock is ahead. Ask them to enable automatic time, then retry."
            }
            TokenRejection::WrongRide { .. } => {
                "This code belongs to a different ride. Make sure you are scanning your own trip."
            }
            TokenRejection::NotParticipant { .. } => {
                "This code was not issued by your rider or driver."
            }
            TokenRejection::Replayed => "This code was already scanned. Ask for a new one.",
            TokenRejection::DuplicateEnd { .. } => {
                "The trip end was already confirmed for this person."
            }
        }
    }
}

/// Errors that can occur in presence operations.
#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("Token rejected: {0}")]
    Rejected(#[from] TokenRejection),

    #[error("Token encoding error: {0}")]
    Encoding(String),

    #[error("Completion proof incomplete: {reason}")]
    Incomplete { reason: String },

    #[error("Completion blocked: no TRANSIT token and the transit policy is 'block'")]
    TransitRequired,

    #[error("Signing error: {0}")]
    Signing(#[from] KeyStoreError),
}

impl From<PresenceError> for ridemesh_core::Error {
    fn from(err: PresenceError) -> Self {
        match err {
            PresenceError::Rejected(TokenRejection::DuplicateEnd { .. })
            | PresenceError::Rejected(TokenRejection::Replayed) => {
                ridemesh_core::Error::Conflict(err.to_string())
            }
            PresenceError::Signing(inner) => inner.into(),
            other => ridemesh_core::Error::Validation(other.to_string()),
        }
    }
}

/// Result type for presence operations.
pub type PresenceResult<T> = Result<T, PresenceError>;
