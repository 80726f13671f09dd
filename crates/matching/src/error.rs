//! Matching engine errors.

use crate::ride::RideStatus;
use ridemesh_core::Actor;
use ridemesh_crypto::KeyStoreError;
use ridemesh_governance::GovernanceError;
use ridemesh_presence::PresenceError;
use ridemesh_relay::RelayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatchingError {
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Presence error: {0}")]
    Presence(#[from] PresenceError),

    #[error("Governance error: {0}")]
    Governance(#[from] GovernanceError),

    #[error("Signing error: {0}")]
    Signing(#[from] KeyStoreError),

    #[error(transparent)]
    Core(#[from] ridemesh_core::Error),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Event author does not match payload {field}")]
    AuthorMismatch { field: &'static str },

    #[error("Ride not found: {ride_id}")]
    RideNotFound { ride_id: String },

    #[error("No candidacy from {driver_id} for ride {ride_id}")]
    CandidacyNotFound { ride_id: String, driver_id: String },

    #[error("Ride {ride_id} is still active")]
    ActiveRideExists { ride_id: String },

    #[error("Ride {ride_id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        ride_id: String,
        from: RideStatus,
        to: RideStatus,
    },

    #[error("{actor} may not move a ride from {from:?} to {to:?}")]
    Unauthorized {
        actor: Actor,
        from: RideStatus,
        to: RideStatus,
    },

    #[error("Ride {ride_id} is {status:?}; no active trip")]
    NotActive { ride_id: String, status: RideStatus },

    #[error("Counterparty release signature required for escrow settlement")]
    MissingReleaseSignature,

    #[error("Ride {ride_id} is not paid through an external payment provider")]
    WrongPaymentMethod { ride_id: String },

    #[error("Ride {ride_id} is already settling with the escrow")]
    SettlementInProgress { ride_id: String },

    #[error("Driver is not online")]
    NotOnline,

    #[error("Driver is already on ride {ride_id}")]
    DriverBusy { ride_id: String },

    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<MatchingError> for ridemesh_core::Error {
    fn from(err: MatchingError) -> Self {
        use ridemesh_core::Error;
        match err {
            MatchingError::Relay(inner) => inner.into(),
            MatchingError::Presence(inner) => inner.into(),
            MatchingError::Governance(inner) => inner.into(),
            MatchingError::Signing(inner) => inner.into(),
            MatchingError::Core(inner) => inner,
            MatchingError::Lock(reason) => Error::Storage(reason),
            MatchingError::RideNotFound { .. } | MatchingError::CandidacyNotFound { .. } => {
                Error::NotFound(err.to_string())
            }
            MatchingError::ActiveRideExists { .. }
            | MatchingError::InvalidTransition { .. }
            | MatchingError::NotActive { .. }
            | MatchingError::SettlementInProgress { .. }
            | MatchingError::DriverBusy { .. } => Error::Conflict(err.to_string()),
            other => Error::Validation(other.to_string()),
        }
    }
}

pub type MatchingResult<T> = Result<T, MatchingError>;
