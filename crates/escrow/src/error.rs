//! Escrow errors.

use crate::record::EscrowStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EscrowError {
    #[error("Escrow amount must be positive")]
    ZeroAmount,

    #[error("Fee {fee_bp} bp exceeds ceiling {ceiling_bp} bp")]
    FeeTooHigh { fee_bp: u16, ceiling_bp: u16 },

    #[error("Rider and driver must be different accounts")]
    SelfDealing,

    #[error("Ride {ride_id} already has an open escrow")]
    DuplicateRide { ride_id: String },

    #[error("No escrow for ride {ride_id}")]
    RideNotFound { ride_id: String },

    #[error("Insufficient funds: {required} required, {available} available")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("{caller} is not a participant of ride {ride_id}")]
    NotParticipant { caller: String, ride_id: String },

    #[error("Missing {party} signature")]
    MissingSignature { party: &'static str },

    #[error("Invalid {party} signature")]
    InvalidSignature { party: &'static str },

    #[error("Cannot {operation} ride {ride_id} in status {status:?}")]
    InvalidState {
        ride_id: String,
        status: EscrowStatus,
        operation: &'static str,
    },

    #[error("{caller} is not the arbiter")]
    NotArbiter { caller: String },

    #[error("Balance overflow for {account}")]
    Overflow { account: String },

    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<EscrowError> for ridemesh_core::Error {
    fn from(err: EscrowError) -> Self {
        use ridemesh_core::Error;
        match err {
            EscrowError::DuplicateRide { .. } | EscrowError::InvalidState { .. } => {
                Error::Conflict(err.to_string())
            }
            EscrowError::RideNotFound { .. } => Error::NotFound(err.to_string()),
            EscrowError::NotArbiter { .. } => Error::Arbitration(err.to_string()),
            EscrowError::Lock(reason) => Error::Storage(reason),
            other => Error::Validation(other.to_string()),
        }
    }
}

pub type EscrowResult<T> = Result<T, EscrowError>;
