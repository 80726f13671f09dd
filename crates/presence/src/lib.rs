//! Presence attestation for RideMesh trips.
//!
//! Rider and driver exchange short-lived signed tokens at trip start, during
//! transit and at trip end. The END tokens from both parties, together with
//! at least one TRANSIT token, form the completion proof that unlocks
//! settlement.
//!
//! # Security Model
//!
//! - Tokens are signed by the presenting participant's identity key
//! - A token is only valid inside a 5 minute freshness window
//! - Timestamps more than 30 seconds in the future are rejected
//! - An exact token can be presented once per ride
//!
//! Tokens move phone-to-phone (radio or QR code), never over the relay.

pub mod collector;
pub mod error;
pub mod proof;
pub mod token;
pub mod validator;

pub use collector::PresenceCollector;
pub use error::{PresenceError, PresenceResult, TokenRejection};
pub use proof::{CompletionProof, ProofConfidence, TransitPolicy};
pub use token::{signing_bytes, PresenceToken, TokenType};
pub use validator::{PresenceValidator, DEFAULT_FRESHNESS_WINDOW_SECS, DEFAULT_MAX_FUTURE_SKEW_SECS};

use ridemesh_crypto::SigningIdentity;

/// Sign a presence token for `ride_id` as `identity`.
pub fn generate_token(
    identity: &SigningIdentity,
    ride_id: &str,
    token_type: TokenType,
) -> PresenceResult<PresenceToken> {
    PresenceToken::generate(identity, ride_id, token_type)
}

/// Validate a token with the default freshness and skew limits.
pub fn validate_token(token: &PresenceToken) -> Result<(), TokenRejection> {
    PresenceValidator::default().validate_token(token)
}
