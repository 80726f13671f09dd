//! Presence tokens and their out-of-band encoding.

use crate::error::{PresenceError, PresenceResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ridemesh_core::{current_timestamp_ms, UserId};
use ridemesh_crypto::{verify_signature, SigningIdentity};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trip milestone a token attests to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenType {
    Start,
    Transit,
    End,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenType::Start => "START",
            TokenType::Transit => "TRANSIT",
            TokenType::End => "END",
        };
        f.write_str(name)
    }
}

/// Signed statement that `user_id` was present for `ride_id` at `timestamp`.
///
/// Tokens travel between the two phones over short-range radio or a scanned
/// code, never over the relay network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceToken {
    pub ride_id: String,
    pub user_id: UserId,
    pub token_type: TokenType,
    /// Unix epoch milliseconds
    pub timestamp: u64,
    /// Hex-encoded Ed25519 signature
    pub signature: String,
    pub public_key: String,
}

/// Bytes covered by a token signature.
pub fn signing_bytes(
    ride_id: &str,
    user_id: &str,
    token_type: TokenType,
    timestamp: u64,
) -> Vec<u8> {
    format!(
        "ridemesh:presence:{}:{}:{}:{}",
        ride_id, user_id, token_type, timestamp
    )
    .into_bytes()
}

impl PresenceToken {
    /// Sign a token for the current time.
    pub fn generate(
        identity: &SigningIdentity,
        ride_id: &str,
        token_type: TokenType,
    ) -> PresenceResult<Self> {
        Self::generate_at(identity, ride_id, token_type, current_timestamp_ms())
    }

    /// Sign a token with an explicit timestamp.
    pub fn generate_at(
        identity: &SigningIdentity,
        ride_id: &str,
        token_type: TokenType,
        timestamp: u64,
    ) -> PresenceResult<Self> {
        let user_id = identity.public_key().to_string();
        let message = signing_bytes(ride_id, &user_id, token_type, timestamp);
        let signature = identity.sign(&message)?;
        Ok(Self {
            ride_id: ride_id.to_string(),
            user_id,
            token_type,
            timestamp,
            signature: hex::encode(signature),
            public_key: identity.public_key().to_string(),
        })
    }

    /// Whether the signature verifies and the signer is the claimed user.
    pub fn signature_valid(&self) -> bool {
        if self.user_id != self.public_key {
            return false;
        }
        let Ok(signature) = hex::decode(&self.signature) else {
            return false;
        };
        let message = signing_bytes(&self.ride_id, &self.user_id, self.token_type, self.timestamp);
        verify_signature(&message, &signature, &self.public_key)
    }

    /// URL-safe base64 of the JSON token, short enough for a QR code.
    pub fn encode(&self) -> PresenceResult<String> {
        let json = serde_json::to_vec(self).map_err(|e| PresenceError::Encoding(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(encoded: &str) -> PresenceResult<Self> {
        let json = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| PresenceError::Encoding(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| PresenceError::Encoding(e.to_string()))
    }
}
