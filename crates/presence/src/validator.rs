//! Stateless token validation.
//!
//! Checks run in a fixed order and stop at the first failure:
//! 1. the signature verifies against the embedded public key
//! 2. the token is no older than the freshness window
//! 3. the token is not further in the future than the skew tolerance

use crate::error::TokenRejection;
use crate::token::PresenceToken;
use ridemesh_core::{current_timestamp_ms, PresenceConfig};
use tracing::debug;

/// Default freshness window (5 minutes)
pub const DEFAULT_FRESHNESS_WINDOW_SECS: u64 = 300;

/// Default future skew tolerance (30 seconds)
pub const DEFAULT_MAX_FUTURE_SKEW_SECS: u64 = 30;

#[derive(Debug, Clone, Copy)]
pub struct PresenceValidator {
    freshness_window_secs: u64,
    max_future_skew_secs: u64,
}

impl Default for PresenceValidator {
    fn default() -> Self {
        Self {
            freshness_window_secs: DEFAULT_FRESHNESS_WINDOW_SECS,
            max_future_skew_secs: DEFAULT_MAX_FUTURE_SKEW_SECS,
        }
    }
}

impl PresenceValidator {
    pub fn new(config: &PresenceConfig) -> Self {
        Self {
            freshness_window_secs: config.freshness_window_secs,
            max_future_skew_secs: config.max_future_skew_secs,
        }
    }

    pub fn validate_token(&self, token: &PresenceToken) -> Result<(), TokenRejection> {
        self.validate_token_at(token, current_timestamp_ms())
    }

    /// Validate against an explicit "now" (Unix epoch milliseconds).
    pub fn validate_token_at(
        &self,
        token: &PresenceToken,
        now_ms: u64,
    ) -> Result<(), TokenRejection> {
        if !token.signature_valid() {
            debug!(ride_id = %token.ride_id, "presence token signature invalid");
            return Err(TokenRejection::InvalidSignature);
        }

        if now_ms >= token.timestamp {
            let age_ms = now_ms - token.timestamp;
            if age_ms > self.freshness_window_secs * 1000 {
                return Err(TokenRejection::Expired {
                    age_secs: age_ms / 1000,
                    max_secs: self.freshness_window_secs,
                });
            }
        } else {
            let ahead_ms = token.timestamp - now_ms;
            if ahead_ms > self.max_future_skew_secs * 1000 {
                return Err(TokenRejection::FromFuture {
                    ahead_secs: ahead_ms / 1000,
                    max_secs: self.max_future_skew_secs,
                });
            }
        }

        Ok(())
    }
}
