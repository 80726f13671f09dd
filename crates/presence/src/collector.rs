//! Per-ride token collection and completion proof assembly.

use crate::error::{PresenceError, PresenceResult, TokenRejection};
use crate::proof::{CompletionProof, ProofConfidence, TransitPolicy};
use crate::token::{PresenceToken, TokenType};
use crate::validator::PresenceValidator;
use ridemesh_core::current_timestamp_ms;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Collects the presence tokens exchanged during one ride.
///
/// Knows both participants' public keys, so tokens from anyone else are
/// refused. Each exact token is accepted once, and each participant may
/// present a single END token.
#[derive(Debug)]
pub struct PresenceCollector {
    ride_id: String,
    rider_key: String,
    driver_key: String,
    validator: PresenceValidator,
    policy: TransitPolicy,
    seen_signatures: HashSet<String>,
    end_tokens: HashMap<String, PresenceToken>,
    start_tokens: usize,
    transit_tokens: usize,
}

impl PresenceCollector {
    pub fn new(
        ride_id: impl Into<String>,
        rider_key: impl Into<String>,
        driver_key: impl Into<String>,
        validator: PresenceValidator,
        policy: TransitPolicy,
    ) -> Self {
        Self {
            ride_id: ride_id.into(),
            rider_key: rider_key.into(),
            driver_key: driver_key.into(),
            validator,
            policy,
            seen_signatures: HashSet::new(),
            end_tokens: HashMap::new(),
            start_tokens: 0,
            transit_tokens: 0,
        }
    }

    pub fn ride_id(&self) -> &str {
        &self.ride_id
    }

    pub fn transit_count(&self) -> usize {
        self.transit_tokens
    }

    pub fn has_end_from(&self, public_key: &str) -> bool {
        self.end_tokens.contains_key(public_key)
    }

    pub fn add_token(&mut self, token: PresenceToken) -> PresenceResult<()> {
        self.add_token_at(token, current_timestamp_ms())
    }

    /// Validate and record a token against an explicit "now".
    pub fn add_token_at(&mut self, token: PresenceToken, now_ms: u64) -> PresenceResult<()> {
        if let Err(rejection) = self.check(&token, now_ms) {
            warn!(
                ride_id = %self.ride_id,
                token_type = %token.token_type,
                reason = %rejection,
                "presence token rejected"
            );
            return Err(rejection.into());
        }

        self.seen_signatures.insert(token.signature.clone());
        match token.token_type {
            TokenType::Start => self.start_tokens += 1,
            TokenType::Transit => self.transit_tokens += 1,
            TokenType::End => {
                self.end_tokens.insert(token.public_key.clone(), token.clone());
            }
        }
        debug!(ride_id = %self.ride_id, token_type = %token.token_type, "presence token accepted");
        Ok(())
    }

    fn check(&self, token: &PresenceToken, now_ms: u64) -> Result<(), TokenRejection> {
        self.validator.validate_token_at(token, now_ms)?;

        if token.ride_id != self.ride_id {
            return Err(TokenRejection::WrongRide {
                expected: self.ride_id.clone(),
                got: token.ride_id.clone(),
            });
        }
        if token.public_key != self.rider_key && token.public_key != self.driver_key {
            return Err(TokenRejection::NotParticipant {
                public_key: token.public_key.clone(),
            });
        }
        if self.seen_signatures.contains(&token.signature) {
            return Err(TokenRejection::Replayed);
        }
        if token.token_type == TokenType::End && self.end_tokens.contains_key(&token.public_key) {
            return Err(TokenRejection::DuplicateEnd {
                public_key: token.public_key.clone(),
            });
        }
        Ok(())
    }

    /// Build the completion proof.
    ///
    /// Requires an END token from each participant. Without any TRANSIT token
    /// the outcome depends on the transit policy.
    pub fn assemble_completion_proof(&self) -> PresenceResult<CompletionProof> {
        let rider_end = self.end_tokens.get(&self.rider_key).ok_or_else(|| {
            PresenceError::Incomplete {
                reason: "missing END token from rider".into(),
            }
        })?;
        let driver_end = self.end_tokens.get(&self.driver_key).ok_or_else(|| {
            PresenceError::Incomplete {
                reason: "missing END token from driver".into(),
            }
        })?;

        let (confidence, reduced_trust) = if self.transit_tokens > 0 {
            (ProofConfidence::Full, false)
        } else {
            match self.policy {
                TransitPolicy::Block => return Err(PresenceError::TransitRequired),
                TransitPolicy::AllowDegraded => {
                    warn!(ride_id = %self.ride_id, "completing without transit tokens");
                    (ProofConfidence::Degraded, false)
                }
                TransitPolicy::ReducedTrust => {
                    warn!(
                        ride_id = %self.ride_id,
                        "completing without transit tokens, reduced trust"
                    );
                    (ProofConfidence::Degraded, true)
                }
            }
        };

        info!(
            ride_id = %self.ride_id,
            transit_tokens = self.transit_tokens,
            confidence = ?confidence,
            "completion proof assembled"
        );
        Ok(CompletionProof {
            ride_id: self.ride_id.clone(),
            rider_end: rider_end.clone(),
            driver_end: driver_end.clone(),
            start_tokens: self.start_tokens,
            transit_tokens: self.transit_tokens,
            confidence,
            reduced_trust,
        })
    }
}
