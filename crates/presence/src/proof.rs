//! Completion proofs and the policy for trips without transit tokens.

use crate::token::PresenceToken;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How much a completion proof can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofConfidence {
    /// END from both parties and at least one TRANSIT token
    Full,
    /// END from both parties but no TRANSIT token
    Degraded,
}

/// What to do when a trip ends with no TRANSIT token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitPolicy {
    /// Complete normally; the proof records degraded confidence
    #[default]
    AllowDegraded,
    /// Complete, and flag the settlement as reduced-trust
    ReducedTrust,
    /// Refuse to assemble the proof
    Block,
}

impl FromStr for TransitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow_degraded" => Ok(TransitPolicy::AllowDegraded),
            "reduced_trust" => Ok(TransitPolicy::ReducedTrust),
            "block" => Ok(TransitPolicy::Block),
            other => Err(format!("unknown transit policy '{}'", other)),
        }
    }
}

impl fmt::Display for TransitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransitPolicy::AllowDegraded => "allow_degraded",
            TransitPolicy::ReducedTrust => "reduced_trust",
            TransitPolicy::Block => "block",
        };
        f.write_str(name)
    }
}

/// Evidence that both parties were together at the end of a trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionProof {
    pub ride_id: String,
    pub rider_end: PresenceToken,
    pub driver_end: PresenceToken,
    pub start_tokens: usize,
    pub transit_tokens: usize,
    pub confidence: ProofConfidence,
    /// Settlement should be marked reduced-trust
    pub reduced_trust: bool,
}

impl CompletionProof {
    pub fn is_degraded(&self) -> bool {
        self.confidence == ProofConfidence::Degraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_names_match_config_values() {
        for policy in [
            TransitPolicy::AllowDegraded,
            TransitPolicy::ReducedTrust,
            TransitPolicy::Block,
        ] {
            assert_eq!(policy.to_string().parse::<TransitPolicy>(), Ok(policy));
        }
        assert!("never".parse::<TransitPolicy>().is_err());
        assert_eq!(TransitPolicy::default(), TransitPolicy::AllowDegraded);
    }
}
