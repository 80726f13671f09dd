//! Governance tiers and their fee rates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Standing earned through experience. Higher tiers pay lower fees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    Newcomer,
    Trusted,
    Veteran,
    Steward,
}

impl Tier {
    /// All tiers in ascending order.
    pub const ALL: [Tier; 4] = [Tier::Newcomer, Tier::Trusted, Tier::Veteran, Tier::Steward];

    /// Minimum cumulative experience for this tier.
    pub const fn threshold(&self) -> u64 {
        match self {
            Tier::Newcomer => 0,
            Tier::Trusted => 1_000,
            Tier::Veteran => 5_000,
            Tier::Steward => 15_000,
        }
    }

    /// Protocol fee in basis points.
    pub const fn fee_rate_bp(&self) -> u16 {
        match self {
            Tier::Newcomer => 1_500,
            Tier::Trusted => 1_200,
            Tier::Veteran => 1_000,
            Tier::Steward => 800,
        }
    }

    /// Highest tier whose threshold does not exceed `experience`.
    pub fn from_experience(experience: u64) -> Tier {
        Tier::ALL
            .iter()
            .rev()
            .copied()
            .find(|tier| tier.threshold() <= experience)
            .unwrap_or(Tier::Newcomer)
    }

    /// Whether this tier may cast oracle validation votes.
    pub fn can_validate(&self) -> bool {
        *self >= Tier::Trusted
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Newcomer => "newcomer",
            Tier::Trusted => "trusted",
            Tier::Veteran => "veteran",
            Tier::Steward => "steward",
        };
        f.write_str(name)
    }
}

/// Fee rate charged to users with no governance history.
pub const ENTRY_FEE_RATE_BP: u16 = Tier::Newcomer.fee_rate_bp();
