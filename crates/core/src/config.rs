//! Configuration management for RideMesh.
//!
//! All sections have defaults, so a config file only needs to name the
//! values it overrides:
//!
//! ```toml
//! [relay]
//! endpoints = ["wss://relay.one", "wss://relay.two"]
//! timeout_ms = 2000
//!
//! [escrow]
//! fee_ceiling_bp = 2000
//! ```

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub relay: RelayConfig,
    pub matching: MatchingConfig,
    pub presence: PresenceConfig,
    pub governance: GovernanceConfig,
    pub escrow: EscrowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Redundant relay endpoint URLs
    pub endpoints: Vec<String>,
    /// Per-call timeout for publish/query/subscribe
    pub timeout_ms: u64,
    /// Seen event ids kept for deduplication before the set is reset
    pub max_seen_events: usize,
    /// Buffer size of each subscription channel
    pub subscription_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            timeout_ms: 3_000,
            max_seen_events: 10_000,
            subscription_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub search_radius_km: f64,
    /// Fixed average speed used for arrival estimates
    pub average_speed_kmh: f64,
    /// Driver announcements older than this are treated as offline
    pub driver_ttl_secs: u64,
    /// Rides still SEARCHING after this long are cancelled by timeout
    pub search_timeout_secs: u64,
    /// Finished rides stay in memory this long after ending
    pub ride_retention_secs: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            search_radius_km: 5.0,
            average_speed_kmh: 30.0,
            driver_ttl_secs: 300,
            search_timeout_secs: 180,
            ride_retention_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub freshness_window_secs: u64,
    pub max_future_skew_secs: u64,
    /// One of "allow_degraded", "reduced_trust", "block"
    pub transit_policy: String,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: 300,
            max_future_skew_secs: 30,
            transit_policy: "allow_degraded".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    pub validation_reward_xp: u64,
    pub validation_quorum: usize,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            validation_reward_xp: 25,
            validation_quorum: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowConfig {
    /// Hard ceiling on the fee regardless of governance tier
    pub fee_ceiling_bp: u16,
    /// Wallet receiving protocol fees
    pub governance_wallet: String,
    /// Identity allowed to resolve disputes
    pub arbiter: String,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            fee_ceiling_bp: 2_000,
            governance_wallet: "governance".to_string(),
            arbiter: "arbiter".to_string(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, Error> {
        let config: Config =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the protocol unsafe or inert.
    pub fn validate(&self) -> Result<(), Error> {
        if self.relay.timeout_ms == 0 {
            return Err(Error::Config("relay.timeout_ms must be positive".into()));
        }
        if self.relay.subscription_buffer == 0 {
            return Err(Error::Config(
                "relay.subscription_buffer must be positive".into(),
            ));
        }
        if self.matching.average_speed_kmh <= 0.0 {
            return Err(Error::Config(
                "matching.average_speed_kmh must be positive".into(),
            ));
        }
        if self.matching.search_radius_km <= 0.0 {
            return Err(Error::Config(
                "matching.search_radius_km must be positive".into(),
            ));
        }
        if self.presence.freshness_window_secs == 0 {
            return Err(Error::Config(
                "presence.freshness_window_secs must be positive".into(),
            ));
        }
        if !matches!(
            self.presence.transit_policy.as_str(),
            "allow_degraded" | "reduced_trust" | "block"
        ) {
            return Err(Error::Config(format!(
                "unknown presence.transit_policy '{}'",
                self.presence.transit_policy
            )));
        }
        if self.governance.validation_quorum == 0 {
            return Err(Error::Config(
                "governance.validation_quorum must be positive".into(),
            ));
        }
        if self.escrow.fee_ceiling_bp > 10_000 {
            return Err(Error::Config(format!(
                "escrow.fee_ceiling_bp {} exceeds 10000",
                self.escrow.fee_ceiling_bp
            )));
        }
        Ok(())
    }
}
