//! Core types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique ride identifier (UUID v4 string)
pub type RideId = String;

/// User identity: the hex-encoded Ed25519 public key
pub type UserId = String;

/// Who is attempting a ride or escrow transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Actor {
    Rider,
    Driver,
    /// Client-side timeout policy acting on the rider's behalf
    Timeout,
    Arbiter,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Actor::Rider => "rider",
            Actor::Driver => "driver",
            Actor::Timeout => "timeout",
            Actor::Arbiter => "arbiter",
        };
        f.write_str(name)
    }
}

/// Get current timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
