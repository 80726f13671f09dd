//! Settlement gateway boundary between ride coordination and the escrow.
//!
//! The matching engine drives payment through this trait so it never depends
//! on a concrete escrow implementation.

use crate::error::Result;
use crate::types::{RideId, UserId};
use serde::{Deserialize, Serialize};

/// Request to lock rider funds for a matched ride.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowLock {
    pub ride_id: RideId,
    pub rider: UserId,
    pub driver: UserId,
    /// Smallest currency unit
    pub amount: u64,
    pub fee_bp: u16,
}

/// Funds moved by a release or refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PayoutSummary {
    pub driver_payout: u64,
    pub protocol_fee: u64,
    pub rider_refund: u64,
}

impl PayoutSummary {
    pub fn total(&self) -> u64 {
        self.driver_payout + self.protocol_fee + self.rider_refund
    }
}

/// Bytes each participant signs to authorize releasing a ride's escrow.
pub fn release_message(ride_id: &str, amount: u64) -> Vec<u8> {
    format!("ridemesh:release:{}:{}", ride_id, amount).into_bytes()
}

pub trait SettlementGateway: Send + Sync {
    /// Lock funds; fails on duplicate ride ids and out-of-range fees.
    fn lock(&self, request: &EscrowLock) -> Result<()>;

    /// Release locked funds on dual signature.
    fn release(
        &self,
        caller: &UserId,
        ride_id: &str,
        driver_signature: &[u8],
        rider_signature: &[u8],
        reduced_trust: bool,
    ) -> Result<PayoutSummary>;

    /// Refund the rider in full.
    fn refund(&self, caller: &UserId, ride_id: &str) -> Result<PayoutSummary>;

    /// Whether funds are currently locked for the ride.
    fn is_locked(&self, ride_id: &str) -> bool;
}
