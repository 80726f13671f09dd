//! Escrow records and the fee split.

use ridemesh_core::{PayoutSummary, RideId, UserId};
use serde::{Deserialize, Serialize};

pub const BASIS_POINTS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowStatus {
    Created,
    Completed,
    Cancelled,
    Disputed,
}

impl EscrowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EscrowStatus::Completed | EscrowStatus::Cancelled)
    }

    /// Funds are still held by the escrow.
    pub fn holds_funds(&self) -> bool {
        matches!(self, EscrowStatus::Created | EscrowStatus::Disputed)
    }
}

/// How a record reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Both parties signed the release
    Released,
    /// A participant cancelled before release
    Refunded,
    /// Arbiter ruled for the rider
    ArbitratedForRider,
    /// Arbiter ruled for the driver
    ArbitratedForDriver,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub ride_id: RideId,
    pub rider_address: UserId,
    pub driver_address: UserId,
    pub amount: u64,
    pub fee_basis_points: u16,
    pub status: EscrowStatus,
    /// Settled on a completion proof without transit evidence
    pub reduced_trust: bool,
    pub resolution: Option<Resolution>,
    pub created_at: u64,
}

impl EscrowRecord {
    pub fn is_participant(&self, account: &str) -> bool {
        self.rider_address == account || self.driver_address == account
    }
}

/// Split `amount` into driver payout and protocol fee.
///
/// `fee = amount * fee_bp / 10000`, rounded down, so the two parts always
/// sum to `amount`.
pub fn split_fee(amount: u64, fee_bp: u16) -> PayoutSummary {
    let rate = fee_bp.min(BASIS_POINTS as u16) as u128;
    let fee = (amount as u128 * rate / BASIS_POINTS as u128) as u64;
    PayoutSummary {
        driver_payout: amount - fee,
        protocol_fee: fee,
        rider_refund: 0,
    }
}
