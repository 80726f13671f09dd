//! Settlement escrow for RideMesh.
//!
//! Rider funds are locked when a ride is matched and move exactly once:
//!
//! ```text
//! CREATED ──dual signature──▶ COMPLETED   (driver: amount - fee, governance: fee)
//!    │ ──cancel────────────▶ CANCELLED   (rider: amount)
//!    └──dispute──▶ DISPUTED ──arbiter──▶ COMPLETED | CANCELLED
//! ```
//!
//! The fee rate comes from the driver's governance tier and is computed in
//! integer basis points, so `driver payout + fee == amount` always holds.

pub mod error;
pub mod escrow;
pub mod gateway;
pub mod record;

pub use error::{EscrowError, EscrowResult};
pub use escrow::SettlementEscrow;
pub use record::{split_fee, EscrowRecord, EscrowStatus, Resolution, BASIS_POINTS};
