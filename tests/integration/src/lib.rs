//! End-to-end tests across the RideMesh crates
//!
//! This test suite validates:
//! - Driver discovery, candidacy and acceptance over in-memory relays
//! - Escrow settlement, disputes and fail-closed double completion
//! - Presence token freshness and replay handling
//! - Governance tiers feeding protocol fees
//! - Degraded operation when relays are unreachable

pub mod test_utils;

#[cfg(test)]
mod discovery_tests;

#[cfg(test)]
mod ride_flow_tests;

#[cfg(test)]
mod settlement_tests;

#[cfg(test)]
mod adversarial_tests;
