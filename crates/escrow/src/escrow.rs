//! Settlement escrow.
//!
//! Holds rider funds for a matched ride and pays them out exactly once:
//! to the driver (minus the governance fee) on dual signature, back to the
//! rider on cancellation, or as the arbiter rules on a dispute.
//!
//! Every transition reads and rewrites the record under one write lock, so
//! concurrent completions and cancellations cannot both move the funds.

use crate::error::{EscrowError, EscrowResult};
use crate::record::{split_fee, EscrowRecord, EscrowStatus, Resolution};
use ridemesh_core::settlement::release_message;
use ridemesh_core::{current_timestamp_ms, EscrowConfig, PayoutSummary};
use ridemesh_crypto::verify_signature;
use ridemesh_governance::GovernanceLedger;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockWriteGuard};
use tracing::{info, warn};

#[derive(Debug, Default)]
struct EscrowState {
    records: HashMap<String, EscrowRecord>,
    balances: HashMap<String, u64>,
}

impl EscrowState {
    fn credit(&mut self, account: &str, amount: u64) -> EscrowResult<()> {
        self.credit_all(&[(account, amount)])
    }

    /// Credit every account or, on overflow, none of them.
    fn credit_all(&mut self, credits: &[(&str, u64)]) -> EscrowResult<()> {
        let mut staged: HashMap<String, u64> = HashMap::with_capacity(credits.len());
        for &(account, amount) in credits {
            let current = match staged.get(account) {
                Some(balance) => *balance,
                None => self.balances.get(account).copied().unwrap_or(0),
            };
            let next = current
                .checked_add(amount)
                .ok_or_else(|| EscrowError::Overflow {
                    account: account.to_string(),
                })?;
            staged.insert(account.to_string(), next);
        }
        self.balances.extend(staged);
        Ok(())
    }

    fn record_mut(&mut self, ride_id: &str) -> EscrowResult<&mut EscrowRecord> {
        self.records
            .get_mut(ride_id)
            .ok_or_else(|| EscrowError::RideNotFound {
                ride_id: ride_id.to_string(),
            })
    }
}

fn require_participant(record: &EscrowRecord, caller: &str) -> EscrowResult<()> {
    if record.is_participant(caller) {
        Ok(())
    } else {
        Err(EscrowError::NotParticipant {
            caller: caller.to_string(),
            ride_id: record.ride_id.clone(),
        })
    }
}

fn require_status(
    record: &EscrowRecord,
    expected: EscrowStatus,
    operation: &'static str,
) -> EscrowResult<()> {
    if record.status == expected {
        Ok(())
    } else {
        Err(EscrowError::InvalidState {
            ride_id: record.ride_id.clone(),
            status: record.status,
            operation,
        })
    }
}

pub struct SettlementEscrow {
    state: RwLock<EscrowState>,
    config: EscrowConfig,
}

impl SettlementEscrow {
    pub fn new(config: EscrowConfig) -> Self {
        Self {
            state: RwLock::new(EscrowState::default()),
            config,
        }
    }

    pub fn governance_wallet(&self) -> &str {
        &self.config.governance_wallet
    }

    /// Credit an account's wallet.
    pub fn deposit(&self, account: &str, amount: u64) -> EscrowResult<u64> {
        let mut state = self.write_state()?;
        state.credit(account, amount)?;
        Ok(state.balances.get(account).copied().unwrap_or_default())
    }

    pub fn balance_of(&self, account: &str) -> u64 {
        self.state
            .read()
            .ok()
            .and_then(|s| s.balances.get(account).copied())
            .unwrap_or_default()
    }

    pub fn get_record(&self, ride_id: &str) -> Option<EscrowRecord> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.records.get(ride_id).cloned())
    }

    /// Lock `amount` from the caller's wallet for a ride with `driver`.
    pub fn create_ride(
        &self,
        caller: &str,
        ride_id: &str,
        amount: u64,
        driver: &str,
        fee_bp: u16,
    ) -> EscrowResult<EscrowRecord> {
        if amount == 0 {
            return Err(EscrowError::ZeroAmount);
        }
        if fee_bp > self.config.fee_ceiling_bp {
            return Err(EscrowError::FeeTooHigh {
                fee_bp,
                ceiling_bp: self.config.fee_ceiling_bp,
            });
        }
        if caller == driver {
            return Err(EscrowError::SelfDealing);
        }

        let mut state = self.write_state()?;
        if let Some(existing) = state.records.get(ride_id) {
            if !existing.status.is_terminal() {
                return Err(EscrowError::DuplicateRide {
                    ride_id: ride_id.to_string(),
                });
            }
        }

        let available = state.balances.get(caller).copied().unwrap_or_default();
        if available < amount {
            return Err(EscrowError::InsufficientFunds {
                required: amount,
                available,
            });
        }
        state.balances.insert(caller.to_string(), available - amount);

        let record = EscrowRecord {
            ride_id: ride_id.to_string(),
            rider_address: caller.to_string(),
            driver_address: driver.to_string(),
            amount,
            fee_basis_points: fee_bp,
            status: EscrowStatus::Created,
            reduced_trust: false,
            resolution: None,
            created_at: current_timestamp_ms(),
        };
        state.records.insert(ride_id.to_string(), record.clone());

        info!(ride_id, amount, fee_bp, "escrow created");
        Ok(record)
    }

    /// Like [`create_ride`](Self::create_ride) with the driver's governance fee rate.
    pub fn create_ride_with_governance(
        &self,
        ledger: &GovernanceLedger,
        caller: &str,
        ride_id: &str,
        amount: u64,
        driver: &str,
    ) -> EscrowResult<EscrowRecord> {
        let fee_bp = ledger.get_fee_rate(driver);
        self.create_ride(caller, ride_id, amount, driver, fee_bp)
    }

    /// Release the escrow to the driver on both parties' signatures.
    ///
    /// Each signature must be the party's Ed25519 signature over
    /// [`release_message`] for this ride and amount.
    pub fn complete_ride(
        &self,
        caller: &str,
        ride_id: &str,
        driver_signature: &[u8],
        rider_signature: &[u8],
    ) -> EscrowResult<PayoutSummary> {
        self.complete(caller, ride_id, driver_signature, rider_signature, false)
    }

    pub(crate) fn complete(
        &self,
        caller: &str,
        ride_id: &str,
        driver_signature: &[u8],
        rider_signature: &[u8],
        reduced_trust: bool,
    ) -> EscrowResult<PayoutSummary> {
        if driver_signature.is_empty() {
            return Err(EscrowError::MissingSignature { party: "driver" });
        }
        if rider_signature.is_empty() {
            return Err(EscrowError::MissingSignature { party: "rider" });
        }

        let mut state = self.write_state()?;
        let record = state.record_mut(ride_id)?;
        require_participant(record, caller)?;
        require_status(record, EscrowStatus::Created, "complete")?;

        let message = release_message(ride_id, record.amount);
        if !verify_signature(&message, driver_signature, &record.driver_address) {
            warn!(ride_id, "release rejected: driver signature invalid");
            return Err(EscrowError::InvalidSignature { party: "driver" });
        }
        if !verify_signature(&message, rider_signature, &record.rider_address) {
            warn!(ride_id, "release rejected: rider signature invalid");
            return Err(EscrowError::InvalidSignature { party: "rider" });
        }

        let payout = split_fee(record.amount, record.fee_basis_points);
        let driver = record.driver_address.clone();
        state.credit_all(&[
            (driver.as_str(), payout.driver_payout),
            (self.config.governance_wallet.as_str(), payout.protocol_fee),
        ])?;

        let record = state.record_mut(ride_id)?;
        record.status = EscrowStatus::Completed;
        record.resolution = Some(Resolution::Released);
        record.reduced_trust |= reduced_trust;

        info!(
            ride_id,
            driver_payout = payout.driver_payout,
            protocol_fee = payout.protocol_fee,
            reduced_trust,
            "escrow released"
        );
        Ok(payout)
    }

    /// Refund the rider in full. Only an undisputed open escrow can be cancelled.
    pub fn cancel_ride(&self, caller: &str, ride_id: &str) -> EscrowResult<PayoutSummary> {
        let mut state = self.write_state()?;
        let record = state.record_mut(ride_id)?;
        require_participant(record, caller)?;
        require_status(record, EscrowStatus::Created, "cancel")?;

        let rider = record.rider_address.clone();
        let amount = record.amount;
        state.credit(&rider, amount)?;

        let record = state.record_mut(ride_id)?;
        record.status = EscrowStatus::Cancelled;
        record.resolution = Some(Resolution::Refunded);
        info!(ride_id, amount, "escrow refunded");
        Ok(PayoutSummary {
            driver_payout: 0,
            protocol_fee: 0,
            rider_refund: amount,
        })
    }

    /// Freeze an open escrow until the arbiter rules.
    pub fn dispute_ride(&self, caller: &str, ride_id: &str) -> EscrowResult<()> {
        let mut state = self.write_state()?;
        let record = state.record_mut(ride_id)?;
        require_participant(record, caller)?;
        require_status(record, EscrowStatus::Created, "dispute")?;

        record.status = EscrowStatus::Disputed;
        warn!(ride_id, caller, "escrow disputed");
        Ok(())
    }

    /// Arbiter's ruling on a disputed escrow.
    ///
    /// For the rider: full refund, no fee. For the driver: the normal fee split.
    pub fn resolve_dispute(
        &self,
        caller: &str,
        ride_id: &str,
        favor_rider: bool,
    ) -> EscrowResult<PayoutSummary> {
        if caller != self.config.arbiter {
            warn!(ride_id, caller, "dispute resolution refused: not the arbiter");
            return Err(EscrowError::NotArbiter {
                caller: caller.to_string(),
            });
        }

        let mut state = self.write_state()?;
        let record = state.record_mut(ride_id)?;
        require_status(record, EscrowStatus::Disputed, "resolve")?;

        let (status, resolution, payout) = if favor_rider {
            let rider = record.rider_address.clone();
            let amount = record.amount;
            state.credit(&rider, amount)?;
            let payout = PayoutSummary {
                driver_payout: 0,
                protocol_fee: 0,
                rider_refund: amount,
            };
            (EscrowStatus::Cancelled, Resolution::ArbitratedForRider, payout)
        } else {
            let payout = split_fee(record.amount, record.fee_basis_points);
            let driver = record.driver_address.clone();
            state.credit_all(&[
                (driver.as_str(), payout.driver_payout),
                (self.config.governance_wallet.as_str(), payout.protocol_fee),
            ])?;
            (EscrowStatus::Completed, Resolution::ArbitratedForDriver, payout)
        };

        let record = state.record_mut(ride_id)?;
        record.status = status;
        record.resolution = Some(resolution);

        info!(ride_id, favor_rider, "dispute resolved");
        Ok(payout)
    }

    /// Flag an open escrow as settled on reduced-trust evidence.
    pub fn mark_reduced_trust(&self, ride_id: &str) -> EscrowResult<()> {
        let mut state = self.write_state()?;
        let record = state.record_mut(ride_id)?;
        record.reduced_trust = true;
        Ok(())
    }

    fn write_state(&self) -> EscrowResult<RwLockWriteGuard<'_, EscrowState>> {
        self.state
            .write()
            .map_err(|e| EscrowError::Lock(e.to_string()))
    }
}

impl Default for SettlementEscrow {
    fn default() -> Self {
        Self::new(EscrowConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridemesh_crypto::{IdentityKeyStore, SigningIdentity};
    use ridemesh_governance::TripMetrics;
    use std::sync::Arc;

    struct Parties {
        rider: SigningIdentity,
        driver: SigningIdentity,
    }

    fn parties() -> Parties {
        let store = Arc::new(IdentityKeyStore::new());
        Parties {
            rider: store.identity("rider").unwrap(),
            driver: store.identity("driver").unwrap(),
        }
    }

    fn funded(parties: &Parties, amount: u64, fee_bp: u16) -> SettlementEscrow {
        let escrow = SettlementEscrow::default();
        escrow.deposit(parties.rider.public_key(), 1_000).unwrap();
        escrow
            .create_ride(
                parties.rider.public_key(),
                "ride-1",
                amount,
                parties.driver.public_key(),
                fee_bp,
            )
            .unwrap();
        escrow
    }

    fn release_signatures(parties: &Parties, amount: u64) -> (Vec<u8>, Vec<u8>) {
        let message = release_message("ride-1", amount);
        (
            parties.driver.sign(&message).unwrap(),
            parties.rider.sign(&message).unwrap(),
        )
    }

    #[test]
    fn test_release_splits_fee() {
        let p = parties();
        let escrow = funded(&p, 100, 1_500);
        assert_eq!(escrow.balance_of(p.rider.public_key()), 900);

        let (driver_sig, rider_sig) = release_signatures(&p, 100);
        let payout = escrow
            .complete_ride(p.rider.public_key(), "ride-1", &driver_sig, &rider_sig)
            .unwrap();

        assert_eq!(payout.driver_payout, 85);
        assert_eq!(payout.protocol_fee, 15);
        assert_eq!(escrow.balance_of(p.driver.public_key()), 85);
        assert_eq!(escrow.balance_of("governance"), 15);
        let record = escrow.get_record("ride-1").unwrap();
        assert_eq!(record.status, EscrowStatus::Completed);
        assert_eq!(record.resolution, Some(Resolution::Released));
    }

    #[test]
    fn test_second_completion_fails_closed() {
        let p = parties();
        let escrow = funded(&p, 100, 1_500);
        let (driver_sig, rider_sig) = release_signatures(&p, 100);
        escrow
            .complete_ride(p.driver.public_key(), "ride-1", &driver_sig, &rider_sig)
            .unwrap();

        let again =
            escrow.complete_ride(p.driver.public_key(), "ride-1", &driver_sig, &rider_sig);
        assert!(matches!(again, Err(EscrowError::InvalidState { .. })));
        assert_eq!(escrow.balance_of(p.driver.public_key()), 85);
        assert_eq!(escrow.balance_of("governance"), 15);
        assert_eq!(escrow.balance_of(p.rider.public_key()), 900);
    }

    #[test]
    fn test_overflowing_payout_moves_nothing() {
        let p = parties();
        let escrow = funded(&p, 100, 1_500);
        escrow.deposit("governance", u64::MAX - 5).unwrap();
        let (driver_sig, rider_sig) = release_signatures(&p, 100);

        let result =
            escrow.complete_ride(p.rider.public_key(), "ride-1", &driver_sig, &rider_sig);
        assert!(matches!(result, Err(EscrowError::Overflow { .. })));
        let record = escrow.get_record("ride-1").unwrap();
        assert_eq!(record.status, EscrowStatus::Created);
        assert_eq!(record.resolution, None);
        assert_eq!(escrow.balance_of(p.driver.public_key()), 0);
        assert_eq!(escrow.balance_of("governance"), u64::MAX - 5);

        // the arbiter path is held to the same rule
        escrow.dispute_ride(p.driver.public_key(), "ride-1").unwrap();
        let ruling = escrow.resolve_dispute("arbiter", "ride-1", false);
        assert!(matches!(ruling, Err(EscrowError::Overflow { .. })));
        assert_eq!(escrow.get_record("ride-1").unwrap().status, EscrowStatus::Disputed);
        assert_eq!(escrow.balance_of(p.driver.public_key()), 0);

        // refunding the rider still works
        escrow.resolve_dispute("arbiter", "ride-1", true).unwrap();
        assert_eq!(escrow.balance_of(p.rider.public_key()), 1_000);
    }

    #[test]
    fn test_completion_requires_valid_signatures_from_participant() {
        let p = parties();
        let escrow = funded(&p, 100, 1_500);
        let (driver_sig, rider_sig) = release_signatures(&p, 100);

        assert!(matches!(
            escrow.complete_ride(p.rider.public_key(), "ride-1", &[], &rider_sig),
            Err(EscrowError::MissingSignature { party: "driver" })
        ));
        assert!(matches!(
            escrow.complete_ride("outsider", "ride-1", &driver_sig, &rider_sig),
            Err(EscrowError::NotParticipant { .. })
        ));
        // rider signing twice cannot stand in for the driver
        assert!(matches!(
            escrow.complete_ride(p.rider.public_key(), "ride-1", &rider_sig, &rider_sig),
            Err(EscrowError::InvalidSignature { party: "driver" })
        ));
        let (wrong_amount_sig, _) = release_signatures(&p, 99);
        assert!(matches!(
            escrow.complete_ride(p.rider.public_key(), "ride-1", &wrong_amount_sig, &rider_sig),
            Err(EscrowError::InvalidSignature { .. })
        ));
        assert_eq!(escrow.get_record("ride-1").unwrap().status, EscrowStatus::Created);
    }

    #[test]
    fn test_create_validation() {
        let p = parties();
        let escrow = funded(&p, 100, 1_500);
        let rider = p.rider.public_key();
        let driver = p.driver.public_key();

        assert!(matches!(
            escrow.create_ride(rider, "ride-2", 0, driver, 1_000),
            Err(EscrowError::ZeroAmount)
        ));
        assert!(matches!(
            escrow.create_ride(rider, "ride-2", 10, driver, 2_001),
            Err(EscrowError::FeeTooHigh { .. })
        ));
        assert!(matches!(
            escrow.create_ride(rider, "ride-1", 10, driver, 1_000),
            Err(EscrowError::DuplicateRide { .. })
        ));
        assert!(matches!(
            escrow.create_ride(rider, "ride-2", 5_000, driver, 1_000),
            Err(EscrowError::InsufficientFunds { .. })
        ));
        assert!(escrow.create_ride(rider, "ride-2", 10, driver, 2_000).is_ok());
    }

    #[test]
    fn test_cancel_refunds_without_fee() {
        let p = parties();
        let escrow = funded(&p, 100, 1_500);
        let payout = escrow.cancel_ride(p.driver.public_key(), "ride-1").unwrap();
        assert_eq!(payout.rider_refund, 100);
        assert_eq!(escrow.balance_of(p.rider.public_key()), 1_000);
        assert_eq!(escrow.balance_of("governance"), 0);

        assert!(matches!(
            escrow.cancel_ride(p.rider.public_key(), "ride-1"),
            Err(EscrowError::InvalidState { .. })
        ));
        // a terminal record frees the ride id
        assert!(escrow
            .create_ride(p.rider.public_key(), "ride-1", 50, p.driver.public_key(), 0)
            .is_ok());
    }

    #[test]
    fn test_dispute_resolved_for_rider() {
        let p = parties();
        let escrow = funded(&p, 100, 1_500);
        escrow.dispute_ride(p.rider.public_key(), "ride-1").unwrap();

        let (driver_sig, rider_sig) = release_signatures(&p, 100);
        assert!(matches!(
            escrow.complete_ride(p.rider.public_key(), "ride-1", &driver_sig, &rider_sig),
            Err(EscrowError::InvalidState { .. })
        ));
        assert!(matches!(
            escrow.resolve_dispute(p.rider.public_key(), "ride-1", true),
            Err(EscrowError::NotArbiter { .. })
        ));

        let payout = escrow.resolve_dispute("arbiter", "ride-1", true).unwrap();
        assert_eq!(payout.rider_refund, 100);
        assert_eq!(escrow.balance_of(p.rider.public_key()), 1_000);
        assert_eq!(escrow.balance_of(p.driver.public_key()), 0);
        let record = escrow.get_record("ride-1").unwrap();
        assert_eq!(record.status, EscrowStatus::Cancelled);
        assert_eq!(record.resolution, Some(Resolution::ArbitratedForRider));
    }

    #[test]
    fn test_dispute_resolved_for_driver() {
        let p = parties();
        let escrow = funded(&p, 200, 1_000);
        escrow.dispute_ride(p.driver.public_key(), "ride-1").unwrap();
        let payout = escrow.resolve_dispute("arbiter", "ride-1", false).unwrap();
        assert_eq!(payout.driver_payout, 180);
        assert_eq!(escrow.balance_of("governance"), 20);
        assert!(escrow.resolve_dispute("arbiter", "ride-1", true).is_err());
    }

    #[test]
    fn test_governance_fee_rate() {
        let p = parties();
        let ledger = GovernanceLedger::default();
        ledger
            .award_trip_experience(
                p.driver.public_key(),
                &TripMetrics {
                    duration_minutes: 0.0,
                    distance_km: 1_190.0,
                    rating: None,
                },
            )
            .unwrap();

        let escrow = SettlementEscrow::default();
        escrow.deposit(p.rider.public_key(), 100).unwrap();
        let record = escrow
            .create_ride_with_governance(
                &ledger,
                p.rider.public_key(),
                "ride-1",
                100,
                p.driver.public_key(),
            )
            .unwrap();
        assert_eq!(record.fee_basis_points, 1_200);
    }
}
