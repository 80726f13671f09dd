//! Escrow settlement driven directly and through the gateway trait.

use crate::test_utils::*;
use ridemesh_core::settlement::release_message;
use ridemesh_core::SettlementGateway;
use ridemesh_crypto::SigningIdentity;
use ridemesh_escrow::{EscrowError, EscrowStatus, Resolution};
use ridemesh_governance::TripMetrics;

struct Parties {
    rider: SigningIdentity,
    driver: SigningIdentity,
}

fn parties(net: &TestNetwork) -> Parties {
    let parties = Parties {
        rider: net.keys.identity("rider").unwrap(),
        driver: net.keys.identity("driver").unwrap(),
    };
    net.escrow.deposit(parties.rider.public_key(), 1_000).unwrap();
    parties
}

fn release_signatures(p: &Parties, ride_id: &str, amount: u64) -> (Vec<u8>, Vec<u8>) {
    let message = release_message(ride_id, amount);
    (p.driver.sign(&message).unwrap(), p.rider.sign(&message).unwrap())
}

#[test]
fn test_hundred_at_entry_rate_splits_85_15() {
    let net = TestNetwork::new(1);
    let p = parties(&net);
    net.escrow
        .create_ride(p.rider.public_key(), "ride-100", 100, p.driver.public_key(), 1_500)
        .unwrap();
    assert_eq!(net.escrow.balance_of(p.rider.public_key()), 900);

    let (driver_sig, rider_sig) = release_signatures(&p, "ride-100", 100);
    let payout = net
        .escrow
        .complete_ride(p.driver.public_key(), "ride-100", &driver_sig, &rider_sig)
        .unwrap();

    assert_eq!(payout.driver_payout, 85);
    assert_eq!(payout.protocol_fee, 15);
    assert_eq!(net.escrow.balance_of(p.driver.public_key()), 85);
    assert_eq!(net.escrow.balance_of(net.escrow.governance_wallet()), 15);
}

#[test]
fn test_double_complete_fails_closed() {
    let net = TestNetwork::new(1);
    let p = parties(&net);
    net.escrow
        .create_ride(p.rider.public_key(), "ride-1", 500, p.driver.public_key(), 1_500)
        .unwrap();
    let (driver_sig, rider_sig) = release_signatures(&p, "ride-1", 500);
    net.escrow
        .complete_ride(p.rider.public_key(), "ride-1", &driver_sig, &rider_sig)
        .unwrap();
    let driver_balance = net.escrow.balance_of(p.driver.public_key());

    let second = net
        .escrow
        .complete_ride(p.rider.public_key(), "ride-1", &driver_sig, &rider_sig);
    assert!(matches!(second, Err(EscrowError::InvalidState { .. })));
    assert!(net.escrow.cancel_ride(p.rider.public_key(), "ride-1").is_err());
    assert_eq!(net.escrow.balance_of(p.driver.public_key()), driver_balance);
    assert_eq!(net.escrow.balance_of(p.rider.public_key()), 500);
}

#[test]
fn test_dispute_resolved_for_rider() {
    let net = TestNetwork::new(1);
    let p = parties(&net);
    net.escrow
        .create_ride(p.rider.public_key(), "ride-d", 400, p.driver.public_key(), 1_500)
        .unwrap();
    net.escrow.dispute_ride(p.driver.public_key(), "ride-d").unwrap();
    assert!(net.escrow.is_locked("ride-d"));

    // Participants cannot settle or cancel a disputed ride
    let (driver_sig, rider_sig) = release_signatures(&p, "ride-d", 400);
    assert!(net
        .escrow
        .complete_ride(p.driver.public_key(), "ride-d", &driver_sig, &rider_sig)
        .is_err());
    assert!(matches!(
        net.escrow.resolve_dispute(p.rider.public_key(), "ride-d", true),
        Err(EscrowError::NotArbiter { .. })
    ));

    let payout = net.escrow.resolve_dispute("arbiter", "ride-d", true).unwrap();
    assert_eq!(payout.rider_refund, 400);
    assert_eq!(net.escrow.balance_of(p.rider.public_key()), 1_000);

    let record = net.escrow.get_record("ride-d").unwrap();
    assert_eq!(record.status, EscrowStatus::Cancelled);
    assert_eq!(record.resolution, Some(Resolution::ArbitratedForRider));
    assert!(net.escrow.resolve_dispute("arbiter", "ride-d", false).is_err());
}

#[test]
fn test_governance_fee_applies_at_lock_time() {
    let net = TestNetwork::new(1);
    let p = parties(&net);
    let before = net
        .escrow
        .create_ride_with_governance(
            &net.governance,
            p.rider.public_key(),
            "ride-a",
            100,
            p.driver.public_key(),
        )
        .unwrap();
    assert_eq!(before.fee_basis_points, 1_500);

    net.governance
        .award_trip_experience(
            p.driver.public_key(),
            &TripMetrics {
                duration_minutes: 0.0,
                distance_km: 1_190.0,
                rating: None,
            },
        )
        .unwrap();
    let after = net
        .escrow
        .create_ride_with_governance(
            &net.governance,
            p.rider.public_key(),
            "ride-b",
            100,
            p.driver.public_key(),
        )
        .unwrap();
    assert_eq!(after.fee_basis_points, 1_200);

    // Existing locks keep their rate
    assert_eq!(net.escrow.get_record("ride-a").unwrap().fee_basis_points, 1_500);
}

#[test]
fn test_gateway_refund_by_participant_only() {
    let net = TestNetwork::new(1);
    let p = parties(&net);
    net.escrow
        .create_ride(p.rider.public_key(), "ride-r", 300, p.driver.public_key(), 1_500)
        .unwrap();

    let stranger = "ab".repeat(32);
    assert!(net.escrow.refund(&stranger, "ride-r").is_err());
    let refund = net
        .escrow
        .refund(&p.driver.public_key().to_string(), "ride-r")
        .unwrap();
    assert_eq!(refund.rider_refund, 300);
    assert!(!net.escrow.is_locked("ride-r"));
}
