//! Full ride lifecycle across rider and driver engines.

use crate::test_utils::*;
use ridemesh_core::current_timestamp_ms;
use ridemesh_governance::{Tier, TripMetrics, ENTRY_FEE_RATE_BP};
use ridemesh_matching::{CandidacyOutcome, EngineEvent, MatchingEngine, PaymentMethod, RideStatus};
use ridemesh_presence::{ProofConfidence, TokenType};

fn exchange(ride_id: &str, rider: &MatchingEngine, driver: &MatchingEngine, token_type: TokenType) {
    let from_rider = rider.generate_presence_token(ride_id, token_type).unwrap();
    let from_driver = driver.generate_presence_token(ride_id, token_type).unwrap();
    driver
        .receive_encoded_token(ride_id, &from_rider.encode().unwrap())
        .unwrap();
    rider
        .receive_encoded_token(ride_id, &from_driver.encode().unwrap())
        .unwrap();
}

#[tokio::test]
async fn test_full_trip_end_to_end() {
    let net = TestNetwork::new(2);
    let origin = sao_paulo();
    let destination = origin.offset_km(5.0, 0.0);
    let driver_a = net.online_driver("driver-a", origin.offset_km(0.8, 0.0)).await;
    let driver_b = net.online_driver("driver-b", origin.offset_km(0.0, 2.5)).await;
    let rider = net.funded_rider("rider", 10_000);
    let mut a_inbox = driver_a.subscribe_inbox().await.unwrap();

    // Request and two candidacies
    let ride = request_with_candidate(
        &rider,
        &driver_a,
        origin,
        destination,
        PaymentMethod::Escrow,
    )
    .await;
    driver_b.backfill_ride_requests().await.unwrap();
    driver_b.submit_candidacy(&ride.ride_id).await.unwrap();

    let candidacies = rider.collect_candidacies(&ride.ride_id).await.unwrap();
    assert_eq!(candidacies.len(), 2);
    assert_eq!(candidacies[0].driver_id, driver_a.public_key());

    // Accept A; B's late bid is ignored
    let mut rider_inbox = rider.subscribe_inbox().await.unwrap();
    rider
        .accept_candidacy(&ride.ride_id, driver_a.public_key())
        .await
        .unwrap();
    assert!(matches!(
        deliver_next(&driver_a, &mut a_inbox).await,
        EngineEvent::Matched(_)
    ));
    assert!(!rider.cache().get(driver_a.public_key()).unwrap().available);

    driver_b.submit_candidacy(&ride.ride_id).await.unwrap();
    match deliver_next(&rider, &mut rider_inbox).await {
        EngineEvent::Candidacy { outcome, driver_id, .. } => {
            assert_eq!(outcome, CandidacyOutcome::Ignored);
            assert_eq!(driver_id, driver_b.public_key());
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        rider.ride(&ride.ride_id).unwrap().driver_id.as_deref(),
        Some(driver_a.public_key())
    );

    // Driver starts; rider follows the status update
    driver_a.start_trip(&ride.ride_id).await.unwrap();
    assert!(matches!(
        deliver_next(&rider, &mut rider_inbox).await,
        EngineEvent::StatusChanged {
            status: RideStatus::InProgress,
            ..
        }
    ));

    exchange(&ride.ride_id, &rider, &driver_a, TokenType::Start);
    exchange(&ride.ride_id, &rider, &driver_a, TokenType::Transit);
    exchange(&ride.ride_id, &rider, &driver_a, TokenType::End);

    // Rider releases the escrow with the driver's signature
    let driver_release = driver_a.sign_release(&ride.ride_id).unwrap();
    let receipt = rider
        .complete_trip(&ride.ride_id, Some(&driver_release), Some(4.9))
        .await
        .unwrap();
    assert_eq!(receipt.proof.confidence, ProofConfidence::Full);
    let payout = receipt.payout.unwrap();
    assert_eq!(payout.driver_payout + payout.protocol_fee, ride.fare_cents);
    assert_eq!(payout.protocol_fee, ride.fare_cents * ENTRY_FEE_RATE_BP as u64 / 10_000);
    assert_eq!(net.escrow.balance_of(driver_a.public_key()), payout.driver_payout);
    assert_eq!(
        net.escrow.balance_of(net.escrow.governance_wallet()),
        payout.protocol_fee
    );
    assert_eq!(net.escrow.balance_of(rider.public_key()), 10_000 - ride.fare_cents);

    // Driver sees completion and is available again
    assert!(matches!(
        deliver_next(&driver_a, &mut a_inbox).await,
        EngineEvent::StatusChanged {
            status: RideStatus::Completed,
            ..
        }
    ));
    assert!(driver_a.active_ride().is_none());
    let drivers = rider.find_nearby_drivers(origin, 5.0).await;
    assert!(drivers.iter().any(|d| d.driver_id == driver_a.public_key()));

    // base + whole kilometres + rating bonus
    let award = receipt.award.unwrap();
    assert_eq!(award.experience_gained, 10 + ride.distance_km.floor() as u64 + 5);
    let profile = net
        .governance
        .get_profile(driver_a.public_key())
        .unwrap()
        .unwrap();
    assert_eq!(profile.experience_points, award.experience_gained);
    assert_eq!(rider.ride_history().unwrap().len(), 1);
}

#[tokio::test]
async fn test_second_tier_driver_pays_lower_fee() {
    let net = TestNetwork::new(1);
    let origin = sao_paulo();
    let driver = net.online_driver("veteran", origin.offset_km(1.0, 0.0)).await;
    let rider = net.funded_rider("rider", 10_000);

    // 10 base + 1190 km
    let long_haul = TripMetrics {
        duration_minutes: 0.0,
        distance_km: 1_190.0,
        rating: None,
    };
    let award = net
        .governance
        .award_trip_experience(driver.public_key(), &long_haul)
        .unwrap();
    assert_eq!(award.total_experience, 1_200);
    assert_eq!(award.new_tier, Tier::Trusted);
    assert!(award.leveled_up);

    let fee = net.governance.get_fee_rate(driver.public_key());
    assert!(fee < ENTRY_FEE_RATE_BP);

    let ride = request_with_candidate(
        &rider,
        &driver,
        origin,
        origin.offset_km(5.0, 0.0),
        PaymentMethod::Escrow,
    )
    .await;
    rider.collect_candidacies(&ride.ride_id).await.unwrap();
    rider
        .accept_candidacy(&ride.ride_id, driver.public_key())
        .await
        .unwrap();

    let record = net.escrow.get_record(&ride.ride_id).unwrap();
    assert_eq!(record.fee_basis_points, fee);
    assert_eq!(record.amount, 1_750);
}

#[tokio::test]
async fn test_external_payment_defers_award() {
    let net = TestNetwork::new(1);
    let origin = sao_paulo();
    let driver = net.online_driver("driver", origin.offset_km(1.0, 0.0)).await;
    let rider = net.engine("rider");
    let mut inbox = driver.subscribe_inbox().await.unwrap();

    let ride = request_with_candidate(
        &rider,
        &driver,
        origin,
        origin.offset_km(3.0, 0.0),
        PaymentMethod::External,
    )
    .await;
    rider.collect_candidacies(&ride.ride_id).await.unwrap();
    rider
        .accept_candidacy(&ride.ride_id, driver.public_key())
        .await
        .unwrap();
    assert!(net.escrow.get_record(&ride.ride_id).is_none());
    assert!(matches!(deliver_next(&driver, &mut inbox).await, EngineEvent::Matched(_)));

    rider.start_trip(&ride.ride_id).await.unwrap();
    exchange(&ride.ride_id, &rider, &driver, TokenType::End);
    let receipt = rider.complete_trip(&ride.ride_id, None, None).await.unwrap();
    assert!(receipt.payout.is_none());
    assert!(receipt.award.is_none());
    assert_eq!(receipt.proof.confidence, ProofConfidence::Degraded);

    let award = rider
        .confirm_external_payment(&ride.ride_id, None)
        .unwrap()
        .unwrap();
    assert_eq!(award.experience_gained, 10 + ride.distance_km.floor() as u64);
    assert!(rider
        .confirm_external_payment(&ride.ride_id, None)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_search_timeout_cancels_request() {
    let net = TestNetwork::new(1);
    let origin = sao_paulo();
    let rider = net.funded_rider("rider", 10_000);
    let ride = rider
        .request_ride(origin, origin.offset_km(2.0, 0.0), PaymentMethod::Escrow)
        .await
        .unwrap();

    let timeout_ms = net.config.matching.search_timeout_secs * 1_000;
    assert!(rider
        .expire_stale_searches_at(current_timestamp_ms())
        .await
        .is_empty());
    let expired = rider
        .expire_stale_searches_at(ride.created_at + timeout_ms + 1)
        .await;
    assert_eq!(expired, vec![ride.ride_id.clone()]);
    assert_eq!(
        rider.ride(&ride.ride_id).unwrap().status,
        RideStatus::Cancelled
    );

    // A new request is possible once the old one is gone
    rider
        .request_ride(origin, origin.offset_km(2.0, 0.0), PaymentMethod::Escrow)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rider_cancellation_reaches_driver() {
    let net = TestNetwork::new(1);
    let origin = sao_paulo();
    let driver = net.online_driver("driver", origin.offset_km(1.0, 0.0)).await;
    let rider = net.funded_rider("rider", 10_000);
    let mut inbox = driver.subscribe_inbox().await.unwrap();

    let ride = request_with_candidate(
        &rider,
        &driver,
        origin,
        origin.offset_km(3.0, 0.0),
        PaymentMethod::Escrow,
    )
    .await;
    rider.collect_candidacies(&ride.ride_id).await.unwrap();
    rider
        .accept_candidacy(&ride.ride_id, driver.public_key())
        .await
        .unwrap();
    assert!(matches!(deliver_next(&driver, &mut inbox).await, EngineEvent::Matched(_)));

    rider.cancel_ride(&ride.ride_id).await.unwrap();
    assert_eq!(net.escrow.balance_of(rider.public_key()), 10_000);
    assert!(matches!(
        deliver_next(&driver, &mut inbox).await,
        EngineEvent::StatusChanged {
            status: RideStatus::Cancelled,
            ..
        }
    ));
    assert!(driver.active_ride().is_none());
}
