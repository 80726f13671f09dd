//! Driver discovery and request fan-out.

use crate::test_utils::*;
use ridemesh_core::{current_timestamp_ms, ErrorKind};
use ridemesh_matching::{format_cents, MatchingError, PaymentMethod, RideStatus};

#[tokio::test]
async fn test_five_km_quote_ranks_drivers_by_distance() {
    let net = TestNetwork::new(2);
    let origin = sao_paulo();
    let far = net.online_driver("far", origin.offset_km(0.0, 4.0)).await;
    let near = net.online_driver("near", origin.offset_km(0.5, 0.0)).await;
    let mid = net.online_driver("mid", origin.offset_km(-2.0, 0.0)).await;
    let _out_of_range = net.online_driver("out", origin.offset_km(7.0, 0.0)).await;
    let rider = net.funded_rider("rider", 10_000);

    let drivers = rider.find_nearby_drivers(origin, 5.0).await;
    let ids: Vec<&str> = drivers.iter().map(|d| d.driver_id.as_str()).collect();
    assert_eq!(ids, vec![near.public_key(), mid.public_key(), far.public_key()]);
    assert!(drivers.windows(2).all(|w| w[0].distance_km <= w[1].distance_km));
    // 2 km at 30 km/h
    assert!((drivers[1].eta_minutes - 4.0).abs() < 0.05);

    let ride = rider
        .request_ride(origin, origin.offset_km(5.0, 0.0), PaymentMethod::Escrow)
        .await
        .unwrap();
    assert_eq!(ride.status, RideStatus::Searching);
    assert!((ride.distance_km - 5.0).abs() < 0.01);
    assert_eq!(format_cents(ride.fare_cents), "17.50");
}

#[tokio::test]
async fn test_request_reaches_only_nearby_drivers() {
    let net = TestNetwork::new(1);
    let origin = sao_paulo();
    let near = net.online_driver("near", origin.offset_km(1.0, 1.0)).await;
    let far = net.online_driver("far", origin.offset_km(30.0, 0.0)).await;
    let rider = net.funded_rider("rider", 10_000);

    let ride = rider
        .request_ride(origin, origin.offset_km(3.0, 0.0), PaymentMethod::Escrow)
        .await
        .unwrap();

    let seen = near.backfill_ride_requests().await.unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].ride_id, ride.ride_id);
    assert!(far.backfill_ride_requests().await.unwrap().is_empty());
    assert!(matches!(
        far.submit_candidacy(&ride.ride_id).await,
        Err(MatchingError::RideNotFound { .. })
    ));
}

#[tokio::test]
async fn test_offline_and_stale_drivers_excluded() {
    let net = TestNetwork::new(1);
    let origin = sao_paulo();
    let staying = net.online_driver("staying", origin.offset_km(1.0, 0.0)).await;
    let leaving = net.online_driver("leaving", origin.offset_km(2.0, 0.0)).await;
    let rider = net.engine("rider");

    assert_eq!(rider.find_nearby_drivers(origin, 5.0).await.len(), 2);
    leaving.go_offline().await.unwrap();

    let drivers = rider.find_nearby_drivers(origin, 5.0).await;
    assert_eq!(drivers.len(), 1);
    assert_eq!(drivers[0].driver_id, staying.public_key());

    let ttl_ms = net.config.matching.driver_ttl_secs * 1_000;
    let later = current_timestamp_ms() + ttl_ms + 1_000;
    assert!(rider.cache().available_at(later).is_empty());
}

#[tokio::test]
async fn test_relay_outage_falls_back_to_cache() {
    let net = TestNetwork::new(2);
    let origin = sao_paulo();
    let driver = net.online_driver("driver", origin.offset_km(1.0, 0.0)).await;
    let rider = net.funded_rider("rider", 10_000);
    assert_eq!(rider.find_nearby_drivers(origin, 5.0).await.len(), 1);

    net.set_all_online(false);
    let drivers = rider.find_nearby_drivers(origin, 5.0).await;
    assert_eq!(drivers.len(), 1);
    assert_eq!(drivers[0].driver_id, driver.public_key());

    let err = rider
        .request_ride(origin, origin.offset_km(2.0, 0.0), PaymentMethod::Escrow)
        .await
        .unwrap_err();
    let err: ridemesh_core::Error = err.into();
    assert_eq!(err.kind(), ErrorKind::TransientNetwork);
    assert!(err.kind().is_retryable());
    assert!(rider.active_ride().is_none());
}

#[tokio::test]
async fn test_single_relay_outage_is_tolerated() {
    let net = TestNetwork::new(2);
    let origin = sao_paulo();
    net.relays[0].set_online(false);

    let driver = net.online_driver("driver", origin.offset_km(1.0, 0.0)).await;
    let rider = net.funded_rider("rider", 10_000);
    let ride = request_with_candidate(
        &rider,
        &driver,
        origin,
        origin.offset_km(4.0, 0.0),
        PaymentMethod::Escrow,
    )
    .await;

    let candidacies = rider.collect_candidacies(&ride.ride_id).await.unwrap();
    assert_eq!(candidacies.len(), 1);
    assert_eq!(net.relays[1].event_count(), 3);
    assert_eq!(net.relays[0].event_count(), 0);
}
