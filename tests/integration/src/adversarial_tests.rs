//! Forged, stale and replayed inputs from hostile peers.

use crate::test_utils::*;
use ridemesh_core::current_timestamp_ms;
use ridemesh_matching::{
    Candidacy, EngineEvent, MatchingError, PaymentMethod, RidePayload, RideStatus,
    RideStatusUpdate,
};
use ridemesh_presence::{
    validate_token, PresenceError, PresenceToken, TokenRejection, TokenType,
};
use ridemesh_relay::{EventBuilder, EventKind, Filter, RelayEndpoint, TAG_RECIPIENT};
use std::sync::atomic::Ordering;

#[test]
fn test_stale_presence_token_rejected() {
    let net = TestNetwork::new(1);
    let rider = net.keys.identity("rider").unwrap();
    let six_minutes_ago = current_timestamp_ms() - 360_000;

    let token =
        PresenceToken::generate_at(&rider, "ride-1", TokenType::Start, six_minutes_ago).unwrap();
    let rejection = validate_token(&token).unwrap_err();
    assert!(matches!(rejection, TokenRejection::Expired { .. }));
    assert!(rejection.user_message().contains("expired"));

    let fresh = PresenceToken::generate(&rider, "ride-1", TokenType::Start).unwrap();
    assert!(validate_token(&fresh).is_ok());
}

#[test]
fn test_future_presence_token_rejected() {
    let net = TestNetwork::new(1);
    let driver = net.keys.identity("driver").unwrap();
    let ahead = current_timestamp_ms() + 120_000;

    let token = PresenceToken::generate_at(&driver, "ride-1", TokenType::End, ahead).unwrap();
    assert!(matches!(
        validate_token(&token),
        Err(TokenRejection::FromFuture { .. })
    ));
}

#[test]
fn test_tampered_presence_token_rejected() {
    let net = TestNetwork::new(1);
    let rider = net.keys.identity("rider").unwrap();
    let mut token = PresenceToken::generate(&rider, "ride-1", TokenType::Transit).unwrap();
    token.ride_id = "ride-2".into();
    assert_eq!(validate_token(&token), Err(TokenRejection::InvalidSignature));
}

#[tokio::test]
async fn test_replayed_and_stale_tokens_rejected_by_engine() {
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

    let token = driver
        .generate_presence_token(&ride.ride_id, TokenType::Transit)
        .unwrap();
    rider
        .receive_presence_token(&ride.ride_id, token.clone())
        .unwrap();
    assert!(matches!(
        rider.receive_presence_token(&ride.ride_id, token),
        Err(MatchingError::Presence(PresenceError::Rejected(
            TokenRejection::Replayed
        )))
    ));

    let identity = net.keys.identity("driver").unwrap();
    let stale = PresenceToken::generate_at(
        &identity,
        &ride.ride_id,
        TokenType::End,
        current_timestamp_ms() - 600_000,
    )
    .unwrap();
    let err = rider
        .receive_presence_token(&ride.ride_id, stale)
        .unwrap_err();
    assert!(matches!(
        err,
        MatchingError::Presence(PresenceError::Rejected(TokenRejection::Expired { .. }))
    ));

    let outsider = net.keys.identity("outsider").unwrap();
    let foreign = PresenceToken::generate(&outsider, &ride.ride_id, TokenType::End).unwrap();
    assert!(matches!(
        rider.receive_presence_token(&ride.ride_id, foreign),
        Err(MatchingError::Presence(PresenceError::Rejected(
            TokenRejection::NotParticipant { .. }
        )))
    ));
}

#[tokio::test]
async fn test_tampered_events_never_reach_clients() {
    let net = TestNetwork::new(1);
    let origin = sao_paulo();
    let _driver = net.online_driver("driver", origin).await;
    let client = net.client();

    let mut forged = client
        .query(&Filter::new().kind(EventKind::DriverAnnouncement))
        .await
        .unwrap()
        .remove(0);
    forged.content = forged.content.replace("4.9", "5.0");
    forged.created_at += 1;
    forged.id = "00".repeat(32);
    net.relays[0].publish(&forged).await.unwrap();

    assert!(client.publish(&forged).await.is_err());
    let events = client
        .query(&Filter::new().kind(EventKind::DriverAnnouncement))
        .await
        .unwrap();
    assert!(events.is_empty());
    assert!(client.stats().inbound_rejected.load(Ordering::Relaxed) >= 1);

    let rider = net.engine("rider");
    assert!(rider.handle_event(&forged).await.is_err());
    // The forgery displaced the genuine announcement at the relay
    assert!(rider.find_nearby_drivers(origin, 5.0).await.is_empty());
}

#[tokio::test]
async fn test_candidacy_on_behalf_of_another_driver_rejected() {
    let net = TestNetwork::new(1);
    let origin = sao_paulo();
    let honest = net.online_driver("honest", origin.offset_km(1.0, 0.0)).await;
    let rider = net.funded_rider("rider", 10_000);
    let ride = rider
        .request_ride(origin, origin.offset_km(3.0, 0.0), PaymentMethod::Escrow)
        .await
        .unwrap();

    let mallory = net.keys.identity("mallory").unwrap();
    let payload = RidePayload::Candidacy(Candidacy {
        ride_id: ride.ride_id.clone(),
        driver_id: honest.public_key().to_string(),
        estimated_arrival_minutes: 0.5,
        location: origin,
        timestamp: current_timestamp_ms(),
    });
    let event = EventBuilder::new(EventKind::Candidacy)
        .tag(TAG_RECIPIENT, rider.public_key())
        .content(payload.to_content().unwrap())
        .sign(&mallory)
        .unwrap();

    assert!(matches!(
        rider.handle_event(&event).await,
        Err(MatchingError::AuthorMismatch { field: "driver_id" })
    ));
    assert!(rider.ride(&ride.ride_id).unwrap().candidacies.is_empty());
}

#[tokio::test]
async fn test_status_update_from_stranger_ignored() {
    let net = TestNetwork::new(1);
    let origin = sao_paulo();
    let driver = net.online_driver("driver", origin.offset_km(1.0, 0.0)).await;
    let rider = net.funded_rider("rider", 10_000);
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

    let mallory = net.keys.identity("mallory").unwrap();
    let payload = RidePayload::RideStatusUpdate(RideStatusUpdate {
        ride_id: ride.ride_id.clone(),
        status: RideStatus::Cancelled,
        actor: ridemesh_core::Actor::Driver,
        timestamp: current_timestamp_ms(),
    });
    let event = EventBuilder::new(EventKind::RideStatusUpdate)
        .tag(TAG_RECIPIENT, rider.public_key())
        .content(payload.to_content().unwrap())
        .sign(&mallory)
        .unwrap();

    assert!(matches!(
        rider.handle_event(&event).await.unwrap(),
        EngineEvent::Ignored(_)
    ));
    assert_eq!(rider.ride(&ride.ride_id).unwrap().status, RideStatus::Matched);
    assert!(net.escrow.get_record(&ride.ride_id).is_some());
}
