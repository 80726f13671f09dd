//! Typed event payloads.
//!
//! Event content is a JSON-encoded [`RidePayload`]. Decoding checks that the
//! variant agrees with the event kind and that the event author is the
//! identity the payload speaks for, so a verified event can never carry a
//! payload on someone else's behalf.

use crate::error::{MatchingError, MatchingResult};
use crate::ride::{PaymentMethod, RideStatus};
use ridemesh_core::{Actor, GeoPoint, RideId, UserId};
use ridemesh_governance::Tier;
use ridemesh_relay::{EventKind, ProtocolEvent};
use serde::{Deserialize, Serialize};

/// Replaceable availability record of a driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverAnnouncement {
    pub driver_id: UserId,
    pub name: String,
    /// Free-form vehicle description ("Gray Toyota Corolla, ABC-1234")
    pub vehicle: String,
    pub rating: f64,
    pub tier: Tier,
    pub location: GeoPoint,
    pub available: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRequest {
    pub ride_id: RideId,
    pub rider_id: UserId,
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    pub distance_km: f64,
    pub fare_cents: u64,
    pub payment_method: PaymentMethod,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidacy {
    pub ride_id: RideId,
    pub driver_id: UserId,
    pub estimated_arrival_minutes: f64,
    pub location: GeoPoint,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideAcceptance {
    pub ride_id: RideId,
    pub rider_id: UserId,
    pub driver_id: UserId,
    pub fare_cents: u64,
    pub payment_method: PaymentMethod,
    pub escrow_locked: bool,
    pub timestamp: u64,
}

/// Advisory notice of a ride status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideStatusUpdate {
    pub ride_id: RideId,
    pub status: RideStatus,
    pub actor: Actor,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RidePayload {
    DriverAnnouncement(DriverAnnouncement),
    RideRequest(RideRequest),
    Candidacy(Candidacy),
    RideAcceptance(RideAcceptance),
    RideStatusUpdate(RideStatusUpdate),
}

impl RidePayload {
    pub fn kind(&self) -> EventKind {
        match self {
            RidePayload::DriverAnnouncement(_) => EventKind::DriverAnnouncement,
            RidePayload::RideRequest(_) => EventKind::RideRequest,
            RidePayload::Candidacy(_) => EventKind::Candidacy,
            RidePayload::RideAcceptance(_) => EventKind::RideAcceptance,
            RidePayload::RideStatusUpdate(_) => EventKind::RideStatusUpdate,
        }
    }

    /// Creation time the payload claims, used as the event's `created_at`.
    pub fn timestamp(&self) -> u64 {
        match self {
            RidePayload::DriverAnnouncement(a) => a.timestamp,
            RidePayload::RideRequest(r) => r.timestamp,
            RidePayload::Candidacy(c) => c.timestamp,
            RidePayload::RideAcceptance(a) => a.timestamp,
            RidePayload::RideStatusUpdate(u) => u.timestamp,
        }
    }

    pub fn to_content(&self) -> MatchingResult<String> {
        serde_json::to_string(self).map_err(|e| MatchingError::InvalidPayload(e.to_string()))
    }

    /// Decode and cross-check the payload of a verified event.
    pub fn from_event(event: &ProtocolEvent) -> MatchingResult<Self> {
        let payload: RidePayload = serde_json::from_str(&event.content)
            .map_err(|e| MatchingError::InvalidPayload(e.to_string()))?;

        if payload.kind() != event.kind {
            return Err(MatchingError::InvalidPayload(format!(
                "{:?} payload in {} event",
                payload.kind(),
                event.kind
            )));
        }

        let (claimed, field) = match &payload {
            RidePayload::DriverAnnouncement(a) => (Some(&a.driver_id), "driver_id"),
            RidePayload::RideRequest(r) => (Some(&r.rider_id), "rider_id"),
            RidePayload::Candidacy(c) => (Some(&c.driver_id), "driver_id"),
            RidePayload::RideAcceptance(a) => (Some(&a.rider_id), "rider_id"),
            RidePayload::RideStatusUpdate(_) => (None, ""),
        };
        if let Some(claimed) = claimed {
            if *claimed != event.public_key {
                return Err(MatchingError::AuthorMismatch { field });
            }
        }

        Ok(payload)
    }
}
