//! Rider side: requesting, discovering drivers, choosing a candidacy.

use super::MatchingEngine;
use crate::error::{MatchingError, MatchingResult};
use crate::fare::{estimated_arrival_minutes, fare_cents};
use crate::payload::{Candidacy, DriverAnnouncement, RideAcceptance, RidePayload, RideRequest};
use crate::ride::{PaymentMethod, Ride, RideStatus, Role};
use ridemesh_core::{current_timestamp_ms, Actor, EscrowLock, GeoPoint, RideId};
use ridemesh_governance::Tier;
use ridemesh_relay::{
    EventKind, Filter, TAG_GEOCELL, TAG_RECIPIENT, TAG_RIDE, TAG_TOPIC,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A driver within search range, closest first in listings.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyDriver {
    pub driver_id: String,
    pub name: String,
    pub vehicle: String,
    pub rating: f64,
    pub tier: Tier,
    pub location: GeoPoint,
    pub distance_km: f64,
    pub eta_minutes: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidacyOutcome {
    Recorded,
    /// Unknown ride, not searching, or an older duplicate
    Ignored,
}

impl MatchingEngine {
    /// Publish a ride request to drivers near `origin`.
    pub async fn request_ride(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
        payment_method: PaymentMethod,
    ) -> MatchingResult<Ride> {
        if let Some(active) = self.read_state()?.active() {
            return Err(MatchingError::ActiveRideExists {
                ride_id: active.ride_id.clone(),
            });
        }

        let distance_km = origin.haversine_km(&destination);
        let nearby = self
            .find_nearby_drivers(origin, self.config.search_radius_km)
            .await;

        let now = current_timestamp_ms();
        let request = RideRequest {
            ride_id: Uuid::new_v4().to_string(),
            rider_id: self.public_key().to_string(),
            origin,
            destination,
            distance_km,
            fare_cents: fare_cents(distance_km),
            payment_method,
            timestamp: now,
        };

        let mut tags = vec![
            (TAG_GEOCELL, origin.geocell().tag_value()),
            (TAG_RIDE, request.ride_id.clone()),
            (TAG_TOPIC, "ride-request".to_string()),
        ];
        tags.extend(
            nearby
                .iter()
                .map(|d| (TAG_RECIPIENT, d.driver_id.clone())),
        );
        self.publish_payload(&RidePayload::RideRequest(request.clone()), tags)
            .await?;

        let ride = Ride {
            ride_id: request.ride_id.clone(),
            role: Role::Rider,
            rider_id: request.rider_id,
            driver_id: None,
            origin,
            destination,
            distance_km,
            fare_cents: request.fare_cents,
            payment_method,
            status: RideStatus::Searching,
            created_at: now,
            matched_at: None,
            started_at: None,
            ended_at: None,
            candidacies: Vec::new(),
            cancelled_by: None,
            proof_confidence: None,
            governance_awarded: false,
        };

        {
            let mut state = self.write_state()?;
            if let Some(active) = state.active() {
                return Err(MatchingError::ActiveRideExists {
                    ride_id: active.ride_id.clone(),
                });
            }
            state.rides.insert(ride.ride_id.clone(), ride.clone());
            state.active_ride = Some(ride.ride_id.clone());
        }

        info!(
            ride_id = %ride.ride_id,
            distance_km = format!("{:.2}", distance_km),
            fare_cents = ride.fare_cents,
            drivers_notified = nearby.len(),
            "ride requested"
        );
        Ok(ride)
    }

    /// Available drivers within `radius_km`, closest first.
    ///
    /// Refreshes the cache from relays; when no relay answers, the cached
    /// announcements are used as-is.
    pub async fn find_nearby_drivers(
        &self,
        location: GeoPoint,
        radius_km: f64,
    ) -> Vec<NearbyDriver> {
        let now = current_timestamp_ms();
        self.housekeeping(now);
        let ttl_ms = self.cache.ttl().as_millis() as u64;
        let filter = Filter::new()
            .kind(EventKind::DriverAnnouncement)
            .geocells(&location.geocell().with_neighbors())
            .since(now.saturating_sub(ttl_ms));

        match self.relay.query(&filter).await {
            Ok(events) => {
                for event in &events {
                    match RidePayload::from_event(event) {
                        Ok(RidePayload::DriverAnnouncement(announcement)) => {
                            self.cache.upsert(announcement);
                        }
                        Ok(_) => {}
                        Err(e) => debug!(event_id = %event.id, error = %e, "skipping announcement"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "driver lookup using cached announcements"),
        }

        self.rank_drivers(location, radius_km, now)
    }

    fn rank_drivers(&self, location: GeoPoint, radius_km: f64, now_ms: u64) -> Vec<NearbyDriver> {
        let mut drivers: Vec<NearbyDriver> = self
            .cache
            .available_at(now_ms)
            .into_iter()
            .filter(|a| a.driver_id != self.public_key())
            .filter_map(|a| {
                let distance_km = location.haversine_km(&a.location);
                (distance_km <= radius_km).then(|| self.nearby(a, distance_km))
            })
            .collect();
        drivers.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        drivers
    }

    fn nearby(&self, announcement: DriverAnnouncement, distance_km: f64) -> NearbyDriver {
        NearbyDriver {
            eta_minutes: estimated_arrival_minutes(distance_km, self.config.average_speed_kmh),
            driver_id: announcement.driver_id,
            name: announcement.name,
            vehicle: announcement.vehicle,
            rating: announcement.rating,
            tier: announcement.tier,
            location: announcement.location,
            distance_km,
        }
    }

    /// Pull candidacies for a ride from relays, then list what is recorded,
    /// fastest arrival first.
    pub async fn collect_candidacies(&self, ride_id: &str) -> MatchingResult<Vec<Candidacy>> {
        self.own_rider_ride(ride_id)?;

        let filter = Filter::new()
            .kind(EventKind::Candidacy)
            .tag(TAG_RIDE, ride_id)
            .tag(TAG_RECIPIENT, self.public_key());
        match self.relay.query(&filter).await {
            Ok(events) => {
                for event in &events {
                    match RidePayload::from_event(event) {
                        Ok(RidePayload::Candidacy(candidacy)) => {
                            self.handle_candidacy(candidacy)?;
                        }
                        Ok(_) => {}
                        Err(e) => debug!(event_id = %event.id, error = %e, "skipping candidacy"),
                    }
                }
            }
            Err(e) => warn!(ride_id, error = %e, "candidacy backfill failed"),
        }

        let mut candidacies = self.own_rider_ride(ride_id)?.candidacies;
        candidacies.sort_by(|a, b| {
            a.estimated_arrival_minutes
                .total_cmp(&b.estimated_arrival_minutes)
        });
        Ok(candidacies)
    }

    /// Record a driver's candidacy on a ride that is still searching.
    pub fn handle_candidacy(&self, candidacy: Candidacy) -> MatchingResult<CandidacyOutcome> {
        let mut state = self.write_state()?;
        let Some(ride) = state.rides.get_mut(&candidacy.ride_id) else {
            return Ok(CandidacyOutcome::Ignored);
        };
        if ride.role != Role::Rider || candidacy.driver_id == ride.rider_id {
            return Ok(CandidacyOutcome::Ignored);
        }
        if ride.status != RideStatus::Searching {
            debug!(
                ride_id = %ride.ride_id,
                status = ?ride.status,
                driver_id = %candidacy.driver_id,
                "late candidacy ignored"
            );
            return Ok(CandidacyOutcome::Ignored);
        }

        let driver_id = candidacy.driver_id.clone();
        if ride.upsert_candidacy(candidacy) {
            debug!(ride_id = %ride.ride_id, driver_id = %driver_id, "candidacy recorded");
            Ok(CandidacyOutcome::Recorded)
        } else {
            Ok(CandidacyOutcome::Ignored)
        }
    }

    /// Accept one driver's candidacy.
    ///
    /// Escrow-paid rides lock the fare before the acceptance is published,
    /// using the driver's governance fee rate. If the acceptance cannot be
    /// published, or the ride left SEARCHING meanwhile, the lock is refunded.
    pub async fn accept_candidacy(&self, ride_id: &str, driver_id: &str) -> MatchingResult<Ride> {
        let ride = self.own_rider_ride(ride_id)?;
        if ride.status != RideStatus::Searching {
            return Err(MatchingError::InvalidTransition {
                ride_id: ride_id.to_string(),
                from: ride.status,
                to: RideStatus::Matched,
            });
        }
        if !ride.candidacies.iter().any(|c| c.driver_id == driver_id) {
            return Err(MatchingError::CandidacyNotFound {
                ride_id: ride_id.to_string(),
                driver_id: driver_id.to_string(),
            });
        }

        let escrow_locked = match (&self.settlement, ride.payment_method) {
            (Some(gateway), PaymentMethod::Escrow) => {
                let fee_bp = self.governance.get_fee_rate(driver_id);
                gateway.lock(&EscrowLock {
                    ride_id: ride.ride_id.clone(),
                    rider: ride.rider_id.clone(),
                    driver: driver_id.to_string(),
                    amount: ride.fare_cents,
                    fee_bp,
                })?;
                debug!(ride_id, fee_bp, amount = ride.fare_cents, "escrow locked");
                true
            }
            _ => false,
        };

        let acceptance = RidePayload::RideAcceptance(RideAcceptance {
            ride_id: ride.ride_id.clone(),
            rider_id: ride.rider_id.clone(),
            driver_id: driver_id.to_string(),
            fare_cents: ride.fare_cents,
            payment_method: ride.payment_method,
            escrow_locked,
            timestamp: current_timestamp_ms(),
        });
        let tags = vec![
            (TAG_RIDE, ride.ride_id.clone()),
            (TAG_RECIPIENT, driver_id.to_string()),
        ];
        if let Err(e) = self.publish_payload(&acceptance, tags).await {
            if escrow_locked {
                self.refund_quietly(ride_id);
            }
            return Err(e);
        }

        let matched = {
            let mut state = self.write_state()?;
            let ride = state.ride_mut(ride_id)?;
            if let Err(e) =
                ride.transition(RideStatus::Matched, Actor::Rider, current_timestamp_ms())
            {
                drop(state);
                if escrow_locked {
                    self.refund_quietly(ride_id);
                }
                return Err(e);
            }
            ride.driver_id = Some(driver_id.to_string());
            let matched = ride.clone();
            let collector = self.new_collector(ride_id, &matched.rider_id, driver_id);
            state.collectors.insert(ride_id.to_string(), collector);
            matched
        };
        self.cache.mark_unavailable(driver_id);

        info!(ride_id, driver_id, escrow_locked, "candidacy accepted");
        Ok(matched)
    }

    /// Cancel ride requests that found no driver within the search timeout.
    pub async fn expire_stale_searches(&self) -> Vec<RideId> {
        self.expire_stale_searches_at(current_timestamp_ms()).await
    }

    pub async fn expire_stale_searches_at(&self, now_ms: u64) -> Vec<RideId> {
        let timeout_ms = self.config.search_timeout_secs.saturating_mul(1_000);
        let stale: Vec<RideId> = match self.read_state() {
            Ok(state) => state
                .rides
                .values()
                .filter(|r| r.role == Role::Rider && r.status == RideStatus::Searching)
                .filter(|r| now_ms.saturating_sub(r.created_at) > timeout_ms)
                .map(|r| r.ride_id.clone())
                .collect(),
            Err(e) => {
                warn!(error = %e, "search expiry skipped");
                return Vec::new();
            }
        };

        let mut expired = Vec::with_capacity(stale.len());
        for ride_id in stale {
            match self.cancel_as(&ride_id, Actor::Timeout).await {
                Ok(_) => expired.push(ride_id),
                Err(e) => warn!(ride_id = %ride_id, error = %e, "search expiry failed"),
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "stale ride searches expired");
        }
        expired
    }

    fn own_rider_ride(&self, ride_id: &str) -> MatchingResult<Ride> {
        let state = self.read_state()?;
        state
            .rides
            .get(ride_id)
            .filter(|r| r.role == Role::Rider)
            .cloned()
            .ok_or_else(|| MatchingError::RideNotFound {
                ride_id: ride_id.to_string(),
            })
    }
}
