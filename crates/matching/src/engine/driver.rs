//! Driver side: availability, request intake, candidacies.

use super::{DriverSession, EngineEvent, MatchingEngine};
use crate::error::{MatchingError, MatchingResult};
use crate::fare::estimated_arrival_minutes;
use crate::payload::{Candidacy, DriverAnnouncement, RideAcceptance, RidePayload, RideRequest};
use crate::ride::{PaymentMethod, Ride, RideStatus, Role};
use ridemesh_core::{current_timestamp_ms, Actor, GeoPoint, LocationProvider, RideId};
use ridemesh_relay::{
    EventKind, Filter, Subscription, TAG_GEOCELL, TAG_RECIPIENT, TAG_REPLACEABLE, TAG_RIDE,
    TAG_TOPIC,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct DriverProfile {
    pub name: String,
    pub vehicle: String,
    pub rating: f64,
}

impl DriverProfile {
    pub fn new(name: impl Into<String>, vehicle: impl Into<String>, rating: f64) -> Self {
        Self {
            name: name.into(),
            vehicle: vehicle.into(),
            rating,
        }
    }
}

/// A ride request within this driver's pickup range.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingRequest {
    pub ride_id: RideId,
    pub rider_id: String,
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    pub distance_km: f64,
    pub fare_cents: u64,
    pub payment_method: PaymentMethod,
    pub pickup_distance_km: f64,
}

impl MatchingEngine {
    /// Start accepting rides at `location`.
    pub async fn go_online(
        &self,
        profile: DriverProfile,
        location: GeoPoint,
    ) -> MatchingResult<()> {
        let available = self.read_state()?.active().is_none();
        let session = DriverSession {
            profile,
            location,
            available,
        };
        self.announce(&session).await?;
        self.write_state()?.driver = Some(session);
        info!(driver_id = %self.public_key(), available, "driver online");
        Ok(())
    }

    /// Re-announce at a new position.
    pub async fn update_location(&self, location: GeoPoint) -> MatchingResult<()> {
        let mut session = self.session()?;
        session.location = location;
        self.announce(&session).await?;
        if let Some(current) = self.write_state()?.driver.as_mut() {
            current.location = location;
        }
        Ok(())
    }

    /// Stop accepting rides. The local session ends even if the final
    /// announcement cannot be delivered.
    pub async fn go_offline(&self) -> MatchingResult<()> {
        let mut session = self.write_state()?.driver.take().ok_or(MatchingError::NotOnline)?;
        session.available = false;
        info!(driver_id = %self.public_key(), "driver offline");
        self.announce(&session).await
    }

    /// Re-announce whenever `provider` reports a new fix, until the provider
    /// is dropped.
    pub fn track_location(self: &Arc<Self>, provider: Arc<dyn LocationProvider>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut fixes = provider.watch();
        tokio::spawn(async move {
            while fixes.changed().await.is_ok() {
                let fix = *fixes.borrow_and_update();
                match engine.update_location(fix.point()).await {
                    Ok(()) => {}
                    Err(MatchingError::NotOnline) => debug!("location fix while offline"),
                    Err(e) => warn!(error = %e, "location update not announced"),
                }
            }
        })
    }

    /// Subscribe to ride requests published around the current position.
    pub async fn subscribe_ride_requests(&self) -> MatchingResult<Subscription> {
        Ok(self.relay.subscribe(self.request_filter()?).await?)
    }

    /// Fetch recent requests near the current position.
    pub async fn backfill_ride_requests(&self) -> MatchingResult<Vec<IncomingRequest>> {
        let now = current_timestamp_ms();
        self.housekeeping(now);
        let since = now.saturating_sub(self.config.search_timeout_secs.saturating_mul(1_000));
        let events = self.relay.query(&self.request_filter()?.since(since)).await?;

        let mut incoming = Vec::new();
        for event in &events {
            match RidePayload::from_event(event) {
                Ok(RidePayload::RideRequest(request)) => {
                    incoming.extend(self.consider_request(request)?);
                }
                Ok(_) => {}
                Err(e) => debug!(event_id = %event.id, error = %e, "skipping ride request"),
            }
        }
        Ok(incoming)
    }

    /// Bid on a request this driver has seen.
    pub async fn submit_candidacy(&self, ride_id: &str) -> MatchingResult<Candidacy> {
        let (session, request) = {
            let state = self.read_state()?;
            let session = state.driver.clone().ok_or(MatchingError::NotOnline)?;
            if !session.available {
                return Err(MatchingError::DriverBusy {
                    ride_id: state.active_ride.clone().unwrap_or_default(),
                });
            }
            let request = state
                .incoming
                .get(ride_id)
                .cloned()
                .ok_or_else(|| MatchingError::RideNotFound {
                    ride_id: ride_id.to_string(),
                })?;
            (session, request)
        };

        let pickup_km = session.location.haversine_km(&request.origin);
        let candidacy = Candidacy {
            ride_id: request.ride_id.clone(),
            driver_id: self.public_key().to_string(),
            estimated_arrival_minutes: estimated_arrival_minutes(
                pickup_km,
                self.config.average_speed_kmh,
            ),
            location: session.location,
            timestamp: current_timestamp_ms(),
        };
        let tags = vec![
            (TAG_RIDE, request.ride_id.clone()),
            (TAG_RECIPIENT, request.rider_id.clone()),
        ];
        self.publish_payload(&RidePayload::Candidacy(candidacy.clone()), tags)
            .await?;

        debug!(ride_id, eta_minutes = candidacy.estimated_arrival_minutes, "candidacy submitted");
        Ok(candidacy)
    }

    /// Keep a request if this driver is online and within pickup range.
    pub(crate) fn consider_request(
        &self,
        request: RideRequest,
    ) -> MatchingResult<Option<IncomingRequest>> {
        let mut state = self.write_state()?;
        let Some(session) = state.driver.as_ref() else {
            return Ok(None);
        };
        if request.rider_id == self.public_key() {
            return Ok(None);
        }
        let pickup_distance_km = session.location.haversine_km(&request.origin);
        if pickup_distance_km > self.config.search_radius_km {
            return Ok(None);
        }

        let incoming = IncomingRequest {
            ride_id: request.ride_id.clone(),
            rider_id: request.rider_id.clone(),
            origin: request.origin,
            destination: request.destination,
            distance_km: request.distance_km,
            fare_cents: request.fare_cents,
            payment_method: request.payment_method,
            pickup_distance_km,
        };
        state.incoming.insert(request.ride_id.clone(), request);
        Ok(Some(incoming))
    }

    /// React to a rider accepting a candidacy.
    ///
    /// A driver who is already busy answers with a CANCELLED status update
    /// so the rider can pick someone else.
    pub(crate) async fn handle_acceptance(
        &self,
        acceptance: RideAcceptance,
    ) -> MatchingResult<EngineEvent> {
        if acceptance.driver_id != self.public_key() {
            self.write_state()?.incoming.remove(&acceptance.ride_id);
            return Ok(EngineEvent::Ignored("another driver was accepted".into()));
        }

        let now = current_timestamp_ms();
        let outcome = {
            let mut state = self.write_state()?;
            match state.incoming.get(&acceptance.ride_id) {
                None => return Ok(EngineEvent::Ignored("acceptance for unknown request".into())),
                Some(request) if request.rider_id != acceptance.rider_id => {
                    return Ok(EngineEvent::Ignored("acceptance from a different rider".into()))
                }
                Some(_) => {}
            }

            let busy = state.active().is_some()
                || !state.driver.as_ref().map(|s| s.available).unwrap_or(false);
            if busy {
                state.incoming.remove(&acceptance.ride_id);
                None
            } else {
                let request = state
                    .incoming
                    .remove(&acceptance.ride_id)
                    .ok_or_else(|| MatchingError::RideNotFound {
                        ride_id: acceptance.ride_id.clone(),
                    })?;
                let mut ride = Self::driver_ride(&request, &acceptance, self.public_key());
                ride.transition(RideStatus::Matched, Actor::Rider, now)?;

                let collector =
                    self.new_collector(&ride.ride_id, &ride.rider_id, self.public_key());
                state.collectors.insert(ride.ride_id.clone(), collector);
                state.rides.insert(ride.ride_id.clone(), ride.clone());
                state.active_ride = Some(ride.ride_id.clone());
                if let Some(session) = state.driver.as_mut() {
                    session.available = false;
                }
                Some(ride)
            }
        };

        match outcome {
            Some(ride) => {
                info!(ride_id = %ride.ride_id, rider_id = %ride.rider_id, "ride matched");
                self.announce_quietly().await;
                Ok(EngineEvent::Matched(ride))
            }
            None => {
                warn!(ride_id = %acceptance.ride_id, "acceptance while busy, declining");
                self.notify_status(
                    &acceptance.ride_id,
                    RideStatus::Cancelled,
                    Some(&acceptance.rider_id),
                    Actor::Driver,
                )
                .await;
                Ok(EngineEvent::Ignored("driver busy".into()))
            }
        }
    }

    fn driver_ride(request: &RideRequest, acceptance: &RideAcceptance, driver_id: &str) -> Ride {
        Ride {
            ride_id: request.ride_id.clone(),
            role: Role::Driver,
            rider_id: request.rider_id.clone(),
            driver_id: Some(driver_id.to_string()),
            origin: request.origin,
            destination: request.destination,
            distance_km: request.distance_km,
            fare_cents: acceptance.fare_cents,
            payment_method: acceptance.payment_method,
            status: RideStatus::Searching,
            created_at: request.timestamp,
            matched_at: None,
            started_at: None,
            ended_at: None,
            candidacies: Vec::new(),
            cancelled_by: None,
            proof_confidence: None,
            governance_awarded: false,
        }
    }

    fn session(&self) -> MatchingResult<DriverSession> {
        self.read_state()?.driver.clone().ok_or(MatchingError::NotOnline)
    }

    fn request_filter(&self) -> MatchingResult<Filter> {
        let location = self.session()?.location;
        Ok(Filter::new()
            .kind(EventKind::RideRequest)
            .geocells(&location.geocell().with_neighbors()))
    }

    /// Publish the replaceable availability record for `session`.
    async fn announce(&self, session: &DriverSession) -> MatchingResult<()> {
        let announcement = DriverAnnouncement {
            driver_id: self.public_key().to_string(),
            name: session.profile.name.clone(),
            vehicle: session.profile.vehicle.clone(),
            rating: session.profile.rating,
            tier: self.governance.tier_of(self.public_key()),
            location: session.location,
            available: session.available,
            timestamp: self.next_announcement_timestamp(),
        };
        let tags = vec![
            (TAG_REPLACEABLE, self.public_key().to_string()),
            (TAG_GEOCELL, session.location.geocell().tag_value()),
            (TAG_TOPIC, "driver".to_string()),
        ];
        self.publish_payload(&RidePayload::DriverAnnouncement(announcement), tags)
            .await
    }

    /// Re-announce the current session if online. Failures are logged only.
    pub(crate) async fn announce_quietly(&self) {
        let Ok(session) = self.session() else {
            return;
        };
        if let Err(e) = self.announce(&session).await {
            warn!(error = %e, "availability announcement not delivered");
        }
    }
}
