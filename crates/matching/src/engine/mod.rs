//! Ride matching engine.
//!
//! One engine runs per device and plays either side of a ride. Riders publish
//! requests and pick among candidacies; drivers announce availability and
//! answer requests near them. Every message is a signed relay event, and the
//! engine's own view of each ride is the only authority over its lifecycle.
//! Status updates from the counterparty are applied only where the state
//! machine allows them, and a remote COMPLETED only once this device holds
//! the completion proof and no escrow remains locked.
//!
//! State lives behind a single lock that is never held across an `.await`.
//! Operations that publish re-check the ride status once the network call
//! returns.

mod driver;
mod rider;
mod trip;

pub use driver::{DriverProfile, IncomingRequest};
pub use rider::{CandidacyOutcome, NearbyDriver};
pub use trip::CompletionReceipt;

use crate::cache::DriverCache;
use crate::error::{MatchingError, MatchingResult};
use crate::payload::{DriverAnnouncement, RidePayload, RideStatusUpdate};
use crate::ride::{PaymentMethod, Ride, RideStatus, Role};
use ridemesh_core::storage::{get_json, put_json};
use ridemesh_core::{
    current_timestamp_ms, Actor, Config, GeoPoint, KeyValueStore, MatchingConfig, RideId,
    SettlementGateway,
};
use ridemesh_crypto::SigningIdentity;
use ridemesh_governance::GovernanceLedger;
use ridemesh_presence::{PresenceCollector, PresenceValidator, TransitPolicy};
use ridemesh_relay::{
    EventBuilder, EventKind, Filter, ProtocolEvent, RelayClient, Subscription, TAG_RECIPIENT,
    TAG_RIDE, TAG_TOPIC,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

const HISTORY_PREFIX: &str = "rides/";

/// What handling an inbound event changed.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    DriverSeen(DriverAnnouncement),
    RideRequested(IncomingRequest),
    Candidacy {
        ride_id: RideId,
        driver_id: String,
        outcome: CandidacyOutcome,
    },
    Matched(Ride),
    StatusChanged { ride_id: RideId, status: RideStatus },
    Ignored(String),
}

#[derive(Debug, Clone)]
struct DriverSession {
    profile: DriverProfile,
    location: GeoPoint,
    available: bool,
}

#[derive(Debug, Default)]
struct EngineState {
    rides: HashMap<RideId, Ride>,
    active_ride: Option<RideId>,
    driver: Option<DriverSession>,
    /// Requests this driver has seen and may bid on
    incoming: HashMap<RideId, crate::payload::RideRequest>,
    collectors: HashMap<RideId, PresenceCollector>,
    /// Rides with an escrow release or refund in flight
    settling: HashSet<RideId>,
}

impl EngineState {
    fn active(&self) -> Option<&Ride> {
        self.active_ride
            .as_ref()
            .and_then(|id| self.rides.get(id))
            .filter(|ride| !ride.status.is_terminal())
    }

    fn ride_mut(&mut self, ride_id: &str) -> MatchingResult<&mut Ride> {
        self.rides
            .get_mut(ride_id)
            .ok_or_else(|| MatchingError::RideNotFound {
                ride_id: ride_id.to_string(),
            })
    }

    /// Claim a ride for a settlement call. Fails if one is already running.
    fn begin_settling(&mut self, ride_id: &str) -> MatchingResult<()> {
        if !self.settling.insert(ride_id.to_string()) {
            return Err(MatchingError::SettlementInProgress {
                ride_id: ride_id.to_string(),
            });
        }
        Ok(())
    }

    /// Drop requests older than the search timeout and finished rides older
    /// than the retention period. Returns `(rides, requests)` removed.
    fn prune(&mut self, now_ms: u64, config: &MatchingConfig) -> (usize, usize) {
        let search_ms = config.search_timeout_secs.saturating_mul(1_000);
        let retention_ms = config.ride_retention_secs.saturating_mul(1_000);

        let requests = self.incoming.len();
        self.incoming
            .retain(|_, request| now_ms.saturating_sub(request.timestamp) <= search_ms);

        let rides = self.rides.len();
        self.rides.retain(|_, ride| match ride.ended_at {
            Some(ended) if ride.status.is_terminal() => {
                now_ms.saturating_sub(ended) <= retention_ms
            }
            _ => true,
        });
        (rides - self.rides.len(), requests - self.incoming.len())
    }

    /// Bookkeeping once a ride reaches a terminal status.
    fn release_ride(&mut self, ride_id: &str) {
        if self.active_ride.as_deref() == Some(ride_id) {
            self.active_ride = None;
        }
        self.collectors.remove(ride_id);
        let driver_side = self
            .rides
            .get(ride_id)
            .map(|r| r.role == Role::Driver)
            .unwrap_or(false);
        if driver_side {
            if let Some(session) = self.driver.as_mut() {
                session.available = true;
            }
        }
    }
}

pub struct MatchingEngine {
    identity: SigningIdentity,
    relay: Arc<RelayClient>,
    governance: Arc<GovernanceLedger>,
    settlement: Option<Arc<dyn SettlementGateway>>,
    storage: Option<Arc<dyn KeyValueStore>>,
    cache: Arc<DriverCache>,
    config: MatchingConfig,
    validator: PresenceValidator,
    transit_policy: TransitPolicy,
    /// Last announcement timestamp; announcements must strictly increase
    last_announcement: AtomicU64,
    state: RwLock<EngineState>,
}

impl MatchingEngine {
    pub fn new(
        identity: SigningIdentity,
        relay: Arc<RelayClient>,
        governance: Arc<GovernanceLedger>,
        config: &Config,
    ) -> Self {
        let transit_policy = config
            .presence
            .transit_policy
            .parse()
            .unwrap_or_else(|e: String| {
                warn!(error = %e, "falling back to default transit policy");
                TransitPolicy::default()
            });
        Self {
            identity,
            relay,
            governance,
            settlement: None,
            storage: None,
            cache: Arc::new(DriverCache::new(Duration::from_secs(
                config.matching.driver_ttl_secs,
            ))),
            config: config.matching.clone(),
            validator: PresenceValidator::new(&config.presence),
            transit_policy,
            last_announcement: AtomicU64::new(0),
            state: RwLock::new(EngineState::default()),
        }
    }

    /// Settle escrow-paid rides through `gateway`.
    pub fn with_settlement(mut self, gateway: Arc<dyn SettlementGateway>) -> Self {
        self.settlement = Some(gateway);
        self
    }

    /// Persist ride history to `storage`.
    pub fn with_storage(mut self, storage: Arc<dyn KeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Share a driver cache with other components.
    pub fn with_cache(mut self, cache: Arc<DriverCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn public_key(&self) -> &str {
        self.identity.public_key()
    }

    pub fn cache(&self) -> &Arc<DriverCache> {
        &self.cache
    }

    pub fn transit_policy(&self) -> TransitPolicy {
        self.transit_policy
    }

    /// A ride from memory, or from history once it has been pruned.
    pub fn ride(&self, ride_id: &str) -> Option<Ride> {
        if let Some(ride) = self.read_state().ok()?.rides.get(ride_id) {
            return Some(ride.clone());
        }
        self.load_history(ride_id).ok().flatten()
    }

    pub fn active_ride(&self) -> Option<Ride> {
        self.read_state().ok()?.active().cloned()
    }

    /// Completed and cancelled rides from storage, oldest first.
    pub fn ride_history(&self) -> MatchingResult<Vec<Ride>> {
        let Some(storage) = &self.storage else {
            return Ok(Vec::new());
        };
        let mut rides = Vec::new();
        for key in storage.keys_with_prefix(HISTORY_PREFIX)? {
            if let Some(ride) = get_json::<Ride>(storage.as_ref(), &key)? {
                rides.push(ride);
            }
        }
        rides.sort_by_key(|r| r.created_at);
        Ok(rides)
    }

    /// Subscribe to events addressed to this identity: candidacies,
    /// acceptances and status updates.
    pub async fn subscribe_inbox(&self) -> MatchingResult<Subscription> {
        let filter = Filter::new()
            .kind(EventKind::Candidacy)
            .kind(EventKind::RideAcceptance)
            .kind(EventKind::RideStatusUpdate)
            .tag(TAG_RECIPIENT, self.public_key());
        Ok(self.relay.subscribe(filter).await?)
    }

    /// Apply an inbound event to local state.
    pub async fn handle_event(&self, event: &ProtocolEvent) -> MatchingResult<EngineEvent> {
        event.verify()?;
        if event.public_key == self.public_key() {
            return Ok(EngineEvent::Ignored("own event".into()));
        }
        self.housekeeping(current_timestamp_ms());

        match RidePayload::from_event(event)? {
            RidePayload::DriverAnnouncement(announcement) => {
                self.cache.upsert(announcement.clone());
                Ok(EngineEvent::DriverSeen(announcement))
            }
            RidePayload::RideRequest(request) => Ok(match self.consider_request(request)? {
                Some(incoming) => EngineEvent::RideRequested(incoming),
                None => EngineEvent::Ignored("request out of range".into()),
            }),
            RidePayload::Candidacy(candidacy) => {
                let ride_id = candidacy.ride_id.clone();
                let driver_id = candidacy.driver_id.clone();
                let outcome = self.handle_candidacy(candidacy)?;
                Ok(EngineEvent::Candidacy {
                    ride_id,
                    driver_id,
                    outcome,
                })
            }
            RidePayload::RideAcceptance(acceptance) => self.handle_acceptance(acceptance).await,
            RidePayload::RideStatusUpdate(update) => {
                self.handle_status_update(update, &event.public_key).await
            }
        }
    }

    /// Apply a counterparty's status notice where the state machine allows.
    ///
    /// A remote COMPLETED is only taken over when the local collector can
    /// assemble the completion proof and, for escrow-paid rides, the escrow
    /// is no longer locked. Until then completion has to go through
    /// [`complete_trip`](Self::complete_trip) on this device.
    async fn handle_status_update(
        &self,
        update: RideStatusUpdate,
        author: &str,
    ) -> MatchingResult<EngineEvent> {
        let now = current_timestamp_ms();
        let (ride, driver_freed) = {
            let mut state = self.write_state()?;
            if state.settling.contains(&update.ride_id) {
                return Ok(EngineEvent::Ignored("ride is settling".into()));
            }
            let proof = if update.status == RideStatus::Completed {
                state
                    .collectors
                    .get(&update.ride_id)
                    .and_then(|c| c.assemble_completion_proof().ok())
            } else {
                None
            };
            let Some(ride) = state.rides.get_mut(&update.ride_id) else {
                return Ok(EngineEvent::Ignored("unknown ride".into()));
            };
            if ride.counterparty() != Some(author) {
                return Ok(EngineEvent::Ignored("status update not from counterparty".into()));
            }
            if ride.status == update.status {
                return Ok(EngineEvent::Ignored("status already applied".into()));
            }
            if update.status == RideStatus::Completed {
                if proof.is_none() {
                    debug!(ride_id = %update.ride_id, "remote completion without local proof");
                    return Ok(EngineEvent::Ignored("no completion proof on this device".into()));
                }
                if ride.payment_method == PaymentMethod::Escrow
                    && self.escrow_locked(&ride.ride_id)
                {
                    debug!(ride_id = %update.ride_id, "remote completion while escrow is locked");
                    return Ok(EngineEvent::Ignored("escrow still locked".into()));
                }
            }
            if update.actor == Actor::Arbiter
                || ride.transition(update.status, update.actor, now).is_err()
            {
                debug!(
                    ride_id = %update.ride_id,
                    current = ?ride.status,
                    proposed = ?update.status,
                    "status update does not apply"
                );
                return Ok(EngineEvent::Ignored("status update does not apply".into()));
            }
            if let Some(proof) = proof {
                ride.proof_confidence = Some(proof.confidence);
            }
            let ride = ride.clone();
            let driver_freed = ride.status.is_terminal() && ride.role == Role::Driver;
            if ride.status.is_terminal() {
                state.release_ride(&ride.ride_id);
            }
            (ride, driver_freed)
        };

        info!(ride_id = %ride.ride_id, status = ?ride.status, "counterparty moved ride");
        if ride.status == RideStatus::Cancelled {
            self.refund_quietly(&ride.ride_id);
        }
        if ride.status.is_terminal() {
            self.record_history(&ride);
        }
        if driver_freed {
            self.announce_quietly().await;
        }
        Ok(EngineEvent::StatusChanged {
            ride_id: ride.ride_id,
            status: ride.status,
        })
    }

    /// Evict stale driver announcements, expired requests and finished
    /// rides past retention.
    pub(crate) fn housekeeping(&self, now_ms: u64) {
        self.cache.evict_stale_at(now_ms);
        let Ok(mut state) = self.write_state() else {
            return;
        };
        let (rides, requests) = state.prune(now_ms, &self.config);
        if rides + requests > 0 {
            debug!(rides, requests, "pruned engine state");
        }
    }

    pub(crate) fn read_state(&self) -> MatchingResult<RwLockReadGuard<'_, EngineState>> {
        self.state
            .read()
            .map_err(|e| MatchingError::Lock(e.to_string()))
    }

    pub(crate) fn write_state(&self) -> MatchingResult<RwLockWriteGuard<'_, EngineState>> {
        self.state
            .write()
            .map_err(|e| MatchingError::Lock(e.to_string()))
    }

    /// Sign `payload` as this identity with the given routing tags.
    fn sign_payload(
        &self,
        payload: &RidePayload,
        tags: Vec<(&str, String)>,
    ) -> MatchingResult<ProtocolEvent> {
        let mut builder = EventBuilder::new(payload.kind())
            .created_at(payload.timestamp())
            .content(payload.to_content()?);
        for (key, value) in tags {
            builder = builder.tag(key, value);
        }
        Ok(builder.sign(&self.identity)?)
    }

    async fn publish_payload(
        &self,
        payload: &RidePayload,
        tags: Vec<(&str, String)>,
    ) -> MatchingResult<()> {
        let event = self.sign_payload(payload, tags)?;
        self.relay.publish(&event).await?;
        Ok(())
    }

    /// Tell the counterparty about a status change. Failures are logged only.
    async fn publish_status(&self, ride: &Ride, actor: Actor) {
        self.notify_status(&ride.ride_id, ride.status, ride.counterparty(), actor)
            .await
    }

    async fn notify_status(
        &self,
        ride_id: &str,
        status: RideStatus,
        recipient: Option<&str>,
        actor: Actor,
    ) {
        let update = RidePayload::RideStatusUpdate(RideStatusUpdate {
            ride_id: ride_id.to_string(),
            status,
            actor,
            timestamp: current_timestamp_ms(),
        });
        let mut tags = vec![
            (TAG_RIDE, ride_id.to_string()),
            (TAG_TOPIC, "ride-status".to_string()),
        ];
        if let Some(recipient) = recipient {
            tags.push((TAG_RECIPIENT, recipient.to_string()));
        }
        if let Err(e) = self.publish_payload(&update, tags).await {
            warn!(ride_id, status = ?status, error = %e, "status update not delivered");
        }
    }

    fn load_history(&self, ride_id: &str) -> MatchingResult<Option<Ride>> {
        let Some(storage) = &self.storage else {
            return Ok(None);
        };
        let key = format!("{}{}", HISTORY_PREFIX, ride_id);
        Ok(get_json(storage.as_ref(), &key)?)
    }

    /// Write a finished ride to history. Storage failures are logged only.
    fn record_history(&self, ride: &Ride) {
        let Some(storage) = &self.storage else {
            return;
        };
        let key = format!("{}{}", HISTORY_PREFIX, ride.ride_id);
        if let Err(e) = put_json(storage.as_ref(), &key, ride) {
            warn!(ride_id = %ride.ride_id, error = %e, "failed to persist ride history");
        }
    }

    /// Current time, bumped past the previous announcement so a newer
    /// availability record always supersedes an older one.
    fn next_announcement_timestamp(&self) -> u64 {
        let now = current_timestamp_ms();
        let previous = self
            .last_announcement
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(previous + 1)
    }

    fn new_collector(&self, ride_id: &str, rider: &str, driver: &str) -> PresenceCollector {
        PresenceCollector::new(
            ride_id,
            rider,
            driver,
            self.validator,
            self.transit_policy,
        )
    }

    fn escrow_locked(&self, ride_id: &str) -> bool {
        self.settlement
            .as_ref()
            .map(|gateway| gateway.is_locked(ride_id))
            .unwrap_or(false)
    }

    /// Refund a locked escrow, logging instead of failing.
    fn refund_quietly(&self, ride_id: &str) {
        let Some(gateway) = &self.settlement else {
            return;
        };
        if !gateway.is_locked(ride_id) {
            return;
        }
        if let Ok(mut state) = self.write_state() {
            if state.begin_settling(ride_id).is_err() {
                return;
            }
        }
        let refunded = gateway.refund(&self.identity.public_key().to_string(), ride_id);
        if let Ok(mut state) = self.write_state() {
            state.settling.remove(ride_id);
        }
        if let Err(e) = refunded {
            warn!(ride_id, error = %e, "escrow refund failed");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use ridemesh_core::MemoryStore;

    #[tokio::test]
    async fn test_own_events_ignored() {
        let net = Network::new();
        let driver = net.engine("driver");
        driver
            .go_online(DriverProfile::new("Ana", "Gray Corolla", 4.9), sao_paulo())
            .await
            .unwrap();

        let events = net.client().query(&Filter::new()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            driver.handle_event(&events[0]).await.unwrap(),
            EngineEvent::Ignored(_)
        ));
    }

    #[tokio::test]
    async fn test_announcement_feeds_cache() {
        let net = Network::new();
        let driver = net.engine("driver");
        let rider = net.engine("rider");
        driver
            .go_online(DriverProfile::new("Ana", "Gray Corolla", 4.9), sao_paulo())
            .await
            .unwrap();

        let events = net.client().query(&Filter::new()).await.unwrap();
        let outcome = rider.handle_event(&events[0]).await.unwrap();
        assert!(matches!(outcome, EngineEvent::DriverSeen(_)));
        assert!(rider.cache().get(driver.public_key()).is_some());
    }

    #[tokio::test]
    async fn test_housekeeping_prunes_stale_state() {
        let net = Network::new();
        let origin = sao_paulo();
        let rider = net.engine("rider").with_storage(Arc::new(MemoryStore::new()));
        let driver = net.engine("driver");
        driver
            .go_online(DriverProfile::new("Ana", "Gray Corolla", 4.9), origin)
            .await
            .unwrap();

        let events = net.client().query(&Filter::new()).await.unwrap();
        rider.handle_event(&events[0]).await.unwrap();
        assert_eq!(rider.cache().len(), 1);
        let ttl_ms = net.config.matching.driver_ttl_secs * 1_000;
        rider.housekeeping(current_timestamp_ms() + ttl_ms + 1);
        assert!(rider.cache().is_empty());

        let ride = rider
            .request_ride(origin, origin.offset_km(3.0, 0.0), PaymentMethod::External)
            .await
            .unwrap();
        driver.backfill_ride_requests().await.unwrap();
        assert!(driver.read_state().unwrap().incoming.contains_key(&ride.ride_id));
        let search_ms = net.config.matching.search_timeout_secs * 1_000;
        driver.housekeeping(current_timestamp_ms() + search_ms + 1);
        assert!(matches!(
            driver.submit_candidacy(&ride.ride_id).await,
            Err(MatchingError::RideNotFound { .. })
        ));

        rider.cancel_ride(&ride.ride_id).await.unwrap();
        let retention_ms = net.config.matching.ride_retention_secs * 1_000;
        rider.housekeeping(current_timestamp_ms() + retention_ms - 1_000);
        assert!(rider.read_state().unwrap().rides.contains_key(&ride.ride_id));
        rider.housekeeping(current_timestamp_ms() + retention_ms + 1);
        assert!(!rider.read_state().unwrap().rides.contains_key(&ride.ride_id));

        // pruned rides are still served from history
        let archived = rider.ride(&ride.ride_id).unwrap();
        assert_eq!(archived.status, RideStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_history_empty_without_storage() {
        let net = Network::new();
        let rider = net.engine("rider");
        assert!(rider.ride_history().unwrap().is_empty());

        let rider = net.engine("rider").with_storage(Arc::new(MemoryStore::new()));
        assert!(rider.ride_history().unwrap().is_empty());
    }
}
