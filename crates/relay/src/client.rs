//! Relay client: redundant publish, verified queries and subscriptions.
//!
//! The client talks to every configured endpoint concurrently, each call
//! bounded by the configured timeout. Nothing unverified leaves this module.

use crate::endpoint::RelayEndpoint;
use crate::error::{RelayError, RelayResult};
use crate::event::ProtocolEvent;
use crate::filter::Filter;
use ridemesh_core::RelayConfig;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Counters for diagnostics.
#[derive(Debug, Default)]
pub struct RelayStats {
    pub events_published: AtomicU64,
    pub publish_failures: AtomicU64,
    pub inbound_rejected: AtomicU64,
    pub duplicates_dropped: AtomicU64,
}

/// Outcome of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub event_id: String,
    /// Endpoints that accepted the event
    pub accepted: Vec<String>,
    /// Endpoints that refused or timed out
    pub failed: Vec<String>,
}

/// Deduplicates event ids, resetting once `capacity` is exceeded.
#[derive(Debug)]
struct SeenEvents {
    ids: HashSet<String>,
    capacity: usize,
}

impl SeenEvents {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            capacity,
        }
    }

    /// Returns true the first time an id is seen.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.len() >= self.capacity {
            self.ids.clear();
        }
        self.ids.insert(id.to_string())
    }
}

pub struct RelayClient {
    endpoints: Vec<Arc<dyn RelayEndpoint>>,
    timeout: Duration,
    max_seen_events: usize,
    subscription_buffer: usize,
    stats: Arc<RelayStats>,
}

impl RelayClient {
    pub fn new(endpoints: Vec<Arc<dyn RelayEndpoint>>, config: &RelayConfig) -> Self {
        Self {
            endpoints,
            timeout: Duration::from_millis(config.timeout_ms),
            max_seen_events: config.max_seen_events.max(1),
            subscription_buffer: config.subscription_buffer.max(1),
            stats: Arc::new(RelayStats::default()),
        }
    }

    pub fn endpoint_urls(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.url().to_string()).collect()
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    /// Send a signed event to every endpoint. Succeeds if at least one accepts.
    pub async fn publish(&self, event: &ProtocolEvent) -> RelayResult<PublishAck> {
        event.verify()?;

        let mut calls = JoinSet::new();
        for endpoint in &self.endpoints {
            let endpoint = Arc::clone(endpoint);
            let event = event.clone();
            let timeout = self.timeout;
            calls.spawn(async move {
                let url = endpoint.url().to_string();
                let result = match tokio::time::timeout(timeout, endpoint.publish(&event)).await {
                    Ok(result) => result,
                    Err(_) => Err(RelayError::Timeout { url: url.clone() }),
                };
                (url, result)
            });
        }

        let mut accepted = Vec::new();
        let mut failed = Vec::new();
        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok((url, Ok(()))) => accepted.push(url),
                Ok((url, Err(e))) => {
                    debug!(url = %url, error = %e, "relay refused publish");
                    failed.push(url);
                }
                Err(e) => warn!(error = %e, "publish task failed"),
            }
        }

        if accepted.is_empty() {
            self.stats.publish_failures.fetch_add(1, Ordering::Relaxed);
            warn!(event_id = %event.id, kind = %event.kind, "publish failed on every relay");
            return Err(RelayError::AllRelaysFailed {
                attempted: self.endpoints.len(),
            });
        }

        self.stats.events_published.fetch_add(1, Ordering::Relaxed);
        debug!(
            event_id = %event.id,
            kind = %event.kind,
            accepted = accepted.len(),
            "event published"
        );
        Ok(PublishAck {
            event_id: event.id.clone(),
            accepted,
            failed,
        })
    }

    /// One-shot historical fetch across all endpoints.
    ///
    /// Results are verified, deduplicated, collapsed to the latest version of
    /// each replaceable event, and sorted newest first. Fails with `NoAnswer`
    /// only when no endpoint answered at all.
    pub async fn query(&self, filter: &Filter) -> RelayResult<Vec<ProtocolEvent>> {
        let mut calls = JoinSet::new();
        for endpoint in &self.endpoints {
            let endpoint = Arc::clone(endpoint);
            let filter = filter.clone();
            let timeout = self.timeout;
            calls.spawn(async move {
                let url = endpoint.url().to_string();
                let result = match tokio::time::timeout(timeout, endpoint.query(&filter)).await {
                    Ok(result) => result,
                    Err(_) => Err(RelayError::Timeout { url: url.clone() }),
                };
                (url, result)
            });
        }

        let mut answered = 0usize;
        let mut by_id: HashMap<String, ProtocolEvent> = HashMap::new();
        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok((_, Ok(events))) => {
                    answered += 1;
                    for event in events {
                        if by_id.contains_key(&event.id) {
                            continue;
                        }
                        if self.accept_inbound(&event, filter) {
                            by_id.insert(event.id.clone(), event);
                        }
                    }
                }
                Ok((url, Err(e))) => debug!(url = %url, error = %e, "relay query failed"),
                Err(e) => warn!(error = %e, "query task failed"),
            }
        }

        if answered == 0 {
            return Err(RelayError::NoAnswer);
        }

        let mut events = collapse_replaceable(by_id.into_values());
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    /// Live feed of verified events matching `filter`, deduplicated by id
    /// across endpoints.
    ///
    /// Each event is delivered at most once; there is no ordering guarantee
    /// between events arriving from different relays.
    pub async fn subscribe(&self, filter: Filter) -> RelayResult<Subscription> {
        let (sender, receiver) = mpsc::channel(self.subscription_buffer);
        let seen = Arc::new(Mutex::new(SeenEvents::new(self.max_seen_events)));
        let mut tasks = Vec::new();

        for endpoint in &self.endpoints {
            let feed = match tokio::time::timeout(self.timeout, endpoint.subscribe(&filter)).await
            {
                Ok(Ok(feed)) => feed,
                Ok(Err(e)) => {
                    debug!(url = %endpoint.url(), error = %e, "relay refused subscription");
                    continue;
                }
                Err(_) => {
                    debug!(url = %endpoint.url(), "relay subscription timed out");
                    continue;
                }
            };
            tasks.push(tokio::spawn(forward(
                feed,
                sender.clone(),
                filter.clone(),
                Arc::clone(&seen),
                Arc::clone(&self.stats),
            )));
        }

        if tasks.is_empty() {
            return Err(RelayError::NoAnswer);
        }

        info!(relays = tasks.len(), kinds = ?filter.kinds, "subscription opened");
        Ok(Subscription { receiver, tasks })
    }

    fn accept_inbound(&self, event: &ProtocolEvent, filter: &Filter) -> bool {
        if let Err(e) = event.verify() {
            self.stats.inbound_rejected.fetch_add(1, Ordering::Relaxed);
            warn!(event_id = %event.id, error = %e, "dropping unverifiable event");
            return false;
        }
        filter.matches(event)
    }
}

async fn forward(
    mut feed: mpsc::Receiver<ProtocolEvent>,
    sender: mpsc::Sender<ProtocolEvent>,
    filter: Filter,
    seen: Arc<Mutex<SeenEvents>>,
    stats: Arc<RelayStats>,
) {
    while let Some(event) = feed.recv().await {
        if let Err(e) = event.verify() {
            stats.inbound_rejected.fetch_add(1, Ordering::Relaxed);
            warn!(event_id = %event.id, error = %e, "dropping unverifiable event");
            continue;
        }
        if !filter.matches(&event) {
            continue;
        }
        let first_sighting = match seen.lock() {
            Ok(mut seen) => seen.insert(&event.id),
            Err(_) => {
                warn!("seen-event set poisoned, closing feed");
                return;
            }
        };
        if !first_sighting {
            stats.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        if sender.send(event).await.is_err() {
            return;
        }
    }
}

/// Keep only the newest event per replaceable slot.
fn collapse_replaceable(events: impl IntoIterator<Item = ProtocolEvent>) -> Vec<ProtocolEvent> {
    let mut regular = Vec::new();
    let mut latest: HashMap<_, ProtocolEvent> = HashMap::new();
    for event in events {
        match event.replaceable_key() {
            Some(slot) => match latest.get(&slot) {
                Some(current) if !event.supersedes(current) => {}
                _ => {
                    latest.insert(slot, event);
                }
            },
            None => regular.push(event),
        }
    }
    regular.extend(latest.into_values());
    regular
}

/// Handle to a live feed. Dropping it stops delivery.
pub struct Subscription {
    receiver: mpsc::Receiver<ProtocolEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl Subscription {
    /// Next event, or `None` once every relay feed has ended.
    pub async fn recv(&mut self) -> Option<ProtocolEvent> {
        self.receiver.recv().await
    }

    /// Next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<ProtocolEvent> {
        self.receiver.try_recv().ok()
    }

    /// Next event, waiting at most `wait`.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Option<ProtocolEvent> {
        tokio::time::timeout(wait, self.receiver.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
