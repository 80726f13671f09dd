//! Relay transport boundary and an in-memory relay.

use crate::error::{RelayError, RelayResult};
use crate::event::ProtocolEvent;
use crate::filter::Filter;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// A single pub/sub relay.
///
/// Implementations store and forward events; they are not trusted to verify
/// them. The client verifies everything it receives.
#[async_trait]
pub trait RelayEndpoint: Send + Sync {
    fn url(&self) -> &str;

    async fn publish(&self, event: &ProtocolEvent) -> RelayResult<()>;

    async fn query(&self, filter: &Filter) -> RelayResult<Vec<ProtocolEvent>>;

    /// Live feed of future events matching `filter`. The feed ends when the
    /// receiver is dropped.
    async fn subscribe(&self, filter: &Filter) -> RelayResult<mpsc::Receiver<ProtocolEvent>>;
}

const MEMORY_RELAY_BUFFER: usize = 256;

struct Subscriber {
    filter: Filter,
    sender: mpsc::Sender<ProtocolEvent>,
}

/// Relay held entirely in memory.
///
/// Shared between clients through an `Arc` to form a local relay network.
/// Replaceable events keep only the latest version per slot. The relay can be
/// taken offline or slowed down to exercise client fallbacks.
pub struct MemoryRelay {
    url: String,
    events: RwLock<Vec<ProtocolEvent>>,
    subscribers: Mutex<Vec<Subscriber>>,
    online: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryRelay {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            events: RwLock::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            online: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Simulate an outage: every call fails with `Unavailable`.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Delay every answer, to exercise client timeouts.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of stored events.
    pub fn event_count(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }

    async fn answer(&self) -> RelayResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(RelayError::Unavailable {
                url: self.url.clone(),
            });
        }
        Ok(())
    }

    fn lock_error<E: std::fmt::Display>(&self, e: E) -> RelayError {
        debug!(url = %self.url, error = %e, "relay state lock poisoned");
        RelayError::Unavailable {
            url: self.url.clone(),
        }
    }

    /// Store `event`, returning false if a newer version already occupies its slot.
    fn store(&self, event: &ProtocolEvent) -> RelayResult<bool> {
        let mut events = self.events.write().map_err(|e| self.lock_error(e))?;
        if events.iter().any(|e| e.id == event.id) {
            return Ok(false);
        }
        if let Some(slot) = event.replaceable_key() {
            if let Some(pos) = events
                .iter()
                .position(|e| e.replaceable_key().as_ref() == Some(&slot))
            {
                if !event.supersedes(&events[pos]) {
                    return Ok(false);
                }
                events.remove(pos);
            }
        }
        events.push(event.clone());
        Ok(true)
    }

    fn fan_out(&self, event: &ProtocolEvent) -> RelayResult<()> {
        let mut subscribers = self.subscribers.lock().map_err(|e| self.lock_error(e))?;
        subscribers.retain(|s| !s.sender.is_closed());
        for subscriber in subscribers.iter() {
            if subscriber.filter.matches(event) {
                if let Err(e) = subscriber.sender.try_send(event.clone()) {
                    debug!(url = %self.url, error = %e, "subscriber lagging, event dropped");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RelayEndpoint for MemoryRelay {
    fn url(&self) -> &str {
        &self.url
    }

    async fn publish(&self, event: &ProtocolEvent) -> RelayResult<()> {
        self.answer().await?;
        if self.store(event)? {
            self.fan_out(event)?;
        }
        Ok(())
    }

    async fn query(&self, filter: &Filter) -> RelayResult<Vec<ProtocolEvent>> {
        self.answer().await?;
        let events = self.events.read().map_err(|e| self.lock_error(e))?;
        let mut matched: Vec<ProtocolEvent> =
            events.iter().filter(|e| filter.matches(e)).cloned().collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn subscribe(&self, filter: &Filter) -> RelayResult<mpsc::Receiver<ProtocolEvent>> {
        self.answer().await?;
        let (sender, receiver) = mpsc::channel(MEMORY_RELAY_BUFFER);
        let mut subscribers = self.subscribers.lock().map_err(|e| self.lock_error(e))?;
        subscribers.push(Subscriber {
            filter: filter.clone(),
            sender,
        });
        Ok(receiver)
    }
}
