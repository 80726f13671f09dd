//! Local cache of driver announcements.
//!
//! Serves nearby-driver lookups when no relay answers. Each driver keeps only
//! their most recent announcement; entries older than the TTL are treated as
//! offline and evicted.

use crate::payload::DriverAnnouncement;
use ridemesh_core::current_timestamp_ms;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
pub struct DriverCache {
    entries: RwLock<HashMap<String, DriverAnnouncement>>,
    ttl: Duration,
}

impl DriverCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert an announcement unless a newer one from the same driver is cached.
    pub fn upsert(&self, announcement: DriverAnnouncement) -> bool {
        let Ok(mut entries) = self.entries.write() else {
            return false;
        };
        match entries.get(&announcement.driver_id) {
            Some(existing) if existing.timestamp >= announcement.timestamp => false,
            _ => {
                entries.insert(announcement.driver_id.clone(), announcement);
                true
            }
        }
    }

    pub fn get(&self, driver_id: &str) -> Option<DriverAnnouncement> {
        self.entries.read().ok()?.get(driver_id).cloned()
    }

    /// Mark a driver as taken without waiting for their next announcement.
    pub fn mark_unavailable(&self, driver_id: &str) {
        if let Ok(mut entries) = self.entries.write() {
            if let Some(entry) = entries.get_mut(driver_id) {
                entry.available = false;
            }
        }
    }

    pub fn remove(&self, driver_id: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(driver_id);
        }
    }

    /// Available drivers whose announcement is within the TTL at `now_ms`.
    pub fn available_at(&self, now_ms: u64) -> Vec<DriverAnnouncement> {
        let Ok(entries) = self.entries.read() else {
            return Vec::new();
        };
        entries
            .values()
            .filter(|a| a.available && self.is_fresh(a, now_ms))
            .cloned()
            .collect()
    }

    pub fn available(&self) -> Vec<DriverAnnouncement> {
        self.available_at(current_timestamp_ms())
    }

    /// Drop entries older than the TTL. Returns how many were removed.
    pub fn evict_stale_at(&self, now_ms: u64) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, a| self.is_fresh(a, now_ms));
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "stale driver announcements evicted");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_fresh(&self, announcement: &DriverAnnouncement, now_ms: u64) -> bool {
        now_ms.saturating_sub(announcement.timestamp) <= self.ttl.as_millis() as u64
    }
}
