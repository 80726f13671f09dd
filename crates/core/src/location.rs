//! Location collaborator boundary.
//!
//! Device location sampling lives outside the protocol; the core only
//! consumes fixes on demand and a change-notification stream.

use crate::geo::GeoPoint;
use crate::types::current_timestamp_ms;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// A single location sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Unix epoch milliseconds
    pub timestamp: u64,
}

impl LocationFix {
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

pub trait LocationProvider: Send + Sync {
    /// Most recent fix.
    fn current(&self) -> LocationFix;
    /// Receiver notified on every new fix.
    fn watch(&self) -> watch::Receiver<LocationFix>;
}

/// Provider that reports whatever was last set. Used in tests and simulators.
#[derive(Debug)]
pub struct StaticLocation {
    tx: watch::Sender<LocationFix>,
}

impl StaticLocation {
    pub fn new(point: GeoPoint) -> Self {
        let (tx, _) = watch::channel(LocationFix {
            latitude: point.latitude,
            longitude: point.longitude,
            timestamp: current_timestamp_ms(),
        });
        Self { tx }
    }

    /// Move to a new point and notify watchers.
    pub fn set(&self, point: GeoPoint) {
        self.tx.send_replace(LocationFix {
            latitude: point.latitude,
            longitude: point.longitude,
            timestamp: current_timestamp_ms(),
        });
    }
}

impl LocationProvider for StaticLocation {
    fn current(&self) -> LocationFix {
        *self.tx.borrow()
    }

    fn watch(&self) -> watch::Receiver<LocationFix> {
        self.tx.subscribe()
    }
}
