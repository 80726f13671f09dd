//! Ride records and the lifecycle state machine.
//!
//! ```text
//! SEARCHING ──rider accepts──▶ MATCHED ──start──▶ IN_PROGRESS ──complete──▶ COMPLETED
//!     └──────────────┴─────────────────┴──cancel (rider, driver, timeout)──▶ CANCELLED
//! ```

use crate::error::{MatchingError, MatchingResult};
use crate::payload::Candidacy;
use ridemesh_core::{Actor, GeoPoint, RideId, UserId};
use ridemesh_presence::ProofConfidence;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    Searching,
    Matched,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Funds locked in the settlement escrow
    #[default]
    Escrow,
    /// Paid through a traditional payment collaborator
    External,
}

/// Which side of the ride this device is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Rider,
    Driver,
}

impl Role {
    pub fn actor(&self) -> Actor {
        match self {
            Role::Rider => Actor::Rider,
            Role::Driver => Actor::Driver,
        }
    }
}

/// Check that `actor` may move a ride from `from` to `to`.
pub fn authorize(
    from: RideStatus,
    to: RideStatus,
    actor: Actor,
) -> Result<(), AuthorizationFailure> {
    use RideStatus::*;

    let edge_exists = matches!(
        (from, to),
        (Searching, Matched) | (Matched, InProgress) | (InProgress, Completed)
    ) || (to == Cancelled && !from.is_terminal());
    if !edge_exists {
        return Err(AuthorizationFailure::NoSuchTransition);
    }

    let allowed = match (from, to) {
        (Searching, Matched) => actor == Actor::Rider,
        (Matched, InProgress) | (InProgress, Completed) => {
            matches!(actor, Actor::Rider | Actor::Driver)
        }
        (_, Cancelled) => matches!(actor, Actor::Rider | Actor::Driver | Actor::Timeout),
        _ => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(AuthorizationFailure::WrongActor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationFailure {
    NoSuchTransition,
    WrongActor,
}

/// A ride as seen from this device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    pub ride_id: RideId,
    pub role: Role,
    pub rider_id: UserId,
    pub driver_id: Option<UserId>,
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    pub distance_km: f64,
    pub fare_cents: u64,
    pub payment_method: PaymentMethod,
    pub status: RideStatus,
    pub created_at: u64,
    pub matched_at: Option<u64>,
    pub started_at: Option<u64>,
    pub ended_at: Option<u64>,
    /// Candidacies received while searching, one per driver
    pub candidacies: Vec<Candidacy>,
    pub cancelled_by: Option<Actor>,
    pub proof_confidence: Option<ProofConfidence>,
    pub governance_awarded: bool,
}

impl Ride {
    /// Apply a transition if the state machine allows it.
    pub fn transition(&mut self, to: RideStatus, actor: Actor, now_ms: u64) -> MatchingResult<()> {
        match authorize(self.status, to, actor) {
            Ok(()) => {}
            Err(AuthorizationFailure::NoSuchTransition) => {
                return Err(MatchingError::InvalidTransition {
                    ride_id: self.ride_id.clone(),
                    from: self.status,
                    to,
                })
            }
            Err(AuthorizationFailure::WrongActor) => {
                return Err(MatchingError::Unauthorized {
                    actor,
                    from: self.status,
                    to,
                })
            }
        }

        match to {
            RideStatus::Matched => self.matched_at = Some(now_ms),
            RideStatus::InProgress => self.started_at = Some(now_ms),
            RideStatus::Completed => self.ended_at = Some(now_ms),
            RideStatus::Cancelled => {
                self.ended_at = Some(now_ms);
                self.cancelled_by = Some(actor);
            }
            RideStatus::Searching => {}
        }
        self.status = to;
        Ok(())
    }

    /// Record a candidacy, keeping only the most recent one per driver.
    ///
    /// Returns false if an equal or newer candidacy from the driver is
    /// already recorded.
    pub fn upsert_candidacy(&mut self, candidacy: Candidacy) -> bool {
        match self
            .candidacies
            .iter_mut()
            .find(|c| c.driver_id == candidacy.driver_id)
        {
            Some(existing) if existing.timestamp >= candidacy.timestamp => false,
            Some(existing) => {
                *existing = candidacy;
                true
            }
            None => {
                self.candidacies.push(candidacy);
                true
            }
        }
    }

    /// The other participant's identity, once matched.
    pub fn counterparty(&self) -> Option<&str> {
        match self.role {
            Role::Rider => self.driver_id.as_deref(),
            Role::Driver => Some(&self.rider_id),
        }
    }

    pub fn trip_minutes(&self) -> f64 {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) if end > start => (end - start) as f64 / 60_000.0,
            _ => 0.0,
        }
    }
}
