//! RideMesh matching engine.
//!
//! Drives a ride from request to settlement over signed relay events:
//! driver discovery by geocell, candidacies, acceptance with escrow lock,
//! presence-token exchange and completion. The engine talks to the escrow
//! only through [`ridemesh_core::SettlementGateway`].

pub mod cache;
pub mod engine;
pub mod error;
pub mod fare;
pub mod payload;
pub mod ride;

pub use cache::DriverCache;
pub use engine::{
    CandidacyOutcome, CompletionReceipt, DriverProfile, EngineEvent, IncomingRequest,
    MatchingEngine, NearbyDriver,
};
pub use error::{MatchingError, MatchingResult};
pub use fare::{estimated_arrival_minutes, fare_cents, format_cents};
pub use payload::{
    Candidacy, DriverAnnouncement, RideAcceptance, RidePayload, RideRequest, RideStatusUpdate,
};
pub use ride::{authorize, AuthorizationFailure, PaymentMethod, Ride, RideStatus, Role};
