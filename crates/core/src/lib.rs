//! Core functionality for the RideMesh peer-to-peer ride coordination layer.
//!
//! This crate provides the fundamental types, traits, and utilities shared by
//! every other RideMesh crate:
//!
//! - **Errors**: the protocol-wide error taxonomy ([`Error`], [`ErrorKind`])
//! - **Configuration**: TOML-backed [`Config`] with per-subsystem sections
//! - **Logging**: `tracing` subscriber initialisation
//! - **Geography**: coordinates, Haversine distance and geocells
//! - **Collaborators**: storage, location and settlement boundaries
//!
//! Nothing here performs network I/O. The collaborator traits describe what
//! the protocol needs from the device and leave the mechanism to the host.

pub mod config;
pub mod error;
pub mod geo;
pub mod location;
pub mod logging;
pub mod settlement;
pub mod storage;
pub mod types;

pub use config::{
    Config, EscrowConfig, GovernanceConfig, MatchingConfig, PresenceConfig, RelayConfig,
};
pub use error::{Error, ErrorKind, Result};
pub use geo::{GeoCell, GeoPoint, EARTH_RADIUS_KM, GEOCELL_SCALE};
pub use location::{LocationFix, LocationProvider, StaticLocation};
pub use settlement::{EscrowLock, PayoutSummary, SettlementGateway};
pub use storage::{KeyValueStore, MemoryStore};
pub use types::{current_timestamp_ms, Actor, RideId, UserId};
