//! Relay client for the RideMesh event network.
//!
//! Riders and drivers find each other by publishing signed [`ProtocolEvent`]s
//! to a set of redundant, untrusted relays and subscribing to the ones that
//! concern them. Geographic routing uses coarse geocell tags; exact distance
//! filtering happens client-side.
//!
//! Relays only store and forward. Every event is verified by the client
//! before it reaches a higher layer, and an unverifiable event is dropped.

pub mod client;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod filter;

pub use client::{PublishAck, RelayClient, RelayStats, Subscription};
pub use endpoint::{MemoryRelay, RelayEndpoint};
pub use error::{RelayError, RelayResult};
pub use event::{
    canonical_bytes, EventBuilder, EventKind, ProtocolEvent, Tag, TAG_GEOCELL, TAG_RECIPIENT,
    TAG_REPLACEABLE, TAG_RIDE, TAG_TOPIC,
};
pub use filter::Filter;
