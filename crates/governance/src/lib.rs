//! Governance ledger for RideMesh.
//!
//! Every user accumulates experience from completed trips and oracle work.
//! Experience determines a tier, and the tier determines the protocol fee the
//! escrow takes from a driver's fare:
//!
//! | Tier     | Experience | Fee    |
//! |----------|-----------:|-------:|
//! | Newcomer |          0 | 15.0 % |
//! | Trusted  |      1 000 | 12.0 % |
//! | Veteran  |      5 000 | 10.0 % |
//! | Steward  |     15 000 |  8.0 % |
//!
//! Experience never decreases. Quadratic votes reserve part of it while a
//! proposal is open and release it on close.

pub mod error;
pub mod ledger;
pub mod oracle;
pub mod profile;
pub mod tier;
pub mod voting;

pub use error::{GovernanceError, GovernanceResult};
pub use ledger::GovernanceLedger;
pub use oracle::{ValidationItem, ValidationOutcome, VoteReceipt};
pub use profile::{ExperienceAward, GovernanceProfile, TripMetrics, BASE_TRIP_EXPERIENCE};
pub use tier::{Tier, ENTRY_FEE_RATE_BP};
pub use voting::{quadratic_cost, Proposal, ProposalTally, QuadraticVote};
