//! Governance ledger errors.

use crate::tier::Tier;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("Invalid trip metrics: {0}")]
    InvalidMetrics(String),

    #[error("User {user_id} at tier {tier} may not validate documents")]
    NotEligible { user_id: String, tier: Tier },

    #[error("Validation item not found: {item_id}")]
    ItemNotFound { item_id: String },

    #[error("Validation item already exists: {item_id}")]
    ItemExists { item_id: String },

    #[error("Validation item {item_id} is already decided")]
    ItemDecided { item_id: String },

    #[error("{user_id} already voted on {subject}")]
    DuplicateVote { user_id: String, subject: String },

    #[error("Proposal not found: {proposal_id}")]
    ProposalNotFound { proposal_id: String },

    #[error("Proposal already exists: {proposal_id}")]
    ProposalExists { proposal_id: String },

    #[error("Proposal {proposal_id} is closed")]
    ProposalClosed { proposal_id: String },

    #[error("Insufficient voting power: {required} required, {available} available")]
    InsufficientVotingPower { required: u64, available: u64 },

    #[error("Storage error: {0}")]
    Storage(#[from] ridemesh_core::Error),

    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<GovernanceError> for ridemesh_core::Error {
    fn from(err: GovernanceError) -> Self {
        use ridemesh_core::Error;
        match err {
            GovernanceError::Storage(inner) => inner,
            GovernanceError::Lock(reason) => Error::Storage(reason),
            GovernanceError::ItemNotFound { .. } | GovernanceError::ProposalNotFound { .. } => {
                Error::NotFound(err.to_string())
            }
            GovernanceError::ItemExists { .. }
            | GovernanceError::ItemDecided { .. }
            | GovernanceError::DuplicateVote { .. }
            | GovernanceError::ProposalExists { .. }
            | GovernanceError::ProposalClosed { .. } => Error::Conflict(err.to_string()),
            GovernanceError::InvalidMetrics(_)
            | GovernanceError::NotEligible { .. }
            | GovernanceError::InsufficientVotingPower { .. } => Error::Validation(err.to_string()),
        }
    }
}

pub type GovernanceResult<T> = Result<T, GovernanceError>;
