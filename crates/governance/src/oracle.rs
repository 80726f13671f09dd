//! Oracle validation of driver documents.
//!
//! Trusted-or-higher users review pending documents. Once the configured
//! quorum of votes is in, the majority decides the item. Every accepted vote
//! earns its validator a flat experience reward.

use crate::error::{GovernanceError, GovernanceResult};
use crate::ledger::{log_level_up, GovernanceLedger};
use crate::profile::ExperienceAward;
use ridemesh_core::{current_timestamp_ms, UserId};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationOutcome {
    Approved,
    Rejected,
}

/// A document awaiting validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationItem {
    pub item_id: String,
    /// User the document belongs to
    pub subject: UserId,
    /// Hash of the document under review
    pub document_hash: String,
    pub submitted_at: u64,
    /// Votes cast so far, in arrival order
    pub votes: Vec<(UserId, bool)>,
    pub outcome: Option<ValidationOutcome>,
}

impl ValidationItem {
    pub fn approvals(&self) -> usize {
        self.votes.iter().filter(|(_, approve)| *approve).count()
    }
}

/// What a validator got for an accepted vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteReceipt {
    pub award: ExperienceAward,
    /// Set when this vote completed the quorum
    pub outcome: Option<ValidationOutcome>,
}

impl GovernanceLedger {
    /// Register a document for validation.
    pub fn submit_validation_item(
        &self,
        item_id: &str,
        subject: &str,
        document_hash: &str,
    ) -> GovernanceResult<()> {
        let mut state = self.write_state()?;
        if state.items.contains_key(item_id) {
            return Err(GovernanceError::ItemExists {
                item_id: item_id.to_string(),
            });
        }
        state.items.insert(
            item_id.to_string(),
            ValidationItem {
                item_id: item_id.to_string(),
                subject: subject.to_string(),
                document_hash: document_hash.to_string(),
                submitted_at: current_timestamp_ms(),
                votes: Vec::new(),
                outcome: None,
            },
        );
        Ok(())
    }

    /// Record one validator's vote.
    ///
    /// Duplicate votes and votes on a decided item are rejected rather than
    /// overwritten. Users may not validate their own documents.
    pub fn record_validation_vote(
        &self,
        validator: &str,
        item_id: &str,
        approve: bool,
    ) -> GovernanceResult<VoteReceipt> {
        let mut state = self.write_state()?;

        let tier = match self.load_locked(&mut state, validator)? {
            Some(profile) => profile.tier,
            None => crate::tier::Tier::Newcomer,
        };

        let item = state
            .items
            .get(item_id)
            .ok_or_else(|| GovernanceError::ItemNotFound {
                item_id: item_id.to_string(),
            })?;
        if !tier.can_validate() || item.subject == validator {
            return Err(GovernanceError::NotEligible {
                user_id: validator.to_string(),
                tier,
            });
        }
        if item.outcome.is_some() {
            return Err(GovernanceError::ItemDecided {
                item_id: item_id.to_string(),
            });
        }
        if item.votes.iter().any(|(voter, _)| voter == validator) {
            return Err(GovernanceError::DuplicateVote {
                user_id: validator.to_string(),
                subject: item_id.to_string(),
            });
        }

        let reward = self.config.validation_reward_xp;
        let award = self.update_profile(&mut state, validator, |profile| {
            profile.validations_completed += 1;
            profile.award(reward)
        })?;
        log_level_up(validator, &award);

        let quorum = self.config.validation_quorum;
        let item = state
            .items
            .get_mut(item_id)
            .ok_or_else(|| GovernanceError::ItemNotFound {
                item_id: item_id.to_string(),
            })?;
        item.votes.push((validator.to_string(), approve));
        let outcome = if item.votes.len() >= quorum {
            let outcome = if item.approvals() * 2 > item.votes.len() {
                ValidationOutcome::Approved
            } else {
                ValidationOutcome::Rejected
            };
            item.outcome = Some(outcome);
            info!(
                item_id,
                subject = %item.subject,
                outcome = ?outcome,
                "validation item decided"
            );
            Some(outcome)
        } else {
            None
        };

        Ok(VoteReceipt { award, outcome })
    }

    pub fn validation_item(&self, item_id: &str) -> GovernanceResult<Option<ValidationItem>> {
        let state = self
            .state
            .read()
            .map_err(|e| GovernanceError::Lock(e.to_string()))?;
        Ok(state.items.get(item_id).cloned())
    }
}
