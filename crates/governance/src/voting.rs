//! Quadratic voting on governance proposals.
//!
//! Casting `n` votes costs `n²` voting power. Voting power is experience
//! that is not already reserved; a vote reserves its cost until the proposal
//! closes, then the reservation is released. Experience itself is never
//! spent.

use crate::error::{GovernanceError, GovernanceResult};
use crate::ledger::GovernanceLedger;
use ridemesh_core::{current_timestamp_ms, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuadraticVote {
    pub votes: u64,
    pub support: bool,
    /// Voting power reserved for this vote (`votes²`)
    pub cost: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub proposal_id: String,
    pub title: String,
    pub opened_at: u64,
    pub open: bool,
    pub ballots: HashMap<UserId, QuadraticVote>,
}

/// Final count of a closed proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalTally {
    pub votes_for: u64,
    pub votes_against: u64,
    pub voters: usize,
    pub passed: bool,
}

/// Voting power needed to cast `votes` votes.
pub fn quadratic_cost(votes: u64) -> Option<u64> {
    votes.checked_mul(votes)
}

impl GovernanceLedger {
    pub fn open_proposal(&self, proposal_id: &str, title: &str) -> GovernanceResult<()> {
        let mut state = self.write_state()?;
        if state.proposals.contains_key(proposal_id) {
            return Err(GovernanceError::ProposalExists {
                proposal_id: proposal_id.to_string(),
            });
        }
        state.proposals.insert(
            proposal_id.to_string(),
            Proposal {
                proposal_id: proposal_id.to_string(),
                title: title.to_string(),
                opened_at: current_timestamp_ms(),
                open: true,
                ballots: HashMap::new(),
            },
        );
        info!(proposal_id, title, "proposal opened");
        Ok(())
    }

    /// Cast `votes` votes for or against an open proposal.
    ///
    /// Returns the voting power reserved. One ballot per user per proposal.
    pub fn cast_quadratic_vote(
        &self,
        user_id: &str,
        proposal_id: &str,
        votes: u64,
        support: bool,
    ) -> GovernanceResult<u64> {
        let cost = quadratic_cost(votes).ok_or(GovernanceError::InsufficientVotingPower {
            required: u64::MAX,
            available: 0,
        })?;
        if votes == 0 {
            return Err(GovernanceError::InsufficientVotingPower {
                required: 1,
                available: 0,
            });
        }

        let mut state = self.write_state()?;
        let proposal = state
            .proposals
            .get(proposal_id)
            .ok_or_else(|| GovernanceError::ProposalNotFound {
                proposal_id: proposal_id.to_string(),
            })?;
        if !proposal.open {
            return Err(GovernanceError::ProposalClosed {
                proposal_id: proposal_id.to_string(),
            });
        }
        if proposal.ballots.contains_key(user_id) {
            return Err(GovernanceError::DuplicateVote {
                user_id: user_id.to_string(),
                subject: proposal_id.to_string(),
            });
        }

        let available = self
            .load_locked(&mut state, user_id)?
            .map(|p| p.available_voting_power())
            .unwrap_or(0);
        if cost > available {
            return Err(GovernanceError::InsufficientVotingPower {
                required: cost,
                available,
            });
        }

        self.update_profile(&mut state, user_id, |profile| {
            profile.locked_voting_power = profile.locked_voting_power.saturating_add(cost);
        })?;

        if let Some(proposal) = state.proposals.get_mut(proposal_id) {
            proposal.ballots.insert(
                user_id.to_string(),
                QuadraticVote {
                    votes,
                    support,
                    cost,
                },
            );
        }
        Ok(cost)
    }

    /// Close a proposal, tally it and release every reservation.
    pub fn close_proposal(&self, proposal_id: &str) -> GovernanceResult<ProposalTally> {
        let mut state = self.write_state()?;
        let proposal = state
            .proposals
            .get_mut(proposal_id)
            .ok_or_else(|| GovernanceError::ProposalNotFound {
                proposal_id: proposal_id.to_string(),
            })?;
        if !proposal.open {
            return Err(GovernanceError::ProposalClosed {
                proposal_id: proposal_id.to_string(),
            });
        }
        proposal.open = false;

        let mut tally = ProposalTally {
            votes_for: 0,
            votes_against: 0,
            voters: proposal.ballots.len(),
            passed: false,
        };
        let mut releases = Vec::with_capacity(proposal.ballots.len());
        for (user_id, ballot) in &proposal.ballots {
            if ballot.support {
                tally.votes_for += ballot.votes;
            } else {
                tally.votes_against += ballot.votes;
            }
            releases.push((user_id.clone(), ballot.cost));
        }
        tally.passed = tally.votes_for > tally.votes_against;

        for (user_id, cost) in releases {
            if let Some(profile) = self.load_locked(&mut state, &user_id)? {
                profile.locked_voting_power = profile.locked_voting_power.saturating_sub(cost);
                let snapshot = profile.clone();
                self.persist(&snapshot)?;
            }
        }

        info!(
            proposal_id,
            votes_for = tally.votes_for,
            votes_against = tally.votes_against,
            passed = tally.passed,
            "proposal closed"
        );
        Ok(tally)
    }
}
