//! Governance ledger: experience, tiers and fee rates per user.

use crate::error::{GovernanceError, GovernanceResult};
use crate::oracle::ValidationItem;
use crate::profile::{ExperienceAward, GovernanceProfile, TripMetrics};
use crate::tier::{Tier, ENTRY_FEE_RATE_BP};
use crate::voting::Proposal;
use ridemesh_core::storage::{get_json, put_json};
use ridemesh_core::{GovernanceConfig, KeyValueStore};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

pub(crate) fn profile_key(user_id: &str) -> String {
    format!("governance/profile/{}", user_id)
}

#[derive(Debug, Default)]
pub(crate) struct LedgerState {
    pub(crate) profiles: HashMap<String, GovernanceProfile>,
    pub(crate) items: HashMap<String, ValidationItem>,
    pub(crate) proposals: HashMap<String, Proposal>,
}

/// Tracks governance standing for every user this device knows about.
///
/// Experience only ever grows: trips and oracle work add to it, and votes
/// on proposals reserve part of it temporarily without spending it.
pub struct GovernanceLedger {
    pub(crate) state: RwLock<LedgerState>,
    storage: Option<Arc<dyn KeyValueStore>>,
    pub(crate) config: GovernanceConfig,
}

impl GovernanceLedger {
    pub fn new(config: GovernanceConfig) -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            storage: None,
            config,
        }
    }

    /// Ledger that persists profiles under `governance/profile/<userId>`.
    pub fn with_storage(config: GovernanceConfig, storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            storage: Some(storage),
            config,
        }
    }

    /// Award experience for a completed trip.
    pub fn award_trip_experience(
        &self,
        user_id: &str,
        metrics: &TripMetrics,
    ) -> GovernanceResult<ExperienceAward> {
        let experience = metrics.experience()?;
        let mut state = self.write_state()?;
        let award = self.award_locked(&mut state, user_id, experience)?;
        debug!(user_id, experience, "trip experience awarded");
        Ok(award)
    }

    /// Fee rate in basis points. Unknown users pay the entry-tier rate.
    pub fn get_fee_rate(&self, user_id: &str) -> u16 {
        match self.get_profile(user_id) {
            Ok(Some(profile)) => profile.fee_rate_bp,
            Ok(None) => ENTRY_FEE_RATE_BP,
            Err(e) => {
                warn!(user_id, error = %e, "fee lookup failed, using entry rate");
                ENTRY_FEE_RATE_BP
            }
        }
    }

    pub fn tier_of(&self, user_id: &str) -> Tier {
        match self.get_profile(user_id) {
            Ok(Some(profile)) => profile.tier,
            _ => Tier::Newcomer,
        }
    }

    /// Current profile, loading it from storage on first access.
    pub fn get_profile(&self, user_id: &str) -> GovernanceResult<Option<GovernanceProfile>> {
        {
            let state = self
                .state
                .read()
                .map_err(|e| GovernanceError::Lock(e.to_string()))?;
            if let Some(profile) = state.profiles.get(user_id) {
                return Ok(Some(profile.clone()));
            }
        }
        let mut state = self.write_state()?;
        Ok(self.load_locked(&mut state, user_id)?.cloned())
    }

    pub(crate) fn write_state(&self) -> GovernanceResult<RwLockWriteGuard<'_, LedgerState>> {
        self.state
            .write()
            .map_err(|e| GovernanceError::Lock(e.to_string()))
    }

    /// Profile from memory or storage, if one exists.
    pub(crate) fn load_locked<'a>(
        &self,
        state: &'a mut LedgerState,
        user_id: &str,
    ) -> GovernanceResult<Option<&'a mut GovernanceProfile>> {
        if !state.profiles.contains_key(user_id) {
            let Some(storage) = &self.storage else {
                return Ok(None);
            };
            match get_json::<GovernanceProfile>(storage.as_ref(), &profile_key(user_id))? {
                Some(profile) => {
                    state.profiles.insert(user_id.to_string(), profile);
                }
                None => return Ok(None),
            }
        }
        Ok(state.profiles.get_mut(user_id))
    }

    /// Profile from memory or storage, created if absent.
    pub(crate) fn profile_mut<'a>(
        &self,
        state: &'a mut LedgerState,
        user_id: &str,
    ) -> GovernanceResult<&'a mut GovernanceProfile> {
        if self.load_locked(state, user_id)?.is_none() {
            state
                .profiles
                .insert(user_id.to_string(), GovernanceProfile::new(user_id));
        }
        state
            .profiles
            .get_mut(user_id)
            .ok_or_else(|| GovernanceError::Lock("profile vanished under write lock".into()))
    }

    pub(crate) fn award_locked(
        &self,
        state: &mut LedgerState,
        user_id: &str,
        experience: u64,
    ) -> GovernanceResult<ExperienceAward> {
        let award = self.update_profile(state, user_id, |profile| profile.award(experience))?;
        log_level_up(user_id, &award);
        Ok(award)
    }

    /// Apply `change` to a copy of the profile and commit the copy to memory
    /// only after it has been persisted.
    pub(crate) fn update_profile<T>(
        &self,
        state: &mut LedgerState,
        user_id: &str,
        change: impl FnOnce(&mut GovernanceProfile) -> T,
    ) -> GovernanceResult<T> {
        let mut staged = self.profile_mut(state, user_id)?.clone();
        let outcome = change(&mut staged);
        self.persist(&staged)?;
        state.profiles.insert(user_id.to_string(), staged);
        Ok(outcome)
    }

    pub(crate) fn persist(&self, profile: &GovernanceProfile) -> GovernanceResult<()> {
        if let Some(storage) = &self.storage {
            put_json(storage.as_ref(), &profile_key(&profile.user_id), profile)?;
        }
        Ok(())
    }
}

pub(crate) fn log_level_up(user_id: &str, award: &ExperienceAward) {
    if award.leveled_up {
        info!(
            user_id,
            old_tier = %award.old_tier,
            new_tier = %award.new_tier,
            fee_rate_bp = award.new_tier.fee_rate_bp(),
            "governance tier increased"
        );
    }
}

impl Default for GovernanceLedger {
    fn default() -> Self {
        Self::new(GovernanceConfig::default())
    }
}
