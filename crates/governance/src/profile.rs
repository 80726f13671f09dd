//! Governance profiles and trip experience.

use crate::error::{GovernanceError, GovernanceResult};
use crate::tier::Tier;
use ridemesh_core::UserId;
use serde::{Deserialize, Serialize};

/// Flat experience for every completed trip
pub const BASE_TRIP_EXPERIENCE: u64 = 10;

/// Bonus for a trip rated at or above [`HIGH_RATING`]
pub const HIGH_RATING_BONUS: u64 = 5;

pub const HIGH_RATING: f64 = 4.5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceProfile {
    pub user_id: UserId,
    /// Cumulative experience, never decreases
    pub experience_points: u64,
    pub tier: Tier,
    pub fee_rate_bp: u16,
    pub validations_completed: u64,
    /// Experience reserved by votes on open proposals
    #[serde(default)]
    pub locked_voting_power: u64,
}

impl GovernanceProfile {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            experience_points: 0,
            tier: Tier::Newcomer,
            fee_rate_bp: Tier::Newcomer.fee_rate_bp(),
            validations_completed: 0,
            locked_voting_power: 0,
        }
    }

    /// Add experience and recompute the tier. Returns the previous tier.
    pub(crate) fn gain(&mut self, experience: u64) -> Tier {
        let old_tier = self.tier;
        self.experience_points = self.experience_points.saturating_add(experience);
        self.tier = Tier::from_experience(self.experience_points);
        self.fee_rate_bp = self.tier.fee_rate_bp();
        old_tier
    }

    pub(crate) fn award(&mut self, experience: u64) -> ExperienceAward {
        let old_tier = self.gain(experience);
        ExperienceAward {
            experience_gained: experience,
            total_experience: self.experience_points,
            old_tier,
            new_tier: self.tier,
            leveled_up: self.tier > old_tier,
        }
    }

    /// Experience not reserved by open votes.
    pub fn available_voting_power(&self) -> u64 {
        self.experience_points.saturating_sub(self.locked_voting_power)
    }
}

/// What a completed trip looked like.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TripMetrics {
    pub duration_minutes: f64,
    pub distance_km: f64,
    /// Rating the other party gave, 1.0 to 5.0
    pub rating: Option<f64>,
}

impl TripMetrics {
    /// Experience this trip is worth.
    pub fn experience(&self) -> GovernanceResult<u64> {
        for (name, value) in [
            ("duration_minutes", self.duration_minutes),
            ("distance_km", self.distance_km),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(GovernanceError::InvalidMetrics(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        // Float-to-int casts saturate; the sums must as well
        let mut experience = BASE_TRIP_EXPERIENCE
            .saturating_add((self.duration_minutes / 10.0).floor() as u64)
            .saturating_add(self.distance_km.floor() as u64);
        if matches!(self.rating, Some(r) if r >= HIGH_RATING) {
            experience = experience.saturating_add(HIGH_RATING_BONUS);
        }
        Ok(experience)
    }
}

/// Result of awarding experience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperienceAward {
    pub experience_gained: u64,
    pub total_experience: u64,
    pub old_tier: Tier,
    pub new_tier: Tier,
    pub leveled_up: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trip_experience_formula() {
        let metrics = TripMetrics {
            duration_minutes: 25.0,
            distance_km: 7.9,
            rating: Some(4.8),
        };
        // 10 + 2 + 7 + 5
        assert_eq!(metrics.experience().unwrap(), 24);

        let unrated = TripMetrics {
            rating: None,
            ..metrics
        };
        assert_eq!(unrated.experience().unwrap(), 19);

        let just_below = TripMetrics {
            rating: Some(4.49),
            ..metrics
        };
        assert_eq!(just_below.experience().unwrap(), 19);
    }

    #[test]
    fn test_rejects_negative_metrics() {
        let metrics = TripMetrics {
            duration_minutes: -1.0,
            distance_km: 3.0,
            rating: None,
        };
        assert!(matches!(
            metrics.experience(),
            Err(GovernanceError::InvalidMetrics(_))
        ));
    }

    #[test]
    fn test_huge_metrics_saturate() {
        let metrics = TripMetrics {
            duration_minutes: 1e30,
            distance_km: 1e30,
            rating: Some(5.0),
        };
        assert_eq!(metrics.experience().unwrap(), u64::MAX);

        let mut profile = GovernanceProfile::new("u1");
        profile.gain(metrics.experience().unwrap());
        profile.gain(BASE_TRIP_EXPERIENCE);
        assert_eq!(profile.experience_points, u64::MAX);
        assert_eq!(profile.tier, Tier::Steward);
    }

    #[test]
    fn test_gain_recomputes_tier() {
        let mut profile = GovernanceProfile::new("u1");
        let old = profile.gain(1_200);
        assert_eq!(old, Tier::Newcomer);
        assert_eq!(profile.tier, Tier::Trusted);
        assert_eq!(profile.fee_rate_bp, 1_200);
    }
}
