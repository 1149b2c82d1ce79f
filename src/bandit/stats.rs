//! Exponentially time-decayed reward statistics
//!
//! Before every update the existing aggregates are scaled by
//! `0.5^(elapsed / half_life)`, so an arm's history fades smoothly instead of
//! falling out of a hard window. All updates take `now` explicitly.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Below this weight the aggregates are zeroed
const MIN_WEIGHT: f64 = 1e-9;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArmStats {
    /// Decayed observation weight
    pub total_weight: f64,
    /// Decayed sum of rewards
    pub sum_rewards: f64,
    /// Decayed sum of squared rewards
    pub sum_squares: f64,
    /// Raw selections, never decayed
    pub pulls: u64,
    /// Raw reward observations, never decayed
    pub reward_observations: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl ArmStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build stats that already carry `observations` rewards with the given
    /// mean and variance (used when restoring persisted arms).
    pub fn from_moments(mean: f64, variance: f64, observations: u64, at: DateTime<Utc>) -> Self {
        let weight = observations as f64;
        Self {
            total_weight: weight,
            sum_rewards: mean * weight,
            sum_squares: (variance + mean * mean) * weight,
            pulls: observations,
            reward_observations: observations,
            last_updated: Some(at),
        }
    }

    /// Scale the aggregates by the decay accrued since `last_updated`.
    pub fn apply_decay(&mut self, half_life: Duration, now: DateTime<Utc>) {
        let Some(last) = self.last_updated else {
            return;
        };
        let elapsed_ms = (now - last).num_milliseconds();
        if elapsed_ms <= 0 {
            return;
        }
        let half_life_ms = half_life.num_milliseconds().max(1000) as f64;
        let decay = 0.5_f64.powf(elapsed_ms as f64 / half_life_ms);

        self.total_weight *= decay;
        self.sum_rewards *= decay;
        self.sum_squares *= decay;

        if self.total_weight < MIN_WEIGHT {
            self.total_weight = 0.0;
            self.sum_rewards = 0.0;
            self.sum_squares = 0.0;
        }
    }

    /// Count a selection of this arm.
    pub fn register_pull(&mut self, half_life: Duration, now: DateTime<Utc>) {
        self.apply_decay(half_life, now);
        self.pulls += 1;
        self.last_updated = Some(now);
    }

    /// Add one reward observation with weight 1.
    ///
    /// Non-finite rewards are dropped without touching the aggregates.
    pub fn record_reward(&mut self, reward: f64, half_life: Duration, now: DateTime<Utc>) {
        if !reward.is_finite() {
            return;
        }
        self.apply_decay(half_life, now);
        self.total_weight += 1.0;
        self.sum_rewards += reward;
        self.sum_squares += reward * reward;
        self.reward_observations += 1;
        self.last_updated = Some(now);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn mean(&self) -> f64 {
        if self.total_weight <= 0.0 {
            return 0.0;
        }
        self.sum_rewards / self.total_weight
    }

    pub fn variance(&self) -> f64 {
        if self.total_weight <= 0.0 {
            return 0.0;
        }
        let mean = self.mean();
        (self.sum_squares / self.total_weight - mean * mean).max(0.0)
    }

    /// Standard error of the mean; infinite until two rewards were seen.
    pub fn std_error(&self) -> f64 {
        if self.reward_observations <= 1 {
            return f64::INFINITY;
        }
        (self.variance() / self.total_weight.max(1.0)).sqrt()
    }

    #[inline]
    pub fn effective_count(&self) -> f64 {
        self.total_weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_mean_and_variance() {
        let mut stats = ArmStats::new();
        stats.record_reward(1.0, Duration::days(21), t0());
        stats.record_reward(2.0, Duration::days(21), t0() + Duration::seconds(1));

        assert!((stats.mean() - 1.5).abs() < 1e-6);
        assert!((stats.variance() - 0.25).abs() < 1e-6);
        assert_eq!(stats.reward_observations, 2);
    }

    #[test]
    fn test_decay_with_half_life() {
        let half_life = Duration::days(10);
        let mut stats = ArmStats::new();
        stats.record_reward(2.0, half_life, t0());
        let before = stats.mean();

        stats.record_reward(2.0, half_life, t0() + Duration::days(10));
        assert_eq!(stats.mean(), before);
        assert!((stats.effective_count() - 1.5).abs() < 1e-12);

        stats.record_reward(0.0, half_life, t0() + Duration::days(20));
        assert!(stats.mean() < before);
    }

    #[test]
    fn test_non_finite_reward_dropped() {
        let mut stats = ArmStats::new();
        stats.record_reward(1.0, Duration::days(1), t0());
        let snapshot = stats.clone();

        stats.record_reward(f64::NAN, Duration::days(1), t0() + Duration::days(3));
        stats.record_reward(f64::INFINITY, Duration::days(1), t0() + Duration::days(3));
        assert_eq!(stats, snapshot);
    }

    #[test]
    fn test_empty_stats() {
        let stats = ArmStats::new();
        assert_eq!(stats.mean(), 0.0);
        assert_eq!(stats.variance(), 0.0);
        assert_eq!(stats.effective_count(), 0.0);
        assert!(stats.std_error().is_infinite());
    }

    #[test]
    fn test_long_idle_zeroes_weight() {
        let mut stats = ArmStats::new();
        stats.record_reward(5.0, Duration::days(1), t0());
        stats.apply_decay(Duration::days(1), t0() + Duration::days(400));
        assert_eq!(stats.total_weight, 0.0);
        assert_eq!(stats.mean(), 0.0);
    }

    #[test]
    fn test_pull_does_not_add_weight() {
        let mut stats = ArmStats::new();
        stats.register_pull(Duration::days(1), t0());
        assert_eq!(stats.pulls, 1);
        assert_eq!(stats.effective_count(), 0.0);
        assert_eq!(stats.last_updated, Some(t0()));
    }

    #[test]
    fn test_from_moments() {
        let stats = ArmStats::from_moments(1.2, 0.05, 50, t0());
        assert!((stats.mean() - 1.2).abs() < 1e-9);
        assert!((stats.variance() - 0.05).abs() < 1e-9);
        assert_eq!(stats.effective_count(), 50.0);
    }
}
