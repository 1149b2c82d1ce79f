//! Arm selection policies
//!
//! A closed set of algorithms picked by configuration:
//!
//! - **UCB1**: `mean + sqrt(2 ln N / n)`
//! - **UCB-Tuned**: `mean + sqrt((ln N / n) * min(1/4, var + sqrt(2 ln N / n)))`
//! - **Thompson**: one draw per arm from `Normal(mean, var / n)`, highest draw wins
//!
//! `n` is the arm's decayed effective count and `N` the sum over the offered
//! arms. Arms with no weight are tried first. Exact score ties go to the arm
//! listed first.

use rand::distributions::Distribution;
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;
use std::f64::consts::E;

use super::arm::{BanditArm, BanditContext};
use super::stats::ArmStats;

/// Variance floor for Thompson draws so thinly observed arms keep exploring
const THOMPSON_MIN_VARIANCE: f64 = 0.01;
/// Prior spread for arms that have never been rewarded
const THOMPSON_PRIOR_STD: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanditAlgorithm {
    Ucb1,
    UcbTuned,
    Thompson,
}

impl BanditAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            BanditAlgorithm::Ucb1 => "UCB1",
            BanditAlgorithm::UcbTuned => "UCB_TUNED",
            BanditAlgorithm::Thompson => "THOMPSON",
        }
    }

    /// Index of the chosen arm, or `None` when no offered arm is eligible.
    pub fn choose<R: Rng + ?Sized>(
        self,
        arms: &[BanditArm],
        _context: &BanditContext,
        rng: &mut R,
    ) -> Option<usize> {
        let log_total = log_total_weight(arms);
        let mut best: Option<(usize, f64)> = None;

        for (idx, arm) in arms.iter().enumerate() {
            if !arm.is_eligible() {
                continue;
            }
            let score = match self {
                BanditAlgorithm::Ucb1 => ucb1_score(&arm.stats, log_total),
                BanditAlgorithm::UcbTuned => ucb_tuned_score(&arm.stats, log_total),
                BanditAlgorithm::Thompson => thompson_draw(&arm.stats, rng),
            };
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((idx, score)),
            }
        }

        best.map(|(idx, _)| idx)
    }
}

impl std::fmt::Display for BanditAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// `ln(N)` over eligible arms, floored at 1 so the bonus never goes negative
fn log_total_weight(arms: &[BanditArm]) -> f64 {
    let total: f64 = arms
        .iter()
        .filter(|a| a.is_eligible())
        .map(|a| a.stats.effective_count())
        .sum();
    total.max(E).ln()
}

fn ucb1_score(stats: &ArmStats, log_total: f64) -> f64 {
    let n = stats.effective_count();
    if n <= 0.0 {
        return f64::INFINITY;
    }
    stats.mean() + (2.0 * log_total / n).sqrt()
}

fn ucb_tuned_score(stats: &ArmStats, log_total: f64) -> f64 {
    let n = stats.effective_count();
    if n <= 0.0 {
        return f64::INFINITY;
    }
    let variance_bound = (stats.variance() + (2.0 * log_total / n).sqrt()).min(0.25);
    stats.mean() + ((log_total / n) * variance_bound).sqrt()
}

fn thompson_draw<R: Rng + ?Sized>(stats: &ArmStats, rng: &mut R) -> f64 {
    let n = stats.effective_count();
    let (mean, std_dev) = if n <= 0.0 {
        (0.0, THOMPSON_PRIOR_STD)
    } else {
        let variance = stats.variance().max(THOMPSON_MIN_VARIANCE);
        (stats.mean(), (variance / n.max(1.0)).sqrt())
    };
    match Normal::new(mean, std_dev) {
        Ok(normal) => normal.sample(rng),
        Err(_) => mean,
    }
}
