//! Reward shaping: clipped pnl in R minus execution-cost penalties

use crate::config::RewardConfig;

use super::arm::PullOutcome;

#[derive(Debug, Clone)]
pub struct RewardModel {
    config: RewardConfig,
}

impl RewardModel {
    pub fn new(config: RewardConfig) -> Self {
        Self { config }
    }

    /// Missing or non-finite inputs count as zero.
    pub fn compute(
        &self,
        pnl_r: Option<f64>,
        slippage_bps: Option<f64>,
        fees_bps: Option<f64>,
    ) -> PullOutcome {
        let pnl_r = pnl_r.filter(|v| v.is_finite()).unwrap_or(0.0);
        let slippage_bps = slippage_bps.filter(|v| v.is_finite()).unwrap_or(0.0);
        let fees_bps = fees_bps.filter(|v| v.is_finite()).unwrap_or(0.0);

        let cap = self.config.cap_r;
        let clipped = pnl_r.clamp(-cap, cap);
        let penalty = self.config.slippage_penalty_bps * slippage_bps
            + self.config.fees_penalty_bps * fees_bps;

        PullOutcome {
            reward: clipped - penalty,
            pnl_r,
            slippage_bps,
            fees_bps,
        }
    }
}
