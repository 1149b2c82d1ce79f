//! Arm selection under bandit policy and canary budget
//!
//! One `select` call loads the key's arms, drops blocked ones, hides candidate
//! arms when the symbol's canary budget is spent, lets the configured
//! algorithm pick, then logs the pull and charges the budget. The budget check
//! and charge happen under the symbol's canary lock.

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::arm::{
    ArmId, ArmKey, ArmRole, ArmStatus, BanditArm, BanditContext, BanditPull, BanditSelection,
    PresetDescriptor, PresetId, PullOutcome,
};
use super::canary::CanaryBudgetManager;
use super::reward::RewardModel;
use super::store::{BanditStore, CanaryBudgetSnapshot};
use crate::clock::Clock;
use crate::config::BanditConfig;
use crate::error::{GovernorError, GovernorResult};
use crate::keyed::KeyedLocks;
use crate::telemetry;
use crate::types::{finite, Side};

/// Operator view of the bandit for one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditOverview {
    pub enabled: bool,
    pub algorithm: String,
    pub symbol: String,
    pub arms: usize,
    pub eligible_arms: usize,
    pub blocked_arms: usize,
    pub total_pulls: u64,
    pub total_reward_observations: u64,
    pub canary: CanaryBudgetSnapshot,
    pub candidate_share: f64,
    pub generated_at: DateTime<Utc>,
}

pub struct BanditArmSelector {
    config: BanditConfig,
    store: Arc<dyn BanditStore>,
    canary: CanaryBudgetManager,
    reward_model: RewardModel,
    clock: Arc<dyn Clock>,
    rngs: KeyedLocks<String, ChaCha8Rng>,
}

impl BanditArmSelector {
    pub fn new(config: BanditConfig, store: Arc<dyn BanditStore>, clock: Arc<dyn Clock>) -> Self {
        let canary = CanaryBudgetManager::new(store.clone(), config.canary.clone(), clock.clone());
        let reward_model = RewardModel::new(config.reward.clone());
        Self {
            config,
            store,
            canary,
            reward_model,
            clock,
            rngs: KeyedLocks::new(),
        }
    }

    pub fn config(&self) -> &BanditConfig {
        &self.config
    }

    pub fn canary(&self) -> &CanaryBudgetManager {
        &self.canary
    }

    pub fn store(&self) -> &Arc<dyn BanditStore> {
        &self.store
    }

    /// Create missing arms for the key and fix their roles
    pub fn ensure_arms(
        &self,
        symbol: &str,
        regime: &str,
        side: Side,
        presets: &[PresetDescriptor],
    ) -> Vec<BanditArm> {
        let key = ArmKey::new(symbol, regime, side);
        self.store.ensure_arms(&key, presets, self.clock.now())
    }

    /// Pick a preset for (symbol, regime, side).
    pub fn select(
        &self,
        symbol: &str,
        regime: &str,
        side: Side,
        context: BanditContext,
    ) -> GovernorResult<BanditSelection> {
        if !self.config.enabled {
            return Err(GovernorError::BanditDisabled);
        }

        let key = ArmKey::new(symbol, regime, side);
        let now = self.clock.now();
        let half_life = self.config.decay.half_life();
        let no_eligible = || GovernorError::NoEligibleArm {
            symbol: key.symbol.clone(),
            regime: key.regime.clone(),
            side: key.side,
        };

        let selection = self.canary.with_budget(&key.symbol, |gate| {
            let mut arms: Vec<BanditArm> = self
                .store
                .load_arms(&key)
                .into_iter()
                .filter(|a| a.is_eligible())
                .collect();

            if arms.iter().any(|a| a.role == ArmRole::Candidate) && !gate.candidates_allowed() {
                arms.retain(|a| a.role == ArmRole::Baseline);
                metrics::counter!(
                    telemetry::BANDIT_BLOCKED,
                    1,
                    "symbol" => key.symbol.clone(),
                    "reason" => "canary_budget"
                );
            }
            if arms.is_empty() {
                return Err(no_eligible());
            }

            let chosen = self.rngs.with(
                &key.symbol,
                || self.seeded_rng(&key.symbol),
                |rng| self.config.algorithm.choose(&arms, &context, rng),
            );
            let arm = chosen.and_then(|idx| arms.get(idx)).ok_or_else(no_eligible)?;

            let decision_id = Uuid::new_v4().to_string();
            self.store
                .log_pull(arm.id, context.clone(), decision_id.clone(), half_life, now)?;
            gate.register(arm.role == ArmRole::Candidate);

            Ok(BanditSelection {
                arm_id: arm.id,
                preset_id: arm.preset_id,
                role: arm.role,
                decision_id,
                context: context.clone(),
            })
        })?;

        debug!(
            "Bandit {} picked arm {} ({}) for {} {} {}",
            self.config.algorithm,
            selection.arm_id,
            selection.role.as_str(),
            key.symbol,
            key.regime,
            key.side
        );
        metrics::counter!(
            telemetry::BANDIT_PULLS,
            1,
            "symbol" => key.symbol.clone(),
            "role" => selection.role.as_str()
        );
        Ok(selection)
    }

    /// Feed a realized outcome back into the selected arm.
    ///
    /// A non-finite reward is dropped without error; other non-finite fields
    /// are stored as zero.
    pub fn record_pull_outcome(
        &self,
        decision_id: &str,
        outcome: PullOutcome,
    ) -> GovernorResult<Option<BanditPull>> {
        if !outcome.reward.is_finite() {
            debug!("Dropping non-finite reward for decision {}", decision_id);
            return Ok(None);
        }
        let outcome = PullOutcome {
            reward: outcome.reward,
            pnl_r: finite(outcome.pnl_r).unwrap_or(0.0),
            slippage_bps: finite(outcome.slippage_bps).unwrap_or(0.0),
            fees_bps: finite(outcome.fees_bps).unwrap_or(0.0),
        };

        let pull = self.store.apply_reward(
            decision_id,
            outcome,
            self.config.decay.half_life(),
            self.clock.now(),
        )?;
        metrics::histogram!(
            telemetry::BANDIT_REWARD,
            outcome.reward,
            "symbol" => pull.symbol.clone()
        );
        Ok(Some(pull))
    }

    /// Shape a trade result into a reward and record it
    pub fn record_trade_outcome(
        &self,
        decision_id: &str,
        pnl_r: Option<f64>,
        slippage_bps: Option<f64>,
        fees_bps: Option<f64>,
    ) -> GovernorResult<Option<BanditPull>> {
        let outcome = self.reward_model.compute(pnl_r, slippage_bps, fees_bps);
        self.record_pull_outcome(decision_id, outcome)
    }

    // ===== OPERATOR ACTIONS =====

    pub fn block_arm(&self, arm_id: ArmId) -> GovernorResult<BanditArm> {
        let arm = self.store.update_status(arm_id, ArmStatus::Blocked, self.clock.now())?;
        metrics::counter!(
            telemetry::BANDIT_BLOCKED,
            1,
            "symbol" => arm.symbol.clone(),
            "reason" => "operator"
        );
        Ok(arm)
    }

    pub fn unblock_arm(&self, arm_id: ArmId) -> GovernorResult<BanditArm> {
        self.store.update_status(arm_id, ArmStatus::Eligible, self.clock.now())
    }

    pub fn block_preset(&self, preset_id: PresetId) -> GovernorResult<usize> {
        self.store
            .update_preset_status(preset_id, ArmStatus::Blocked, self.clock.now())
    }

    pub fn unblock_preset(&self, preset_id: PresetId) -> GovernorResult<usize> {
        self.store
            .update_preset_status(preset_id, ArmStatus::Eligible, self.clock.now())
    }

    /// Clear stats for every arm of the key
    pub fn reset_arms(&self, symbol: &str, regime: &str, side: Side) -> usize {
        let key = ArmKey::new(symbol, regime, side);
        let reset = self.store.reset_stats(&key, self.clock.now());
        if reset == 0 {
            warn!(
                "Reset requested for {} {} {} but no arms exist",
                key.symbol, key.regime, key.side
            );
        }
        reset
    }

    pub fn list_arms(&self) -> Vec<BanditArm> {
        self.store.list_arms()
    }

    pub fn recent_pulls(&self, symbol: &str, regime: &str, side: Side, limit: usize) -> Vec<BanditPull> {
        self.store
            .recent_pulls(&ArmKey::new(symbol, regime, side), limit)
    }

    pub fn overview(&self, symbol: &str) -> BanditOverview {
        let arms: Vec<BanditArm> = self
            .store
            .list_arms()
            .into_iter()
            .filter(|a| a.symbol == symbol)
            .collect();
        let eligible = arms.iter().filter(|a| a.is_eligible()).count();
        let canary = self.canary.snapshot(symbol);

        BanditOverview {
            enabled: self.config.enabled,
            algorithm: self.config.algorithm.name().to_string(),
            symbol: symbol.to_string(),
            arms: arms.len(),
            eligible_arms: eligible,
            blocked_arms: arms.len() - eligible,
            total_pulls: arms.iter().map(|a| a.stats.pulls).sum(),
            total_reward_observations: arms.iter().map(|a| a.stats.reward_observations).sum(),
            canary,
            candidate_share: canary.candidate_share(),
            generated_at: self.clock.now(),
        }
    }

    /// Drop pull history older than `before`
    pub fn prune_pulls(&self, before: DateTime<Utc>) -> usize {
        self.store.prune_pulls(before)
    }

    fn seeded_rng(&self, symbol: &str) -> ChaCha8Rng {
        match self.config.rng_seed {
            Some(seed) => {
                let salt = symbol
                    .bytes()
                    .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
                        (h ^ b as u64).wrapping_mul(0x0100_0000_01b3)
                    });
                info!("Seeding bandit rng for {} from configured seed", symbol);
                ChaCha8Rng::seed_from_u64(seed ^ salt)
            }
            None => ChaCha8Rng::from_entropy(),
        }
    }
}
