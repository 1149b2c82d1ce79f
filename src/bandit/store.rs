//! Arm and pull persistence
//!
//! [`BanditStore`] is the collaborator boundary: a database-backed
//! implementation lives outside this crate. [`InMemoryBanditStore`] keeps
//! every arm behind its own lock and every symbol's pull history behind
//! another, which is enough for tests, replays and single-process use.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use super::arm::{
    ArmId, ArmKey, ArmRole, ArmStatus, BanditArm, BanditContext, BanditPull, PresetDescriptor,
    PresetId, PullOutcome,
};
use crate::error::{GovernorError, GovernorResult};
use crate::keyed::KeyedLocks;

/// Pull counts for one symbol on one UTC day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanaryBudgetSnapshot {
    pub day: NaiveDate,
    pub total_pulls: u64,
    pub candidate_pulls: u64,
}

impl CanaryBudgetSnapshot {
    pub fn empty(day: NaiveDate) -> Self {
        Self {
            day,
            total_pulls: 0,
            candidate_pulls: 0,
        }
    }

    /// Candidate share of the day's pulls (0 when nothing was pulled)
    pub fn candidate_share(&self) -> f64 {
        if self.total_pulls == 0 {
            return 0.0;
        }
        self.candidate_pulls as f64 / self.total_pulls as f64
    }
}

/// Arm/pull persistence collaborator
pub trait BanditStore: Send + Sync {
    /// Arms for `key`, creating one per preset that has none and fixing roles
    fn ensure_arms(
        &self,
        key: &ArmKey,
        presets: &[PresetDescriptor],
        now: DateTime<Utc>,
    ) -> Vec<BanditArm>;

    fn load_arms(&self, key: &ArmKey) -> Vec<BanditArm>;

    fn list_arms(&self) -> Vec<BanditArm>;

    fn get_arm(&self, id: ArmId) -> Option<BanditArm>;

    fn update_status(
        &self,
        id: ArmId,
        status: ArmStatus,
        now: DateTime<Utc>,
    ) -> GovernorResult<BanditArm>;

    /// Set the status of every arm of a preset; returns how many were touched
    fn update_preset_status(
        &self,
        preset_id: PresetId,
        status: ArmStatus,
        now: DateTime<Utc>,
    ) -> GovernorResult<usize>;

    /// Clear stats for every arm of `key`; returns how many were reset
    fn reset_stats(&self, key: &ArmKey, now: DateTime<Utc>) -> usize;

    /// Register a selection on the arm and append the pull record
    fn log_pull(
        &self,
        arm_id: ArmId,
        context: BanditContext,
        decision_id: String,
        half_life: Duration,
        now: DateTime<Utc>,
    ) -> GovernorResult<BanditPull>;

    /// Resolve a pull with its outcome and feed the reward into the arm
    fn apply_reward(
        &self,
        decision_id: &str,
        outcome: PullOutcome,
        half_life: Duration,
        now: DateTime<Utc>,
    ) -> GovernorResult<BanditPull>;

    fn find_pull(&self, decision_id: &str) -> Option<BanditPull>;

    /// Most recent pulls for `key`, newest first
    fn recent_pulls(&self, key: &ArmKey, limit: usize) -> Vec<BanditPull>;

    /// Today's (UTC) pull counts for `symbol`
    fn canary_snapshot(&self, symbol: &str, now: DateTime<Utc>) -> CanaryBudgetSnapshot;

    /// Count one pull toward today's budget for `symbol`
    fn record_canary_pull(&self, symbol: &str, candidate: bool, now: DateTime<Utc>);

    /// Drop pull records older than `before`; returns how many were removed
    fn prune_pulls(&self, _before: DateTime<Utc>) -> usize {
        0
    }
}

#[derive(Debug, Default)]
struct SymbolPulls {
    pulls: Vec<BanditPull>,
}

/// In-process [`BanditStore`]
#[derive(Debug, Default)]
pub struct InMemoryBanditStore {
    arms: KeyedLocks<ArmId, BanditArm>,
    /// key -> arm ids in creation order
    index: RwLock<HashMap<ArmKey, Vec<ArmId>>>,
    pulls: KeyedLocks<String, SymbolPulls>,
    /// decision id -> symbol
    decisions: RwLock<HashMap<String, String>>,
    canary: KeyedLocks<String, CanaryBudgetSnapshot>,
    next_pull_id: AtomicU64,
}

impl InMemoryBanditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the budget ledger for a symbol (restoring persisted counts)
    pub fn seed_canary(&self, symbol: &str, snapshot: CanaryBudgetSnapshot) {
        self.canary
            .with(&symbol.to_string(), || snapshot, |ledger| *ledger = snapshot);
    }

    /// Insert a fully formed arm (restoring persisted arms)
    pub fn restore_arm(&self, arm: BanditArm) {
        let key = arm.key();
        let id = arm.id;
        self.arms.with(&id, || arm.clone(), |slot| *slot = arm.clone());
        let mut index = self.index.write();
        let ids = index.entry(key).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    fn arm_ids(&self, key: &ArmKey) -> Vec<ArmId> {
        self.index.read().get(key).cloned().unwrap_or_default()
    }

    fn snapshot_arm(&self, id: &ArmId) -> Option<BanditArm> {
        self.arms.get(id).map(|slot| slot.lock().clone())
    }
}

impl BanditStore for InMemoryBanditStore {
    fn ensure_arms(
        &self,
        key: &ArmKey,
        presets: &[PresetDescriptor],
        now: DateTime<Utc>,
    ) -> Vec<BanditArm> {
        // Creation is serialized through the index lock so a key never gets
        // two arms for the same preset.
        let mut index = self.index.write();
        let ids = index.entry(key.clone()).or_default();

        for preset in presets {
            let existing = ids.iter().copied().find(|id| {
                self.arms
                    .get(id)
                    .map(|slot| slot.lock().preset_id == preset.preset_id)
                    .unwrap_or(false)
            });
            match existing {
                Some(id) => {
                    if let Some(slot) = self.arms.get(&id) {
                        let mut arm = slot.lock();
                        if arm.role != preset.role {
                            info!(
                                "Bandit arm {} role {:?} -> {:?}",
                                arm.id, arm.role, preset.role
                            );
                            arm.role = preset.role;
                            arm.updated_at = now;
                        }
                    }
                }
                None => {
                    let arm = BanditArm::new(key, preset.preset_id, preset.role, now);
                    info!(
                        "Created bandit arm {} for {} {} {} (preset {}, {:?})",
                        arm.id, key.symbol, key.regime, key.side, preset.preset_id, preset.role
                    );
                    let id = arm.id;
                    self.arms.get_or_insert_with(&id, || arm);
                    ids.push(id);
                }
            }
        }

        let ids = ids.clone();
        drop(index);
        ids.iter().filter_map(|id| self.snapshot_arm(id)).collect()
    }

    fn load_arms(&self, key: &ArmKey) -> Vec<BanditArm> {
        self.arm_ids(key)
            .iter()
            .filter_map(|id| self.snapshot_arm(id))
            .collect()
    }

    fn list_arms(&self) -> Vec<BanditArm> {
        let mut keys: Vec<ArmKey> = self.index.read().keys().cloned().collect();
        keys.sort();
        keys.iter().flat_map(|key| self.load_arms(key)).collect()
    }

    fn get_arm(&self, id: ArmId) -> Option<BanditArm> {
        self.snapshot_arm(&id)
    }

    fn update_status(
        &self,
        id: ArmId,
        status: ArmStatus,
        now: DateTime<Utc>,
    ) -> GovernorResult<BanditArm> {
        let slot = self.arms.get(&id).ok_or(GovernorError::UnknownArm(id))?;
        let mut arm = slot.lock();
        arm.status = status;
        arm.updated_at = now;
        info!("Bandit arm {} status -> {:?}", id, status);
        Ok(arm.clone())
    }

    fn update_preset_status(
        &self,
        preset_id: PresetId,
        status: ArmStatus,
        now: DateTime<Utc>,
    ) -> GovernorResult<usize> {
        let mut touched = 0;
        for (_, slot) in self.arms.entries() {
            let mut arm = slot.lock();
            if arm.preset_id == preset_id {
                arm.status = status;
                arm.updated_at = now;
                touched += 1;
            }
        }
        if touched == 0 {
            return Err(GovernorError::UnknownPreset(preset_id));
        }
        info!("Preset {} status -> {:?} on {} arms", preset_id, status, touched);
        Ok(touched)
    }

    fn reset_stats(&self, key: &ArmKey, now: DateTime<Utc>) -> usize {
        let ids = self.arm_ids(key);
        for id in &ids {
            if let Some(slot) = self.arms.get(id) {
                let mut arm = slot.lock();
                arm.stats.reset();
                arm.updated_at = now;
            }
        }
        info!(
            "Reset stats for {} arms of {} {} {}",
            ids.len(),
            key.symbol,
            key.regime,
            key.side
        );
        ids.len()
    }

    fn log_pull(
        &self,
        arm_id: ArmId,
        context: BanditContext,
        decision_id: String,
        half_life: Duration,
        now: DateTime<Utc>,
    ) -> GovernorResult<BanditPull> {
        let slot = self.arms.get(&arm_id).ok_or(GovernorError::UnknownArm(arm_id))?;
        let pull = {
            let mut arm = slot.lock();
            arm.stats.register_pull(half_life, now);
            arm.updated_at = now;
            BanditPull {
                id: self.next_pull_id.fetch_add(1, Ordering::Relaxed) + 1,
                arm_id,
                timestamp: now,
                decision_id: decision_id.clone(),
                context,
                reward: None,
                pnl_r: None,
                slippage_bps: None,
                fees_bps: None,
                symbol: arm.symbol.clone(),
                regime: arm.regime.clone(),
                side: arm.side,
                role: arm.role,
            }
        };

        self.pulls
            .with(&pull.symbol, SymbolPulls::default, |p| p.pulls.push(pull.clone()));
        self.decisions
            .write()
            .insert(decision_id, pull.symbol.clone());
        debug!("Logged pull {} on arm {}", pull.decision_id, arm_id);
        Ok(pull)
    }

    fn apply_reward(
        &self,
        decision_id: &str,
        outcome: PullOutcome,
        half_life: Duration,
        now: DateTime<Utc>,
    ) -> GovernorResult<BanditPull> {
        let unknown = || GovernorError::UnknownPull(decision_id.to_string());
        let symbol = self
            .decisions
            .read()
            .get(decision_id)
            .cloned()
            .ok_or_else(unknown)?;
        let slot = self.pulls.get(&symbol).ok_or_else(unknown)?;

        let pull = {
            let mut history = slot.lock();
            let pull = history
                .pulls
                .iter_mut()
                .find(|p| p.decision_id == decision_id)
                .ok_or_else(unknown)?;
            if pull.is_resolved() {
                warn!("Bandit decision {} already resolved, ignoring outcome", decision_id);
                return Ok(pull.clone());
            }
            pull.reward = Some(outcome.reward);
            pull.pnl_r = Some(outcome.pnl_r);
            pull.slippage_bps = Some(outcome.slippage_bps);
            pull.fees_bps = Some(outcome.fees_bps);
            pull.clone()
        };

        let arm_slot = self
            .arms
            .get(&pull.arm_id)
            .ok_or(GovernorError::UnknownArm(pull.arm_id))?;
        let mut arm = arm_slot.lock();
        arm.stats.record_reward(outcome.reward, half_life, now);
        arm.updated_at = now;
        Ok(pull)
    }

    fn find_pull(&self, decision_id: &str) -> Option<BanditPull> {
        let symbol = self.decisions.read().get(decision_id).cloned()?;
        let slot = self.pulls.get(&symbol)?;
        let history = slot.lock();
        history
            .pulls
            .iter()
            .find(|p| p.decision_id == decision_id)
            .cloned()
    }

    fn recent_pulls(&self, key: &ArmKey, limit: usize) -> Vec<BanditPull> {
        let Some(slot) = self.pulls.get(&key.symbol) else {
            return Vec::new();
        };
        let history = slot.lock();
        history
            .pulls
            .iter()
            .rev()
            .filter(|p| p.regime == key.regime && p.side == key.side)
            .take(limit.max(1))
            .cloned()
            .collect()
    }

    fn canary_snapshot(&self, symbol: &str, now: DateTime<Utc>) -> CanaryBudgetSnapshot {
        let today = now.date_naive();
        match self.canary.get(&symbol.to_string()) {
            Some(slot) => {
                let ledger = slot.lock();
                if ledger.day == today {
                    *ledger
                } else {
                    CanaryBudgetSnapshot::empty(today)
                }
            }
            None => CanaryBudgetSnapshot::empty(today),
        }
    }

    fn record_canary_pull(&self, symbol: &str, candidate: bool, now: DateTime<Utc>) {
        let today = now.date_naive();
        self.canary.with(
            &symbol.to_string(),
            || CanaryBudgetSnapshot::empty(today),
            |ledger| {
                if ledger.day != today {
                    *ledger = CanaryBudgetSnapshot::empty(today);
                }
                ledger.total_pulls += 1;
                if candidate {
                    ledger.candidate_pulls += 1;
                }
            },
        );
    }

    fn prune_pulls(&self, before: DateTime<Utc>) -> usize {
        let mut removed_ids = Vec::new();
        for (_, slot) in self.pulls.entries() {
            let mut history = slot.lock();
            history.pulls.retain(|p| {
                let keep = p.timestamp >= before;
                if !keep {
                    removed_ids.push(p.decision_id.clone());
                }
                keep
            });
        }
        if !removed_ids.is_empty() {
            let mut decisions = self.decisions.write();
            for id in &removed_ids {
                decisions.remove(id);
            }
            debug!("Pruned {} bandit pulls older than {}", removed_ids.len(), before);
        }
        removed_ids.len()
    }
}

/// Role an arm should carry given whether its preset is the active one
pub fn role_for(active: bool) -> ArmRole {
    if active {
        ArmRole::Baseline
    } else {
        ArmRole::Candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap()
    }

    fn key() -> ArmKey {
        ArmKey::new("BTCUSDT", "UP", crate::types::Side::Buy)
    }

    fn presets() -> Vec<PresetDescriptor> {
        vec![
            PresetDescriptor {
                preset_id: Uuid::new_v4(),
                role: role_for(true),
            },
            PresetDescriptor {
                preset_id: Uuid::new_v4(),
                role: role_for(false),
            },
        ]
    }

    #[test]
    fn test_ensure_arms_is_idempotent() {
        let store = InMemoryBanditStore::new();
        let presets = presets();
        let first = store.ensure_arms(&key(), &presets, now());
        let second = store.ensure_arms(&key(), &presets, now());
        assert_eq!(first.len(), 2);
        assert_eq!(
            first.iter().map(|a| a.id).collect::<Vec<_>>(),
            second.iter().map(|a| a.id).collect::<Vec<_>>()
        );
        assert_eq!(first[0].role, ArmRole::Baseline);
        assert_eq!(first[1].role, ArmRole::Candidate);
    }

    #[test]
    fn test_ensure_arms_fixes_role() {
        let store = InMemoryBanditStore::new();
        let mut presets = presets();
        store.ensure_arms(&key(), &presets, now());
        presets[1].role = ArmRole::Baseline;
        let arms = store.ensure_arms(&key(), &presets, now());
        assert_eq!(arms[1].role, ArmRole::Baseline);
    }

    #[test]
    fn test_unknown_ids() {
        let store = InMemoryBanditStore::new();
        let id = Uuid::new_v4();
        assert_eq!(
            store.update_status(id, ArmStatus::Blocked, now()),
            Err(GovernorError::UnknownArm(id))
        );
        assert_eq!(
            store.update_preset_status(id, ArmStatus::Blocked, now()),
            Err(GovernorError::UnknownPreset(id))
        );
        assert!(matches!(
            store.apply_reward(
                "missing",
                PullOutcome {
                    reward: 1.0,
                    pnl_r: 1.0,
                    slippage_bps: 0.0,
                    fees_bps: 0.0
                },
                Duration::days(1),
                now()
            ),
            Err(GovernorError::UnknownPull(_))
        ));
    }

    #[test]
    fn test_pull_then_reward() {
        let store = InMemoryBanditStore::new();
        let arms = store.ensure_arms(&key(), &presets(), now());
        let arm_id = arms[0].id;

        let pull = store
            .log_pull(arm_id, BanditContext::new(), "d-1".into(), Duration::days(21), now())
            .unwrap();
        assert_eq!(pull.role, ArmRole::Baseline);
        assert!(!pull.is_resolved());
        assert_eq!(store.get_arm(arm_id).unwrap().stats.pulls, 1);

        let outcome = PullOutcome {
            reward: 1.5,
            pnl_r: 1.5,
            slippage_bps: 0.0,
            fees_bps: 0.0,
        };
        let resolved = store
            .apply_reward("d-1", outcome, Duration::days(21), now())
            .unwrap();
        assert_eq!(resolved.reward, Some(1.5));
        let arm = store.get_arm(arm_id).unwrap();
        assert_eq!(arm.stats.reward_observations, 1);
        assert!((arm.stats.mean() - 1.5).abs() < 1e-12);

        // second resolution is ignored
        store
            .apply_reward("d-1", PullOutcome { reward: -9.0, ..outcome }, Duration::days(21), now())
            .unwrap();
        assert_eq!(store.get_arm(arm_id).unwrap().stats.reward_observations, 1);
        assert_eq!(store.recent_pulls(&key(), 10).len(), 1);
    }

    #[test]
    fn test_canary_ledger_rolls_over_daily() {
        let store = InMemoryBanditStore::new();
        store.record_canary_pull("BTCUSDT", true, now());
        store.record_canary_pull("BTCUSDT", false, now());
        let snap = store.canary_snapshot("BTCUSDT", now());
        assert_eq!((snap.total_pulls, snap.candidate_pulls), (2, 1));
        assert!((snap.candidate_share() - 0.5).abs() < 1e-12);

        let tomorrow = now() + Duration::days(1);
        let snap = store.canary_snapshot("BTCUSDT", tomorrow);
        assert_eq!((snap.total_pulls, snap.candidate_pulls), (0, 0));
        store.record_canary_pull("BTCUSDT", false, tomorrow);
        assert_eq!(store.canary_snapshot("BTCUSDT", tomorrow).total_pulls, 1);
    }

    #[test]
    fn test_prune_pulls() {
        let store = InMemoryBanditStore::new();
        let arms = store.ensure_arms(&key(), &presets(), now());
        store
            .log_pull(arms[0].id, BanditContext::new(), "old".into(), Duration::days(1), now())
            .unwrap();
        store
            .log_pull(
                arms[0].id,
                BanditContext::new(),
                "new".into(),
                Duration::days(1),
                now() + Duration::days(5),
            )
            .unwrap();
        assert_eq!(store.prune_pulls(now() + Duration::days(1)), 1);
        assert!(store.find_pull("old").is_none());
        assert!(store.find_pull("new").is_some());
    }
}
