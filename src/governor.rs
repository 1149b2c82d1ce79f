//! Execution Governor
//!
//! Single entry point for the allocator and order guard. Wires the bandit
//! selector, TCA, shadow engine and drift watchdog around one clock, one
//! notification sink and one shared trading state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::bandit::{
    ArmId, BanditArm, BanditArmSelector, BanditContext, BanditOverview, BanditPull,
    BanditSelection, BanditStore, InMemoryBanditStore, PresetDescriptor, PresetId, PullOutcome,
};
use crate::clock::{Clock, SystemClock};
use crate::config::GovernorConfig;
use crate::drift::{DriftStatus, DriftWatchdog};
use crate::error::GovernorResult;
use crate::notify::{LogNotifier, NotificationSink};
use crate::shadow::{ShadowEngine, ShadowPosition, ShadowStatus};
use crate::tca::{OrderSubmission, TcaAggregate, TcaSample, TcaService};
use crate::trading_state::TradingState;
use crate::types::{OrderType, Side};

/// What one `prune_expired` pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    pub tca: usize,
    pub drift: usize,
    pub shadow: usize,
    pub pulls: usize,
}

impl PruneReport {
    pub fn total(&self) -> usize {
        self.tca + self.drift + self.shadow + self.pulls
    }
}

pub struct ExecutionGovernor {
    config: GovernorConfig,
    clock: Arc<dyn Clock>,
    trading_state: Arc<TradingState>,
    selector: BanditArmSelector,
    tca: TcaService,
    watchdog: Arc<DriftWatchdog>,
    shadow: ShadowEngine,
}

impl ExecutionGovernor {
    pub fn new(
        config: GovernorConfig,
        store: Arc<dyn BanditStore>,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let trading_state = Arc::new(TradingState::new());
        let selector = BanditArmSelector::new(config.bandit.clone(), store, clock.clone());
        let tca = TcaService::new(config.tca.clone(), clock.clone());
        let watchdog = Arc::new(DriftWatchdog::new(
            config.drift.clone(),
            trading_state.clone(),
            notifier.clone(),
            clock.clone(),
        ));
        let shadow = ShadowEngine::new(config.shadow.clone(), watchdog.clone(), notifier, clock.clone());

        info!(
            "Execution governor ready (bandit={} {}, shadow={}, drift={}, tca={})",
            config.bandit.enabled,
            config.bandit.algorithm.name(),
            config.shadow.enabled,
            config.drift.enabled,
            config.tca.enabled
        );

        Self {
            config,
            clock,
            trading_state,
            selector,
            tca,
            watchdog,
            shadow,
        }
    }

    /// In-memory store, log-only notifications, wall clock
    pub fn in_memory(config: GovernorConfig) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryBanditStore::new()),
            Arc::new(LogNotifier),
            Arc::new(SystemClock),
        )
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn trading_state(&self) -> &Arc<TradingState> {
        &self.trading_state
    }

    pub fn selector(&self) -> &BanditArmSelector {
        &self.selector
    }

    pub fn tca(&self) -> &TcaService {
        &self.tca
    }

    pub fn shadow(&self) -> &ShadowEngine {
        &self.shadow
    }

    pub fn watchdog(&self) -> &Arc<DriftWatchdog> {
        &self.watchdog
    }

    // ===== BANDIT =====

    pub fn ensure_arms(
        &self,
        symbol: &str,
        regime: &str,
        side: Side,
        presets: &[PresetDescriptor],
    ) -> Vec<BanditArm> {
        self.selector.ensure_arms(symbol, regime, side, presets)
    }

    pub fn select_arm(
        &self,
        symbol: &str,
        regime: &str,
        side: Side,
        context: BanditContext,
    ) -> GovernorResult<BanditSelection> {
        self.selector.select(symbol, regime, side, context)
    }

    pub fn record_pull_outcome(
        &self,
        decision_id: &str,
        reward: f64,
        pnl_r: f64,
        slippage_bps: f64,
        fees_bps: f64,
    ) -> GovernorResult<Option<BanditPull>> {
        self.selector.record_pull_outcome(
            decision_id,
            PullOutcome {
                reward,
                pnl_r,
                slippage_bps,
                fees_bps,
            },
        )
    }

    pub fn record_trade_outcome(
        &self,
        decision_id: &str,
        pnl_r: Option<f64>,
        slippage_bps: Option<f64>,
        fees_bps: Option<f64>,
    ) -> GovernorResult<Option<BanditPull>> {
        self.selector
            .record_trade_outcome(decision_id, pnl_r, slippage_bps, fees_bps)
    }

    pub fn block_arm(&self, arm_id: ArmId) -> GovernorResult<BanditArm> {
        self.selector.block_arm(arm_id)
    }

    pub fn unblock_arm(&self, arm_id: ArmId) -> GovernorResult<BanditArm> {
        self.selector.unblock_arm(arm_id)
    }

    pub fn block_preset(&self, preset_id: PresetId) -> GovernorResult<usize> {
        self.selector.block_preset(preset_id)
    }

    pub fn unblock_preset(&self, preset_id: PresetId) -> GovernorResult<usize> {
        self.selector.unblock_preset(preset_id)
    }

    pub fn reset_arms(&self, symbol: &str, regime: &str, side: Side) -> usize {
        self.selector.reset_arms(symbol, regime, side)
    }

    pub fn list_arms(&self) -> Vec<BanditArm> {
        self.selector.list_arms()
    }

    pub fn recent_pulls(&self, symbol: &str, regime: &str, side: Side, limit: usize) -> Vec<BanditPull> {
        self.selector.recent_pulls(symbol, regime, side, limit)
    }

    pub fn bandit_overview(&self, symbol: &str) -> BanditOverview {
        self.selector.overview(symbol)
    }

    // ===== TCA =====

    pub fn estimate_slippage(&self, symbol: &str, order_type: OrderType, now: DateTime<Utc>) -> f64 {
        self.tca.expected_slippage_bps(symbol, order_type, now)
    }

    pub fn recommend_order_type(&self, symbol: &str, baseline: OrderType, now: DateTime<Utc>) -> OrderType {
        self.tca.recommend_order_type(symbol, baseline, now)
    }

    pub fn record_submission(&self, submission: OrderSubmission) {
        self.tca.record_submission(submission);
    }

    pub fn record_fill(
        &self,
        order_id: &str,
        fill_price: f64,
        spread: Option<f64>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Option<TcaSample> {
        self.tca.record_fill(order_id, fill_price, spread, timestamp)
    }

    pub fn tca_aggregate(
        &self,
        symbol: Option<&str>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> TcaAggregate {
        self.tca.aggregate(symbol, from, to)
    }

    // ===== SHADOW / DRIFT =====

    pub fn register_shadow(
        &self,
        symbol: &str,
        side: Side,
        entry_price: f64,
        quantity: f64,
        stop_loss: f64,
        take_profit: f64,
    ) -> Option<ShadowPosition> {
        self.shadow
            .register_shadow(symbol, side, entry_price, quantity, stop_loss, take_profit)
    }

    pub fn on_shadow_price_update(&self, symbol: &str, price: f64) -> Vec<ShadowPosition> {
        self.shadow.on_price_update(symbol, price)
    }

    /// Live pnl goes to both the divergence check and the live drift window
    pub fn report_live_fill(&self, symbol: &str, pnl: f64) {
        self.shadow.register_live_fill(symbol, pnl);
        self.watchdog.record_live_trade(symbol, pnl);
    }

    /// The shadow engine forwards shadow pnl to the watchdog itself
    pub fn report_shadow_fill(&self, symbol: &str, pnl: f64) {
        self.shadow.register_shadow_fill(symbol, pnl);
    }

    pub fn shadow_status(&self, symbol: &str) -> ShadowStatus {
        self.shadow.status(symbol)
    }

    pub fn watchdog_status(&self) -> DriftStatus {
        self.watchdog.status()
    }

    pub fn allow_trading(&self) -> bool {
        self.watchdog.allow_trading()
    }

    pub fn sizing_multiplier(&self) -> f64 {
        self.watchdog.sizing_multiplier()
    }

    pub fn reset_watchdog(&self) {
        self.watchdog.reset();
    }

    pub fn release_kill_switch(&self) {
        self.trading_state.release_kill_switch();
    }

    // ===== MAINTENANCE =====

    /// Retention pass for every component; meant for a periodic external timer
    pub fn prune_expired(&self, now: DateTime<Utc>) -> PruneReport {
        let report = PruneReport {
            tca: self.tca.prune_expired(now),
            drift: self.watchdog.prune_expired(now),
            shadow: self.shadow.prune_expired(now),
            pulls: self
                .selector
                .prune_pulls(now - Duration::days(self.config.bandit.pull_retention_days)),
        };
        if report.total() > 0 {
            info!(?report, "Pruned expired governor state");
        }
        report
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
