//! Drift Watchdog
//!
//! Staged state machine over rolling live and shadow performance windows.
//!
//! ```text
//!   escalate:  NORMAL -> REDUCED -> SHADOW -> PAUSED
//!   recover:   PAUSED -> SHADOW -> REDUCED -> NORMAL
//! ```
//!
//! Every recorded trade (live or shadow) re-evaluates once the live window
//! holds `max(5, window_trades / 2)` trades. One evaluation moves at most one
//! stage. Both windows, the stage and the multiplier share one lock, so an
//! evaluation always sees the insert that triggered it.

use chrono::Duration;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::window::{PerformanceWindow, WindowMetrics};
use crate::clock::Clock;
use crate::config::DriftConfig;
use crate::notify::{publish_best_effort, GovernorEvent, NotificationSink};
use crate::telemetry;
use crate::trading_state::{TradingMode, TradingState};

/// Minimum live trades before any evaluation
pub(crate) const MIN_LIVE_TRADES: usize = 5;

// Recovery requires live performance back near expectations
const RECOVERY_PF_RATIO: f64 = 0.9;
const RECOVERY_WIN_RATE_RATIO: f64 = 0.95;
const RECOVERY_DRAWDOWN_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DriftStage {
    Normal,
    Reduced,
    Shadow,
    Paused,
}

impl DriftStage {
    /// One step up the ladder (PAUSED stays PAUSED)
    pub fn escalated(self) -> Self {
        match self {
            DriftStage::Normal => DriftStage::Reduced,
            DriftStage::Reduced => DriftStage::Shadow,
            DriftStage::Shadow | DriftStage::Paused => DriftStage::Paused,
        }
    }

    /// One step back toward NORMAL
    pub fn recovered(self) -> Self {
        match self {
            DriftStage::Paused => DriftStage::Shadow,
            DriftStage::Shadow => DriftStage::Reduced,
            DriftStage::Reduced | DriftStage::Normal => DriftStage::Normal,
        }
    }

    pub fn sizing_multiplier(self) -> f64 {
        match self {
            DriftStage::Normal => 1.0,
            DriftStage::Reduced => 0.5,
            DriftStage::Shadow => 0.25,
            DriftStage::Paused => 0.0,
        }
    }

    pub fn trading_mode(self) -> TradingMode {
        match self {
            DriftStage::Normal | DriftStage::Reduced => TradingMode::Live,
            DriftStage::Shadow => TradingMode::Shadow,
            DriftStage::Paused => TradingMode::Paused,
        }
    }

    fn ordinal(self) -> f64 {
        match self {
            DriftStage::Normal => 0.0,
            DriftStage::Reduced => 1.0,
            DriftStage::Shadow => 2.0,
            DriftStage::Paused => 3.0,
        }
    }
}

impl std::fmt::Display for DriftStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Reduced => write!(f, "REDUCED"),
            Self::Shadow => write!(f, "SHADOW"),
            Self::Paused => write!(f, "PAUSED"),
        }
    }
}

/// Snapshot returned by [`DriftWatchdog::status`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftStatus {
    pub stage: DriftStage,
    pub sizing_multiplier: f64,
    pub mode: TradingMode,
    pub kill_switch: bool,
    pub live: WindowMetrics,
    pub shadow: WindowMetrics,
    pub downgrades: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Breaches {
    profit_factor: bool,
    win_rate: bool,
    drawdown: bool,
}

impl Breaches {
    fn any(&self) -> bool {
        self.profit_factor || self.win_rate || self.drawdown
    }
}

struct DriftState {
    stage: DriftStage,
    sizing_multiplier: f64,
    live: PerformanceWindow,
    shadow: PerformanceWindow,
    downgrades: u64,
}

pub struct DriftWatchdog {
    config: DriftConfig,
    state: Mutex<DriftState>,
    trading_state: Arc<TradingState>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
}

impl DriftWatchdog {
    pub fn new(
        config: DriftConfig,
        trading_state: Arc<TradingState>,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = DriftState {
            stage: DriftStage::Normal,
            sizing_multiplier: 1.0,
            live: PerformanceWindow::new(config.window_trades),
            shadow: PerformanceWindow::new(config.window_trades),
            downgrades: 0,
        };
        Self {
            config,
            state: Mutex::new(state),
            trading_state,
            notifier,
            clock,
        }
    }

    pub fn record_live_trade(&self, symbol: &str, pnl: f64) {
        self.record(symbol, pnl, true);
    }

    pub fn record_shadow_trade(&self, symbol: &str, pnl: f64) {
        self.record(symbol, pnl, false);
    }

    fn record(&self, symbol: &str, pnl: f64, live: bool) {
        if !self.config.enabled {
            return;
        }
        if !pnl.is_finite() {
            debug!("Dropping non-finite {} pnl for {}", if live { "live" } else { "shadow" }, symbol);
            return;
        }

        let now = self.clock.now();
        let events = {
            let mut state = self.state.lock();
            if live {
                state.live.push(now, pnl);
            } else {
                state.shadow.push(now, pnl);
            }
            self.evaluate(&mut state)
        };

        for event in &events {
            publish_best_effort(self.notifier.as_ref(), event);
        }
    }

    /// Caller holds the state lock; returned events are published after release.
    fn evaluate(&self, state: &mut DriftState) -> Vec<GovernorEvent> {
        let live = state.live.metrics();
        if live.count < MIN_LIVE_TRADES.max(self.config.window_trades / 2) {
            return Vec::new();
        }
        let shadow = state.shadow.metrics();
        let drop = self.config.threshold_pf_drop;

        let breaches = Breaches {
            profit_factor: drops_below(live.profit_factor, shadow.profit_factor, drop)
                || drops_below(live.profit_factor, self.config.expected_profit_factor, drop),
            win_rate: live.win_rate < self.config.expected_win_rate * (1.0 - drop),
            drawdown: live.max_drawdown_pct > self.config.threshold_max_dd_pct,
        };

        if breaches.any() {
            self.escalate(state, breaches)
        } else {
            self.maybe_recover(state, &live)
        }
    }

    fn escalate(&self, state: &mut DriftState, breaches: Breaches) -> Vec<GovernorEvent> {
        if !self.config.auto_downgrade {
            warn!(
                "Drift detected (pf={} win={} dd={}) but auto downgrade is disabled",
                breaches.profit_factor, breaches.win_rate, breaches.drawdown
            );
            return Vec::new();
        }

        let current = state.stage;
        let next = current.escalated();
        if next == current {
            return Vec::new();
        }

        state.downgrades += 1;
        metrics::counter!(telemetry::DRIFT_DOWNGRADES, 1);
        self.apply_stage(state, next);
        warn!(
            "Drift watchdog escalated {} -> {} (pf={} win={} dd={})",
            current, next, breaches.profit_factor, breaches.win_rate, breaches.drawdown
        );

        let mut events = vec![GovernorEvent::DriftEscalated {
            from: current,
            to: next,
            pf_breach: breaches.profit_factor,
            win_rate_breach: breaches.win_rate,
            drawdown_breach: breaches.drawdown,
        }];
        if next == DriftStage::Paused {
            events.push(GovernorEvent::KillSwitchActivated {
                reason: format!("drift watchdog escalated {} -> {}", current, next),
            });
        }
        events
    }

    /// NaN metrics count as recovered: there is nothing to hold the stage on.
    fn maybe_recover(&self, state: &mut DriftState, live: &WindowMetrics) -> Vec<GovernorEvent> {
        let current = state.stage;
        if current == DriftStage::Normal {
            return Vec::new();
        }

        let pf_ok = live.profit_factor.is_nan()
            || live.profit_factor >= self.config.expected_profit_factor * RECOVERY_PF_RATIO;
        let win_ok = live.win_rate.is_nan()
            || live.win_rate >= self.config.expected_win_rate * RECOVERY_WIN_RATE_RATIO;
        let dd_ok =
            live.max_drawdown_pct <= self.config.threshold_max_dd_pct * RECOVERY_DRAWDOWN_RATIO;
        if !(pf_ok && win_ok && dd_ok) {
            return Vec::new();
        }

        let next = current.recovered();
        self.apply_stage(state, next);
        info!("Drift watchdog recovered {} -> {}", current, next);
        vec![GovernorEvent::DriftRecovered {
            from: current,
            to: next,
        }]
    }

    fn apply_stage(&self, state: &mut DriftState, stage: DriftStage) {
        state.stage = stage;
        state.sizing_multiplier = stage.sizing_multiplier();
        self.trading_state.set_mode(stage.trading_mode());
        if stage == DriftStage::Paused {
            self.trading_state.activate_kill_switch();
        }

        metrics::gauge!(telemetry::DRIFT_STAGE, stage.ordinal());
        metrics::gauge!(telemetry::DRIFT_SIZING_MULTIPLIER, state.sizing_multiplier);
    }

    pub fn allow_trading(&self) -> bool {
        self.state.lock().stage != DriftStage::Paused
    }

    pub fn sizing_multiplier(&self) -> f64 {
        self.state.lock().sizing_multiplier
    }

    pub fn stage(&self) -> DriftStage {
        self.state.lock().stage
    }

    pub fn status(&self) -> DriftStatus {
        let state = self.state.lock();
        DriftStatus {
            stage: state.stage,
            sizing_multiplier: state.sizing_multiplier,
            mode: self.trading_state.mode(),
            kill_switch: self.trading_state.kill_switch_active(),
            live: state.live.metrics(),
            shadow: state.shadow.metrics(),
            downgrades: state.downgrades,
        }
    }

    /// Operator reset: empty windows, NORMAL, full size, LIVE mode.
    ///
    /// The kill switch is left as is; releasing it is a separate action.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.live.clear();
        state.shadow.clear();
        self.apply_stage(&mut state, DriftStage::Normal);
        info!("Drift watchdog reset");
    }

    /// Drop window entries older than the retention; returns how many
    pub fn prune_expired(&self, now: chrono::DateTime<chrono::Utc>) -> usize {
        let cutoff = now - Duration::days(self.config.retention_days);
        let mut state = self.state.lock();
        let removed = state.live.prune_before(cutoff) + state.shadow.prune_before(cutoff);
        if removed > 0 {
            debug!("Pruned {} drift window entries older than {}", removed, cutoff);
        }
        removed
    }
}

/// `actual < reference * (1 - threshold)`, false when either side is unusable
fn drops_below(actual: f64, reference: f64, threshold: f64) -> bool {
    if actual.is_nan() || reference.is_nan() || reference <= 0.0 {
        return false;
    }
    actual < reference * (1.0 - threshold)
}
