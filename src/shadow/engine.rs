//! Shadow Engine
//!
//! Runs the shadow book next to live trading and compares the two per symbol.
//!
//! Divergence is `(shadow - live) / max(|live|, 1) * 100`. Once a symbol has
//! enough closed shadow trades, every fill that leaves the divergence at or
//! above the threshold publishes an alert. Alerts are not de-duplicated.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::book::{ShadowPosition, ShadowPositionBook};
use crate::clock::Clock;
use crate::config::ShadowConfig;
use crate::drift::DriftWatchdog;
use crate::keyed::KeyedLocks;
use crate::notify::{publish_best_effort, GovernorEvent, NotificationSink};
use crate::telemetry;
use crate::types::Side;

#[derive(Debug, Clone, Copy, Default)]
struct PnlTotals {
    live: f64,
    shadow: f64,
    /// Lifetime closes; survives pruning of the book
    closed_trades: usize,
}

/// Per-symbol shadow summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowStatus {
    pub symbol: String,
    pub live_pnl: f64,
    pub shadow_pnl: f64,
    pub divergence_pct: f64,
    pub open_positions: usize,
    pub closed_positions: usize,
    pub closed_trades: usize,
    pub positions: Vec<ShadowPosition>,
}

pub struct ShadowEngine {
    config: ShadowConfig,
    book: ShadowPositionBook,
    totals: KeyedLocks<String, PnlTotals>,
    watchdog: Arc<DriftWatchdog>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    divergence_alerts: AtomicU64,
}

impl ShadowEngine {
    pub fn new(
        config: ShadowConfig,
        watchdog: Arc<DriftWatchdog>,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            book: ShadowPositionBook::new(),
            totals: KeyedLocks::new(),
            watchdog,
            notifier,
            clock,
            divergence_alerts: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn book(&self) -> &ShadowPositionBook {
        &self.book
    }

    /// Rehydrate a persisted position. A newly seen close counts toward the
    /// divergence gate; pnl totals are left alone.
    pub fn restore(&self, position: ShadowPosition) {
        let symbol = position.symbol.clone();
        let newly_closed = !position.is_open();
        let replaced = self.book.restore(position);
        if newly_closed && !replaced.map_or(false, |p| !p.is_open()) {
            self.totals
                .with(&symbol, PnlTotals::default, |t| t.closed_trades += 1);
        }
    }

    /// Open a shadow position. `None` when disabled or any input is unusable.
    pub fn register_shadow(
        &self,
        symbol: &str,
        side: Side,
        entry_price: f64,
        quantity: f64,
        stop_loss: f64,
        take_profit: f64,
    ) -> Option<ShadowPosition> {
        if !self.config.enabled {
            return None;
        }
        let inputs = [entry_price, quantity, stop_loss, take_profit];
        if inputs.iter().any(|v| !v.is_finite()) || entry_price <= 0.0 || quantity <= 0.0 {
            debug!("Dropping shadow registration for {} with bad inputs {:?}", symbol, inputs);
            return None;
        }

        let position = ShadowPosition::open(
            symbol,
            side,
            entry_price,
            quantity,
            stop_loss,
            take_profit,
            self.clock.now(),
        );
        info!(
            "Shadow {} {} opened at {} (qty {}, sl {}, tp {})",
            side, symbol, entry_price, quantity, stop_loss, take_profit
        );
        self.book.insert(position.clone());
        metrics::gauge!(
            telemetry::SHADOW_OPEN_POSITIONS,
            self.book.open_count(symbol) as f64,
            "symbol" => symbol.to_string()
        );
        Some(position)
    }

    /// Close every open position on `symbol` crossed by `price`; each close
    /// is booked as a shadow fill. Returns the closed positions.
    pub fn on_price_update(&self, symbol: &str, price: f64) -> Vec<ShadowPosition> {
        if !self.config.enabled || !price.is_finite() {
            return Vec::new();
        }

        let closed = self.book.close_triggered(symbol, price, self.clock.now());
        for position in &closed {
            let pnl = position.realized_pnl.unwrap_or(0.0);
            self.totals
                .with(&symbol.to_string(), PnlTotals::default, |t| t.closed_trades += 1);
            info!(
                "Shadow {} {} closed at {} pnl {:.4}",
                position.side, symbol, price, pnl
            );
            self.register_shadow_fill(symbol, pnl);
        }
        if !closed.is_empty() {
            metrics::gauge!(
                telemetry::SHADOW_OPEN_POSITIONS,
                self.book.open_count(symbol) as f64,
                "symbol" => symbol.to_string()
            );
        }
        closed
    }

    pub fn register_live_fill(&self, symbol: &str, pnl: f64) {
        if !pnl.is_finite() {
            return;
        }
        let totals = self.totals.with(&symbol.to_string(), PnlTotals::default, |t| {
            t.live += pnl;
            *t
        });
        metrics::gauge!(telemetry::SHADOW_PNL_LIVE, totals.live, "symbol" => symbol.to_string());
        self.evaluate_divergence(symbol, totals);
    }

    /// Book shadow pnl, check divergence and forward the trade to the watchdog
    pub fn register_shadow_fill(&self, symbol: &str, pnl: f64) {
        if !pnl.is_finite() {
            return;
        }
        let totals = self.totals.with(&symbol.to_string(), PnlTotals::default, |t| {
            t.shadow += pnl;
            *t
        });
        metrics::gauge!(
            telemetry::SHADOW_PNL_SHADOW,
            totals.shadow,
            "symbol" => symbol.to_string()
        );
        self.evaluate_divergence(symbol, totals);
        self.watchdog.record_shadow_trade(symbol, pnl);
    }

    fn evaluate_divergence(&self, symbol: &str, totals: PnlTotals) {
        if !self.config.enabled {
            return;
        }
        let diff_pct = divergence_pct(totals.live, totals.shadow);
        if diff_pct.abs() < self.config.divergence_pct_threshold
            || totals.closed_trades < self.config.divergence_min_trades
        {
            return;
        }

        warn!(
            "Shadow divergence on {}: live {:.4} shadow {:.4} ({:.2}%)",
            symbol, totals.live, totals.shadow, diff_pct
        );
        self.divergence_alerts.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            telemetry::SHADOW_DIVERGENCE_ALERTS,
            1,
            "symbol" => symbol.to_string()
        );
        publish_best_effort(
            self.notifier.as_ref(),
            &GovernorEvent::Divergence {
                symbol: symbol.to_string(),
                live_pnl: totals.live,
                shadow_pnl: totals.shadow,
                diff_pct,
            },
        );
    }

    /// Alerts published since start
    pub fn divergence_alerts(&self) -> u64 {
        self.divergence_alerts.load(Ordering::Relaxed)
    }

    pub fn status(&self, symbol: &str) -> ShadowStatus {
        let totals = self
            .totals
            .get(&symbol.to_string())
            .map(|slot| *slot.lock())
            .unwrap_or_default();
        let mut positions = self.book.positions(symbol);
        positions.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));

        ShadowStatus {
            symbol: symbol.to_string(),
            live_pnl: totals.live,
            shadow_pnl: totals.shadow,
            divergence_pct: divergence_pct(totals.live, totals.shadow),
            open_positions: positions.iter().filter(|p| p.is_open()).count(),
            closed_positions: positions.iter().filter(|p| !p.is_open()).count(),
            closed_trades: totals.closed_trades,
            positions,
        }
    }

    /// Forget closed positions past the retention window
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::days(self.config.closed_retention_days);
        let removed = self.book.prune_closed_before(cutoff);
        if removed > 0 {
            debug!("Pruned {} closed shadow positions", removed);
        }
        removed
    }
}

fn divergence_pct(live: f64, shadow: f64) -> f64 {
    (shadow - live) / live.abs().max(1.0) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::DriftConfig;
    use crate::notify::RecordingNotifier;
    use crate::trading_state::TradingState;
    use chrono::TimeZone;

    struct Harness {
        engine: ShadowEngine,
        watchdog: Arc<DriftWatchdog>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<ManualClock>,
    }

    fn harness(config: ShadowConfig) -> Harness {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 8, 1, 12, 0, 0).unwrap(),
        ));
        let notifier = Arc::new(RecordingNotifier::new());
        let watchdog = Arc::new(DriftWatchdog::new(
            DriftConfig::default(),
            Arc::new(TradingState::new()),
            notifier.clone(),
            clock.clone(),
        ));
        let engine = ShadowEngine::new(config, watchdog.clone(), notifier.clone(), clock.clone());
        Harness {
            engine,
            watchdog,
            notifier,
            clock,
        }
    }

    fn low_threshold() -> ShadowConfig {
        ShadowConfig {
            divergence_pct_threshold: 5.0,
            divergence_min_trades: 1,
            ..ShadowConfig::default()
        }
    }

    #[test]
    fn test_disabled_registers_nothing() {
        let h = harness(ShadowConfig {
            enabled: false,
            ..ShadowConfig::default()
        });
        assert!(h
            .engine
            .register_shadow("BTCUSDT", Side::Buy, 100.0, 1.0, 95.0, 110.0)
            .is_none());
        assert!(h.engine.on_price_update("BTCUSDT", 50.0).is_empty());
    }

    #[test]
    fn test_bad_inputs_dropped() {
        let h = harness(ShadowConfig::default());
        assert!(h
            .engine
            .register_shadow("BTCUSDT", Side::Buy, f64::NAN, 1.0, 95.0, 110.0)
            .is_none());
        assert!(h
            .engine
            .register_shadow("BTCUSDT", Side::Buy, 100.0, 0.0, 95.0, 110.0)
            .is_none());
        h.engine.register_live_fill("BTCUSDT", f64::INFINITY);
        assert_eq!(h.engine.status("BTCUSDT").live_pnl, 0.0);
    }

    #[test]
    fn test_close_feeds_totals_and_watchdog() {
        let h = harness(ShadowConfig::default());
        h.engine
            .register_shadow("BTCUSDT", Side::Sell, 100.0, 2.0, 104.0, 96.0)
            .unwrap();
        let closed = h.engine.on_price_update("BTCUSDT", 95.5);
        assert_eq!(closed.len(), 1);

        let status = h.engine.status("BTCUSDT");
        assert!((status.shadow_pnl - 9.0).abs() < 1e-12);
        assert_eq!(status.closed_positions, 1);
        assert_eq!(status.open_positions, 0);
        assert_eq!(h.watchdog.status().shadow.count, 1);
    }

    #[test]
    fn test_single_divergence_alert() {
        let h = harness(low_threshold());
        // no closed trades yet: gated
        h.engine.register_live_fill("ETHUSDT", 10.0);
        assert_eq!(h.notifier.divergence_count(), 0);

        let mut closed = ShadowPosition::open(
            "ETHUSDT",
            Side::Buy,
            100.0,
            1.0,
            90.0,
            110.0,
            h.clock.now(),
        );
        closed.close(110.0, h.clock.now());
        h.engine.restore(closed.clone());
        // same close again is not a second trade
        h.engine.restore(closed);
        assert_eq!(h.engine.status("ETHUSDT").closed_trades, 1);

        h.engine.register_shadow_fill("ETHUSDT", 40.0);
        assert_eq!(h.notifier.divergence_count(), 1);
        assert_eq!(h.engine.divergence_alerts(), 1);

        match &h.notifier.events()[0] {
            GovernorEvent::Divergence {
                live_pnl,
                shadow_pnl,
                diff_pct,
                ..
            } => {
                assert_eq!(*live_pnl, 10.0);
                assert_eq!(*shadow_pnl, 40.0);
                assert!((diff_pct - 300.0).abs() < 1e-9);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_repeated_breaches_alert_again() {
        let h = harness(low_threshold());
        h.engine
            .register_shadow("BTCUSDT", Side::Buy, 100.0, 1.0, 95.0, 101.0)
            .unwrap();
        h.engine.on_price_update("BTCUSDT", 102.0);
        assert_eq!(h.notifier.divergence_count(), 1);

        h.engine.register_live_fill("BTCUSDT", -1.0);
        h.engine.register_live_fill("BTCUSDT", -1.0);
        assert_eq!(h.notifier.divergence_count(), 3);
    }

    #[test]
    fn test_small_divergence_is_quiet() {
        let h = harness(low_threshold());
        h.engine
            .register_shadow("BTCUSDT", Side::Buy, 100.0, 1.0, 95.0, 101.0)
            .unwrap();
        h.engine.register_live_fill("BTCUSDT", 2.0);
        h.engine.on_price_update("BTCUSDT", 102.0);
        // (2 - 2) / 2
        assert_eq!(h.notifier.divergence_count(), 0);
    }

    #[test]
    fn test_prune_expired() {
        let h = harness(ShadowConfig::default());
        h.engine
            .register_shadow("BTCUSDT", Side::Buy, 100.0, 1.0, 95.0, 101.0)
            .unwrap();
        h.engine.on_price_update("BTCUSDT", 101.0);
        h.clock.advance(Duration::days(31));
        assert_eq!(h.engine.prune_expired(h.clock.now()), 1);
        assert!(h.engine.status("BTCUSDT").positions.is_empty());
    }

    #[test]
    fn test_divergence_gate_survives_prune() {
        let h = harness(ShadowConfig {
            divergence_pct_threshold: 50.0,
            divergence_min_trades: 1,
            ..ShadowConfig::default()
        });
        h.engine
            .register_shadow("BTCUSDT", Side::Buy, 100.0, 1.0, 90.0, 140.0)
            .unwrap();
        h.engine.on_price_update("BTCUSDT", 140.0);
        assert_eq!(h.notifier.divergence_count(), 1);

        h.clock.advance(Duration::days(31));
        assert_eq!(h.engine.prune_expired(h.clock.now()), 1);
        let status = h.engine.status("BTCUSDT");
        assert_eq!(status.closed_positions, 0);
        assert_eq!(status.closed_trades, 1);
        assert_eq!(status.shadow_pnl, 40.0);

        // (40 - 10) / 10
        h.engine.register_live_fill("BTCUSDT", 10.0);
        assert_eq!(h.notifier.divergence_count(), 2);
    }
}
