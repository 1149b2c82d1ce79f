//! Rolling trade performance window
//!
//! FIFO of the last `capacity` trade pnls. Metrics are recomputed on every
//! change so readers always see the window as one consistent snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Summary of one window. NaN means "not enough data".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    /// Gross profit / |gross loss|; NaN without both wins and losses
    pub profit_factor: f64,
    /// Winning trades / trades; NaN when empty
    pub win_rate: f64,
    /// Peak-to-trough of cumulative pnl as percent of peak; 0 while the peak is not positive
    pub max_drawdown_pct: f64,
    pub total_pnl: f64,
    pub count: usize,
}

impl WindowMetrics {
    pub fn empty() -> Self {
        Self {
            profit_factor: f64::NAN,
            win_rate: f64::NAN,
            max_drawdown_pct: 0.0,
            total_pnl: 0.0,
            count: 0,
        }
    }
}

impl Default for WindowMetrics {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone)]
pub struct PerformanceWindow {
    capacity: usize,
    trades: VecDeque<(DateTime<Utc>, f64)>,
    metrics: WindowMetrics,
}

impl PerformanceWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            trades: VecDeque::with_capacity(capacity),
            metrics: WindowMetrics::empty(),
        }
    }

    /// Append, evict beyond capacity, recompute
    pub fn push(&mut self, at: DateTime<Utc>, pnl: f64) {
        self.trades.push_back((at, pnl));
        while self.trades.len() > self.capacity {
            self.trades.pop_front();
        }
        self.recompute();
    }

    /// Drop trades recorded before `cutoff`; returns how many were dropped
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.trades.len();
        self.trades.retain(|(at, _)| *at >= cutoff);
        let removed = before - self.trades.len();
        if removed > 0 {
            self.recompute();
        }
        removed
    }

    pub fn clear(&mut self) {
        self.trades.clear();
        self.metrics = WindowMetrics::empty();
    }

    #[inline]
    pub fn metrics(&self) -> WindowMetrics {
        self.metrics
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    fn recompute(&mut self) {
        if self.trades.is_empty() {
            self.metrics = WindowMetrics::empty();
            return;
        }

        let mut gross_profit = 0.0;
        let mut gross_loss = 0.0;
        let mut wins = 0usize;
        let mut equity = 0.0_f64;
        let mut peak = 0.0_f64;
        let mut max_drawdown = 0.0_f64;

        for &(_, pnl) in &self.trades {
            if pnl > 0.0 {
                gross_profit += pnl;
                wins += 1;
            } else if pnl < 0.0 {
                gross_loss += pnl;
            }
            equity += pnl;
            peak = peak.max(equity);
            max_drawdown = max_drawdown.max(peak - equity);
        }

        let count = self.trades.len();
        let profit_factor = if gross_profit <= 0.0 || gross_loss >= 0.0 {
            f64::NAN
        } else {
            gross_profit / gross_loss.abs()
        };
        let max_drawdown_pct = if peak <= 0.0 {
            0.0
        } else {
            max_drawdown / peak * 100.0
        };

        self.metrics = WindowMetrics {
            profit_factor,
            win_rate: wins as f64 / count as f64,
            max_drawdown_pct,
            total_pnl: equity,
            count,
        };
    }
}
