//! Shared trading mode and kill switch
//!
//! Written by the drift watchdog, read by the external allocator / order guard.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// What the allocator is allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradingMode {
    /// Real orders
    Live,
    /// Shadow-only: signals go to the shadow book, not the exchange
    Shadow,
    /// No new exposure
    Paused,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "LIVE"),
            Self::Shadow => write!(f, "SHADOW"),
            Self::Paused => write!(f, "PAUSED"),
        }
    }
}

#[derive(Debug)]
pub struct TradingState {
    mode: RwLock<TradingMode>,
    kill_switch: AtomicBool,
}

impl Default for TradingState {
    fn default() -> Self {
        Self::new()
    }
}

impl TradingState {
    pub fn new() -> Self {
        Self {
            mode: RwLock::new(TradingMode::Live),
            kill_switch: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> TradingMode {
        *self.mode.read()
    }

    pub fn set_mode(&self, mode: TradingMode) {
        let mut current = self.mode.write();
        if *current != mode {
            info!("Trading mode {} -> {}", *current, mode);
            *current = mode;
        }
    }

    pub fn activate_kill_switch(&self) {
        if !self.kill_switch.swap(true, Ordering::SeqCst) {
            warn!("Kill switch activated");
        }
    }

    /// Operator-only
    pub fn release_kill_switch(&self) {
        if self.kill_switch.swap(false, Ordering::SeqCst) {
            info!("Kill switch released");
        }
    }

    pub fn kill_switch_active(&self) -> bool {
        self.kill_switch.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kill_switch_toggle() {
        let state = TradingState::new();
        assert_eq!(state.mode(), TradingMode::Live);
        assert!(!state.kill_switch_active());

        state.set_mode(TradingMode::Paused);
        state.activate_kill_switch();
        assert_eq!(state.mode(), TradingMode::Paused);
        assert!(state.kill_switch_active());

        state.release_kill_switch();
        assert!(!state.kill_switch_active());
    }
}
