//! Canary budget
//!
//! Caps how much of a symbol's daily flow may go to candidate arms. Nothing
//! is cached here: every check reads the day's counts from the store, and the
//! check-then-register pair runs under a per-symbol lock so two concurrent
//! selections cannot both spend the last slot.

use std::sync::Arc;
use tracing::debug;

use super::store::{BanditStore, CanaryBudgetSnapshot};
use crate::clock::Clock;
use crate::config::CanaryConfig;
use crate::keyed::KeyedLocks;
use crate::telemetry;

pub struct CanaryBudgetManager {
    store: Arc<dyn BanditStore>,
    config: CanaryConfig,
    clock: Arc<dyn Clock>,
    symbol_locks: KeyedLocks<String, ()>,
}

impl CanaryBudgetManager {
    pub fn new(store: Arc<dyn BanditStore>, config: CanaryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
            symbol_locks: KeyedLocks::new(),
        }
    }

    pub fn config(&self) -> &CanaryConfig {
        &self.config
    }

    /// Today's counts for `symbol`
    pub fn snapshot(&self, symbol: &str) -> CanaryBudgetSnapshot {
        self.store.canary_snapshot(symbol, self.clock.now())
    }

    pub fn can_select_candidate(&self, symbol: &str) -> bool {
        self.with_budget(symbol, |gate| gate.candidates_allowed())
    }

    pub fn register_pull(&self, symbol: &str, is_candidate: bool) {
        self.with_budget(symbol, |gate| gate.register(is_candidate));
    }

    /// Run `f` with the symbol's budget held, so a check and the pull it
    /// admits are seen as one step by other selectors.
    pub fn with_budget<R>(&self, symbol: &str, f: impl FnOnce(&CanaryGate<'_>) -> R) -> R {
        self.symbol_locks.with(&symbol.to_string(), || (), |_| {
            let gate = CanaryGate {
                manager: self,
                symbol,
            };
            f(&gate)
        })
    }

    /// Candidate slots are gone once the daily count is spent or the
    /// candidate share of today's pulls has reached the cap. A share cap of
    /// 1.0 leaves only the count limit.
    fn allows(&self, snapshot: &CanaryBudgetSnapshot) -> bool {
        if snapshot.candidate_pulls >= self.config.max_trades_per_day {
            return false;
        }
        let share_cap = self.config.max_share_pct_per_day;
        if share_cap < 1.0
            && snapshot.total_pulls > 0
            && snapshot.candidate_share() >= share_cap
        {
            return false;
        }
        true
    }
}

/// Budget view for one symbol while its lock is held
pub struct CanaryGate<'a> {
    manager: &'a CanaryBudgetManager,
    symbol: &'a str,
}

impl CanaryGate<'_> {
    pub fn snapshot(&self) -> CanaryBudgetSnapshot {
        self.manager.snapshot(self.symbol)
    }

    pub fn candidates_allowed(&self) -> bool {
        let snapshot = self.snapshot();
        let allowed = self.manager.allows(&snapshot);
        if !allowed {
            debug!(
                "Canary budget exhausted for {} ({} of {} pulls today)",
                self.symbol, snapshot.candidate_pulls, snapshot.total_pulls
            );
        }
        allowed
    }

    pub fn register(&self, is_candidate: bool) {
        let now = self.manager.clock.now();
        self.manager
            .store
            .record_canary_pull(self.symbol, is_candidate, now);

        let share = self.manager.store.canary_snapshot(self.symbol, now).candidate_share();
        metrics::gauge!(
            telemetry::BANDIT_CANARY_SHARE,
            share,
            "symbol" => self.symbol.to_string()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandit::store::InMemoryBanditStore;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone, Utc};

    fn setup(max_trades: u64, share: f64) -> (Arc<InMemoryBanditStore>, Arc<ManualClock>, CanaryBudgetManager) {
        let store = Arc::new(InMemoryBanditStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 4, 9, 30, 0).unwrap(),
        ));
        let manager = CanaryBudgetManager::new(
            store.clone(),
            CanaryConfig {
                max_trades_per_day: max_trades,
                max_share_pct_per_day: share,
            },
            clock.clone(),
        );
        (store, clock, manager)
    }

    #[test]
    fn test_share_cap() {
        let (store, clock, manager) = setup(2, 0.25);
        let day = clock.now().date_naive();

        store.seed_canary(
            "ETHUSDT",
            CanaryBudgetSnapshot {
                day,
                total_pulls: 4,
                candidate_pulls: 1,
            },
        );
        assert!(!manager.can_select_candidate("ETHUSDT"));

        store.seed_canary(
            "ETHUSDT",
            CanaryBudgetSnapshot {
                day,
                total_pulls: 2,
                candidate_pulls: 0,
            },
        );
        assert!(manager.can_select_candidate("ETHUSDT"));

        manager.register_pull("ETHUSDT", true);
        assert!(!manager.can_select_candidate("ETHUSDT"));
    }

    #[test]
    fn test_daily_count_cap() {
        let (store, clock, manager) = setup(2, 1.0);
        store.seed_canary(
            "SOLUSDT",
            CanaryBudgetSnapshot {
                day: clock.now().date_naive(),
                total_pulls: 50,
                candidate_pulls: 2,
            },
        );
        assert!(!manager.can_select_candidate("SOLUSDT"));
    }

    #[test]
    fn test_fresh_day_and_rollover() {
        let (_store, clock, manager) = setup(20, 0.25);
        assert!(manager.can_select_candidate("BTCUSDT"));

        manager.register_pull("BTCUSDT", true);
        assert!(!manager.can_select_candidate("BTCUSDT"));
        for _ in 0..3 {
            manager.register_pull("BTCUSDT", false);
        }
        // 1 of 4 is still at the cap
        assert!(!manager.can_select_candidate("BTCUSDT"));
        manager.register_pull("BTCUSDT", false);
        assert!(manager.can_select_candidate("BTCUSDT"));

        clock.advance(Duration::days(1));
        let snap = manager.snapshot("BTCUSDT");
        assert_eq!((snap.total_pulls, snap.candidate_pulls), (0, 0));
        assert!(manager.can_select_candidate("BTCUSDT"));
    }

    #[test]
    fn test_concurrent_check_then_register() {
        let (_store, _clock, manager) = setup(5, 1.0);
        let manager = Arc::new(manager);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        manager.with_budget("BTCUSDT", |gate| {
                            if gate.candidates_allowed() {
                                gate.register(true);
                            }
                        });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(manager.snapshot("BTCUSDT").candidate_pulls, 5);
    }
}
