//! TCA sample history
//!
//! Bounded per-symbol FIFO of slippage samples. Symbols are matched
//! case-insensitively. Append, capacity eviction and retention eviction for a
//! symbol happen under that symbol's lock.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::keyed::KeyedLocks;
use crate::types::{OrderType, Side};

/// One observed fill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcaSample {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub timestamp: DateTime<Utc>,
    /// Signed cost vs the reference price, positive when the fill was worse
    pub slippage_bps: f64,
    pub queue_time_ms: i64,
    pub reference_price: f64,
    pub fill_price: f64,
    pub volume_24h: Option<f64>,
    pub atr: Option<f64>,
    pub spread: Option<f64>,
}

impl TcaSample {
    /// UTC hour of day the fill happened in
    pub fn hour(&self) -> u32 {
        self.timestamp.hour()
    }
}

pub(crate) fn symbol_key(symbol: &str) -> String {
    symbol.to_ascii_uppercase()
}

#[derive(Debug)]
pub struct TcaSampleStore {
    capacity: usize,
    retention: Duration,
    samples: KeyedLocks<String, VecDeque<TcaSample>>,
}

impl TcaSampleStore {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            retention,
            samples: KeyedLocks::new(),
        }
    }

    /// Append a sample and evict expired and overflowing ones (oldest first).
    /// Returns how many were evicted.
    pub fn append(&self, sample: TcaSample, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let capacity = self.capacity;
        self.samples
            .with(&symbol_key(&sample.symbol), VecDeque::new, |history| {
                history.push_back(sample);
                let before = history.len();
                while history.len() > capacity {
                    history.pop_front();
                }
                history.retain(|s| s.timestamp >= cutoff);
                before - history.len()
            })
    }

    pub fn samples(&self, symbol: &str) -> Vec<TcaSample> {
        self.samples
            .get(&symbol_key(symbol))
            .map(|slot| slot.lock().iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all(&self) -> Vec<TcaSample> {
        self.samples
            .entries()
            .into_iter()
            .flat_map(|(_, slot)| slot.lock().iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn len(&self, symbol: &str) -> usize {
        self.samples
            .get(&symbol_key(symbol))
            .map(|slot| slot.lock().len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.samples
            .entries()
            .iter()
            .all(|(_, slot)| slot.lock().is_empty())
    }

    /// Mean slippage over every sample of the symbol; NaN when there are none
    pub fn average(&self, symbol: &str) -> f64 {
        self.mean_where(symbol, |_| true)
    }

    /// Mean slippage for samples of `order_type` filled in UTC `hour`
    pub fn hourly_average(&self, symbol: &str, order_type: OrderType, hour: u32) -> f64 {
        self.mean_where(symbol, |s| s.order_type == order_type && s.hour() == hour)
    }

    fn mean_where(&self, symbol: &str, keep: impl Fn(&TcaSample) -> bool) -> f64 {
        let Some(slot) = self.samples.get(&symbol_key(symbol)) else {
            return f64::NAN;
        };
        let history = slot.lock();
        let (sum, count) = history
            .iter()
            .filter(|s| keep(s))
            .fold((0.0, 0usize), |(sum, n), s| (sum + s.slippage_bps, n + 1));
        if count == 0 {
            f64::NAN
        } else {
            sum / count as f64
        }
    }

    /// Evict samples older than the retention window
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        self.samples
            .entries()
            .into_iter()
            .map(|(_, slot)| {
                let mut history = slot.lock();
                let before = history.len();
                history.retain(|s| s.timestamp >= cutoff);
                before - history.len()
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 2, hour, 15, 0).unwrap()
    }

    fn sample(symbol: &str, order_type: OrderType, ts: DateTime<Utc>, bps: f64) -> TcaSample {
        TcaSample {
            symbol: symbol.to_string(),
            side: Side::Buy,
            order_type,
            timestamp: ts,
            slippage_bps: bps,
            queue_time_ms: 0,
            reference_price: 100.0,
            fill_price: 100.0 + bps / 100.0,
            volume_24h: None,
            atr: None,
            spread: None,
        }
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let store = TcaSampleStore::new(3, Duration::days(7));
        for i in 0..5 {
            store.append(sample("BTCUSDT", OrderType::Market, at(10), i as f64), at(10));
        }
        let kept: Vec<f64> = store.samples("BTCUSDT").iter().map(|s| s.slippage_bps).collect();
        assert_eq!(kept, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_retention_on_append_and_prune() {
        let store = TcaSampleStore::new(100, Duration::days(7));
        store.append(sample("BTCUSDT", OrderType::Market, at(1), 1.0), at(1));
        store.append(sample("ETHUSDT", OrderType::Market, at(1), 1.0), at(1));

        let later = at(1) + Duration::days(8);
        assert_eq!(
            store.append(sample("BTCUSDT", OrderType::Market, later, 2.0), later),
            1
        );
        assert_eq!(store.len("BTCUSDT"), 1);
        assert_eq!(store.prune_expired(later), 1);
        assert_eq!(store.len("ETHUSDT"), 0);
    }

    #[test]
    fn test_averages() {
        let store = TcaSampleStore::new(100, Duration::days(7));
        store.append(sample("BTCUSDT", OrderType::Market, at(9), 10.0), at(9));
        store.append(sample("btcusdt", OrderType::Market, at(9), 12.0), at(9));
        store.append(sample("BTCUSDT", OrderType::Limit, at(9), 1.0), at(9));
        store.append(sample("BTCUSDT", OrderType::Market, at(15), 2.0), at(15));

        assert!((store.hourly_average("BTCUSDT", OrderType::Market, 9) - 11.0).abs() < 1e-12);
        assert!((store.average("BtcUsdt") - 6.25).abs() < 1e-12);
        assert!(store.hourly_average("BTCUSDT", OrderType::Limit, 15).is_nan());
        assert!(store.average("SOLUSDT").is_nan());
    }
}
