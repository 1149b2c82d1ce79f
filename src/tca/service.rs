//! Transaction Cost Analysis
//!
//! Turns submission/fill pairs into slippage samples, predicts the cost of
//! the next order from samples in the same UTC hour, and routes between
//! MARKET and LIMIT on that prediction.

use chrono::{DateTime, Duration, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use super::store::{symbol_key, TcaSample, TcaSampleStore};
use crate::clock::Clock;
use crate::config::TcaConfig;
use crate::telemetry;
use crate::types::{finite, OrderType, Side};

/// At or above this expected cost a MARKET order is switched to LIMIT
pub const MARKET_TO_LIMIT_BPS: f64 = 8.0;
/// Below this expected cost a LIMIT order is switched to MARKET
pub const LIMIT_TO_MARKET_BPS: f64 = 4.0;

/// Order as submitted, awaiting its fill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSubmission {
    pub order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub reference_price: Option<f64>,
    pub volume_24h: Option<f64>,
    pub atr: Option<f64>,
    /// Defaults to the clock when absent
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct PendingOrder {
    symbol: String,
    side: Side,
    order_type: OrderType,
    reference_price: Option<f64>,
    volume_24h: Option<f64>,
    atr: Option<f64>,
    submitted_at: DateTime<Utc>,
}

/// Sample statistics over an optional symbol and time range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcaAggregate {
    pub sample_count: usize,
    /// NaN when no samples matched
    pub average_bps: f64,
    /// NaN when no samples matched
    pub average_queue_ms: f64,
    /// UTC hour of day -> mean slippage
    pub hourly_average_bps: BTreeMap<u32, f64>,
}

pub struct TcaService {
    config: TcaConfig,
    store: TcaSampleStore,
    pending: Mutex<HashMap<String, PendingOrder>>,
    clock: Arc<dyn Clock>,
}

impl TcaService {
    pub fn new(config: TcaConfig, clock: Arc<dyn Clock>) -> Self {
        let store = TcaSampleStore::new(config.history_size, Duration::days(config.retention_days));
        Self {
            config,
            store,
            pending: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn store(&self) -> &TcaSampleStore {
        &self.store
    }

    /// Remember a submitted order; ignored when disabled or without an id
    pub fn record_submission(&self, submission: OrderSubmission) {
        if !self.config.enabled {
            return;
        }
        let Some(order_id) = submission.order_id else {
            return;
        };
        let pending = PendingOrder {
            symbol: submission.symbol,
            side: submission.side,
            order_type: submission.order_type,
            reference_price: submission.reference_price.and_then(finite),
            volume_24h: submission.volume_24h.and_then(finite),
            atr: submission.atr.and_then(finite),
            submitted_at: submission.timestamp.unwrap_or_else(|| self.clock.now()),
        };
        self.pending.lock().insert(order_id, pending);
    }

    /// Match a fill to its submission and store the resulting sample.
    ///
    /// Returns `None` (and stores nothing) for unknown orders, non-finite fill
    /// prices and submissions without a usable reference price. A non-finite
    /// fill leaves the submission pending for the next fill.
    pub fn record_fill(
        &self,
        order_id: &str,
        fill_price: f64,
        spread: Option<f64>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Option<TcaSample> {
        if !self.config.enabled {
            return None;
        }
        let Some(fill_price) = finite(fill_price) else {
            debug!("Ignoring non-finite fill for order {}", order_id);
            return None;
        };
        let pending = self.pending.lock().remove(order_id)?;
        let Some(reference_price) = pending.reference_price.filter(|p| *p > 0.0) else {
            debug!("No reference price for order {}, skipping TCA sample", order_id);
            return None;
        };

        let filled_at = timestamp.unwrap_or_else(|| self.clock.now());
        let diff = match pending.side {
            Side::Buy => fill_price - reference_price,
            Side::Sell => reference_price - fill_price,
        };
        let sample = TcaSample {
            symbol: pending.symbol,
            side: pending.side,
            order_type: pending.order_type,
            timestamp: filled_at,
            slippage_bps: diff / reference_price * 10_000.0,
            queue_time_ms: (filled_at - pending.submitted_at).num_milliseconds(),
            reference_price,
            fill_price,
            volume_24h: pending.volume_24h,
            atr: pending.atr,
            spread: spread.and_then(finite),
        };
        self.append(sample.clone());
        Some(sample)
    }

    fn append(&self, sample: TcaSample) {
        let symbol = symbol_key(&sample.symbol);
        let order_type = sample.order_type;
        let evicted = self.store.append(sample, self.clock.now());
        if evicted > 0 {
            debug!("Evicted {} TCA samples for {}", evicted, symbol);
        }

        metrics::counter!(
            telemetry::TCA_SAMPLES,
            1,
            "symbol" => symbol.clone(),
            "type" => order_type.to_string()
        );
        let average = self.store.average(&symbol);
        if average.is_finite() {
            metrics::gauge!(telemetry::TCA_SLIPPAGE_AVG_BPS, average, "symbol" => symbol);
        }
    }

    /// Expected slippage for an order placed at `at`.
    ///
    /// Mean over samples with the same symbol, order type and UTC hour; falls
    /// back to the symbol's mean over all samples; NaN without any samples.
    pub fn expected_slippage_bps(&self, symbol: &str, order_type: OrderType, at: DateTime<Utc>) -> f64 {
        if !self.config.enabled {
            return f64::NAN;
        }
        let hourly = self.store.hourly_average(symbol, order_type, at.hour());
        if !hourly.is_nan() {
            return hourly;
        }
        self.store.average(symbol)
    }

    pub fn recommend_order_type(&self, symbol: &str, baseline: OrderType, now: DateTime<Utc>) -> OrderType {
        let expected = self.expected_slippage_bps(symbol, baseline, now);
        if expected.is_nan() {
            return baseline;
        }
        let recommended = match baseline {
            OrderType::Market if expected >= MARKET_TO_LIMIT_BPS => OrderType::Limit,
            OrderType::Limit if expected < LIMIT_TO_MARKET_BPS => OrderType::Market,
            other => other,
        };
        if recommended != baseline {
            info!(
                "TCA routing {} {} -> {} (expected {:.2} bps)",
                symbol, baseline, recommended, expected
            );
        }
        recommended
    }

    /// Statistics over samples matching the optional symbol and inclusive time range
    pub fn aggregate(
        &self,
        symbol: Option<&str>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> TcaAggregate {
        let samples = match symbol {
            Some(symbol) => self.store.samples(symbol),
            None => self.store.all(),
        };
        let filtered: Vec<&TcaSample> = samples
            .iter()
            .filter(|s| from.map_or(true, |from| s.timestamp >= from))
            .filter(|s| to.map_or(true, |to| s.timestamp <= to))
            .collect();

        let mut by_hour: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
        for sample in &filtered {
            let bucket = by_hour.entry(sample.hour()).or_insert((0.0, 0));
            bucket.0 += sample.slippage_bps;
            bucket.1 += 1;
        }

        TcaAggregate {
            sample_count: filtered.len(),
            // NaN on empty input
            average_bps: filtered.iter().map(|s| s.slippage_bps).mean(),
            average_queue_ms: filtered.iter().map(|s| s.queue_time_ms as f64).mean(),
            hourly_average_bps: by_hour
                .into_iter()
                .map(|(hour, (sum, n))| (hour, sum / n as f64))
                .collect(),
        }
    }

    pub fn pending_orders(&self) -> usize {
        self.pending.lock().len()
    }

    /// Evict expired samples and submissions that never filled
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let samples = self.store.prune_expired(now);

        let cutoff = now - Duration::minutes(self.config.pending_ttl_minutes);
        let stale = {
            let mut pending = self.pending.lock();
            let before = pending.len();
            pending.retain(|_, order| order.submitted_at >= cutoff);
            before - pending.len()
        };
        if samples + stale > 0 {
            debug!(
                "Pruned {} TCA samples and {} stale pending orders",
                samples, stale
            );
        }
        samples + stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 7, 13, 5, 0).unwrap()
    }

    fn service() -> (TcaService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0()));
        (TcaService::new(TcaConfig::default(), clock.clone()), clock)
    }

    fn submit(svc: &TcaService, id: &str, symbol: &str, side: Side, order_type: OrderType, reference: f64) {
        svc.record_submission(OrderSubmission {
            order_id: Some(id.to_string()),
            symbol: symbol.to_string(),
            side,
            order_type,
            reference_price: Some(reference),
            volume_24h: Some(1.0e9),
            atr: Some(1.5),
            timestamp: Some(t0()),
        });
    }

    #[test]
    fn test_buy_slippage_positive() {
        let (svc, _) = service();
        submit(&svc, "o-1", "BTCUSDT", Side::Buy, OrderType::Market, 100.0);
        let sample = svc
            .record_fill("o-1", 100.2, Some(0.01), Some(t0() + Duration::milliseconds(250)))
            .unwrap();
        assert!(sample.slippage_bps > 0.0);
        assert!((sample.slippage_bps - 20.0).abs() < 1e-6);
        assert_eq!(sample.queue_time_ms, 250);
        assert_eq!(svc.pending_orders(), 0);
    }

    #[test]
    fn test_sell_slippage_sign() {
        let (svc, _) = service();
        submit(&svc, "o-2", "BTCUSDT", Side::Sell, OrderType::Market, 100.0);
        let sample = svc.record_fill("o-2", 99.9, None, None).unwrap();
        assert!((sample.slippage_bps - 10.0).abs() < 1e-6);

        submit(&svc, "o-3", "BTCUSDT", Side::Sell, OrderType::Market, 100.0);
        let sample = svc.record_fill("o-3", 100.1, None, None).unwrap();
        assert!(sample.slippage_bps < 0.0);
    }

    #[test]
    fn test_unusable_fills_are_dropped() {
        let (svc, _) = service();
        assert!(svc.record_fill("unknown", 100.0, None, None).is_none());

        submit(&svc, "o-4", "BTCUSDT", Side::Buy, OrderType::Market, 0.0);
        assert!(svc.record_fill("o-4", 100.0, None, None).is_none());

        submit(&svc, "o-5", "BTCUSDT", Side::Buy, OrderType::Market, 100.0);
        assert!(svc.record_fill("o-5", f64::NAN, None, None).is_none());
        assert!(svc.record_fill("o-5", f64::INFINITY, None, None).is_none());
        assert!(svc.store().is_empty());
        assert_eq!(svc.pending_orders(), 1);

        // the real fill still matches its submission
        let sample = svc.record_fill("o-5", 100.2, None, None).unwrap();
        assert!((sample.slippage_bps - 20.0).abs() < 1e-9);
        assert_eq!(svc.store().len("BTCUSDT"), 1);

        svc.record_submission(OrderSubmission {
            order_id: None,
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            order_type: OrderType::Market,
            reference_price: Some(100.0),
            volume_24h: None,
            atr: None,
            timestamp: None,
        });
        assert_eq!(svc.pending_orders(), 0);
    }

    #[test]
    fn test_expected_slippage_hour_then_symbol_fallback() {
        let (svc, _) = service();
        submit(&svc, "a", "BTCUSDT", Side::Buy, OrderType::Market, 100.0);
        svc.record_fill("a", 100.1, None, Some(t0())).unwrap();
        submit(&svc, "b", "BTCUSDT", Side::Buy, OrderType::Market, 100.0);
        svc.record_fill("b", 100.3, None, Some(t0() + Duration::hours(3))).unwrap();

        let at_13 = svc.expected_slippage_bps("BTCUSDT", OrderType::Market, t0());
        assert!((at_13 - 10.0).abs() < 1e-6);
        // no LIMIT samples: symbol-wide mean
        let limit = svc.expected_slippage_bps("BTCUSDT", OrderType::Limit, t0());
        assert!((limit - 20.0).abs() < 1e-6);
        assert!(svc.expected_slippage_bps("ETHUSDT", OrderType::Market, t0()).is_nan());
    }

    #[test]
    fn test_routing_thresholds() {
        let (svc, _) = service();
        submit(&svc, "x", "BTCUSDT", Side::Buy, OrderType::Market, 100.0);
        svc.record_fill("x", 100.12, None, Some(t0())).unwrap();
        assert_eq!(
            svc.recommend_order_type("BTCUSDT", OrderType::Market, t0()),
            OrderType::Limit
        );

        submit(&svc, "y", "ETHUSDT", Side::Buy, OrderType::Limit, 100.0);
        svc.record_fill("y", 100.01, None, Some(t0())).unwrap();
        assert_eq!(
            svc.recommend_order_type("ETHUSDT", OrderType::Limit, t0()),
            OrderType::Market
        );
        // mid-band keeps the baseline
        submit(&svc, "z", "SOLUSDT", Side::Buy, OrderType::Market, 100.0);
        svc.record_fill("z", 100.05, None, Some(t0())).unwrap();
        assert_eq!(
            svc.recommend_order_type("SOLUSDT", OrderType::Market, t0()),
            OrderType::Market
        );
        assert_eq!(
            svc.recommend_order_type("XRPUSDT", OrderType::Limit, t0()),
            OrderType::Limit
        );
    }

    #[test]
    fn test_aggregate() {
        let (svc, _) = service();
        submit(&svc, "a", "BTCUSDT", Side::Buy, OrderType::Market, 100.0);
        svc.record_fill("a", 100.1, None, Some(t0() + Duration::seconds(1))).unwrap();
        submit(&svc, "b", "ETHUSDT", Side::Buy, OrderType::Market, 100.0);
        svc.record_fill("b", 100.3, None, Some(t0() + Duration::hours(2))).unwrap();

        let all = svc.aggregate(None, None, None);
        assert_eq!(all.sample_count, 2);
        assert!((all.average_bps - 20.0).abs() < 1e-6);
        assert_eq!(all.hourly_average_bps.len(), 2);
        assert!(all.hourly_average_bps.contains_key(&13));
        assert!(all.hourly_average_bps.contains_key(&15));

        let btc = svc.aggregate(Some("BTCUSDT"), None, Some(t0() + Duration::hours(1)));
        assert_eq!(btc.sample_count, 1);
        assert!((btc.average_queue_ms - 1000.0).abs() < 1e-9);

        let none = svc.aggregate(Some("BTCUSDT"), Some(t0() + Duration::hours(1)), None);
        assert_eq!(none.sample_count, 0);
        assert!(none.average_bps.is_nan());
    }

    #[test]
    fn test_prune_expired() {
        let (svc, clock) = service();
        submit(&svc, "filled", "BTCUSDT", Side::Buy, OrderType::Market, 100.0);
        svc.record_fill("filled", 100.1, None, Some(t0())).unwrap();
        submit(&svc, "never", "BTCUSDT", Side::Buy, OrderType::Market, 100.0);

        clock.advance(Duration::days(8));
        assert_eq!(svc.prune_expired(clock.now()), 2);
        assert!(svc.store().is_empty());
        assert_eq!(svc.pending_orders(), 0);
    }
}
