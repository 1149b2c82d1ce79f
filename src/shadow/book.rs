//! Shadow position book
//!
//! Capital-free positions mirroring live signals, grouped per symbol. Each
//! symbol's positions sit behind one lock so a price tick closes them as a
//! single step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::keyed::KeyedLocks;
use crate::types::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ShadowPositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowPosition {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub status: ShadowPositionStatus,
    pub exit_price: Option<f64>,
    pub realized_pnl: Option<f64>,
    pub trades: u32,
}

impl ShadowPosition {
    pub fn open(
        symbol: impl Into<String>,
        side: Side,
        entry_price: f64,
        quantity: f64,
        stop_loss: f64,
        take_profit: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            side,
            entry_price,
            quantity,
            stop_loss,
            take_profit,
            opened_at: now,
            closed_at: None,
            status: ShadowPositionStatus::Open,
            exit_price: None,
            realized_pnl: None,
            trades: 0,
        }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == ShadowPositionStatus::Open
    }

    /// Stop or target crossed at `price`
    pub fn exit_triggered(&self, price: f64) -> bool {
        match self.side {
            Side::Buy => price <= self.stop_loss || price >= self.take_profit,
            Side::Sell => price >= self.stop_loss || price <= self.take_profit,
        }
    }

    /// OPEN -> CLOSED at `price`; returns realized pnl, or `None` if already closed
    pub fn close(&mut self, price: f64, now: DateTime<Utc>) -> Option<f64> {
        if !self.is_open() {
            return None;
        }
        let pnl = (price - self.entry_price) * self.quantity * self.side.sign();
        self.exit_price = Some(price);
        self.closed_at = Some(now);
        self.status = ShadowPositionStatus::Closed;
        self.realized_pnl = Some(pnl);
        self.trades += 1;
        Some(pnl)
    }
}

#[derive(Debug, Default)]
pub struct ShadowPositionBook {
    positions: KeyedLocks<String, Vec<ShadowPosition>>,
}

impl ShadowPositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, position: ShadowPosition) {
        self.positions
            .with(&position.symbol.clone(), Vec::new, |list| list.push(position));
    }

    /// Rehydrate a persisted position, replacing any with the same id.
    /// Returns the replaced position.
    pub fn restore(&self, position: ShadowPosition) -> Option<ShadowPosition> {
        self.positions.with(&position.symbol.clone(), Vec::new, |list| {
            let replaced = list
                .iter()
                .position(|p| p.id == position.id)
                .map(|idx| list.remove(idx));
            list.push(position);
            replaced
        })
    }

    /// Close every open position on `symbol` whose stop or target `price` crosses
    pub fn close_triggered(
        &self,
        symbol: &str,
        price: f64,
        now: DateTime<Utc>,
    ) -> Vec<ShadowPosition> {
        let Some(slot) = self.positions.get(&symbol.to_string()) else {
            return Vec::new();
        };
        let mut list = slot.lock();
        let mut closed = Vec::new();
        for position in list.iter_mut() {
            if position.exit_triggered(price) && position.close(price, now).is_some() {
                closed.push(position.clone());
            }
        }
        closed
    }

    pub fn positions(&self, symbol: &str) -> Vec<ShadowPosition> {
        self.positions
            .get(&symbol.to_string())
            .map(|slot| slot.lock().clone())
            .unwrap_or_default()
    }

    pub fn open_count(&self, symbol: &str) -> usize {
        self.count(symbol, ShadowPositionStatus::Open)
    }

    pub fn closed_count(&self, symbol: &str) -> usize {
        self.count(symbol, ShadowPositionStatus::Closed)
    }

    fn count(&self, symbol: &str, status: ShadowPositionStatus) -> usize {
        self.positions
            .get(&symbol.to_string())
            .map(|slot| slot.lock().iter().filter(|p| p.status == status).count())
            .unwrap_or(0)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.positions.entries().into_iter().map(|(s, _)| s).collect()
    }

    /// Drop closed positions that closed before `cutoff`
    pub fn prune_closed_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for (_, slot) in self.positions.entries() {
            let mut list = slot.lock();
            let before = list.len();
            list.retain(|p| p.is_open() || p.closed_at.map_or(true, |t| t >= cutoff));
            removed += before - list.len();
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_buy_closes_on_stop_and_target() {
        let book = ShadowPositionBook::new();
        book.insert(ShadowPosition::open("BTCUSDT", Side::Buy, 100.0, 2.0, 95.0, 110.0, now()));
        book.insert(ShadowPosition::open("BTCUSDT", Side::Buy, 100.0, 1.0, 90.0, 104.0, now()));

        assert!(book.close_triggered("BTCUSDT", 103.0, now()).is_empty());

        let closed = book.close_triggered("BTCUSDT", 105.0, now());
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].realized_pnl, Some(5.0));
        assert_eq!(closed[0].trades, 1);

        let closed = book.close_triggered("BTCUSDT", 94.0, now());
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].realized_pnl, Some(-12.0));
        assert_eq!(book.closed_count("BTCUSDT"), 2);
        assert_eq!(book.open_count("BTCUSDT"), 0);
    }

    #[test]
    fn test_sell_pnl_is_sign_flipped() {
        let book = ShadowPositionBook::new();
        book.insert(ShadowPosition::open("ETHUSDT", Side::Sell, 100.0, 3.0, 105.0, 90.0, now()));
        assert!(book.close_triggered("ETHUSDT", 99.0, now()).is_empty());

        let closed = book.close_triggered("ETHUSDT", 89.0, now());
        assert_eq!(closed[0].realized_pnl, Some(33.0));
        assert_eq!(closed[0].exit_price, Some(89.0));
        assert_eq!(closed[0].status, ShadowPositionStatus::Closed);
    }

    #[test]
    fn test_close_happens_once() {
        let mut pos = ShadowPosition::open("ETHUSDT", Side::Buy, 10.0, 1.0, 9.0, 11.0, now());
        assert_eq!(pos.close(12.0, now()), Some(2.0));
        assert_eq!(pos.close(8.0, now()), None);
        assert_eq!(pos.realized_pnl, Some(2.0));
    }

    #[test]
    fn test_prune_keeps_open_and_recent() {
        let book = ShadowPositionBook::new();
        book.insert(ShadowPosition::open("BTCUSDT", Side::Buy, 100.0, 1.0, 95.0, 105.0, now()));
        book.insert(ShadowPosition::open("BTCUSDT", Side::Buy, 100.0, 1.0, 50.0, 500.0, now()));
        book.close_triggered("BTCUSDT", 106.0, now());

        assert_eq!(book.prune_closed_before(now()), 0);
        assert_eq!(book.prune_closed_before(now() + Duration::days(1)), 1);
        assert_eq!(book.positions("BTCUSDT").len(), 1);
        assert_eq!(book.open_count("BTCUSDT"), 1);
    }
}
