//! Shared data-model types used across every component (data model spec).
//!
//! Kept deliberately free of behavior; components own the logic that acts on
//! these types. `Symbol` stays a plain `String` newtype rather than an
//! interned id — the source system and the teacher both pass symbols around
//! as plain strings, and the crate's symbol universe is small enough (tens,
//! not millions) that interning would be premature.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque symbol identifier, e.g. `BTCUSDT`, `MON-USDC`.
pub type Symbol = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl Signal {
    pub fn opposite(self) -> Signal {
        match self {
            Signal::Buy => Signal::Sell,
            Signal::Sell => Signal::Buy,
            Signal::Hold => Signal::Hold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl From<Signal> for Option<PositionSide> {
    fn from(s: Signal) -> Self {
        match s {
            Signal::Buy => Some(PositionSide::Long),
            Signal::Sell => Some(PositionSide::Short),
            Signal::Hold => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WyckoffPhase {
    Accumulation,
    Markup,
    Distribution,
    Markdown,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityState {
    Low,
    High,
}

/// A single OHLCV candle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Venue-reported instrument metadata; established once at startup and
/// refreshable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketStructureEntry {
    pub quantity_precision: i32,
    pub price_precision: i32,
    pub min_qty: f64,
    pub step_size: f64,
    pub min_notional: f64,
    pub refreshed_at: DateTime<Utc>,
}

impl MarketStructureEntry {
    /// Round `qty` down to `step_size` and check it satisfies the venue's
    /// minimums. Returns `None` if the order must be rejected pre-flight.
    pub fn validate_order(&self, qty: f64, price: f64) -> Option<f64> {
        if self.step_size <= 0.0 {
            return None;
        }
        let steps = (qty / self.step_size).floor();
        let rounded = steps * self.step_size;
        if rounded < self.min_qty {
            return None;
        }
        if rounded * price < self.min_notional {
            return None;
        }
        Some(rounded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_order_rejects_below_min_notional() {
        let entry = MarketStructureEntry {
            quantity_precision: 3,
            price_precision: 2,
            min_qty: 0.001,
            step_size: 0.001,
            min_notional: 5.0,
            refreshed_at: Utc::now(),
        };
        assert!(entry.validate_order(0.0001, 50_000.0).is_none());
        assert!(entry.validate_order(0.001, 1.0).is_none());
        assert_eq!(entry.validate_order(0.0015, 50_000.0), Some(0.001));
    }
}
