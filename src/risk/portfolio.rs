//! Portfolio-level risk state (C6): equity ledger, drawdown halt latch, and
//! the liquidation guard.
//!
//! Grounded on `src/capital/manager.rs`'s `Arc<RwLock<Decimal>>` ledger
//! pattern, generalized from the teacher's fixed 12.00 USDT constraint to a
//! variable-equity account that tracks its own running peak.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::warn;

use crate::types::Symbol;

#[derive(Debug, Clone)]
pub struct OpenPosition {
    pub symbol: Symbol,
    pub notional: Decimal,
    pub maintenance_margin: Decimal,
}

/// Tracks equity, running peak, the drawdown halt latch, and the aggregate
/// (portfolio-wide) daily-loss circuit breaker. Once either latch is halted,
/// only `resume` (an explicit operator/CIO action) clears it; equity
/// recovering on its own does not.
pub struct Portfolio {
    equity: Decimal,
    peak: Decimal,
    max_drawdown: f64,
    is_halted: bool,
    max_daily_loss_pct: f64,
    day_start_equity: Decimal,
    daily_realized_pnl: Decimal,
    daily_loss_halted: bool,
}

impl Portfolio {
    pub fn new(starting_equity: Decimal, max_drawdown: f64, max_daily_loss_pct: f64) -> Self {
        Self {
            equity: starting_equity,
            peak: starting_equity,
            max_drawdown,
            is_halted: false,
            max_daily_loss_pct,
            day_start_equity: starting_equity,
            daily_realized_pnl: Decimal::ZERO,
            daily_loss_halted: false,
        }
    }

    pub fn equity(&self) -> Decimal {
        self.equity
    }

    pub fn is_halted(&self) -> bool {
        self.is_halted || self.daily_loss_halted
    }

    pub fn drawdown(&self) -> f64 {
        if self.peak <= Decimal::ZERO {
            return 0.0;
        }
        ((self.peak - self.equity) / self.peak).to_f64().unwrap_or(0.0).max(0.0)
    }

    /// Updates equity, advances the peak, and latches the halt if drawdown
    /// now exceeds the configured maximum. The latch only ever turns on
    /// here; clearing it is `resume`'s job.
    pub fn mark_equity(&mut self, equity: Decimal) {
        self.equity = equity;
        if self.equity > self.peak {
            self.peak = self.equity;
        }
        if self.drawdown() >= self.max_drawdown && !self.is_halted {
            warn!(drawdown = self.drawdown(), max_drawdown = self.max_drawdown, "portfolio drawdown halt latched");
            self.is_halted = true;
        }
    }

    /// Aggregate daily-loss circuit breaker: accumulates realized PnL
    /// (dollars) against the equity recorded at the last day-boundary roll,
    /// latching a halt once the loss exceeds `max_daily_loss_pct` of it.
    pub fn record_realized_pnl(&mut self, pnl: Decimal) {
        self.daily_realized_pnl += pnl;
        let threshold = self.day_start_equity * Decimal::from_f64_retain(self.max_daily_loss_pct).unwrap_or_default();
        if self.daily_realized_pnl < -threshold && !self.daily_loss_halted {
            warn!(daily_realized_pnl = %self.daily_realized_pnl, threshold = %threshold, "aggregate daily-loss halt latched");
            self.daily_loss_halted = true;
        }
    }

    /// Resets the daily-loss accumulator and halt at the local-day boundary.
    pub fn roll_day_boundary(&mut self) {
        self.day_start_equity = self.equity;
        self.daily_realized_pnl = Decimal::ZERO;
        self.daily_loss_halted = false;
    }

    pub fn resume(&mut self) {
        self.is_halted = false;
        self.daily_loss_halted = false;
    }
}

/// Liquidation guard: when maintenance margin exceeds 80% of margin balance,
/// the two largest-notional positions must be closed immediately. Returns
/// the symbols to close, largest first.
pub fn liquidation_guard(margin_balance: Decimal, positions: &[OpenPosition]) -> Vec<Symbol> {
    if margin_balance <= Decimal::ZERO {
        return positions.iter().map(|p| p.symbol.clone()).collect();
    }
    let total_maintenance: Decimal = positions.iter().map(|p| p.maintenance_margin).sum();
    let ratio = total_maintenance / margin_balance;
    if ratio <= Decimal::new(8, 1) {
        return vec![];
    }

    let mut sorted: Vec<&OpenPosition> = positions.iter().collect();
    sorted.sort_by(|a, b| b.notional.cmp(&a.notional));
    sorted.into_iter().take(2).map(|p| p.symbol.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    /// S7: drawdown halt latches once crossed and does not self-clear.
    #[test]
    fn drawdown_halt_latches_and_persists() {
        let mut p = Portfolio::new(dec!(1000), 0.20, 0.05);
        p.mark_equity(dec!(950));
        assert!(!p.is_halted());
        p.mark_equity(dec!(790));
        assert!(p.is_halted());
        p.mark_equity(dec!(999));
        assert!(p.is_halted(), "halt must not self-clear on equity recovery");
        p.resume();
        assert!(!p.is_halted());
    }

    #[test]
    fn peak_only_advances() {
        let mut p = Portfolio::new(dec!(1000), 0.5, 0.05);
        p.mark_equity(dec!(1100));
        p.mark_equity(dec!(1050));
        assert_eq!(p.peak, dec!(1100));
    }

    /// Aggregate daily-loss breaker trips once realized losses exceed
    /// `max_daily_loss_pct` of the equity recorded at the day's start.
    #[test]
    fn aggregate_daily_loss_breaker_trips_and_persists() {
        let mut p = Portfolio::new(dec!(1000), 0.9, 0.05);
        p.record_realized_pnl(dec!(-30));
        assert!(!p.is_halted());
        p.record_realized_pnl(dec!(-25));
        assert!(p.is_halted());
        p.resume();
        assert!(!p.is_halted());
    }

    #[test]
    fn roll_day_boundary_resets_daily_loss_accumulator() {
        let mut p = Portfolio::new(dec!(1000), 0.9, 0.05);
        p.record_realized_pnl(dec!(-60));
        assert!(p.is_halted());
        p.roll_day_boundary();
        assert!(!p.is_halted());
    }

    #[test]
    fn liquidation_guard_closes_two_largest_when_breached() {
        let positions = vec![
            OpenPosition { symbol: "BTCUSDT".into(), notional: dec!(500), maintenance_margin: dec!(40) },
            OpenPosition { symbol: "ETHUSDT".into(), notional: dec!(300), maintenance_margin: dec!(30) },
            OpenPosition { symbol: "SOLUSDT".into(), notional: dec!(100), maintenance_margin: dec!(20) },
        ];
        let to_close = liquidation_guard(dec!(100), &positions);
        assert_eq!(to_close, vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
    }

    #[test]
    fn liquidation_guard_noop_when_healthy() {
        let positions = vec![OpenPosition { symbol: "BTCUSDT".into(), notional: dec!(500), maintenance_margin: dec!(10) }];
        let to_close = liquidation_guard(dec!(1000), &positions);
        assert!(to_close.is_empty());
    }
}
