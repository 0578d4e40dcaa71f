//! Risk Engine (C6): position sizing, stop/target derivation, drawdown halt
//! and the liquidation guard, composed behind one facade the orchestrator
//! calls once per candidate trade.

pub mod portfolio;
pub mod sizing;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::types::{Symbol, Trend};
use portfolio::{liquidation_guard, OpenPosition, Portfolio};

#[derive(Debug, Clone)]
pub struct SizedOrder {
    pub symbol: Symbol,
    pub size_pct: f64,
    pub notional: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

pub struct RiskEngine {
    portfolio: RwLock<Portfolio>,
    max_position_risk: f64,
    max_drawdown: f64,
}

impl RiskEngine {
    pub fn new(starting_equity: f64, config: &Config) -> Self {
        let equity = Decimal::from_f64(starting_equity).unwrap_or(Decimal::ZERO);
        Self {
            portfolio: RwLock::new(Portfolio::new(equity, config.max_drawdown, config.max_daily_loss_pct)),
            max_position_risk: config.max_position_risk,
            max_drawdown: config.max_drawdown,
        }
    }

    pub async fn mark_equity(&self, equity: f64) {
        let equity = Decimal::from_f64(equity).unwrap_or(Decimal::ZERO);
        self.portfolio.write().await.mark_equity(equity);
    }

    /// Aggregate daily-loss breaker: feeds a closed trade's dollar PnL into
    /// the portfolio-wide accumulator.
    pub async fn record_realized_pnl(&self, pnl: f64) {
        let pnl = Decimal::from_f64(pnl).unwrap_or(Decimal::ZERO);
        self.portfolio.write().await.record_realized_pnl(pnl);
    }

    /// Resets the aggregate daily-loss accumulator at the local-day boundary.
    pub async fn roll_day_boundary(&self) {
        self.portfolio.write().await.roll_day_boundary();
    }

    pub async fn resume(&self) {
        self.portfolio.write().await.resume();
    }

    pub async fn is_halted(&self) -> bool {
        self.portfolio.read().await.is_halted()
    }

    pub async fn drawdown(&self) -> f64 {
        self.portfolio.read().await.drawdown()
    }

    pub async fn equity(&self) -> f64 {
        self.portfolio.read().await.equity().to_f64().unwrap_or(0.0)
    }

    /// Sizes a candidate trade against current equity, volatility and
    /// drawdown, applies the regime bias, and derives stop/target. Returns
    /// `None` if the portfolio is halted. `confidence` is the consensus
    /// engine's winning-vote confidence, not a win probability; it's mapped
    /// onto `p_win` via `sizing::confidence_to_p_win` before Kelly sizing.
    #[allow(clippy::too_many_arguments)]
    pub async fn size_trade(
        &self,
        symbol: &Symbol,
        entry: f64,
        atr_pct: f64,
        confidence: f64,
        rr: f64,
        leverage: f64,
        long: bool,
        preferred_regimes: &[Trend],
        current_trend: Trend,
    ) -> Option<SizedOrder> {
        if self.is_halted().await {
            return None;
        }
        let drawdown = self.drawdown().await;
        let equity = self.equity().await;

        let p_win = sizing::confidence_to_p_win(confidence);
        let base_size = sizing::size_pct(p_win, rr, atr_pct, drawdown, self.max_drawdown, self.max_position_risk);
        let size_pct = sizing::apply_regime_bias(base_size, preferred_regimes, current_trend).min(self.max_position_risk);
        let notional = sizing::notional(equity, size_pct, leverage);
        let stop_loss = sizing::stop_loss_price(entry, atr_pct, long);
        let take_profit = sizing::take_profit_price(entry, stop_loss, long);

        Some(SizedOrder { symbol: symbol.clone(), size_pct, notional, stop_loss, take_profit })
    }

    pub async fn check_liquidation(&self, margin_balance: f64, positions: &[OpenPosition]) -> Vec<Symbol> {
        let margin_balance = Decimal::from_f64(margin_balance).unwrap_or(Decimal::ZERO);
        liquidation_guard(margin_balance, positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn halted_portfolio_refuses_to_size() {
        let cfg = Config { max_drawdown: 0.1, ..Config::default() };
        let engine = RiskEngine::new(1000.0, &cfg);
        engine.mark_equity(850.0).await;
        assert!(engine.is_halted().await);
        let sized = engine
            .size_trade("BTCUSDT", 100.0, 1.0, 0.6, 2.0, 5.0, true, &[], Trend::Bullish)
            .await;
        assert!(sized.is_none());
    }

    #[tokio::test]
    async fn healthy_portfolio_sizes_a_trade() {
        let cfg = Config::default();
        let engine = RiskEngine::new(1000.0, &cfg);
        let sized = engine
            .size_trade("BTCUSDT", 100.0, 1.0, 0.6, 2.0, 5.0, true, &[], Trend::Bullish)
            .await
            .unwrap();
        assert!(sized.notional > 0.0);
        assert!(sized.take_profit > sized.stop_loss);
    }
}
