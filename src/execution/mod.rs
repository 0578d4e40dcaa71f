//! Execution Layer (C7): turns a sized, risk-checked order intent into fills
//! against a venue, dispatching on the chosen algorithm.

pub mod adapters;
pub mod algorithms;
pub mod selector;
pub mod venue;

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ErrorCategory, ErrorTally, TradingError};
use crate::risk::RiskEngine;
use crate::types::{Side, Symbol};
use adapters::router::VenueRouter;
use selector::{AlgoClassifier, AlgoLabel, MarketState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algo {
    Market,
    Twap,
    Vwap,
    Iceberg,
    Sniper,
    Adaptive,
    Arbitrage,
}

#[derive(Debug, Clone)]
pub struct ExecutionOrder {
    pub symbol: Symbol,
    pub side: Side,
    pub total_quantity: f64,
    pub algo: Algo,
    pub venue_hint: Option<String>,
    pub reference_price: f64,
    /// Populated for ARBITRAGE orders: (leg2_symbol, leg2_side, leg2_qty, leg2_price).
    pub arbitrage_leg2: Option<(Symbol, Side, f64, f64)>,
    pub volume_profile: Option<[f64; 24]>,
    pub market_state: Option<MarketState>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub total_executed: f64,
    pub total_value: f64,
    pub avg_price: f64,
    pub algo_used: Algo,
    /// Venue order id of the fill's final slice, for the caller to attach a
    /// reduce-only TP/SL or reconcile against venue state.
    pub order_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl ExecutionResult {
    fn from_fill(requested: f64, fill: algorithms::Fill, algo_used: Algo) -> Self {
        let avg_price = if fill.executed > 0.0 { fill.value / fill.executed } else { 0.0 };
        let mut metadata = HashMap::new();
        if let Some(id) = &fill.order_id {
            metadata.insert("order_id".to_string(), id.clone());
        }
        Self {
            success: fill.executed >= 0.95 * requested,
            total_executed: fill.executed,
            total_value: fill.value,
            avg_price,
            algo_used,
            order_id: fill.order_id.clone(),
            metadata,
        }
    }
}

pub struct ExecutionLayer {
    router: VenueRouter,
    risk: std::sync::Arc<RiskEngine>,
    classifier: Option<std::sync::Arc<dyn AlgoClassifier>>,
    errors: tokio::sync::Mutex<ErrorTally>,
}

impl ExecutionLayer {
    pub fn new(router: VenueRouter, risk: std::sync::Arc<RiskEngine>, classifier: Option<std::sync::Arc<dyn AlgoClassifier>>) -> Self {
        Self { router, risk, classifier, errors: tokio::sync::Mutex::new(ErrorTally::new()) }
    }

    /// Count of tallied execution failures for a venue, for health reporting.
    pub async fn error_count(&self, venue: &str) -> u64 {
        self.errors.lock().await.count(ErrorCategory::Network, venue)
    }

    /// Risk pre-check, then dispatch to the chosen algorithm.
    pub async fn execute(&self, order: ExecutionOrder) -> ExecutionResult {
        if self.risk.is_halted().await {
            info!(symbol = %order.symbol, "execution refused: portfolio halted");
            let mut metadata = HashMap::new();
            metadata.insert("reason".to_string(), "halted".to_string());
            return ExecutionResult { success: false, total_executed: 0.0, total_value: 0.0, avg_price: 0.0, algo_used: order.algo, order_id: None, metadata };
        }

        let adapter = self.router.resolve(&order.symbol, order.venue_hint.as_deref());
        let venue_name = adapter.name().to_string();

        let result = self.dispatch(&order, adapter.as_ref()).await;
        if !result.success && result.metadata.get("reason").is_none() {
            let err = TradingError::Network { venue: venue_name.clone(), source: anyhow::anyhow!("fill threshold not reached") };
            self.errors.lock().await.record(&venue_name, &err);
        }
        result
    }

    async fn dispatch(&self, order: &ExecutionOrder, adapter: &dyn venue::VenueAdapter) -> ExecutionResult {
        let order = order.clone();
        match order.algo {
            Algo::Market => {
                let fill = algorithms::market(adapter, &order.symbol, order.side, order.total_quantity, false).await;
                ExecutionResult::from_fill(order.total_quantity, fill, Algo::Market)
            }
            Algo::Twap => {
                let fill = algorithms::twap(adapter, &order.symbol, order.side, order.total_quantity, Duration::from_secs(60), 5).await;
                ExecutionResult::from_fill(order.total_quantity, fill, Algo::Twap)
            }
            Algo::Vwap => {
                let weights = order.volume_profile.unwrap_or([1.0 / 24.0; 24]);
                let fill = algorithms::vwap(adapter, &order.symbol, order.side, order.total_quantity, &weights, Duration::from_secs(120)).await;
                ExecutionResult::from_fill(order.total_quantity, fill, Algo::Vwap)
            }
            Algo::Iceberg => {
                let fill = algorithms::iceberg(adapter, &order.symbol, order.side, order.total_quantity, 0.10).await;
                ExecutionResult::from_fill(order.total_quantity, fill, Algo::Iceberg)
            }
            Algo::Sniper => {
                let reference = order.reference_price;
                let fill = algorithms::sniper(
                    adapter,
                    &order.symbol,
                    order.side,
                    order.total_quantity,
                    reference,
                    0.002,
                    Duration::from_secs(30),
                    Duration::from_secs(2),
                    || reference,
                )
                .await;
                ExecutionResult::from_fill(order.total_quantity, fill, Algo::Sniper)
            }
            Algo::Adaptive => {
                let state = order.market_state.unwrap_or(MarketState {
                    urgency_score: 0.5,
                    order_size_pct: 0.02,
                    volatility: 0.02,
                    spread_pct: 0.001,
                    volume_roll_avg: 0.0,
                });
                let label = selector::select(self.classifier.as_deref(), &state);
                let sub_algo = match label {
                    AlgoLabel::Twap => Algo::Twap,
                    AlgoLabel::Vwap => Algo::Vwap,
                    AlgoLabel::Iceberg => Algo::Iceberg,
                    AlgoLabel::Sniper => Algo::Sniper,
                    AlgoLabel::Market => Algo::Market,
                };
                let mut sub_order = order.clone();
                sub_order.algo = sub_algo;
                let mut result = Box::pin(self.execute(sub_order)).await;
                result.metadata.insert("adaptive_label".to_string(), format!("{label:?}"));
                result
            }
            Algo::Arbitrage => {
                let Some((leg2_symbol, leg2_side, leg2_qty, leg2_price)) = order.arbitrage_leg2.clone() else {
                    let mut metadata = HashMap::new();
                    metadata.insert("reason".to_string(), "missing arbitrage leg2".to_string());
                    return ExecutionResult { success: false, total_executed: 0.0, total_value: 0.0, avg_price: 0.0, algo_used: Algo::Arbitrage, order_id: None, metadata };
                };
                match algorithms::arbitrage(
                    adapter,
                    &order.symbol,
                    order.side,
                    order.total_quantity,
                    order.reference_price,
                    &leg2_symbol,
                    leg2_side,
                    leg2_qty,
                    leg2_price,
                    0.005,
                )
                .await
                {
                    Some((fill1, fill2)) => {
                        let combined = algorithms::Fill {
                            executed: fill1.executed + fill2.executed,
                            value: fill1.value + fill2.value,
                            order_id: fill2.order_id.or(fill1.order_id),
                        };
                        ExecutionResult::from_fill(order.total_quantity + leg2_qty, combined, Algo::Arbitrage)
                    }
                    None => {
                        let mut metadata = HashMap::new();
                        metadata.insert("reason".to_string(), "spread below min_profit_pct".to_string());
                        ExecutionResult { success: false, total_executed: 0.0, total_value: 0.0, avg_price: 0.0, algo_used: Algo::Arbitrage, order_id: None, metadata }
                    }
                }
            }
        }
    }

    /// Places reduce-only native stop-loss and take-profit orders against the
    /// same venue the entry resolved to, returning their order ids. A venue
    /// rejecting one leg does not roll back the other; the caller decides
    /// whether a missing protective order id warrants closing the position
    /// outright.
    pub async fn place_protective_orders(
        &self,
        symbol: &Symbol,
        closing_side: Side,
        quantity: f64,
        stop_loss: f64,
        take_profit: f64,
        venue_hint: Option<&str>,
    ) -> (Option<String>, Option<String>) {
        let adapter = self.router.resolve(symbol, venue_hint);

        let sl_id = match adapter.execute_trade(symbol, closing_side, OrderType::StopMarket, quantity, Some(stop_loss), true).await {
            Ok(r) => r.order_id,
            Err(e) => {
                warn!(symbol, error = %e, "stop-loss order placement failed");
                None
            }
        };
        let tp_id = match adapter.execute_trade(symbol, closing_side, OrderType::TakeProfitMarket, quantity, Some(take_profit), true).await {
            Ok(r) => r.order_id,
            Err(e) => {
                warn!(symbol, error = %e, "take-profit order placement failed");
                None
            }
        };

        (tp_id, sl_id)
    }

    /// Best-effort venue position query for reconciliation; see
    /// `VenueAdapter::get_open_position` for the tri-state contract.
    pub async fn query_position(&self, symbol: &Symbol, venue_hint: Option<&str>) -> anyhow::Result<Option<(crate::types::PositionSide, f64, f64)>> {
        let adapter = self.router.resolve(symbol, venue_hint);
        adapter.get_open_position(symbol).await
    }
}

pub use venue::{OrderType, TradeResult as VenueTradeResult, VenueAdapter};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use adapters::{OnChainAdapter, RestSignedAdapter, SolanaAdapter};
    use std::sync::Arc;

    fn layer() -> ExecutionLayer {
        let router = VenueRouter::new(
            vec!["BTCUSDT".to_string()],
            vec![],
            vec![],
            Arc::new(RestSignedAdapter::new("k", "s", "https://x.test")),
            Arc::new(OnChainAdapter::new("https://rpc.test")),
            Arc::new(SolanaAdapter::new("https://rpc.test")),
        );
        let risk = Arc::new(RiskEngine::new(1000.0, &Config::default()));
        ExecutionLayer::new(router, risk, None)
    }

    fn order(algo: Algo) -> ExecutionOrder {
        ExecutionOrder {
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            total_quantity: 1.0,
            algo,
            venue_hint: None,
            reference_price: 100.0,
            arbitrage_leg2: None,
            volume_profile: None,
            market_state: None,
            reasoning: String::new(),
        }
    }

    #[tokio::test]
    async fn halted_portfolio_refuses_execution() {
        let layer = layer();
        layer.risk.mark_equity(700.0).await;
        let result = layer.execute(order(Algo::Market)).await;
        assert!(!result.success);
        assert_eq!(result.metadata.get("reason").map(String::as_str), Some("halted"));
    }

    #[tokio::test]
    async fn adaptive_dispatches_to_heuristic_label() {
        let layer = layer();
        let mut o = order(Algo::Adaptive);
        o.market_state = Some(MarketState { urgency_score: 0.9, order_size_pct: 0.01, volatility: 0.01, spread_pct: 0.001, volume_roll_avg: 0.0 });
        let result = layer.execute(o).await;
        assert_eq!(result.metadata.get("adaptive_label").map(String::as_str), Some("Twap"));
    }

    /// The test adapter points at an unreachable host, so every slice fails
    /// and the fill never reaches the 0.95 threshold; that failure should be
    /// tallied against the resolved venue.
    #[tokio::test]
    async fn failed_fill_is_tallied_against_venue() {
        let layer = layer();
        let result = layer.execute(order(Algo::Market)).await;
        assert!(!result.success);
        assert!(layer.error_count("rest_signed").await >= 1);
    }
}
