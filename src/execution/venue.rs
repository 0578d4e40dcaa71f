//! Venue adapter trait and the common trade-result shape, grounded on the
//! teacher's `src/exchange/bybit/adapter.rs` return conventions.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{PositionSide, Side, Symbol};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub filled_quantity: f64,
    pub avg_price: f64,
    pub venue: String,
    pub metadata: HashMap<String, String>,
}

impl TradeResult {
    pub fn failed(venue: &str, reason: impl Into<String>) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("error".to_string(), reason.into());
        Self { success: false, order_id: None, filled_quantity: 0.0, avg_price: 0.0, venue: venue.to_string(), metadata }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
    TakeProfitMarket,
}

/// One adapter per supported venue. `execute_trade` is the synchronous,
/// single-shot primitive every execution algorithm slices into; `reduce_only`
/// governs position-closing orders.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    async fn execute_trade(
        &self,
        symbol: &Symbol,
        side: Side,
        order_type: OrderType,
        quantity: f64,
        price: Option<f64>,
        reduce_only: bool,
    ) -> anyhow::Result<TradeResult>;

    async fn get_balance(&self) -> anyhow::Result<HashMap<String, f64>>;

    fn name(&self) -> &str;

    /// Queries the venue's current position for `symbol`: `Ok(Some(..))` for
    /// an open position, `Ok(None)` confirming flat, `Err` when the venue
    /// can't be asked (used by reconciliation to tell "confirmed flat" from
    /// "don't know" so a transient query failure never reads as a flat
    /// position). Unimplemented by default.
    async fn get_open_position(&self, _symbol: &Symbol) -> anyhow::Result<Option<(PositionSide, f64, f64)>> {
        Err(anyhow::anyhow!("{} does not support position queries", self.name()))
    }

    /// On leverage-related venue failures the retry policy lowers leverage
    /// to 1x and calls this once more; default no-op for venues without a
    /// leverage concept (e.g. spot on-chain swaps).
    async fn set_leverage(&self, _symbol: &Symbol, _leverage: f64) -> anyhow::Result<()> {
        Ok(())
    }
}
