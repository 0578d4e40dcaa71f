//! On-chain swap/perp venue adapter (e.g. `MON-USDC`, `CHOG-USDC`). Wire
//! format is an explicit non-goal; this is a thin stand-in at the
//! `VenueAdapter` seam that a real DEX-router integration replaces.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::execution::venue::{OrderType, TradeResult, VenueAdapter};
use crate::types::{Side, Symbol};

pub struct OnChainAdapter {
    rpc_url: String,
}

impl OnChainAdapter {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self { rpc_url: rpc_url.into() }
    }
}

#[async_trait]
impl VenueAdapter for OnChainAdapter {
    async fn execute_trade(
        &self,
        symbol: &Symbol,
        _side: Side,
        _order_type: OrderType,
        quantity: f64,
        price: Option<f64>,
        _reduce_only: bool,
    ) -> anyhow::Result<TradeResult> {
        debug!(symbol, quantity, rpc = self.rpc_url, "on-chain swap stand-in");
        Ok(TradeResult {
            success: true,
            order_id: Some(format!("onchain-{}-{}", symbol, quantity)),
            filled_quantity: quantity,
            avg_price: price.unwrap_or(0.0),
            venue: self.name().to_string(),
            metadata: HashMap::new(),
        })
    }

    async fn get_balance(&self) -> anyhow::Result<HashMap<String, f64>> {
        Ok(HashMap::new())
    }

    fn name(&self) -> &str {
        "onchain"
    }
}
