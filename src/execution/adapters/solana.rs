//! Solana-perp venue adapter (e.g. `JUP-USDC`, `PYTH-USDC`, `BONK-USDC`).
//! Wire format is an explicit non-goal; same thin stand-in shape as
//! `onchain.rs`, kept as a distinct type since the two universes route
//! independently.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::execution::venue::{OrderType, TradeResult, VenueAdapter};
use crate::types::{Side, Symbol};

pub struct SolanaAdapter {
    rpc_url: String,
}

impl SolanaAdapter {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self { rpc_url: rpc_url.into() }
    }
}

#[async_trait]
impl VenueAdapter for SolanaAdapter {
    async fn execute_trade(
        &self,
        symbol: &Symbol,
        _side: Side,
        _order_type: OrderType,
        quantity: f64,
        price: Option<f64>,
        _reduce_only: bool,
    ) -> anyhow::Result<TradeResult> {
        debug!(symbol, quantity, rpc = self.rpc_url, "solana perp stand-in");
        Ok(TradeResult {
            success: true,
            order_id: Some(format!("solana-{}-{}", symbol, quantity)),
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
        "solana"
    }
}
