//! HMAC-SHA256-signed REST venue adapter (centralized-perp universe), the
//! generic counterpart of the teacher's Bybit-specific
//! `src/exchange/bybit/adapter.rs`: same signing recipe (sorted query params,
//! HMAC-SHA256 over the canonical string, timestamp + key header), retargeted
//! at the wire shape in this system's external interfaces.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::execution::venue::{OrderType, TradeResult, VenueAdapter};
use crate::types::{Side, Symbol};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct VenueOrderResponse {
    #[serde(rename = "orderId")]
    order_id: String,
    status: String,
    #[serde(rename = "executedQty")]
    executed_qty: String,
    #[serde(rename = "avgPrice")]
    avg_price: String,
}

pub struct RestSignedAdapter {
    api_key: String,
    api_secret: String,
    base_url: String,
    client: Client,
}

impl RestSignedAdapter {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self { api_key: api_key.into(), api_secret: api_secret.into(), base_url: base_url.into(), client: Client::new() }
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).expect("time went backwards").as_millis() as u64
    }

    /// Canonical query string: params sorted lexicographically by key, then
    /// `k=v` joined by `&`. Matches the teacher's sorted-param signing style.
    fn canonical_query(params: &[(&str, String)]) -> String {
        let mut sorted: Vec<(&str, String)> = params.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        sorted.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&")
    }

    fn sign(&self, canonical_query: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes()).map_err(|e| anyhow!("bad hmac key: {e}"))?;
        mac.update(canonical_query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn retry_with_leverage_drop(&self, symbol: &Symbol, quantity: f64, attempt_err: &anyhow::Error) -> bool {
        let msg = attempt_err.to_string().to_lowercase();
        if msg.contains("leverage") {
            warn!(symbol, quantity, "leverage-related rejection; dropping to 1x and retrying once");
            let _ = self.set_leverage(symbol, 1.0).await;
            return true;
        }
        false
    }
}

#[async_trait::async_trait]
impl VenueAdapter for RestSignedAdapter {
    async fn execute_trade(
        &self,
        symbol: &Symbol,
        side: Side,
        order_type: OrderType,
        quantity: f64,
        price: Option<f64>,
        reduce_only: bool,
    ) -> Result<TradeResult> {
        let timestamp = Self::timestamp_ms();
        let side_str = match side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        let type_str = match order_type {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
        };

        let mut params: Vec<(&str, String)> = vec![
            ("symbol", symbol.clone()),
            ("side", side_str.to_string()),
            ("type", type_str.to_string()),
            ("quantity", quantity.to_string()),
            ("newClientOrderId", format!("omni-{timestamp}")),
            ("timestamp", timestamp.to_string()),
        ];
        if let Some(p) = price {
            params.push(("price", p.to_string()));
        }
        if reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }

        let canonical = Self::canonical_query(&params);
        let signature = self.sign(&canonical)?;
        let url = format!("{}/api/v1/order?{}&signature={}", self.base_url, canonical, signature);

        debug!(symbol, side = side_str, quantity, "submitting signed order");

        let attempt = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await;

        let response = match attempt {
            Ok(r) => r,
            Err(e) => {
                let err = anyhow!(e);
                if self.retry_with_leverage_drop(symbol, quantity, &err).await {
                    return Err(err);
                }
                return Ok(TradeResult::failed(self.name(), err.to_string()));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Ok(TradeResult::failed(self.name(), format!("venue http {status}: {body}")));
        }

        let parsed: VenueOrderResponse = response.json().await?;
        let executed_qty: f64 = parsed.executed_qty.parse().unwrap_or(0.0);
        let avg_price: f64 = parsed.avg_price.parse().unwrap_or(0.0);
        let success = matches!(parsed.status.as_str(), "FILLED" | "PARTIALLY_FILLED") && executed_qty > 0.0;

        let mut metadata = HashMap::new();
        metadata.insert("status".to_string(), parsed.status);

        Ok(TradeResult {
            success,
            order_id: Some(parsed.order_id),
            filled_quantity: executed_qty,
            avg_price,
            venue: self.name().to_string(),
            metadata,
        })
    }

    async fn get_balance(&self) -> Result<HashMap<String, f64>> {
        let timestamp = Self::timestamp_ms();
        let params = [("timestamp", timestamp.to_string())];
        let canonical = Self::canonical_query(&params);
        let signature = self.sign(&canonical)?;
        let url = format!("{}/api/v1/account?{}&signature={}", self.base_url, canonical, signature);

        let response = self.client.get(&url).header("X-MBX-APIKEY", &self.api_key).send().await?;
        let balances: HashMap<String, f64> = response.json().await.unwrap_or_default();
        Ok(balances)
    }

    fn name(&self) -> &str {
        "rest_signed"
    }

    async fn set_leverage(&self, symbol: &Symbol, leverage: f64) -> Result<()> {
        let timestamp = Self::timestamp_ms();
        let params = [("symbol", symbol.clone()), ("leverage", leverage.to_string()), ("timestamp", timestamp.to_string())];
        let canonical = Self::canonical_query(&params);
        let signature = self.sign(&canonical)?;
        let url = format!("{}/api/v1/leverage?{}&signature={}", self.base_url, canonical, signature);
        self.client.post(&url).header("X-MBX-APIKEY", &self.api_key).send().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_query_sorts_params() {
        let params = vec![("b", "2".to_string()), ("a", "1".to_string())];
        assert_eq!(RestSignedAdapter::canonical_query(&params), "a=1&b=2");
    }

    #[test]
    fn signature_is_deterministic_hex() {
        let adapter = RestSignedAdapter::new("key", "secret", "https://example.test");
        let sig1 = adapter.sign("symbol=BTCUSDT&side=BUY").unwrap();
        let sig2 = adapter.sign("symbol=BTCUSDT&side=BUY").unwrap();
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 64);
    }
}
