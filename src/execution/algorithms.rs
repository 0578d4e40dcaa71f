//! Execution algorithms (§4.7): TWAP, VWAP, Iceberg, Sniper, Adaptive,
//! Arbitrage. Each slices `total_quantity` into one or more venue calls and
//! accumulates `(total_executed, total_value)` the caller turns into an
//! `avg_price`.
//!
//! Grounded on the teacher's fan-out/backoff style (`src/exchange/bybit/rate_limiter.rs`
//! for the jittered-wait pattern), re-purposed from rate limiting to
//! deliberate order slicing.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use super::venue::{OrderType, TradeResult, VenueAdapter};
use crate::types::{Side, Symbol};

#[derive(Debug, Default, Clone)]
pub struct Fill {
    pub executed: f64,
    pub value: f64,
    /// The venue order id of the most recent successful slice. For
    /// multi-slice algorithms this is the final slice's id, which is the one
    /// a caller needing a single reference (e.g. to attach a reduce-only
    /// TP/SL) would want.
    pub order_id: Option<String>,
}

impl Fill {
    fn accumulate(&mut self, result: &TradeResult) {
        if result.success {
            self.executed += result.filled_quantity;
            self.value += result.filled_quantity * result.avg_price;
            if result.order_id.is_some() {
                self.order_id = result.order_id.clone();
            }
        }
    }
}

async fn single_slice(adapter: &dyn VenueAdapter, symbol: &Symbol, side: Side, qty: f64, reduce_only: bool) -> TradeResult {
    match adapter.execute_trade(symbol, side, OrderType::Market, qty, None, reduce_only).await {
        Ok(r) => r,
        Err(e) => {
            warn!(symbol, error = %e, "execution slice failed");
            TradeResult::failed(adapter.name(), e.to_string())
        }
    }
}

/// Single call to the venue adapter.
pub async fn market(adapter: &dyn VenueAdapter, symbol: &Symbol, side: Side, qty: f64, reduce_only: bool) -> Fill {
    let mut fill = Fill::default();
    fill.accumulate(&single_slice(adapter, symbol, side, qty, reduce_only).await);
    fill
}

/// N equal slices (default 5) at interval `duration/N`, each jittered +/-20%.
pub async fn twap(adapter: &dyn VenueAdapter, symbol: &Symbol, side: Side, total_qty: f64, duration: Duration, slices: usize) -> Fill {
    let slices = slices.max(1);
    let slice_qty = total_qty / slices as f64;
    let interval = duration / slices as u32;
    let mut fill = Fill::default();

    for i in 0..slices {
        fill.accumulate(&single_slice(adapter, symbol, side, slice_qty, false).await);
        if i + 1 < slices {
            let jitter = rand::thread_rng().gen_range(-0.2..=0.2);
            let wait = interval.mul_f64((1.0 + jitter).max(0.0));
            tokio::time::sleep(wait).await;
        }
    }
    fill
}

/// Slices proportionally to a 24-bucket relative volume profile; `weights`
/// must sum to ~1.0 and have exactly 24 entries (one per bucket).
pub async fn vwap(adapter: &dyn VenueAdapter, symbol: &Symbol, side: Side, total_qty: f64, weights: &[f64], duration: Duration) -> Fill {
    let bucket_count = weights.len().max(1);
    let interval = duration / bucket_count as u32;
    let mut fill = Fill::default();

    for (i, weight) in weights.iter().enumerate() {
        let slice_qty = total_qty * weight;
        if slice_qty <= 0.0 {
            continue;
        }
        fill.accumulate(&single_slice(adapter, symbol, side, slice_qty, false).await);
        if i + 1 < weights.len() {
            tokio::time::sleep(interval).await;
        }
    }
    fill
}

/// Repeats a `visible_pct` slice (default 10%) with a random 5-30s delay
/// until less than 10% of one slice remains.
pub async fn iceberg(adapter: &dyn VenueAdapter, symbol: &Symbol, side: Side, total_qty: f64, visible_pct: f64) -> Fill {
    let visible_pct = visible_pct.clamp(0.01, 1.0);
    let slice_qty = total_qty * visible_pct;
    let mut remaining = total_qty;
    let mut fill = Fill::default();

    while remaining >= slice_qty * 0.10 && remaining > 0.0 {
        let this_slice = slice_qty.min(remaining);
        fill.accumulate(&single_slice(adapter, symbol, side, this_slice, false).await);
        remaining -= this_slice;
        if remaining >= slice_qty * 0.10 {
            let delay = rand::thread_rng().gen_range(5..=30);
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }
    }
    fill
}

/// Polls current price at a fixed interval; executes immediately on a
/// `improvement_target_pct` improvement over `reference_price`, else at the
/// best observed price once `max_wait` elapses.
pub async fn sniper<F>(
    adapter: &dyn VenueAdapter,
    symbol: &Symbol,
    side: Side,
    qty: f64,
    reference_price: f64,
    improvement_target_pct: f64,
    max_wait: Duration,
    poll_interval: Duration,
    mut price_source: F,
) -> Fill
where
    F: FnMut() -> f64,
{
    let deadline = tokio::time::Instant::now() + max_wait;
    let improved = |p: f64| match side {
        Side::Buy => (reference_price - p) / reference_price >= improvement_target_pct,
        Side::Sell => (p - reference_price) / reference_price >= improvement_target_pct,
    };

    loop {
        let price = price_source();
        if improved(price) || tokio::time::Instant::now() >= deadline {
            debug!(symbol, price, "sniper executing");
            let mut fill = Fill::default();
            fill.accumulate(&single_slice(adapter, symbol, side, qty, false).await);
            return fill;
        }
        tokio::time::sleep(poll_interval.min(deadline.saturating_duration_since(tokio::time::Instant::now()))).await;
    }
}

/// Places both legs of a two-symbol spread concurrently when the spread
/// clears `min_profit_pct`.
pub async fn arbitrage(
    adapter: &dyn VenueAdapter,
    leg1_symbol: &Symbol,
    leg1_side: Side,
    leg1_qty: f64,
    leg1_price: f64,
    leg2_symbol: &Symbol,
    leg2_side: Side,
    leg2_qty: f64,
    leg2_price: f64,
    min_profit_pct: f64,
) -> Option<(Fill, Fill)> {
    let spread_pct = (leg2_price - leg1_price).abs() / leg1_price.max(1e-9);
    if spread_pct < min_profit_pct {
        return None;
    }

    let (leg1_result, leg2_result) = tokio::join!(
        single_slice(adapter, leg1_symbol, leg1_side, leg1_qty, false),
        single_slice(adapter, leg2_symbol, leg2_side, leg2_qty, false),
    );

    let mut fill1 = Fill::default();
    fill1.accumulate(&leg1_result);
    let mut fill2 = Fill::default();
    fill2.accumulate(&leg2_result);
    Some((fill1, fill2))
}

pub type AdapterRef = Arc<dyn VenueAdapter>;

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockAdapter {
        calls: AtomicUsize,
        fill_price: f64,
    }

    #[async_trait]
    impl VenueAdapter for MockAdapter {
        async fn execute_trade(
            &self,
            symbol: &Symbol,
            _side: Side,
            _order_type: OrderType,
            quantity: f64,
            _price: Option<f64>,
            _reduce_only: bool,
        ) -> anyhow::Result<TradeResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TradeResult {
                success: true,
                order_id: Some(format!("{}-{}", symbol, self.calls.load(Ordering::SeqCst))),
                filled_quantity: quantity,
                avg_price: self.fill_price,
                venue: "mock".to_string(),
                metadata: HashMap::new(),
            })
        }

        async fn get_balance(&self) -> anyhow::Result<HashMap<String, f64>> {
            Ok(HashMap::new())
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    #[tokio::test]
    async fn market_executes_full_quantity_in_one_call() {
        let adapter = MockAdapter { calls: AtomicUsize::new(0), fill_price: 100.0 };
        let fill = market(&adapter, &"BTCUSDT".to_string(), Side::Buy, 1.0, false).await;
        assert_eq!(fill.executed, 1.0);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn twap_splits_into_n_slices() {
        let adapter = MockAdapter { calls: AtomicUsize::new(0), fill_price: 100.0 };
        let fill = twap(&adapter, &"BTCUSDT".to_string(), Side::Buy, 5.0, Duration::from_millis(10), 5).await;
        assert!((fill.executed - 5.0).abs() < 1e-9);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn iceberg_stops_once_remainder_below_threshold() {
        let adapter = MockAdapter { calls: AtomicUsize::new(0), fill_price: 100.0 };
        let fill = iceberg(&adapter, &"BTCUSDT".to_string(), Side::Buy, 1.0, 0.5).await;
        assert!((fill.executed - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn arbitrage_skips_below_threshold_spread() {
        let adapter = MockAdapter { calls: AtomicUsize::new(0), fill_price: 100.0 };
        let result = arbitrage(&adapter, &"A".to_string(), Side::Buy, 1.0, 100.0, &"B".to_string(), Side::Sell, 1.0, 100.1, 0.005).await;
        assert!(result.is_none());
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn arbitrage_executes_both_legs_above_threshold() {
        let adapter = MockAdapter { calls: AtomicUsize::new(0), fill_price: 100.0 };
        let result = arbitrage(&adapter, &"A".to_string(), Side::Buy, 1.0, 100.0, &"B".to_string(), Side::Sell, 1.0, 102.0, 0.005).await;
        assert!(result.is_some());
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);
    }
}
