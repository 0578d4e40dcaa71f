//! Feature Pipeline (C1).
//!
//! Fetches OHLCV + a depth-limited order book per symbol, computes the
//! indicator set, and caches the result per symbol with a 60s TTL. Grounded
//! on the teacher's `src/market_simulator.rs` (synthetic candle generation
//! for testing without a live venue) and `src/strategy/indicators.rs` (now
//! superseded by `feature_pipeline::indicators`, which implements the exact
//! semantics the spec calls for).

pub mod indicators;
pub mod snapshot;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::{Result, TradingError};
use crate::types::{Candle, Symbol, Trend, VolatilityState, WyckoffPhase};
use snapshot::{BollingerReading, MacdReading, MarketSnapshot, StochasticReading};

const CACHE_TTL: Duration = Duration::from_secs(60);

/// A depth-limited order book snapshot, used only for `bid_pressure` /
/// `spread_pct`.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

impl OrderBook {
    pub fn bid_pressure(&self) -> f64 {
        let bid_vol: f64 = self.bids.iter().map(|(_, q)| q).sum();
        let ask_vol: f64 = self.asks.iter().map(|(_, q)| q).sum();
        let total = bid_vol + ask_vol;
        if total <= 0.0 {
            0.5
        } else {
            (bid_vol / total).clamp(0.0, 1.0)
        }
    }

    pub fn spread_pct(&self) -> f64 {
        match (self.bids.first(), self.asks.first()) {
            (Some((bid, _)), Some((ask, _))) if bid > &0.0 => (ask - bid) / bid,
            _ => 0.0,
        }
    }
}

/// Raw market data fetch, one call per venue. Implementations suspend on
/// network I/O; everything downstream of this trait is synchronous.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn get_klines(&self, symbol: &Symbol, interval: &str, limit: usize) -> Result<Vec<Candle>>;
    async fn get_order_book(&self, symbol: &Symbol, depth: usize) -> Result<OrderBook>;
}

/// Deterministically generates a plausible candle series for symbols in the
/// synthetic universe, seeded by `(floor(now/60), hash(symbol))` so repeated
/// calls within the same minute are reproducible (required for cache-hit
/// testability).
pub struct SyntheticMarketData {
    pub universe: std::collections::HashSet<Symbol>,
}

impl SyntheticMarketData {
    pub fn new(universe: impl IntoIterator<Item = Symbol>) -> Self {
        Self { universe: universe.into_iter().collect() }
    }

    fn seed_for(symbol: &Symbol) -> u64 {
        use std::hash::{Hash, Hasher};
        let minute = (Utc::now().timestamp() / 60) as u64;
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        symbol.hash(&mut hasher);
        minute.wrapping_mul(0x9E3779B97F4A7C15) ^ hasher.finish()
    }

    fn generate(symbol: &Symbol, limit: usize) -> Vec<Candle> {
        let mut rng = StdRng::seed_from_u64(Self::seed_for(symbol));
        let mut price = 100.0 + (Self::seed_for(symbol) % 10_000) as f64 / 100.0;
        let mut out = Vec::with_capacity(limit);
        let now = Utc::now();
        for i in 0..limit {
            let drift: f64 = rng.gen_range(-0.01..0.01);
            let open = price;
            price = (price * (1.0 + drift)).max(0.01);
            let close = price;
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.005));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.005));
            let volume = rng.gen_range(1_000.0..50_000.0);
            out.push(Candle {
                open_time: now - chrono::Duration::hours((limit - i) as i64),
                open,
                high,
                low,
                close,
                volume,
            });
        }
        out
    }
}

#[async_trait]
impl MarketDataSource for SyntheticMarketData {
    async fn get_klines(&self, symbol: &Symbol, _interval: &str, limit: usize) -> Result<Vec<Candle>> {
        if !self.universe.contains(symbol) {
            return Err(TradingError::DataMissing { symbol: symbol.clone() });
        }
        Ok(Self::generate(symbol, limit))
    }

    async fn get_order_book(&self, symbol: &Symbol, depth: usize) -> Result<OrderBook> {
        if !self.universe.contains(symbol) {
            return Err(TradingError::DataMissing { symbol: symbol.clone() });
        }
        let mut rng = StdRng::seed_from_u64(Self::seed_for(symbol) ^ 0xABCDEF);
        let mid = 100.0 + (Self::seed_for(symbol) % 10_000) as f64 / 100.0;
        let mut bids = Vec::with_capacity(depth);
        let mut asks = Vec::with_capacity(depth);
        for i in 0..depth {
            let step = (i as f64 + 1.0) * 0.01;
            bids.push((mid - step, rng.gen_range(1.0..20.0)));
            asks.push((mid + step, rng.gen_range(1.0..20.0)));
        }
        Ok(OrderBook { bids, asks })
    }
}

/// Public, unsigned REST market data, grounded on the teacher's
/// `exchange/bybit/adapter.rs::get_klines`/`get_orderbook` (same
/// `reqwest::Client` + query-params shape, minus the auth headers those
/// calls don't need). Targets the Binance-futures-compatible public
/// endpoints the configured venue exposes.
pub struct RestMarketDataSource {
    base_url: String,
    client: reqwest::Client,
}

impl RestMarketDataSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), client: reqwest::Client::new() }
    }

    fn network_err(&self, source: impl Into<anyhow::Error>) -> TradingError {
        TradingError::Network { venue: self.base_url.clone(), source: source.into() }
    }
}

#[async_trait]
impl MarketDataSource for RestMarketDataSource {
    async fn get_klines(&self, symbol: &Symbol, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let url = format!("{}/fapi/v1/klines", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol.as_str()), ("interval", interval), ("limit", &limit.to_string())])
            .send()
            .await
            .map_err(|e| self.network_err(e))?;

        if !response.status().is_success() {
            return Err(self.network_err(anyhow::anyhow!("venue http {}", response.status())));
        }

        let rows: Vec<serde_json::Value> = response.json().await.map_err(|e| self.network_err(e))?;
        let candles = rows
            .iter()
            .filter_map(|row| {
                let row = row.as_array()?;
                let num = |i: usize| row.get(i)?.as_str()?.parse::<f64>().ok();
                let open_ms = row.first()?.as_i64()?;
                Some(Candle {
                    open_time: chrono::DateTime::from_timestamp_millis(open_ms).unwrap_or_else(Utc::now),
                    open: num(1)?,
                    high: num(2)?,
                    low: num(3)?,
                    close: num(4)?,
                    volume: num(5)?,
                })
            })
            .collect();
        Ok(candles)
    }

    async fn get_order_book(&self, symbol: &Symbol, depth: usize) -> Result<OrderBook> {
        #[derive(Deserialize)]
        struct DepthResponse {
            bids: Vec<(String, String)>,
            asks: Vec<(String, String)>,
        }

        let url = format!("{}/fapi/v1/depth", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol.as_str()), ("limit", &depth.to_string())])
            .send()
            .await
            .map_err(|e| self.network_err(e))?;

        if !response.status().is_success() {
            return Err(self.network_err(anyhow::anyhow!("venue http {}", response.status())));
        }

        let parsed: DepthResponse = response.json().await.map_err(|e| self.network_err(e))?;
        let level = |(p, q): (String, String)| (p.parse().unwrap_or(0.0), q.parse().unwrap_or(0.0));
        Ok(OrderBook { bids: parsed.bids.into_iter().map(level).collect(), asks: parsed.asks.into_iter().map(level).collect() })
    }
}

/// Composes a real venue source with the synthetic generator: tries `primary`
/// first, and only for symbols in the synthetic universe falls back to
/// `fallback` on a venue error or an empty candle series, matching §4.1's
/// "on venue error or empty data for symbols in a designated synthetic
/// universe, generate a plausible series; otherwise return failure."
pub struct CompositeMarketDataSource {
    primary: Arc<dyn MarketDataSource>,
    fallback: SyntheticMarketData,
}

impl CompositeMarketDataSource {
    pub fn new(primary: Arc<dyn MarketDataSource>, synthetic_universe: impl IntoIterator<Item = Symbol>) -> Self {
        Self { primary, fallback: SyntheticMarketData::new(synthetic_universe) }
    }
}

#[async_trait]
impl MarketDataSource for CompositeMarketDataSource {
    async fn get_klines(&self, symbol: &Symbol, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        match self.primary.get_klines(symbol, interval, limit).await {
            Ok(candles) if !candles.is_empty() => Ok(candles),
            result if self.fallback.universe.contains(symbol) => {
                debug!(symbol, ok = result.is_ok(), "venue klines unavailable, using synthetic fallback");
                self.fallback.get_klines(symbol, interval, limit).await
            }
            result => result,
        }
    }

    async fn get_order_book(&self, symbol: &Symbol, depth: usize) -> Result<OrderBook> {
        match self.primary.get_order_book(symbol, depth).await {
            Ok(book) if !book.bids.is_empty() || !book.asks.is_empty() => Ok(book),
            result if self.fallback.universe.contains(symbol) => {
                debug!(symbol, ok = result.is_ok(), "venue order book unavailable, using synthetic fallback");
                self.fallback.get_order_book(symbol, depth).await
            }
            result => result,
        }
    }
}

struct CacheEntry {
    snapshot: MarketSnapshot,
    at: std::time::Instant,
}

/// The feature pipeline: fetch + indicators + per-symbol TTL cache with
/// single-flight collapse of concurrent refreshes to the same symbol.
pub struct FeaturePipeline {
    source: Arc<dyn MarketDataSource>,
    cache: RwLock<HashMap<Symbol, CacheEntry>>,
    locks: Mutex<HashMap<Symbol, Arc<Mutex<()>>>>,
}

impl FeaturePipeline {
    pub fn new(source: Arc<dyn MarketDataSource>) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn symbol_lock(&self, symbol: &Symbol) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(symbol.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Returns a Market Snapshot, using the per-symbol cache (60s TTL). A
    /// cache hit returns the stored snapshot with no I/O.
    pub async fn get_market_analysis(&self, symbol: &Symbol) -> Result<MarketSnapshot> {
        if let Some(entry) = self.cache.read().await.get(symbol) {
            if entry.at.elapsed() < CACHE_TTL {
                return Ok(entry.snapshot.clone());
            }
        }

        let lock = self.symbol_lock(symbol).await;
        let _guard = lock.lock().await;

        // Re-check after acquiring the single-flight lock: another task may
        // have just refreshed this symbol.
        if let Some(entry) = self.cache.read().await.get(symbol) {
            if entry.at.elapsed() < CACHE_TTL {
                return Ok(entry.snapshot.clone());
            }
        }

        let snapshot = self.refresh(symbol).await?;
        self.cache.write().await.insert(
            symbol.clone(),
            CacheEntry { snapshot: snapshot.clone(), at: std::time::Instant::now() },
        );
        Ok(snapshot)
    }

    async fn refresh(&self, symbol: &Symbol) -> Result<MarketSnapshot> {
        debug!(symbol, "refreshing market snapshot");
        let candles = self.source.get_klines(symbol, "1h", 100).await?;
        if candles.is_empty() {
            return Err(TradingError::DataMissing { symbol: symbol.clone() });
        }
        let book = self
            .source
            .get_order_book(symbol, 20)
            .await
            .unwrap_or_default();

        let closes = indicators::closes(&candles);
        let price = closes.last().copied().unwrap_or(0.0);
        let high_24h = candles.iter().fold(f64::MIN, |a, c| a.max(c.high));
        let low_24h = candles.iter().fold(f64::MAX, |a, c| a.min(c.low));
        let volume_24h: f64 = candles.iter().rev().take(24).map(|c| c.volume).sum();
        let first = candles.first().unwrap().close;
        let change_pct_24h = if first != 0.0 { (price - first) / first * 100.0 } else { 0.0 };

        let ema50 = indicators::ema(&closes, 50);
        let rsi = indicators::rsi(&closes, 14);
        let atr = indicators::atr(&candles, 14);
        let atr_pct = if price != 0.0 { atr / price * 100.0 } else { 0.0 };
        let macd = indicators::macd(&closes, 12, 26, 9);
        let bb = indicators::bollinger_bands(&closes, 20, 2.0);
        let stoch = indicators::stochastic(&candles, 14, 3);
        let cci = indicators::cci(&candles, 20);
        let adx = indicators::adx(&candles, 14);
        let obv = indicators::obv(&candles);
        let fib_levels = indicators::fib_levels(&candles);

        let vol_avg_50: f64 = {
            let n = candles.len().min(50);
            candles[candles.len() - n..].iter().map(|c| c.volume).sum::<f64>() / n as f64
        };
        let recent_vol_avg: f64 = candles.iter().rev().take(10).map(|c| c.volume).sum::<f64>() / 10.0f64.min(candles.len() as f64);
        let volatility_state = if atr_pct > 3.0 { VolatilityState::High } else { VolatilityState::Low };

        let trend = if price > ema50 * 1.002 {
            Trend::Bullish
        } else if price < ema50 * 0.998 {
            Trend::Bearish
        } else {
            Trend::Neutral
        };

        let wyckoff_phase = classify_wyckoff(price, ema50, rsi, atr_pct, vol_avg_50, recent_vol_avg);
        let bid_pressure = book.bid_pressure();
        let spread_pct = book.spread_pct();
        let vsop = compute_vsop(recent_vol_avg, vol_avg_50, trend, rsi);

        Ok(MarketSnapshot {
            symbol: symbol.clone(),
            computed_at: Utc::now(),
            price,
            volume_24h,
            change_pct_24h,
            high_24h,
            low_24h,
            atr_pct,
            rsi,
            macd: MacdReading { value: macd.value, signal: macd.signal, histogram: macd.histogram },
            bb: BollingerReading { upper: bb.upper, mid: bb.mid, lower: bb.lower },
            stoch: StochasticReading { k: stoch.k, d: stoch.d },
            cci,
            adx,
            obv,
            fib_levels,
            wyckoff_phase,
            vsop,
            bid_pressure,
            spread_pct,
            trend,
            volatility_state,
        })
    }
}

/// Rule set on (close vs EMA50, RSI, volatility vs 50-period average).
fn classify_wyckoff(price: f64, ema50: f64, rsi: f64, atr_pct: f64, vol_avg_50: f64, recent_vol_avg: f64) -> WyckoffPhase {
    let above = price > ema50;
    let high_vol = recent_vol_avg > vol_avg_50 * 1.2;
    match (above, high_vol) {
        (false, true) if rsi < 40.0 => WyckoffPhase::Accumulation,
        (true, true) if rsi > 60.0 => WyckoffPhase::Distribution,
        (true, _) if atr_pct < 5.0 => WyckoffPhase::Markup,
        (false, _) if atr_pct < 5.0 => WyckoffPhase::Markdown,
        _ => WyckoffPhase::Neutral,
    }
}

/// VSOP: mean of (volume-trend mapped to [0,100]) + trend score + RSI, /3.
fn compute_vsop(recent_vol_avg: f64, vol_avg_50: f64, trend: Trend, rsi: f64) -> f64 {
    let vol_ratio = if vol_avg_50 > 0.0 { recent_vol_avg / vol_avg_50 } else { 1.0 };
    let vol_score = ((vol_ratio - 1.0) * 50.0 + 50.0).clamp(0.0, 100.0);
    let trend_score = match trend {
        Trend::Bullish => 100.0,
        Trend::Bearish => 0.0,
        Trend::Neutral => 50.0,
    };
    ((vol_score + trend_score + rsi) / 3.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_hit_returns_identical_snapshot_without_refetch() {
        let universe: std::collections::HashSet<Symbol> = ["BTCUSDT".to_string()].into_iter().collect();
        let source = Arc::new(SyntheticMarketData::new(universe));
        let pipeline = FeaturePipeline::new(source);
        let a = pipeline.get_market_analysis(&"BTCUSDT".to_string()).await.unwrap();
        let b = pipeline.get_market_analysis(&"BTCUSDT".to_string()).await.unwrap();
        assert_eq!(a.price, b.price);
        assert_eq!(a.computed_at, b.computed_at);
    }

    #[tokio::test]
    async fn unknown_symbol_is_data_missing() {
        let source = Arc::new(SyntheticMarketData::new(std::iter::empty()));
        let pipeline = FeaturePipeline::new(source);
        let err = pipeline.get_market_analysis(&"NOPE".to_string()).await.unwrap_err();
        matches!(err, TradingError::DataMissing { .. });
    }

    struct AlwaysFailsSource;

    #[async_trait]
    impl MarketDataSource for AlwaysFailsSource {
        async fn get_klines(&self, symbol: &Symbol, _interval: &str, _limit: usize) -> Result<Vec<Candle>> {
            Err(TradingError::Network { venue: "test".into(), source: anyhow::anyhow!("unreachable: {symbol}") })
        }
        async fn get_order_book(&self, symbol: &Symbol, _depth: usize) -> Result<OrderBook> {
            Err(TradingError::Network { venue: "test".into(), source: anyhow::anyhow!("unreachable: {symbol}") })
        }
    }

    #[tokio::test]
    async fn composite_falls_back_to_synthetic_for_known_symbol_on_venue_error() {
        let composite = CompositeMarketDataSource::new(Arc::new(AlwaysFailsSource), ["BTCUSDT".to_string()]);
        let candles = composite.get_klines(&"BTCUSDT".to_string(), "1h", 10).await.unwrap();
        assert_eq!(candles.len(), 10);
    }

    #[tokio::test]
    async fn composite_propagates_failure_for_symbol_outside_synthetic_universe() {
        let composite = CompositeMarketDataSource::new(Arc::new(AlwaysFailsSource), std::iter::empty());
        let err = composite.get_klines(&"BTCUSDT".to_string(), "1h", 10).await.unwrap_err();
        matches!(err, TradingError::Network { .. });
    }
}
