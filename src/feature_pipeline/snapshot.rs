//! `MarketSnapshot`: the per-symbol, per-tick output of the feature pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Trend, VolatilityState, WyckoffPhase};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MacdReading {
    pub value: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BollingerReading {
    pub upper: f64,
    pub mid: f64,
    pub lower: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StochasticReading {
    pub k: f64,
    pub d: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub computed_at: DateTime<Utc>,
    pub price: f64,
    pub volume_24h: f64,
    pub change_pct_24h: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub atr_pct: f64,
    pub rsi: f64,
    pub macd: MacdReading,
    pub bb: BollingerReading,
    pub stoch: StochasticReading,
    pub cci: f64,
    pub adx: f64,
    pub obv: f64,
    pub fib_levels: [f64; 5],
    pub wyckoff_phase: WyckoffPhase,
    pub vsop: f64,
    pub bid_pressure: f64,
    pub spread_pct: f64,
    pub trend: Trend,
    pub volatility_state: VolatilityState,
}
