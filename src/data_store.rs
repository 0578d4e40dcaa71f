//! Data Store (C2): a single narrow `get(indicator, symbol)` interface over
//! the feature pipeline plus pluggable providers (sentiment, order-book
//! pressure). Unknown names yield `None`, never an error — agents probe this
//! store freely while exploring.
//!
//! A tagged variant replaces the dynamically typed indicator dictionaries the
//! source system used, per the redesign note.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::feature_pipeline::FeaturePipeline;
use crate::types::{Symbol, Trend, WyckoffPhase};

#[derive(Debug, Clone, PartialEq)]
pub enum IndicatorValue {
    Scalar(f64),
    Band { upper: f64, mid: f64, lower: f64 },
    Phase(WyckoffPhase),
    Trend(Trend),
    Text(String),
}

impl IndicatorValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            IndicatorValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }
}

/// A pluggable side-channel provider (sentiment score, order-book pressure,
/// etc.) keyed by indicator name.
#[async_trait]
pub trait IndicatorProvider: Send + Sync {
    async fn get(&self, name: &str, symbol: &Symbol) -> Option<IndicatorValue>;
    fn names(&self) -> Vec<String>;
}

pub struct DataStore {
    pipeline: Arc<FeaturePipeline>,
    providers: Vec<Arc<dyn IndicatorProvider>>,
}

const DERIVED_NAMES: &[&str] = &[
    "price", "volume", "change_pct_24h", "high_24h", "low_24h", "atr_pct", "rsi",
    "macd", "macd_signal", "macd_hist", "bb", "stoch_k", "stoch_d", "cci", "adx",
    "obv", "wyckoff_phase", "vsop", "bid_pressure", "spread_pct", "trend",
];

impl DataStore {
    pub fn new(pipeline: Arc<FeaturePipeline>, providers: Vec<Arc<dyn IndicatorProvider>>) -> Self {
        Self { pipeline, providers }
    }

    pub async fn get(&self, name: &str, symbol: &Symbol) -> Option<IndicatorValue> {
        if let Some(v) = self.get_derived(name, symbol).await {
            return Some(v);
        }
        for provider in &self.providers {
            if let Some(v) = provider.get(name, symbol).await {
                return Some(v);
            }
        }
        None
    }

    async fn get_derived(&self, name: &str, symbol: &Symbol) -> Option<IndicatorValue> {
        let snap = self.pipeline.get_market_analysis(symbol).await.ok()?;
        Some(match name {
            "price" => IndicatorValue::Scalar(snap.price),
            "volume" => IndicatorValue::Scalar(snap.volume_24h),
            "change_pct_24h" => IndicatorValue::Scalar(snap.change_pct_24h),
            "high_24h" => IndicatorValue::Scalar(snap.high_24h),
            "low_24h" => IndicatorValue::Scalar(snap.low_24h),
            "atr_pct" => IndicatorValue::Scalar(snap.atr_pct),
            "rsi" => IndicatorValue::Scalar(snap.rsi),
            "macd" => IndicatorValue::Scalar(snap.macd.value),
            "macd_signal" => IndicatorValue::Scalar(snap.macd.signal),
            "macd_hist" => IndicatorValue::Scalar(snap.macd.histogram),
            "bb" => IndicatorValue::Band { upper: snap.bb.upper, mid: snap.bb.mid, lower: snap.bb.lower },
            "stoch_k" => IndicatorValue::Scalar(snap.stoch.k),
            "stoch_d" => IndicatorValue::Scalar(snap.stoch.d),
            "cci" => IndicatorValue::Scalar(snap.cci),
            "adx" => IndicatorValue::Scalar(snap.adx),
            "obv" => IndicatorValue::Scalar(snap.obv),
            "wyckoff_phase" => IndicatorValue::Phase(snap.wyckoff_phase),
            "vsop" => IndicatorValue::Scalar(snap.vsop),
            "bid_pressure" => IndicatorValue::Scalar(snap.bid_pressure),
            "spread_pct" => IndicatorValue::Scalar(snap.spread_pct),
            "trend" => IndicatorValue::Trend(snap.trend),
            _ => return None,
        })
    }

    pub fn available_indicators(&self) -> Vec<String> {
        let mut names: Vec<String> = DERIVED_NAMES.iter().map(|s| s.to_string()).collect();
        for provider in &self.providers {
            names.extend(provider.names());
        }
        names
    }
}

/// Simple in-memory sentiment/order-book-pressure provider, standing in for
/// the real external feeds the source system pulls from social/on-chain
/// sources. Values are set by whatever drives the orchestrator's tick (tests,
/// or a real feed adapter wired at the same seam).
#[derive(Default)]
pub struct StaticProvider {
    values: HashMap<(String, Symbol), IndicatorValue>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, symbol: &Symbol, value: IndicatorValue) {
        self.values.insert((name.to_string(), symbol.clone()), value);
    }
}

#[async_trait]
impl IndicatorProvider for tokio::sync::RwLock<StaticProvider> {
    async fn get(&self, name: &str, symbol: &Symbol) -> Option<IndicatorValue> {
        self.read().await.values.get(&(name.to_string(), symbol.clone())).cloned()
    }

    fn names(&self) -> Vec<String> {
        vec!["sentiment".to_string()]
    }
}
