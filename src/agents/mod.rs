//! Agent Population (C4): heterogeneous decision units, each producing a
//! signal + confidence + reasoning from the data store and its own state,
//! learning from outcomes.
//!
//! The `Agent` trait narrows the teacher's `engine::agent_trait::Agent`
//! (an async lifecycle trait with `initialize`/`start`/`stop`/`update`/
//! `handle_message`) down to the capability set the redesign notes call for:
//! `{analyze, learn_from_trade, stats}`. Variants `RuleBased` and `LlmBacked`
//! implement it; see `rule_based.rs` and `llm.rs`.

pub mod llm;
pub mod population;
pub mod rule_based;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data_store::DataStore;
use crate::types::{Signal, Symbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Specialization {
    Technical,
    Sentiment,
    Hybrid,
    Predictive,
    Microstructure,
    MarketMaking,
    Swing,
    Momentum,
    /// Not part of the default population; constructible for high-frequency
    /// scalp-exit eligibility per the position manager's specialization
    /// check.
    Hft,
}

impl Specialization {
    /// Specializations eligible for the forced scalp exit in the position
    /// manager (momentum, market_making, hft).
    pub fn is_scalp_eligible(self) -> bool {
        matches!(self, Specialization::Momentum | Specialization::MarketMaking | Specialization::Hft)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Personality {
    Analytical,
    Aggressive,
    Conservative,
    Contrarian,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdaptiveParams {
    pub confidence_threshold: f64,
    pub leverage: f64,
    pub position_size_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub id: String,
    pub specialization: Specialization,
    pub personality: Personality,
    pub preferred_indicators: Vec<String>,
    pub indicator_scores: std::collections::HashMap<String, f64>,
    pub exploration_rate: f64,
    pub total_trades: u64,
    pub wins: u64,
    /// Cumulative percentage return across all trades, for display/learning.
    pub total_pnl: f64,
    /// Realized dollar PnL since the last day-boundary roll, compared
    /// against `max_daily_loss_pct * margin_allocation` by
    /// `AgentPopulation::record_outcome`.
    pub daily_pnl: f64,
    pub daily_loss_breached: bool,
    pub adaptive_params: AdaptiveParams,
    pub max_leverage_limit: f64,
    pub risk_tolerance: f64,
    pub preferred_regimes: Vec<crate::types::Trend>,
    pub active: bool,
    pub last_intervention: Option<String>,
}

impl AgentState {
    pub fn new(id: impl Into<String>, specialization: Specialization, personality: Personality) -> Self {
        let id = id.into();
        Self {
            id,
            specialization,
            personality,
            preferred_indicators: default_preferred_indicators(specialization),
            indicator_scores: std::collections::HashMap::new(),
            exploration_rate: 0.1,
            total_trades: 0,
            wins: 0,
            total_pnl: 0.0,
            daily_pnl: 0.0,
            daily_loss_breached: false,
            adaptive_params: AdaptiveParams {
                confidence_threshold: 0.6,
                leverage: 1.0,
                position_size_pct: 0.05,
            },
            max_leverage_limit: 10.0,
            risk_tolerance: 0.5,
            preferred_regimes: Vec::new(),
            active: true,
            last_intervention: None,
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            0.5
        } else {
            self.wins as f64 / self.total_trades as f64
        }
    }
}

fn default_preferred_indicators(spec: Specialization) -> Vec<String> {
    match spec {
        Specialization::Technical | Specialization::Swing => {
            vec!["rsi".into(), "macd_hist".into(), "adx".into()]
        }
        Specialization::Sentiment => vec!["sentiment".into(), "bid_pressure".into()],
        Specialization::Hybrid => vec!["rsi".into(), "sentiment".into(), "trend".into()],
        Specialization::Predictive => vec!["macd_hist".into(), "stoch_k".into(), "cci".into()],
        Specialization::Microstructure | Specialization::MarketMaking | Specialization::Hft => {
            vec!["bid_pressure".into(), "spread_pct".into()]
        }
        Specialization::Momentum => vec!["macd_hist".into(), "adx".into(), "obv".into()],
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thesis {
    pub agent_id: String,
    pub symbol: Symbol,
    pub signal: Signal,
    pub confidence: f64,
    pub reasoning: String,
    pub data_used: Vec<String>,
    pub model_used: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// The capability set every agent variant implements.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn analyze(&mut self, symbol: &Symbol, data_store: &DataStore) -> Thesis;
    fn learn_from_trade(&mut self, thesis: &Thesis, pnl_pct: f64);
    fn stats(&self) -> &AgentState;
    fn stats_mut(&mut self) -> &mut AgentState;
}

/// Shared learning update applied identically by every `Agent` impl: per the
/// learning rules in the spec, indicator scores used in the thesis drift by
/// +0.1 on a win / -0.05 on a loss (clamped [0,1]), `preferred_indicators`
/// becomes the top-5 scored indicators, the adaptive confidence threshold
/// drifts -0.01 on wins / +0.02 on losses (clamped [0.60, 0.90]), and the
/// trade/win counters update.
pub fn apply_learning(state: &mut AgentState, thesis: &Thesis, pnl_pct: f64) {
    state.total_trades += 1;
    let win = pnl_pct > 0.0;
    if win {
        state.wins += 1;
    }
    state.total_pnl += pnl_pct;

    for indicator in &thesis.data_used {
        let score = state.indicator_scores.entry(indicator.clone()).or_insert(0.5);
        *score = if win { (*score + 0.1).min(1.0) } else { (*score - 0.05).max(0.0) };
    }

    let mut scored: Vec<(String, f64)> = state.indicator_scores.iter().map(|(k, v)| (k.clone(), *v)).collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    state.preferred_indicators = scored.into_iter().take(5).map(|(k, _)| k).collect();

    state.adaptive_params.confidence_threshold = if win {
        (state.adaptive_params.confidence_threshold - 0.01).max(0.60)
    } else {
        (state.adaptive_params.confidence_threshold + 0.02).min(0.90)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thesis(data_used: Vec<&str>) -> Thesis {
        Thesis {
            agent_id: "a1".into(),
            symbol: "BTCUSDT".into(),
            signal: Signal::Buy,
            confidence: 0.8,
            reasoning: String::new(),
            data_used: data_used.into_iter().map(String::from).collect(),
            model_used: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn learning_updates_scores_and_thresholds_on_win() {
        let mut state = AgentState::new("a1", Specialization::Technical, Personality::Analytical);
        let t = thesis(vec!["rsi"]);
        apply_learning(&mut state, &t, 1.5);
        assert_eq!(state.total_trades, 1);
        assert_eq!(state.wins, 1);
        assert_eq!(state.indicator_scores["rsi"], 0.6);
        assert!((state.adaptive_params.confidence_threshold - 0.59).abs() < 1e-9);
    }

    #[test]
    fn learning_updates_scores_and_thresholds_on_loss() {
        let mut state = AgentState::new("a1", Specialization::Technical, Personality::Analytical);
        let t = thesis(vec!["rsi"]);
        apply_learning(&mut state, &t, -1.0);
        assert_eq!(state.wins, 0);
        assert_eq!(state.indicator_scores["rsi"], 0.45);
        assert!((state.adaptive_params.confidence_threshold - 0.62).abs() < 1e-9);
    }
}
