//! Rule-based thesis formation: the deterministic variant used directly by
//! `RuleBasedAgent` and as the fallback when the LLM variant fails.
//!
//! Grounded on the tally-style scoring in the teacher's
//! `src/agents/market_analyzer.rs` / `src/agents/sentiment_analyzer.rs`
//! (bullish/bearish point accumulation from indicator thresholds).

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;

use super::{apply_learning, Agent, AgentState, Personality, Specialization, Thesis};
use crate::data_store::{DataStore, IndicatorValue};
use crate::types::{Signal, Symbol};

pub struct RuleBasedAgent {
    state: AgentState,
}

impl RuleBasedAgent {
    pub fn new(id: impl Into<String>, specialization: Specialization, personality: Personality) -> Self {
        Self { state: AgentState::new(id, specialization, personality) }
    }

    /// Convenience constructor for a microstructure-flavored scalper: tighter
    /// confidence threshold and faster indicator-score decay than the default
    /// `Hft` agent gets from `AgentState::new`, so it reacts to order-book
    /// flips a standard agent would hold through.
    pub fn hft(id: impl Into<String>, personality: Personality) -> Self {
        let mut state = AgentState::new(id, Specialization::Hft, personality);
        state.adaptive_params.confidence_threshold = 0.7;
        state.exploration_rate = 0.05;
        Self { state }
    }
}

/// Requests: always price/volume, the agent's preferred indicators, and with
/// probability `exploration_rate` one uniformly random unused indicator.
pub async fn select_data(
    state: &AgentState,
    symbol: &Symbol,
    data_store: &DataStore,
) -> Vec<(String, IndicatorValue)> {
    let mut names: Vec<String> = vec!["price".to_string(), "volume".to_string()];
    names.extend(state.preferred_indicators.iter().cloned());

    if rand::thread_rng().gen_bool(state.exploration_rate.clamp(0.0, 1.0)) {
        let available = data_store.available_indicators();
        let unused: Vec<&String> = available.iter().filter(|n| !names.contains(n)).collect();
        if !unused.is_empty() {
            let pick = unused[rand::thread_rng().gen_range(0..unused.len())].clone();
            names.push(pick);
        }
    }

    names.dedup();
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        if let Some(v) = data_store.get(&name, symbol).await {
            out.push((name, v));
        }
    }
    out
}

/// Tallies bullish/bearish signals from the data obtained. `HOLD` at
/// confidence 0 when the tally is empty.
pub fn form_thesis(agent_id: &str, symbol: &Symbol, data: &[(String, IndicatorValue)]) -> Thesis {
    let mut bull = 0.0f64;
    let mut bear = 0.0f64;
    let mut reasons_bull = Vec::new();
    let mut reasons_bear = Vec::new();
    let mut data_used = Vec::new();

    for (name, value) in data {
        data_used.push(name.clone());
        match name.as_str() {
            "rsi" => {
                if let Some(rsi) = value.as_scalar() {
                    if rsi < 30.0 {
                        bull += 2.0;
                        reasons_bull.push(format!("RSI {:.1} < 30 (oversold)", rsi));
                    } else if rsi < 40.0 {
                        bull += 1.0;
                        reasons_bull.push(format!("RSI {:.1} < 40", rsi));
                    } else if rsi > 70.0 {
                        bear += 2.0;
                        reasons_bear.push(format!("RSI {:.1} > 70 (overbought)", rsi));
                    } else if rsi > 60.0 {
                        bear += 1.0;
                        reasons_bear.push(format!("RSI {:.1} > 60", rsi));
                    }
                }
            }
            "macd_hist" => {
                if let Some(hist) = value.as_scalar() {
                    if hist > 0.0 {
                        bull += 1.0;
                        reasons_bull.push("MACD bullish".to_string());
                    } else if hist < 0.0 {
                        bear += 1.0;
                        reasons_bear.push("MACD bearish".to_string());
                    }
                }
            }
            "bid_pressure" => {
                if let Some(p) = value.as_scalar() {
                    if p > 0.6 {
                        bull += 1.0;
                        reasons_bull.push(format!("bid pressure {:.2} > 0.6", p));
                    } else if p < 0.4 {
                        bear += 1.0;
                        reasons_bear.push(format!("bid pressure {:.2} < 0.4", p));
                    }
                }
            }
            "sentiment" => {
                if let Some(s) = value.as_scalar() {
                    if s > 0.7 {
                        bull += 1.0;
                        reasons_bull.push(format!("sentiment {:.2} > 0.7", s));
                    } else if s < 0.3 {
                        bear += 1.0;
                        reasons_bear.push(format!("sentiment {:.2} < 0.3", s));
                    }
                }
            }
            _ => {}
        }
    }

    let total = bull + bear;
    if total == 0.0 {
        return Thesis {
            agent_id: agent_id.to_string(),
            symbol: symbol.clone(),
            signal: Signal::Hold,
            confidence: 0.0,
            reasoning: "no actionable signal in sampled data".to_string(),
            data_used,
            model_used: None,
            timestamp: Utc::now(),
        };
    }

    let (signal, confidence, reasoning) = if bull >= bear {
        (Signal::Buy, bull / total, reasons_bull.join("; "))
    } else {
        (Signal::Sell, bear / total, reasons_bear.join("; "))
    };

    Thesis {
        agent_id: agent_id.to_string(),
        symbol: symbol.clone(),
        signal,
        confidence,
        reasoning,
        data_used,
        model_used: None,
        timestamp: Utc::now(),
    }
}

#[async_trait]
impl Agent for RuleBasedAgent {
    async fn analyze(&mut self, symbol: &Symbol, data_store: &DataStore) -> Thesis {
        let data = select_data(&self.state, symbol, data_store).await;
        form_thesis(&self.state.id, symbol, &data)
    }

    fn learn_from_trade(&mut self, thesis: &Thesis, pnl_pct: f64) {
        apply_learning(&mut self.state, thesis, pnl_pct);
    }

    fn stats(&self) -> &AgentState {
        &self.state
    }

    fn stats_mut(&mut self) -> &mut AgentState {
        &mut self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_when_no_signal() {
        let data = vec![("price".to_string(), IndicatorValue::Scalar(100.0))];
        let t = form_thesis("a1", &"BTCUSDT".to_string(), &data);
        assert_eq!(t.signal, Signal::Hold);
        assert_eq!(t.confidence, 0.0);
    }

    #[test]
    fn tallies_bullish_rsi_and_macd() {
        let data = vec![
            ("rsi".to_string(), IndicatorValue::Scalar(25.0)),
            ("macd_hist".to_string(), IndicatorValue::Scalar(0.5)),
        ];
        let t = form_thesis("a1", &"BTCUSDT".to_string(), &data);
        assert_eq!(t.signal, Signal::Buy);
        // bull = 2 + 1 = 3, bear = 0 -> confidence 1.0
        assert_eq!(t.confidence, 1.0);
    }

    #[test]
    fn mixed_signals_pick_winner_and_confidence_ratio() {
        let data = vec![
            ("rsi".to_string(), IndicatorValue::Scalar(72.0)), // bear +2
            ("bid_pressure".to_string(), IndicatorValue::Scalar(0.7)), // bull +1
        ];
        let t = form_thesis("a1", &"BTCUSDT".to_string(), &data);
        assert_eq!(t.signal, Signal::Sell);
        assert!((t.confidence - (2.0 / 3.0)).abs() < 1e-9);
    }
}
