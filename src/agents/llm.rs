//! LLM-backed thesis formation.
//!
//! The concrete LLM client is an explicit non-goal (external collaborator);
//! this module defines the `LlmClient` trait at that seam and the retry /
//! parsing / fallback logic around it, grounded on the teacher's retry style
//! in `src/exchange/bybit/adapter.rs` (network calls wrapped with backoff)
//! and the redesign note that ad-hoc LLM JSON parsing becomes a single
//! strict parser with a narrow schema and a safe rule-based fallback.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use super::rule_based::{form_thesis, select_data};
use super::{apply_learning, Agent, AgentState, Personality, Specialization, Thesis};
use crate::data_store::DataStore;
use crate::memory::Episode;
use crate::types::{Signal, Symbol};

const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE_SECS: u64 = 2;
const BACKOFF_MAX_SECS: u64 = 10;

/// External collaborator seam: a concrete implementation talks to whatever
/// LLM API is configured. Not implemented here (non-goal).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str, timeout: Duration) -> anyhow::Result<String>;
}

pub struct LlmBackedAgent {
    state: AgentState,
    client: std::sync::Arc<dyn LlmClient>,
    model_name: String,
    query_timeout: Duration,
}

impl LlmBackedAgent {
    pub fn new(
        id: impl Into<String>,
        specialization: Specialization,
        personality: Personality,
        client: std::sync::Arc<dyn LlmClient>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            state: AgentState::new(id, specialization, personality),
            client,
            model_name: model_name.into(),
            query_timeout: Duration::from_secs(10),
        }
    }

    fn personality_directive(&self) -> &'static str {
        match self.state.personality {
            Personality::Analytical => "Weigh evidence carefully; avoid overconfidence.",
            Personality::Aggressive => "Favor decisive entries when the edge is present.",
            Personality::Conservative => "Prefer HOLD unless the signal is unambiguous.",
            Personality::Contrarian => "Be skeptical of crowded trades; look for reversals.",
        }
    }

    /// Builds the richer prompt variant (personality + up to 5 relevant
    /// memory excerpts + market data + live win-rate). The community-signals
    /// variant from the source system is treated as vestigial, per the
    /// resolved open question.
    fn build_prompt(&self, symbol: &Symbol, data: &[(String, crate::data_store::IndicatorValue)], memories: &[Episode]) -> String {
        let mut prompt = String::new();
        prompt.push_str(&format!("You are trading agent {} ({:?}/{:?}).\n", self.state.id, self.state.specialization, self.state.personality));
        prompt.push_str(self.personality_directive());
        prompt.push_str(&format!("\nLive win rate: {:.1}%\n", self.state.win_rate() * 100.0));
        prompt.push_str(&format!("Symbol: {}\n", symbol));
        prompt.push_str("Market data:\n");
        for (name, value) in data {
            prompt.push_str(&format!("- {}: {:?}\n", name, value));
        }
        if !memories.is_empty() {
            prompt.push_str("Relevant past episodes:\n");
            for m in memories.iter().take(5) {
                prompt.push_str(&format!("- {} -> {}\n", m.symbol, m.lesson));
            }
        }
        prompt.push_str(
            "\nRespond with exactly these lines:\nOBSERVE: ...\nREASON: ...\nCONCLUDE: ...\nSIGNAL: BUY|SELL|HOLD\nCONFIDENCE: 0.0-1.0\n",
        );
        prompt
    }

    /// Lenient line-oriented parser: scans for `SIGNAL:` and `CONFIDENCE:`
    /// lines, ignoring everything else. Any failure returns `None` so the
    /// caller falls back to the rule-based thesis.
    fn parse_response(&self, symbol: &Symbol, data_used: Vec<String>, text: &str) -> Option<Thesis> {
        let mut signal = None;
        let mut confidence = None;
        let mut reasoning = String::new();

        for line in text.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("SIGNAL:") {
                signal = match rest.trim().to_uppercase().as_str() {
                    "BUY" => Some(Signal::Buy),
                    "SELL" => Some(Signal::Sell),
                    "HOLD" => Some(Signal::Hold),
                    _ => None,
                };
            } else if let Some(rest) = line.strip_prefix("CONFIDENCE:") {
                confidence = rest.trim().parse::<f64>().ok();
            } else if let Some(rest) = line.strip_prefix("CONCLUDE:") {
                reasoning = rest.trim().to_string();
            }
        }

        let signal = signal?;
        let confidence = confidence?.clamp(0.0, 1.0);
        Some(Thesis {
            agent_id: self.state.id.clone(),
            symbol: symbol.clone(),
            signal,
            confidence,
            reasoning,
            data_used,
            model_used: Some(self.model_name.clone()),
            timestamp: Utc::now(),
        })
    }

    async fn query_with_retry(&self, prompt: &str) -> Option<String> {
        let mut attempt = 0;
        loop {
            match tokio::time::timeout(self.query_timeout, self.client.complete(prompt, self.query_timeout)).await {
                Ok(Ok(text)) => return Some(text),
                Ok(Err(e)) => warn!(error = %e, attempt, "llm query failed"),
                Err(_) => warn!(attempt, "llm query timed out"),
            }
            attempt += 1;
            if attempt >= MAX_RETRIES {
                return None;
            }
            let backoff = BACKOFF_BASE_SECS.saturating_pow(attempt).min(BACKOFF_MAX_SECS);
            tokio::time::sleep(Duration::from_secs(backoff)).await;
        }
    }

    pub async fn analyze_with_memories(&mut self, symbol: &Symbol, data_store: &DataStore, memories: &[Episode]) -> Thesis {
        let data = select_data(&self.state, symbol, data_store).await;
        let prompt = self.build_prompt(symbol, &data, memories);
        let data_used: Vec<String> = data.iter().map(|(n, _)| n.clone()).collect();

        match self.query_with_retry(&prompt).await {
            Some(text) => self
                .parse_response(symbol, data_used, &text)
                .unwrap_or_else(|| form_thesis(&self.state.id, symbol, &data)),
            None => form_thesis(&self.state.id, symbol, &data),
        }
    }
}

#[async_trait]
impl Agent for LlmBackedAgent {
    async fn analyze(&mut self, symbol: &Symbol, data_store: &DataStore) -> Thesis {
        self.analyze_with_memories(symbol, data_store, &[]).await
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

    struct FailingClient;
    #[async_trait]
    impl LlmClient for FailingClient {
        async fn complete(&self, _prompt: &str, _timeout: Duration) -> anyhow::Result<String> {
            anyhow::bail!("unreachable")
        }
    }

    struct OkClient(String);
    #[async_trait]
    impl LlmClient for OkClient {
        async fn complete(&self, _prompt: &str, _timeout: Duration) -> anyhow::Result<String> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn parses_well_formed_response() {
        let agent = LlmBackedAgent::new(
            "a1",
            Specialization::Hybrid,
            Personality::Analytical,
            std::sync::Arc::new(OkClient(
                "OBSERVE: x\nREASON: y\nCONCLUDE: bullish setup\nSIGNAL: BUY\nCONFIDENCE: 0.82\n".to_string(),
            )),
            "test-model",
        );
        let t = agent
            .parse_response(&"BTCUSDT".to_string(), vec!["rsi".to_string()], "OBSERVE: x\nREASON: y\nCONCLUDE: bullish setup\nSIGNAL: BUY\nCONFIDENCE: 0.82\n")
            .unwrap();
        assert_eq!(t.signal, Signal::Buy);
        assert!((t.confidence - 0.82).abs() < 1e-9);
    }

    #[tokio::test]
    async fn falls_back_to_rule_based_on_total_failure() {
        let mut agent = LlmBackedAgent::new(
            "a1",
            Specialization::Hybrid,
            Personality::Analytical,
            std::sync::Arc::new(FailingClient),
            "test-model",
        );
        agent.query_timeout = Duration::from_millis(10);
        let result = agent.query_with_retry("prompt").await;
        assert!(result.is_none());
    }
}
