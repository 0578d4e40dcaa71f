//! HTTP surface (§6.1): an explicit transport non-goal. This module defines
//! the DTOs and the `AdminApi` trait a thin axum (or equivalent) adapter
//! would wire up, plus the constant-time bearer-token comparison every admin
//! endpoint requires, without binding a real server.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Symbol;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub running: bool,
    pub paper_trading: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub equity: f64,
    pub drawdown: f64,
    pub is_halted: bool,
    pub positions: HashMap<Symbol, crate::position::Position>,
    pub recent_trades: Vec<crate::persistence::TradeRecord>,
    pub agents_summary: Vec<AgentSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: String,
    pub specialization: String,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeHistoryFilter {
    pub agent_id: Option<String>,
    pub symbol: Option<Symbol>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentPerformance {
    pub agent_id: String,
    pub equity_history: Vec<(DateTime<Utc>, f64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentMetrics {
    pub agent_id: String,
    pub latency_ms: f64,
    pub inference_count: u64,
    pub win_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceDecision {
    pub symbol: Symbol,
    pub side: crate::types::Side,
    pub size: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub reasoning: String,
}

/// The surface a thin HTTP adapter delegates to. Not wired to any server
/// here; transport is an explicit non-goal.
#[async_trait]
pub trait AdminApi: Send + Sync {
    async fn healthz(&self) -> HealthStatus;
    async fn dashboard(&self) -> DashboardSnapshot;
    async fn start(&self) -> anyhow::Result<()>;
    async fn stop(&self) -> anyhow::Result<()>;
    async fn inject_decision(&self, decision: InferenceDecision) -> anyhow::Result<()>;
    async fn trade_history(&self, filter: TradeHistoryFilter) -> Vec<crate::persistence::TradeRecord>;
    async fn agent_performance(&self) -> Vec<AgentPerformance>;
    async fn agent_metrics(&self) -> Vec<AgentMetrics>;
    async fn set_agent_enabled(&self, agent_id: &str, enabled: bool) -> anyhow::Result<()>;
}

/// Constant-time comparison for the admin bearer token, avoiding the timing
/// side-channel a naive `==` would leak.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_strings() {
        assert!(constant_time_eq("secret-token", "secret-token"));
    }

    #[test]
    fn constant_time_eq_rejects_mismatch() {
        assert!(!constant_time_eq("secret-token", "wrong-token"));
        assert!(!constant_time_eq("short", "longer-string"));
    }
}
