//! Agent population management: the fixed roster of agents, daily PnL
//! bookkeeping and the per-agent daily-loss circuit breaker, grounded on the
//! teacher's `src/agents/agent_coordinator.rs` (which owned a `Vec` of boxed
//! agent trait objects and drove their lifecycle from one place).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use super::{Agent, AgentState, Personality, Specialization, Thesis};
use crate::data_store::DataStore;
use crate::types::Symbol;

/// Default roster: one agent per specialization, paired with a personality
/// that plausibly fits its role.
pub fn default_roster() -> Vec<(Specialization, Personality)> {
    vec![
        (Specialization::Technical, Personality::Analytical),
        (Specialization::Sentiment, Personality::Contrarian),
        (Specialization::Hybrid, Personality::Analytical),
        (Specialization::Predictive, Personality::Aggressive),
        (Specialization::Microstructure, Personality::Aggressive),
        (Specialization::MarketMaking, Personality::Conservative),
        (Specialization::Swing, Personality::Conservative),
        (Specialization::Momentum, Personality::Aggressive),
    ]
}

/// Owns the agent roster and the daily PnL/loss-breach bookkeeping shared
/// across agents. Individual agent analysis/learning is delegated to the
/// boxed `Agent` trait objects; this struct is the orchestrator-facing
/// surface for iterating the population and resetting day-boundary state.
pub struct AgentPopulation {
    agents: HashMap<String, Box<dyn Agent>>,
    day_anchor: DateTime<Utc>,
    max_daily_loss_pct: f64,
}

impl AgentPopulation {
    /// `max_daily_loss_pct` is a fraction (e.g. `0.05` for 5%) of an agent's
    /// own dynamic margin allocation, not a flat percentage-point budget.
    pub fn new(agents: Vec<Box<dyn Agent>>, max_daily_loss_pct: f64) -> Self {
        let mut map = HashMap::new();
        for agent in agents {
            map.insert(agent.stats().id.clone(), agent);
        }
        Self { agents: map, day_anchor: Utc::now(), max_daily_loss_pct }
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Box<dyn Agent>> {
        self.agents.get_mut(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Active, non-breached agents eligible to contribute a thesis this tick.
    pub fn eligible_ids(&self) -> Vec<String> {
        self.agents
            .values()
            .filter(|a| a.stats().active && !a.stats().daily_loss_breached)
            .map(|a| a.stats().id.clone())
            .collect()
    }

    pub async fn analyze_all(&mut self, symbol: &Symbol, data_store: &DataStore) -> Vec<Thesis> {
        let eligible = self.eligible_ids();
        let mut theses = Vec::with_capacity(eligible.len());
        for id in eligible {
            if let Some(agent) = self.agents.get_mut(&id) {
                theses.push(agent.analyze(symbol, data_store).await);
            }
        }
        theses
    }

    /// Feeds a realized trade outcome back to the agent that proposed it,
    /// accumulates its dollar PnL for the day, and updates the daily-loss
    /// breach flag against that agent's own `margin_allocation`.
    pub fn record_outcome(&mut self, agent_id: &str, thesis: &Thesis, pnl_pct: f64, pnl_dollars: f64, margin_allocation: f64) {
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.learn_from_trade(thesis, pnl_pct);
            let state = agent.stats_mut();
            state.daily_pnl += pnl_dollars;
            let threshold = self.max_daily_loss_pct.abs() * margin_allocation;
            if state.daily_pnl < -threshold {
                if !state.daily_loss_breached {
                    warn!(agent_id, daily_pnl = state.daily_pnl, threshold, "agent daily loss limit breached");
                }
                state.daily_loss_breached = true;
            }
        }
    }

    /// Resets each agent's daily PnL and breach flag at the UTC day boundary.
    /// Called once per tick; idempotent within the same day.
    pub fn roll_day_boundary(&mut self) {
        let now = Utc::now();
        if now.date_naive() == self.day_anchor.date_naive() {
            return;
        }
        self.day_anchor = now;
        for agent in self.agents.values_mut() {
            let state = agent.stats_mut();
            state.daily_pnl = 0.0;
            state.daily_loss_breached = false;
        }
    }

    pub fn states(&self) -> Vec<&AgentState> {
        self.agents.values().map(|a| a.stats()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::rule_based::RuleBasedAgent;

    fn agent(id: &str) -> Box<dyn Agent> {
        Box::new(RuleBasedAgent::new(id, Specialization::Technical, Personality::Analytical))
    }

    #[test]
    fn eligible_excludes_breached_agents() {
        let mut pop = AgentPopulation::new(vec![agent("a1"), agent("a2")], 0.05);
        pop.get_mut("a1").unwrap().stats_mut().daily_loss_breached = true;
        let eligible = pop.eligible_ids();
        assert_eq!(eligible, vec!["a2".to_string()]);
    }

    fn thesis(agent_id: &str) -> Thesis {
        Thesis {
            agent_id: agent_id.into(),
            symbol: "BTCUSDT".into(),
            signal: crate::types::Signal::Buy,
            confidence: 0.8,
            reasoning: String::new(),
            data_used: vec![],
            model_used: None,
            timestamp: Utc::now(),
        }
    }

    /// 5% of a 100.0 margin allocation is 5.0; a 6.0 dollar loss should trip
    /// the breach.
    #[test]
    fn record_outcome_breaches_on_large_loss() {
        let mut pop = AgentPopulation::new(vec![agent("a1")], 0.05);
        pop.record_outcome("a1", &thesis("a1"), -6.0, -6.0, 100.0);
        assert!(pop.get_mut("a1").unwrap().stats().daily_loss_breached);
    }

    /// A loss smaller than the threshold for this agent's allocation should
    /// not breach, even though the same dollar loss would breach a smaller
    /// allocation.
    #[test]
    fn record_outcome_respects_margin_allocation_scale() {
        let mut pop = AgentPopulation::new(vec![agent("a1")], 0.05);
        pop.record_outcome("a1", &thesis("a1"), -2.0, -6.0, 500.0);
        assert!(!pop.get_mut("a1").unwrap().stats().daily_loss_breached);
    }
}
