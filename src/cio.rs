//! Orchestrator/CIO outer loop (§4.10, optional): a slow supervisory task
//! that watches per-agent win rate and PnL and issues bounded interventions.
//!
//! Grounded on the teacher's `src/agents/feedback_loop.rs` (per-agent
//! performance records, mutation/kill eligibility derived from a rolling
//! trade window) and `src/agents/god_kernel.rs`'s evolution-event logging,
//! narrowed to the four interventions this system actually defines: `Tune`,
//! `Boost`, `Cooldown`, `Revert`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::{interval, Duration};
use tracing::info;

use crate::agents::population::AgentPopulation;
use crate::agents::AgentState;

const INTERVENTION_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Intervention {
    /// Adjusts `max_leverage_limit` and `risk_tolerance`, leverage clamped
    /// to [1, 50].
    Tune { max_leverage_limit: f64, risk_tolerance: f64 },
    /// Loosens the confidence threshold toward more frequent trading.
    Boost,
    /// Tightens the confidence threshold and shrinks leverage after a
    /// losing streak.
    Cooldown,
    /// Undoes the previous intervention's effect, restoring the prior
    /// baseline values.
    Revert,
}

impl Intervention {
    fn as_feedback(&self) -> String {
        match self {
            Intervention::Tune { max_leverage_limit, risk_tolerance } => {
                format!("tuned: max_leverage_limit={max_leverage_limit:.1}, risk_tolerance={risk_tolerance:.2}")
            }
            Intervention::Boost => "boosted: confidence threshold loosened".to_string(),
            Intervention::Cooldown => "cooldown: confidence threshold tightened, leverage reduced".to_string(),
            Intervention::Revert => "reverted to prior baseline".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Baseline {
    max_leverage_limit: f64,
    risk_tolerance: f64,
    confidence_threshold: f64,
}

/// Owns one snapshot of "did the last intervention help" per agent, and the
/// pre-intervention baseline a `Revert` restores.
pub struct CioLoop {
    cooldown_pnl_threshold: f64,
    boost_win_rate_threshold: f64,
    baselines: HashMap<String, Baseline>,
    last_pnl: HashMap<String, f64>,
}

impl CioLoop {
    pub fn new() -> Self {
        Self { cooldown_pnl_threshold: -5.0, boost_win_rate_threshold: 0.65, baselines: HashMap::new(), last_pnl: HashMap::new() }
    }

    pub async fn run(&mut self, population: Arc<tokio::sync::RwLock<AgentPopulation>>) {
        let mut ticker = interval(INTERVENTION_INTERVAL);
        loop {
            ticker.tick().await;
            self.tick(&population).await;
        }
    }

    /// One supervisory pass: decide and apply an intervention per agent,
    /// based on whether the prior intervention's feedback (the PnL delta
    /// since it was issued) looks like it helped.
    pub async fn tick(&mut self, population: &tokio::sync::RwLock<AgentPopulation>) {
        let ids = population.read().await.ids();
        for id in ids {
            let mut pop = population.write().await;
            let Some(agent) = pop.get_mut(&id) else { continue };
            let state = agent.stats_mut();
            let decision = self.decide(state);
            if let Some(intervention) = decision {
                self.apply(state, &intervention);
                info!(agent_id = %state.id, intervention = ?intervention, "CIO intervention applied");
            }
            self.last_pnl.insert(id, state.total_pnl);
        }
    }

    fn decide(&self, state: &AgentState) -> Option<Intervention> {
        if state.total_trades < 5 {
            return None;
        }

        let prior_pnl = self.last_pnl.get(&state.id).copied().unwrap_or(state.total_pnl);
        let helped = state.total_pnl > prior_pnl;

        if let Some(last) = &state.last_intervention {
            if last.starts_with("cooldown") && !helped {
                return Some(Intervention::Revert);
            }
            if last.starts_with("boosted") && !helped {
                return Some(Intervention::Revert);
            }
        }

        if state.total_pnl <= self.cooldown_pnl_threshold {
            return Some(Intervention::Cooldown);
        }
        if state.win_rate() >= self.boost_win_rate_threshold && state.total_pnl > 0.0 {
            return Some(Intervention::Boost);
        }
        None
    }

    fn apply(&mut self, state: &mut AgentState, intervention: &Intervention) {
        self.baselines.entry(state.id.clone()).or_insert_with(|| Baseline {
            max_leverage_limit: state.max_leverage_limit,
            risk_tolerance: state.risk_tolerance,
            confidence_threshold: state.adaptive_params.confidence_threshold,
        });

        match intervention {
            Intervention::Tune { max_leverage_limit, risk_tolerance } => {
                state.max_leverage_limit = max_leverage_limit.clamp(1.0, 50.0);
                state.risk_tolerance = risk_tolerance.clamp(0.0, 1.0);
            }
            Intervention::Boost => {
                state.adaptive_params.confidence_threshold = (state.adaptive_params.confidence_threshold - 0.05).max(0.55);
                state.max_leverage_limit = (state.max_leverage_limit * 1.1).clamp(1.0, 50.0);
            }
            Intervention::Cooldown => {
                state.adaptive_params.confidence_threshold = (state.adaptive_params.confidence_threshold + 0.1).min(0.90);
                state.max_leverage_limit = (state.max_leverage_limit * 0.5).clamp(1.0, 50.0);
            }
            Intervention::Revert => {
                if let Some(baseline) = self.baselines.get(&state.id) {
                    state.max_leverage_limit = baseline.max_leverage_limit;
                    state.risk_tolerance = baseline.risk_tolerance;
                    state.adaptive_params.confidence_threshold = baseline.confidence_threshold;
                }
            }
        }

        state.last_intervention = Some(intervention.as_feedback());
    }
}

impl Default for CioLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Personality, Specialization};

    fn losing_state() -> AgentState {
        let mut s = AgentState::new("a1", Specialization::Technical, Personality::Analytical);
        s.total_trades = 10;
        s.wins = 2;
        s.total_pnl = -6.0;
        s
    }

    #[test]
    fn cooldown_triggers_on_heavy_loss_and_reduces_leverage() {
        let mut cio = CioLoop::new();
        let mut state = losing_state();
        let decision = cio.decide(&state).unwrap();
        assert_eq!(decision, Intervention::Cooldown);
        cio.apply(&mut state, &decision);
        assert!(state.max_leverage_limit < 10.0);
        assert!(state.last_intervention.as_deref().unwrap().starts_with("cooldown"));
    }

    #[test]
    fn boost_triggers_on_strong_win_rate() {
        let mut cio = CioLoop::new();
        let mut state = AgentState::new("a1", Specialization::Technical, Personality::Analytical);
        state.total_trades = 10;
        state.wins = 8;
        state.total_pnl = 12.0;
        let decision = cio.decide(&state).unwrap();
        assert_eq!(decision, Intervention::Boost);
    }

    #[test]
    fn revert_undoes_cooldown_when_it_did_not_help() {
        let mut cio = CioLoop::new();
        let mut state = losing_state();
        let baseline_leverage = state.max_leverage_limit;
        cio.apply(&mut state, &Intervention::Cooldown);
        cio.last_pnl.insert(state.id.clone(), state.total_pnl);
        let decision = cio.decide(&state).unwrap();
        assert_eq!(decision, Intervention::Revert);
        cio.apply(&mut state, &decision);
        assert_eq!(state.max_leverage_limit, baseline_leverage);
    }

    #[test]
    fn leverage_tune_is_clamped_to_one_fifty() {
        let mut cio = CioLoop::new();
        let mut state = AgentState::new("a1", Specialization::Technical, Personality::Analytical);
        cio.apply(&mut state, &Intervention::Tune { max_leverage_limit: 500.0, risk_tolerance: 2.0 });
        assert_eq!(state.max_leverage_limit, 50.0);
        assert_eq!(state.risk_tolerance, 1.0);
    }
}
