//! Consensus Engine (C5): fuses per-agent theses into one decision.
//!
//! Grounded on the teacher's `src/agents/agent_coordinator.rs` voting
//! aggregation (weighted tally across agent outputs), generalized to the
//! experience-boosted weighting scheme this system uses: each vote is
//! weighted by `confidence * (0.5 + 0.5 * win_rate)`, so a consistently
//! profitable agent's conviction counts for more than a coin-flip agent's
//! equal confidence.

use serde::{Deserialize, Serialize};

use crate::agents::Thesis;
use crate::types::{Signal, Symbol};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentVote {
    pub agent_id: String,
    pub signal: Signal,
    pub confidence: f64,
    pub win_rate: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub symbol: Symbol,
    pub signal: Signal,
    pub confidence: f64,
    pub agreement: f64,
    pub votes: Vec<AgentVote>,
}

fn empty_result(symbol: &Symbol) -> ConsensusResult {
    ConsensusResult { symbol: symbol.clone(), signal: Signal::Hold, confidence: 0.0, agreement: 0.0, votes: vec![] }
}

/// Canonical fusion: experience-boosted weighted vote. Ties (including an
/// all-HOLD population) resolve to HOLD. `agreement` is the winning signal's
/// weight share of the total weight; `confidence` is a distinct quantity,
/// the winning weight divided by the number of votes cast (so a single
/// lukewarm vote can't read as full confidence the way it would under
/// `agreement`).
pub fn fuse(symbol: &Symbol, votes: Vec<AgentVote>) -> ConsensusResult {
    if votes.is_empty() {
        return empty_result(symbol);
    }

    let mut buy_weight = 0.0;
    let mut sell_weight = 0.0;
    let mut hold_weight = 0.0;
    let mut total_weight = 0.0;

    for v in &votes {
        let weight = v.confidence * (0.5 + 0.5 * v.win_rate);
        total_weight += weight;
        match v.signal {
            Signal::Buy => buy_weight += weight,
            Signal::Sell => sell_weight += weight,
            Signal::Hold => hold_weight += weight,
        }
    }

    if total_weight <= 0.0 {
        return empty_result(symbol);
    }

    let (signal, winning_weight) = if buy_weight > sell_weight && buy_weight > hold_weight {
        (Signal::Buy, buy_weight)
    } else if sell_weight > buy_weight && sell_weight > hold_weight {
        (Signal::Sell, sell_weight)
    } else {
        (Signal::Hold, hold_weight.max(buy_weight).max(sell_weight))
    };

    let vote_count = votes.len() as f64;
    ConsensusResult {
        symbol: symbol.clone(),
        signal,
        confidence: (winning_weight / vote_count).clamp(0.0, 1.0),
        agreement: winning_weight / total_weight,
        votes,
    }
}

/// Alternative fusion: logistic reweighting of `confidence * win_rate`
/// instead of the linear 0.5+0.5*w blend. Kept alongside `fuse` as the
/// sigmoid variant; not wired as the default.
pub fn fuse_sigmoid(symbol: &Symbol, votes: Vec<AgentVote>) -> ConsensusResult {
    if votes.is_empty() {
        return empty_result(symbol);
    }

    let mut buy_weight = 0.0;
    let mut sell_weight = 0.0;
    let mut hold_weight = 0.0;
    let mut total_weight = 0.0;

    for v in &votes {
        let x = v.confidence * v.win_rate;
        let weight = 1.0 / (1.0 + (-5.0 * (x - 0.5)).exp());
        total_weight += weight;
        match v.signal {
            Signal::Buy => buy_weight += weight,
            Signal::Sell => sell_weight += weight,
            Signal::Hold => hold_weight += weight,
        }
    }

    if total_weight <= 0.0 {
        return empty_result(symbol);
    }

    let (signal, winning_weight) = if buy_weight > sell_weight && buy_weight > hold_weight {
        (Signal::Buy, buy_weight)
    } else if sell_weight > buy_weight && sell_weight > hold_weight {
        (Signal::Sell, sell_weight)
    } else {
        (Signal::Hold, hold_weight.max(buy_weight).max(sell_weight))
    };

    let vote_count = votes.len() as f64;
    ConsensusResult {
        symbol: symbol.clone(),
        signal,
        confidence: (winning_weight / vote_count).clamp(0.0, 1.0),
        agreement: winning_weight / total_weight,
        votes,
    }
}

pub fn votes_from_theses(theses: &[Thesis], win_rates: &std::collections::HashMap<String, f64>) -> Vec<AgentVote> {
    theses
        .iter()
        .map(|t| AgentVote {
            agent_id: t.agent_id.clone(),
            signal: t.signal,
            confidence: t.confidence,
            win_rate: *win_rates.get(&t.agent_id).unwrap_or(&0.5),
            reasoning: t.reasoning.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(agent_id: &str, signal: Signal, confidence: f64, win_rate: f64) -> AgentVote {
        AgentVote { agent_id: agent_id.to_string(), signal, confidence, win_rate, reasoning: String::new() }
    }

    #[test]
    fn empty_votes_yield_hold_zero_confidence() {
        let r = fuse(&"BTCUSDT".to_string(), vec![]);
        assert_eq!(r.signal, Signal::Hold);
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn unanimous_buy_has_full_agreement_but_averaged_confidence() {
        let votes = vec![vote("a1", Signal::Buy, 0.9, 0.6), vote("a2", Signal::Buy, 0.8, 0.55)];
        let r = fuse(&"BTCUSDT".to_string(), votes);
        assert_eq!(r.signal, Signal::Buy);
        assert!((r.agreement - 1.0).abs() < 1e-9);
        // weights: 0.9*0.8=0.72, 0.8*0.775=0.62 -> total 1.34, confidence = 1.34/2
        assert!((r.confidence - 0.67).abs() < 1e-9);
    }

    /// S3: a confident, high-win-rate agent should be able to outweigh two
    /// middling opposing votes.
    #[test]
    fn experienced_agent_outweighs_majority() {
        let votes = vec![
            vote("veteran", Signal::Buy, 0.9, 0.8),
            vote("rookie1", Signal::Sell, 0.55, 0.45),
            vote("rookie2", Signal::Sell, 0.5, 0.45),
        ];
        let r = fuse(&"BTCUSDT".to_string(), votes);
        assert_eq!(r.signal, Signal::Buy);
    }

    #[test]
    fn single_agent_confidence_is_its_weighted_vote() {
        let votes = vec![vote("a1", Signal::Sell, 0.7, 0.5)];
        let r = fuse(&"BTCUSDT".to_string(), votes);
        assert_eq!(r.signal, Signal::Sell);
        // weight = 0.7 * (0.5 + 0.5*0.5) = 0.525, vote count 1
        assert!((r.confidence - 0.525).abs() < 1e-9);
        assert!((r.agreement - 1.0).abs() < 1e-9);
    }
}
