//! Episodic Memory (C9): records each decision as an episode, attaches
//! outcomes and reflections, and recalls similar past episodes.
//!
//! Grounded on the teacher's `src/agents/memory_node.rs` (`RwLock`-guarded
//! `HashMap` + `VecDeque` recency index over trade memories), generalized
//! from that module's single entry-price/pnl record to the full episode
//! lifecycle (decision -> outcome -> reflection) and the Jaccard-similarity
//! recall defined for this system, supplemented with a per-tag win rate in
//! `get_stats` (present in the source system's episodic memory stats but
//! dropped by the distillation).

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::Symbol;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub pnl: f64,
    pub pnl_pct: f64,
    pub exit_reason: String,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub episode_id: String,
    pub timestamp: DateTime<Utc>,
    pub market_state_text: String,
    pub market_state_embedding_text: String,
    pub symbol: Symbol,
    pub venue: String,
    pub signal: crate::types::Signal,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub agent_id: String,
    pub reasoning: String,
    pub confidence: f64,
    pub outcome: Option<Outcome>,
    pub what_worked: Option<String>,
    pub what_failed: Option<String>,
    pub lesson: String,
    pub tags: Vec<String>,
}

impl Episode {
    /// Deterministic id from timestamp + symbol + signal, matching the
    /// source system's hash-based episode id.
    pub fn make_id(timestamp: DateTime<Utc>, symbol: &Symbol, signal: crate::types::Signal) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        timestamp.timestamp_nanos_opt().unwrap_or(0).hash(&mut hasher);
        symbol.hash(&mut hasher);
        format!("{signal:?}").hash(&mut hasher);
        format!("ep_{:x}", hasher.finish())
    }

    fn tokens(&self) -> HashSet<String> {
        self.market_state_embedding_text.split_whitespace().map(|t| t.to_lowercase()).collect()
    }

    fn is_profitable(&self) -> bool {
        self.outcome.as_ref().map(|o| o.pnl > 0.0).unwrap_or(false)
    }
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryStats {
    pub total_episodes: usize,
    pub episodes_with_outcome: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub tag_win_rates: HashMap<String, f64>,
}

pub struct EpisodicMemory {
    episodes: HashMap<String, Episode>,
    by_symbol: HashMap<Symbol, Vec<String>>,
    recency: VecDeque<String>,
    cap: usize,
}

impl EpisodicMemory {
    pub fn new(cap: usize) -> Self {
        Self { episodes: HashMap::new(), by_symbol: HashMap::new(), recency: VecDeque::new(), cap: cap.max(1) }
    }

    /// Appends to the symbol index and recency deque, persisting
    /// write-through (the caller's `Store` does the actual I/O; this method
    /// just updates in-memory state and returns the id to persist).
    pub fn store(&mut self, episode: Episode) -> String {
        let id = episode.episode_id.clone();
        self.by_symbol.entry(episode.symbol.clone()).or_default().push(id.clone());
        self.recency.push_back(id.clone());
        self.episodes.insert(id.clone(), episode);
        self.prune_if_over_cap();
        id
    }

    fn prune_if_over_cap(&mut self) {
        while self.episodes.len() > self.cap {
            let Some(oldest_id) = self
                .episodes
                .values()
                .min_by_key(|e| e.timestamp)
                .map(|e| e.episode_id.clone())
            else {
                break;
            };
            self.remove(&oldest_id);
        }
    }

    fn remove(&mut self, id: &str) {
        if let Some(episode) = self.episodes.remove(id) {
            if let Some(ids) = self.by_symbol.get_mut(&episode.symbol) {
                ids.retain(|x| x != id);
            }
            self.recency.retain(|x| x != id);
        }
    }

    /// Idempotent, last-write-wins: calling twice with the same outcome is a
    /// no-op beyond the first write.
    pub fn update_outcome(&mut self, episode_id: &str, outcome: Outcome) -> bool {
        match self.episodes.get_mut(episode_id) {
            Some(episode) => {
                episode.outcome = Some(outcome);
                true
            }
            None => {
                warn!(episode_id, "update_outcome: unknown episode id");
                false
            }
        }
    }

    pub fn add_reflection(&mut self, episode_id: &str, what_worked: String, what_failed: String, lesson: String) -> bool {
        match self.episodes.get_mut(episode_id) {
            Some(episode) => {
                episode.what_worked = Some(what_worked);
                episode.what_failed = Some(what_failed);
                episode.lesson = lesson;
                true
            }
            None => false,
        }
    }

    pub fn get_by_id(&self, episode_id: &str) -> Option<&Episode> {
        self.episodes.get(episode_id)
    }

    pub fn get_recent(&self, limit: usize) -> Vec<&Episode> {
        self.recency.iter().rev().take(limit).filter_map(|id| self.episodes.get(id)).collect()
    }

    /// Ranks by Jaccard similarity of tokenized `market_state_embedding_text`,
    /// x1.3 for profitable episodes when `prefer_profitable`, plus a recency
    /// bonus of `max(0, 1 - age_days/30) * 0.1`.
    pub fn recall_similar(&self, current_state_text: &str, symbol: Option<&Symbol>, limit: usize, prefer_profitable: bool) -> Vec<&Episode> {
        let query_tokens: HashSet<String> = current_state_text.split_whitespace().map(|t| t.to_lowercase()).collect();
        let now = Utc::now();

        let candidates: Vec<&Episode> = match symbol {
            Some(sym) => self.by_symbol.get(sym).into_iter().flatten().filter_map(|id| self.episodes.get(id)).collect(),
            None => self.episodes.values().collect(),
        };

        let mut scored: Vec<(f64, &Episode)> = candidates
            .into_iter()
            .map(|episode| {
                let mut score = jaccard(&query_tokens, &episode.tokens());
                if prefer_profitable && episode.is_profitable() {
                    score *= 1.3;
                }
                let age_days = (now - episode.timestamp).num_seconds() as f64 / 86_400.0;
                score += (1.0 - age_days / 30.0).max(0.0) * 0.1;
                (score, episode)
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(limit).map(|(_, e)| e).collect()
    }

    pub fn get_stats(&self) -> MemoryStats {
        let total_episodes = self.episodes.len();
        let with_outcome: Vec<&Episode> = self.episodes.values().filter(|e| e.outcome.is_some()).collect();
        let episodes_with_outcome = with_outcome.len();
        let wins = with_outcome.iter().filter(|e| e.is_profitable()).count();
        let win_rate = if episodes_with_outcome == 0 { 0.0 } else { wins as f64 / episodes_with_outcome as f64 };
        let total_pnl: f64 = with_outcome.iter().filter_map(|e| e.outcome.as_ref()).map(|o| o.pnl).sum();

        let mut tag_totals: HashMap<String, (usize, usize)> = HashMap::new();
        for episode in &with_outcome {
            for tag in &episode.tags {
                let entry = tag_totals.entry(tag.clone()).or_insert((0, 0));
                entry.0 += 1;
                if episode.is_profitable() {
                    entry.1 += 1;
                }
            }
        }
        let tag_win_rates = tag_totals.into_iter().map(|(tag, (total, wins))| (tag, wins as f64 / total as f64)).collect();

        MemoryStats { total_episodes, episodes_with_outcome, win_rate, total_pnl, tag_win_rates }
    }
}

/// Rule-based reflection fallback used when the LLM reflection request
/// (an external collaborator) fails.
pub fn synthesize_reflection(episode: &Episode) -> (String, String, String) {
    let symbol = &episode.symbol;
    match &episode.outcome {
        Some(outcome) if outcome.pnl > 0.0 => (
            format!("Entry timing on {symbol} aligned with the move"),
            String::new(),
            format!("Buying/Shorting {symbol} at similar levels can work in this regime"),
        ),
        Some(outcome) if outcome.exit_reason == "stop_loss" => (
            String::new(),
            format!("Stop loss hit on {symbol}"),
            format!("Be cautious with {symbol}: consider wider stops or smaller size"),
        ),
        Some(_) => (
            String::new(),
            format!("Gave back profit on {symbol} before exit"),
            "Gave back too much profit; tighten trailing stops earlier".to_string(),
        ),
        None => (String::new(), String::new(), "Outcome not yet known".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Signal;

    fn episode(id: &str, symbol: &str, text: &str, ts: DateTime<Utc>, pnl: Option<f64>, tags: Vec<&str>) -> Episode {
        Episode {
            episode_id: id.to_string(),
            timestamp: ts,
            market_state_text: text.to_string(),
            market_state_embedding_text: text.to_string(),
            symbol: symbol.to_string(),
            venue: "rest_signed".to_string(),
            signal: Signal::Buy,
            entry_price: 100.0,
            quantity: 1.0,
            stop_loss: None,
            take_profit: None,
            agent_id: "a1".to_string(),
            reasoning: String::new(),
            confidence: 0.8,
            outcome: pnl.map(|p| Outcome { pnl: p, pnl_pct: p / 100.0, exit_reason: "take_profit".to_string(), closed_at: ts }),
            what_worked: None,
            what_failed: None,
            lesson: String::new(),
            tags: tags.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn store_and_get_by_id() {
        let mut mem = EpisodicMemory::new(100);
        let ep = episode("ep1", "BTCUSDT", "rsi oversold bullish", Utc::now(), None, vec![]);
        mem.store(ep);
        assert!(mem.get_by_id("ep1").is_some());
    }

    #[test]
    fn update_outcome_is_idempotent() {
        let mut mem = EpisodicMemory::new(100);
        mem.store(episode("ep1", "BTCUSDT", "text", Utc::now(), None, vec![]));
        let outcome = Outcome { pnl: 5.0, pnl_pct: 0.05, exit_reason: "take_profit".to_string(), closed_at: Utc::now() };
        assert!(mem.update_outcome("ep1", outcome.clone()));
        assert!(mem.update_outcome("ep1", outcome));
        assert_eq!(mem.get_by_id("ep1").unwrap().outcome.as_ref().unwrap().pnl, 5.0);
    }

    #[test]
    fn recall_similar_prefers_profitable_and_similar() {
        let mut mem = EpisodicMemory::new(100);
        let now = Utc::now();
        mem.store(episode("ep_profit", "BTCUSDT", "rsi oversold bullish macd", now, Some(10.0), vec![]));
        mem.store(episode("ep_loss", "BTCUSDT", "rsi oversold bullish macd", now, Some(-5.0), vec![]));
        let results = mem.recall_similar("rsi oversold bullish macd", Some(&"BTCUSDT".to_string()), 5, true);
        assert_eq!(results[0].episode_id, "ep_profit");
    }

    #[test]
    fn prunes_oldest_when_over_cap() {
        let mut mem = EpisodicMemory::new(2);
        mem.store(episode("ep1", "BTCUSDT", "a", Utc::now() - chrono::Duration::hours(2), None, vec![]));
        mem.store(episode("ep2", "BTCUSDT", "b", Utc::now() - chrono::Duration::hours(1), None, vec![]));
        mem.store(episode("ep3", "BTCUSDT", "c", Utc::now(), None, vec![]));
        assert_eq!(mem.get_by_id("ep1"), None);
        assert!(mem.get_by_id("ep2").is_some());
        assert!(mem.get_by_id("ep3").is_some());
    }

    #[test]
    fn stats_include_per_tag_win_rate() {
        let mut mem = EpisodicMemory::new(100);
        mem.store(episode("ep1", "BTCUSDT", "a", Utc::now(), Some(10.0), vec!["breakout"]));
        mem.store(episode("ep2", "BTCUSDT", "b", Utc::now(), Some(-5.0), vec!["breakout"]));
        let stats = mem.get_stats();
        assert_eq!(stats.episodes_with_outcome, 2);
        assert!((stats.tag_win_rates["breakout"] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn rule_based_reflection_on_stop_loss() {
        let ep = episode("ep1", "BTCUSDT", "a", Utc::now(), Some(-5.0), vec![]);
        let mut ep = ep;
        ep.outcome.as_mut().unwrap().exit_reason = "stop_loss".to_string();
        let (_, what_failed, lesson) = synthesize_reflection(&ep);
        assert!(what_failed.contains("Stop loss"));
        assert!(lesson.contains("wider stops"));
    }
}
