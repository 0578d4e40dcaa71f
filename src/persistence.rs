//! Persisted state layout (§6.5): positions/trades/episodes written through
//! on every mutation, best-effort (a failed write warns and retries on the
//! next mutation rather than panicking the tick loop).
//!
//! Grounded on the teacher's `src/capital/manager.rs` usage-history
//! bookkeeping style, retargeted from an in-memory `Vec` to on-disk JSON
//! files since this system persists across restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::memory::Episode;
use crate::position::Position;
use crate::types::Symbol;

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct TradeRecord {
    pub symbol: Symbol,
    pub agent_id: String,
    pub signal: crate::types::Signal,
    pub pnl: f64,
    pub reasoning: String,
    pub closed_at: chrono::DateTime<chrono::Utc>,
}

/// Persistence seam every store variant implements. `FileStore` is the
/// concrete implementation; tests may swap in an in-memory fake.
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_positions(&self, positions: &HashMap<Symbol, Position>);
    async fn load_positions(&self) -> HashMap<Symbol, Position>;
    async fn append_trade(&self, trade: &TradeRecord);
    async fn load_trades(&self) -> Vec<TradeRecord>;
    async fn save_episode(&self, episode: &Episode);
    async fn load_episode(&self, episode_id: &str) -> Option<Episode>;
}

const TRADES_CAP: usize = 5000;

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn positions_path(&self) -> PathBuf {
        self.root.join("positions.json")
    }

    fn trades_path(&self) -> PathBuf {
        self.root.join("trades.json")
    }

    fn episode_path(&self, episode_id: &str) -> PathBuf {
        self.root.join("episodes").join(format!("{episode_id}.json"))
    }

    async fn write_json<T: Serialize + Sync>(&self, path: &Path, value: &T) {
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(path = %path.display(), error = %e, "persistence: failed to create directory");
                return;
            }
        }
        match serde_json::to_vec_pretty(value) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(path, bytes).await {
                    warn!(path = %path.display(), error = %e, "persistence: write-through failed, will retry on next mutation");
                }
            }
            Err(e) => warn!(path = %path.display(), error = %e, "persistence: serialization failed"),
        }
    }

    async fn read_json<T: DeserializeOwned + Default>(&self, path: &Path) -> T {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => T::default(),
        }
    }
}

#[async_trait]
impl Store for FileStore {
    async fn save_positions(&self, positions: &HashMap<Symbol, Position>) {
        self.write_json(&self.positions_path(), positions).await;
    }

    async fn load_positions(&self) -> HashMap<Symbol, Position> {
        self.read_json(&self.positions_path()).await
    }

    async fn append_trade(&self, trade: &TradeRecord) {
        let mut trades: Vec<TradeRecord> = self.read_json(&self.trades_path()).await;
        trades.push(trade.clone());
        if trades.len() > TRADES_CAP {
            let overflow = trades.len() - TRADES_CAP;
            trades.drain(0..overflow);
        }
        self.write_json(&self.trades_path(), &trades).await;
    }

    async fn load_trades(&self) -> Vec<TradeRecord> {
        self.read_json(&self.trades_path()).await
    }

    async fn save_episode(&self, episode: &Episode) {
        self.write_json(&self.episode_path(&episode.episode_id), episode).await;
    }

    async fn load_episode(&self, episode_id: &str) -> Option<Episode> {
        let path = self.episode_path(episode_id);
        if !path.exists() {
            return None;
        }
        Some(self.read_json(&path).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PositionSide, Signal};

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("omni_persistence_test_{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn positions_round_trip() {
        let store = FileStore::new(temp_dir());
        let mut positions = HashMap::new();
        positions.insert(
            "BTCUSDT".to_string(),
            Position {
                symbol: "BTCUSDT".to_string(),
                agent_id: "a1".to_string(),
                side: PositionSide::Long,
                quantity: 1.0,
                entry_price: 100.0,
                stop_loss: 95.0,
                take_profit: 105.0,
                opened_at: chrono::Utc::now(),
                venue: "rest_signed".to_string(),
                tp_order_id: None,
                sl_order_id: None,
                episode_id: "ep_test".to_string(),
            },
        );
        store.save_positions(&positions).await;
        let loaded = store.load_positions().await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["BTCUSDT"].entry_price, 100.0);
    }

    #[tokio::test]
    async fn trades_append_and_cap() {
        let store = FileStore::new(temp_dir());
        let trade = TradeRecord {
            symbol: "BTCUSDT".to_string(),
            agent_id: "a1".to_string(),
            signal: Signal::Buy,
            pnl: 1.0,
            reasoning: String::new(),
            closed_at: chrono::Utc::now(),
        };
        store.append_trade(&trade).await;
        store.append_trade(&trade).await;
        let loaded = store.load_trades().await;
        assert_eq!(loaded.len(), 2);
    }
}
