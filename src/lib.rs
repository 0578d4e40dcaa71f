//! Autonomous multi-agent cryptocurrency trading platform.
//!
//! A population of heterogeneous trading agents each form an independent
//! thesis from a shared market-data store; a consensus engine fuses their
//! votes; a risk engine sizes and gates the trade; an execution layer fills
//! it through one of several algorithms against a routed venue adapter; a
//! position manager tracks the open book and its exit rules; an episodic
//! memory records the decision and its eventual outcome so future theses can
//! draw on what has and hasn't worked. One orchestrator ties the pipeline
//! together on a fixed tick; an optional slow outer loop tunes agent
//! parameters based on realized performance.

pub mod agents;
pub mod cio;
pub mod config;
pub mod consensus;
pub mod data_store;
pub mod error;
pub mod execution;
pub mod feature_pipeline;
pub mod http;
pub mod memory;
pub mod orchestrator;
pub mod persistence;
pub mod position;
pub mod risk;
pub mod scanner;
pub mod types;

/// Re-exports of the types most callers reach for, one per component.
pub mod prelude {
    pub use crate::agents::population::{default_roster, AgentPopulation};
    pub use crate::agents::{Agent, AgentState, Personality, Specialization, Thesis};
    pub use crate::cio::{CioLoop, Intervention};
    pub use crate::config::Config;
    pub use crate::consensus::{fuse, AgentVote, ConsensusResult};
    pub use crate::data_store::{DataStore, IndicatorValue};
    pub use crate::error::{ErrorCategory, ErrorSeverity, ErrorTally, TradingError};
    pub use crate::execution::{Algo, ExecutionLayer, ExecutionOrder, ExecutionResult, VenueAdapter};
    pub use crate::feature_pipeline::FeaturePipeline;
    pub use crate::http::{AdminApi, DashboardSnapshot, HealthStatus};
    pub use crate::memory::{Episode, EpisodicMemory, MemoryStats, Outcome};
    pub use crate::orchestrator::Orchestrator;
    pub use crate::persistence::{FileStore, Store};
    pub use crate::position::{ExitReason, Position, PositionManager};
    pub use crate::risk::{RiskEngine, SizedOrder};
    pub use crate::scanner::{MarketScanner, Opportunity};
    pub use crate::types::{PositionSide, Side, Signal, Symbol, Trend};
}
