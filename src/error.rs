//! Error kinds and the severity/category vocabulary shared by every component.
//!
//! The propagation policy per kind follows the table in the system design:
//! transient network errors retry inside the adapter, data-missing skips the
//! symbol for the tick, auth/signature failures are fatal at startup, and so
//! on. Components convert into `TradingError` at their boundary rather than
//! leaking `reqwest`/`serde_json` errors upward.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Severity bucket used for health reporting and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Classification used to increment per-kind, per-venue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Network,
    DataMissing,
    Auth,
    Funds,
    Leverage,
    RiskHalt,
    Reconciliation,
    Llm,
    Persistence,
    Invariant,
}

/// The error kinds enumerated in the error-handling design.
#[derive(Debug, Error)]
pub enum TradingError {
    #[error("transient network error calling {venue}: {source}")]
    Network {
        venue: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("no market data for {symbol}")]
    DataMissing { symbol: String },

    #[error("signature/auth failure: {0}")]
    Auth(String),

    #[error("order rejected ({venue}): {reason}")]
    Funds { venue: String, reason: String },

    #[error("leverage rejected by {venue}, retry at 1x pending")]
    Leverage { venue: String },

    #[error("risk halted: {0}")]
    RiskHalted(String),

    #[error("reconciliation drift on {symbol}: {detail}")]
    Reconciliation { symbol: String, detail: String },

    #[error("llm query failed: {0}")]
    Llm(String),

    #[error("persistence write failed: {0}")]
    Persistence(String),

    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl TradingError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            TradingError::Network { .. } => ErrorCategory::Network,
            TradingError::DataMissing { .. } => ErrorCategory::DataMissing,
            TradingError::Auth(_) => ErrorCategory::Auth,
            TradingError::Funds { .. } => ErrorCategory::Funds,
            TradingError::Leverage { .. } => ErrorCategory::Leverage,
            TradingError::RiskHalted(_) => ErrorCategory::RiskHalt,
            TradingError::Reconciliation { .. } => ErrorCategory::Reconciliation,
            TradingError::Llm(_) => ErrorCategory::Llm,
            TradingError::Persistence(_) => ErrorCategory::Persistence,
            TradingError::Invariant(_) => ErrorCategory::Invariant,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            TradingError::Auth(_) | TradingError::Invariant(_) => ErrorSeverity::Critical,
            TradingError::RiskHalted(_) => ErrorSeverity::High,
            TradingError::Network { .. } | TradingError::Leverage { .. } => ErrorSeverity::Medium,
            TradingError::DataMissing { .. }
            | TradingError::Funds { .. }
            | TradingError::Reconciliation { .. }
            | TradingError::Llm(_)
            | TradingError::Persistence(_) => ErrorSeverity::Low,
        }
    }
}

/// Exit codes defined in the external-interfaces section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Clean = 0,
    FatalStartup = 1,
    InvariantViolation = 2,
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as i32)
    }
}

/// Running tally of errors by category, backing `HealthStatus` and any future
/// metrics exporter. Deliberately in-process only; no exporter is wired here.
#[derive(Debug, Default)]
pub struct ErrorTally {
    counts: std::collections::HashMap<(ErrorCategory, String), u64>,
    pub last_error: Option<String>,
}

impl ErrorTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, venue: &str, err: &TradingError) {
        *self
            .counts
            .entry((err.category(), venue.to_string()))
            .or_insert(0) += 1;
        self.last_error = Some(err.to_string());
    }

    pub fn count(&self, category: ErrorCategory, venue: &str) -> u64 {
        self.counts
            .get(&(category, venue.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

pub type Result<T> = std::result::Result<T, TradingError>;
