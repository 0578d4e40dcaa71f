//! Runtime configuration, enumerated in full per the external-interfaces spec.
//!
//! Loaded from environment variables the way the teacher's binaries load
//! Bybit credentials via `dotenv` + `std::env::var` (see `src/bin/omni_alpha.rs`),
//! with the numeric bounds the original Python service enforced via pydantic
//! `Field(ge=..., le=...)` re-applied here as explicit validation so an
//! out-of-range value is a fatal startup error (exit code 1), not silent
//! clamping.

use std::env;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub aster_api_key: Option<String>,
    pub aster_api_secret: Option<String>,
    pub rest_base_url: String,
    pub ws_base_url: String,
    pub symbols: Vec<String>,
    pub decision_interval_seconds: u64,
    pub max_concurrent_positions: usize,
    pub max_position_risk: f64,
    pub max_drawdown: f64,
    /// Fraction of margin_allocation (per agent) or equity (aggregate) that
    /// realized daily loss may not exceed before the corresponding circuit
    /// breaker trips.
    pub max_daily_loss_pct: f64,
    pub volatility_delever_threshold: f64,
    pub auto_delever_factor: f64,
    pub bandit_epsilon: f64,
    pub trailing_stop_buffer: f64,
    pub trailing_step: f64,
    pub momentum_threshold: f64,
    pub notional_fraction: f64,
    pub log_level: String,
    pub enable_paper_trading: bool,
    pub kelly_fraction_cap: f64,
    pub max_portfolio_leverage: f64,
    pub expected_win_rate: f64,
    pub reward_to_risk: f64,
    pub admin_api_token: Option<String>,
    pub redis_url: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            aster_api_key: None,
            aster_api_secret: None,
            rest_base_url: "https://fapi.asterdex.com".to_string(),
            ws_base_url: "wss://fstream.asterdex.com".to_string(),
            symbols: vec![
                "BTCUSDT".to_string(),
                "ETHUSDT".to_string(),
                "SOLUSDT".to_string(),
            ],
            decision_interval_seconds: 30,
            max_concurrent_positions: 3,
            max_position_risk: 0.10,
            max_drawdown: 0.20,
            max_daily_loss_pct: 0.05,
            volatility_delever_threshold: 4.0,
            auto_delever_factor: 0.5,
            bandit_epsilon: 0.1,
            trailing_stop_buffer: 0.01,
            trailing_step: 0.002,
            momentum_threshold: 2.5,
            notional_fraction: 0.05,
            log_level: "info".to_string(),
            enable_paper_trading: true,
            kelly_fraction_cap: 0.5,
            max_portfolio_leverage: 10.0,
            expected_win_rate: 0.55,
            reward_to_risk: 2.0,
            admin_api_token: None,
            redis_url: None,
            telegram_bot_token: None,
            telegram_chat_id: None,
        }
    }
}

fn env_f64(key: &str, default: f64) -> Result<f64> {
    match env::var(key) {
        Ok(v) => v.parse::<f64>().with_context(|| format!("{key} must be a float")),
        Err(_) => Ok(default),
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(v) => v.parse::<u64>().with_context(|| format!("{key} must be an integer")),
        Err(_) => Ok(default),
    }
}

fn env_usize(key: &str, default: usize) -> Result<usize> {
    match env::var(key) {
        Ok(v) => v.parse::<usize>().with_context(|| format!("{key} must be an integer")),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load from the environment (via `.env` if present), applying the
    /// documented ranges. Any violation is a fatal startup error.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = Config::default();
        let cfg = Config {
            aster_api_key: env::var("ASTER_API_KEY").ok(),
            aster_api_secret: env::var("ASTER_SECRET_KEY").ok(),
            rest_base_url: env::var("ASTER_REST_URL").unwrap_or(defaults.rest_base_url),
            ws_base_url: env::var("ASTER_WS_URL").unwrap_or(defaults.ws_base_url),
            symbols: env::var("SYMBOLS")
                .map(|s| s.split(',').map(|p| p.trim().to_string()).collect())
                .unwrap_or(defaults.symbols),
            decision_interval_seconds: env_u64(
                "DECISION_INTERVAL_SECONDS",
                defaults.decision_interval_seconds,
            )?,
            max_concurrent_positions: env_usize(
                "MAX_CONCURRENT_POSITIONS",
                defaults.max_concurrent_positions,
            )?,
            max_position_risk: env_f64("MAX_POSITION_RISK", defaults.max_position_risk)?,
            max_drawdown: env_f64("MAX_DRAWDOWN", defaults.max_drawdown)?,
            max_daily_loss_pct: env_f64("MAX_DAILY_LOSS_PCT", defaults.max_daily_loss_pct)?,
            volatility_delever_threshold: env_f64(
                "VOLATILITY_DELEVER_THRESHOLD",
                defaults.volatility_delever_threshold,
            )?,
            auto_delever_factor: env_f64("AUTO_DELEVER_FACTOR", defaults.auto_delever_factor)?,
            bandit_epsilon: env_f64("BANDIT_EPSILON", defaults.bandit_epsilon)?,
            trailing_stop_buffer: env_f64("TRAILING_STOP_BUFFER", defaults.trailing_stop_buffer)?,
            trailing_step: env_f64("TRAILING_STEP", defaults.trailing_step)?,
            momentum_threshold: env_f64("MOMENTUM_THRESHOLD", defaults.momentum_threshold)?,
            notional_fraction: env_f64("NOTIONAL_FRACTION", defaults.notional_fraction)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            enable_paper_trading: env_bool("ENABLE_PAPER_TRADING", defaults.enable_paper_trading),
            kelly_fraction_cap: env_f64("KELLY_FRACTION_CAP", defaults.kelly_fraction_cap)?,
            max_portfolio_leverage: env_f64(
                "MAX_PORTFOLIO_LEVERAGE",
                defaults.max_portfolio_leverage,
            )?,
            expected_win_rate: env_f64("EXPECTED_WIN_RATE", defaults.expected_win_rate)?,
            reward_to_risk: env_f64("REWARD_TO_RISK", defaults.reward_to_risk)?,
            admin_api_token: env::var("ADMIN_API_TOKEN").ok(),
            redis_url: env::var("REDIS_URL").ok(),
            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").ok(),
            telegram_chat_id: env::var("TELEGRAM_CHAT_ID").ok(),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        fn in_range(name: &str, v: f64, lo: f64, hi: f64) -> Result<()> {
            if v < lo || v > hi {
                bail!("{name}={v} out of range [{lo}, {hi}]");
            }
            Ok(())
        }

        if !(5..=300).contains(&self.decision_interval_seconds) {
            bail!(
                "decision_interval_seconds={} out of range [5, 300]",
                self.decision_interval_seconds
            );
        }
        if !(1..=10).contains(&self.max_concurrent_positions) {
            bail!(
                "max_concurrent_positions={} out of range [1, 10]",
                self.max_concurrent_positions
            );
        }
        in_range("max_position_risk", self.max_position_risk, 0.0, 0.5)?;
        in_range("max_drawdown", self.max_drawdown, 0.0, 0.8)?;
        in_range("max_daily_loss_pct", self.max_daily_loss_pct, 0.0, 0.5)?;
        in_range("auto_delever_factor", self.auto_delever_factor, 0.0, 1.0)?;
        in_range("bandit_epsilon", self.bandit_epsilon, 0.0, 1.0)?;
        in_range("trailing_stop_buffer", self.trailing_stop_buffer, 0.0, 0.1)?;
        in_range("trailing_step", self.trailing_step, 0.0, 0.05)?;
        in_range("notional_fraction", self.notional_fraction, 0.0, 0.5)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn out_of_range_rejected() {
        let mut cfg = Config::default();
        cfg.max_drawdown = 5.0;
        assert!(cfg.validate().is_err());
    }
}
