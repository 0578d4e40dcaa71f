//! Position Manager (C8): tracks open positions, runs the per-tick exit
//! checks, trailing-stop ratchet, and venue reconciliation.
//!
//! Grounded on the teacher's `src/position/position_manager.rs` `Position`
//! shape (direction/size/entry/current/stop_loss/take_profit/pnl fields),
//! generalized from that module's pure tracking role to own the exit-rule
//! evaluation the spec assigns to this component.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agents::Specialization;
use crate::types::{PositionSide, Symbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Reversal,
    Stagnation,
    BadInheritance,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Reversal => "reversal",
            ExitReason::Stagnation => "stagnation",
            ExitReason::BadInheritance => "bad_inheritance",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub agent_id: String,
    pub side: PositionSide,
    pub quantity: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub opened_at: DateTime<Utc>,
    pub venue: String,
    pub tp_order_id: Option<String>,
    pub sl_order_id: Option<String>,
    /// Id of the episode recorded when this position was opened, so it can
    /// be found again when the position closes. Empty for positions adopted
    /// through reconciliation, which never had an opening episode.
    pub episode_id: String,
}

impl Position {
    pub fn pnl_pct(&self, current_price: f64) -> f64 {
        match self.side {
            PositionSide::Long => (current_price - self.entry_price) / self.entry_price,
            PositionSide::Short => (self.entry_price - current_price) / self.entry_price,
        }
    }
}

pub struct PositionManager {
    positions: HashMap<Symbol, Position>,
}

const STALENESS_HOURS: i64 = 4;
const STALENESS_PNL_THRESHOLD: f64 = 0.005;
const SCALP_PNL_THRESHOLD: f64 = 0.008;

impl PositionManager {
    pub fn new() -> Self {
        Self { positions: HashMap::new() }
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn insert(&mut self, position: Position) {
        self.positions.insert(position.symbol.clone(), position);
    }

    pub fn remove(&mut self, symbol: &Symbol) -> Option<Position> {
        self.positions.remove(symbol)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.positions.keys().cloned().collect()
    }

    /// Weighted-average entry merge used by both reconciliation and
    /// scale-in/double-down: new average = (old_notional + add_notional) /
    /// (old_qty + add_qty).
    pub fn merge_scale_in(&mut self, symbol: &Symbol, add_qty: f64, add_price: f64) {
        if let Some(pos) = self.positions.get_mut(symbol) {
            let old_notional = pos.quantity * pos.entry_price;
            let add_notional = add_qty * add_price;
            let new_qty = pos.quantity + add_qty;
            if new_qty > 0.0 {
                pos.entry_price = (old_notional + add_notional) / new_qty;
                pos.quantity = new_qty;
            }
        }
    }

    /// TP/SL check: LONG exits at `take_profit` when price rises past it,
    /// at `stop_loss` when it falls past it; SHORT mirrored.
    fn tp_sl_check(position: &Position, current_price: f64) -> Option<ExitReason> {
        match position.side {
            PositionSide::Long => {
                if current_price >= position.take_profit {
                    Some(ExitReason::TakeProfit)
                } else if current_price <= position.stop_loss {
                    Some(ExitReason::StopLoss)
                } else {
                    None
                }
            }
            PositionSide::Short => {
                if current_price <= position.take_profit {
                    Some(ExitReason::TakeProfit)
                } else if current_price >= position.stop_loss {
                    Some(ExitReason::StopLoss)
                } else {
                    None
                }
            }
        }
    }

    /// Forced scalp exit for momentum/market-making/hft specializations once
    /// `pnl_pct` clears the scalp threshold.
    fn scalp_check(position: &Position, current_price: f64, specialization: Specialization) -> Option<ExitReason> {
        if specialization.is_scalp_eligible() && position.pnl_pct(current_price) > SCALP_PNL_THRESHOLD {
            Some(ExitReason::TakeProfit)
        } else {
            None
        }
    }

    fn staleness_check(position: &Position, current_price: f64, now: DateTime<Utc>) -> Option<ExitReason> {
        let age = now - position.opened_at;
        if age > ChronoDuration::hours(STALENESS_HOURS) && position.pnl_pct(current_price).abs() < STALENESS_PNL_THRESHOLD {
            Some(ExitReason::Stagnation)
        } else {
            None
        }
    }

    /// Evaluates TP/SL, scalp and staleness exits for every open position
    /// against a batched ticker map. Reversal exits are evaluated separately
    /// by the orchestrator, which has the fresh per-symbol thesis.
    pub fn evaluate_exits(&self, tickers: &HashMap<Symbol, f64>, specializations: &HashMap<String, Specialization>, now: DateTime<Utc>) -> Vec<(Symbol, ExitReason)> {
        let mut exits = Vec::new();
        for (symbol, position) in &self.positions {
            let Some(&price) = tickers.get(symbol) else { continue };

            if let Some(reason) = Self::tp_sl_check(position, price) {
                exits.push((symbol.clone(), reason));
                continue;
            }

            let specialization = specializations.get(&position.agent_id).copied().unwrap_or(Specialization::Technical);
            if let Some(reason) = Self::scalp_check(position, price, specialization) {
                exits.push((symbol.clone(), reason));
                continue;
            }

            if let Some(reason) = Self::staleness_check(position, price, now) {
                exits.push((symbol.clone(), reason));
            }
        }
        exits
    }

    /// Reversal close: a fresh opposing signal at confidence > 0.5.
    pub fn check_reversal(&self, symbol: &Symbol, opposes_position: bool, confidence: f64) -> Option<ExitReason> {
        if self.positions.contains_key(symbol) && opposes_position && confidence > 0.5 {
            Some(ExitReason::Reversal)
        } else {
            None
        }
    }

    /// Ratchets the stop loss toward break-even and then a locked-in gain as
    /// profit grows. Mutates in place; returns `true` if the stop moved.
    pub fn apply_trailing_stop(&mut self, symbol: &Symbol, current_price: f64) -> bool {
        let Some(position) = self.positions.get_mut(symbol) else { return false };
        let pnl = position.pnl_pct(current_price);
        let mut moved = false;

        match position.side {
            PositionSide::Long => {
                if pnl > 0.015 && position.stop_loss < position.entry_price {
                    position.stop_loss = position.entry_price * 1.002;
                    moved = true;
                }
                if pnl > 0.03 && position.stop_loss < position.entry_price * 1.015 {
                    position.stop_loss = position.entry_price * 1.015;
                    moved = true;
                }
            }
            PositionSide::Short => {
                if pnl > 0.015 && position.stop_loss > position.entry_price {
                    position.stop_loss = position.entry_price * 0.998;
                    moved = true;
                }
                if pnl > 0.03 && position.stop_loss > position.entry_price * 0.985 {
                    position.stop_loss = position.entry_price * 0.985;
                    moved = true;
                }
            }
        }
        if moved {
            info!(symbol, new_stop = position.stop_loss, "trailing stop raised");
        }
        moved
    }

    /// Reconciliation (every 60s): drops internally-open/venue-flat
    /// positions, adopts venue-open/internally-unknown positions with
    /// defensive +/-2% SL/TP, and corrects quantity drift >1%.
    pub fn reconcile(&mut self, venue_positions: &HashMap<Symbol, (PositionSide, f64, f64)>, default_reviewer_agent: &str) -> Vec<String> {
        let mut actions = Vec::new();

        let internal_symbols: Vec<Symbol> = self.positions.keys().cloned().collect();
        for symbol in internal_symbols {
            if !venue_positions.contains_key(&symbol) {
                self.positions.remove(&symbol);
                actions.push(format!("{symbol}: internal position removed (flat on venue)"));
            }
        }

        for (symbol, (side, qty, price)) in venue_positions {
            match self.positions.get_mut(symbol) {
                None => {
                    let (stop_loss, take_profit) = match side {
                        PositionSide::Long => (price * 0.98, price * 1.02),
                        PositionSide::Short => (price * 1.02, price * 0.98),
                    };
                    self.positions.insert(
                        symbol.clone(),
                        Position {
                            symbol: symbol.clone(),
                            agent_id: default_reviewer_agent.to_string(),
                            side: *side,
                            quantity: *qty,
                            entry_price: *price,
                            stop_loss,
                            take_profit,
                            opened_at: Utc::now(),
                            venue: "unknown".to_string(),
                            tp_order_id: None,
                            sl_order_id: None,
                            episode_id: String::new(),
                        },
                    );
                    warn!(symbol, "adopted unknown venue position under reviewer agent");
                    actions.push(format!("{symbol}: adopted with defensive SL/TP"));
                }
                Some(position) => {
                    let drift = (position.quantity - qty).abs() / position.quantity.max(1e-9);
                    if drift > 0.01 {
                        position.quantity = *qty;
                        actions.push(format!("{symbol}: quantity corrected to venue truth ({qty})"));
                    }
                }
            }
        }

        actions
    }

    /// Startup takeover review: an inherited position is closed immediately
    /// if the fresh signal opposes its side at confidence > 0.6.
    pub fn review_inherited(&self, symbol: &Symbol, opposes_side: bool, confidence: f64) -> Option<ExitReason> {
        if self.positions.contains_key(symbol) && opposes_side && confidence > 0.6 {
            Some(ExitReason::BadInheritance)
        } else {
            None
        }
    }
}

impl Default for PositionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_position(entry: f64, sl: f64, tp: f64) -> Position {
        Position {
            symbol: "BTCUSDT".into(),
            agent_id: "a1".into(),
            side: PositionSide::Long,
            quantity: 1.0,
            entry_price: entry,
            stop_loss: sl,
            take_profit: tp,
            opened_at: Utc::now(),
            venue: "rest_signed".into(),
            tp_order_id: None,
            sl_order_id: None,
            episode_id: "ep_test".into(),
        }
    }

    /// S5: position lifecycle — take profit triggers an exit once price
    /// clears the target.
    #[test]
    fn tp_sl_check_triggers_take_profit_long() {
        let pos = long_position(100.0, 95.0, 105.0);
        assert_eq!(PositionManager::tp_sl_check(&pos, 106.0), Some(ExitReason::TakeProfit));
        assert_eq!(PositionManager::tp_sl_check(&pos, 94.0), Some(ExitReason::StopLoss));
        assert_eq!(PositionManager::tp_sl_check(&pos, 100.0), None);
    }

    /// S6: trailing stop raises to break-even+ then locks +1.5%.
    #[test]
    fn trailing_stop_ratchets_up() {
        let mut mgr = PositionManager::new();
        mgr.insert(long_position(100.0, 95.0, 200.0));

        assert!(mgr.apply_trailing_stop(&"BTCUSDT".to_string(), 101.6));
        assert!((mgr.get(&"BTCUSDT".to_string()).unwrap().stop_loss - 100.2).abs() < 1e-9);

        assert!(mgr.apply_trailing_stop(&"BTCUSDT".to_string(), 103.1));
        assert!((mgr.get(&"BTCUSDT".to_string()).unwrap().stop_loss - 101.5).abs() < 1e-9);
    }

    #[test]
    fn staleness_closes_flat_old_position() {
        let mut pos = long_position(100.0, 95.0, 105.0);
        pos.opened_at = Utc::now() - ChronoDuration::hours(5);
        let reason = PositionManager::staleness_check(&pos, 100.3, Utc::now());
        assert_eq!(reason, Some(ExitReason::Stagnation));
    }

    #[test]
    fn scalp_eligible_specialization_exits_small_gain() {
        let pos = long_position(100.0, 95.0, 200.0);
        let reason = PositionManager::scalp_check(&pos, 100.9, Specialization::Momentum);
        assert_eq!(reason, Some(ExitReason::TakeProfit));
        let none = PositionManager::scalp_check(&pos, 100.9, Specialization::Technical);
        assert_eq!(none, None);
    }

    #[test]
    fn reconcile_adopts_unknown_venue_position() {
        let mut mgr = PositionManager::new();
        let mut venue = HashMap::new();
        venue.insert("ETHUSDT".to_string(), (PositionSide::Long, 2.0, 3000.0));
        let actions = mgr.reconcile(&venue, "reviewer");
        assert_eq!(mgr.len(), 1);
        assert!(actions[0].contains("adopted"));
        let adopted = mgr.get(&"ETHUSDT".to_string()).unwrap();
        assert!((adopted.stop_loss - 2940.0).abs() < 1e-6);
    }

    #[test]
    fn reconcile_drops_internal_position_flat_on_venue() {
        let mut mgr = PositionManager::new();
        mgr.insert(long_position(100.0, 95.0, 105.0));
        let venue = HashMap::new();
        mgr.reconcile(&venue, "reviewer");
        assert!(mgr.is_empty());
    }

    #[test]
    fn bad_inheritance_closes_on_opposing_signal() {
        let mut mgr = PositionManager::new();
        mgr.insert(long_position(100.0, 95.0, 105.0));
        let reason = mgr.review_inherited(&"BTCUSDT".to_string(), true, 0.7);
        assert_eq!(reason, Some(ExitReason::BadInheritance));
        let none = mgr.review_inherited(&"BTCUSDT".to_string(), true, 0.5);
        assert_eq!(none, None);
    }
}
