//! Trading Orchestrator (C10): the main tick loop. Owns the positions map
//! and is its sole mutator, per the concurrency model's ownership invariant.
//!
//! Grounded on the teacher's `src/agents/main_strategy_controller.rs`
//! (an `Arc`-shared controller driving an `tokio::time::interval` loop over
//! a fixed set of sub-components) and `src/agents/agent_coordinator.rs`'s
//! decision-then-dispatch shape, re-targeted at this system's scan -> fuse
//! -> size -> execute -> record pipeline instead of the teacher's
//! quantum/zero-loss pipeline.
//!
//! Execution in this crate is synchronous end-to-end (`ExecutionLayer::execute`
//! awaits every slice before returning), so there is no separate
//! fill-polling step the way a venue with asynchronous order acknowledgement
//! would need. Step 2 of the tick reconciles internal position state against
//! a best-effort venue query (`reconcile_with_venue`); the venue order id
//! returned by a fill's final slice is recorded directly against the new
//! position in `open_new_position`.

use std::collections::HashMap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use crate::agents::population::AgentPopulation;
use crate::config::Config;
use crate::consensus::{fuse, votes_from_theses};
use crate::data_store::DataStore;
use crate::execution::{Algo, ExecutionLayer, ExecutionOrder};
use crate::memory::{Episode, EpisodicMemory, Outcome};
use crate::persistence::{Store, TradeRecord};
use crate::position::{ExitReason, Position, PositionManager};
use crate::risk::portfolio::OpenPosition;
use crate::risk::RiskEngine;
use crate::scanner::MarketScanner;
use crate::types::{PositionSide, Side, Signal, Symbol};

pub struct Orchestrator {
    config: Config,
    positions: RwLock<PositionManager>,
    agents: Arc<RwLock<AgentPopulation>>,
    scanner: MarketScanner,
    data_store: Arc<DataStore>,
    risk: Arc<RiskEngine>,
    execution: Arc<ExecutionLayer>,
    memory: RwLock<EpisodicMemory>,
    store: Arc<dyn Store>,
    shutdown: tokio::sync::watch::Receiver<bool>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        agents: Arc<RwLock<AgentPopulation>>,
        scanner: MarketScanner,
        data_store: Arc<DataStore>,
        risk: Arc<RiskEngine>,
        execution: Arc<ExecutionLayer>,
        memory: EpisodicMemory,
        store: Arc<dyn Store>,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            positions: RwLock::new(PositionManager::new()),
            agents,
            scanner,
            data_store,
            risk,
            execution,
            memory: RwLock::new(memory),
            store,
            shutdown,
        }
    }

    /// Shared handle to the agent population, for wiring the CIO outer loop
    /// against the same roster this orchestrator drives.
    pub fn agents_handle(&self) -> Arc<RwLock<AgentPopulation>> {
        self.agents.clone()
    }

    /// Loads any positions persisted by a prior run and subjects each to the
    /// startup takeover review: a fresh thesis that opposes the inherited
    /// side at confidence > 0.6 closes it immediately rather than carrying
    /// forward a position this process never opened.
    pub async fn load_inherited_positions(&self) {
        let loaded = self.store.load_positions().await;
        if loaded.is_empty() {
            return;
        }
        for (symbol, position) in loaded {
            info!(symbol, "inheriting position from prior run");
            self.positions.write().await.insert(position);

            let thesis_signal = self.fresh_signal(&symbol).await;
            let Some((signal, confidence)) = thesis_signal else { continue };
            let position_side = self.positions.read().await.get(&symbol).map(|p| p.side);
            let opposes = matches!((position_side, signal), (Some(PositionSide::Long), Signal::Sell) | (Some(PositionSide::Short), Signal::Buy));

            let reason = self.positions.read().await.review_inherited(&symbol, opposes, confidence);
            if let Some(reason) = reason {
                if let Some(price) = self.current_price(&symbol).await {
                    warn!(symbol, "inherited position opposed by fresh thesis, closing");
                    self.close_position(&symbol, price, reason).await;
                }
            }
        }
    }

    pub async fn run(&self) {
        let mut ticker = interval(Duration::from_secs(self.config.decision_interval_seconds));
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "tick failed");
                    }
                }
                _ = self.wait_for_shutdown() => break,
            }
        }
        self.graceful_shutdown().await;
    }

    async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown.clone();
        let _ = rx.wait_for(|v| *v).await;
    }

    /// One full tick: pre-roll, position monitoring, liquidation guard,
    /// scan+decide, context injection, size+validate, execute, record,
    /// scale-in.
    pub async fn tick(&self) -> anyhow::Result<()> {
        self.pre_roll().await;
        self.reconcile_with_venue().await;
        self.monitor_positions().await;
        self.run_liquidation_guard().await;

        let Some((symbol, venue_hint)) = self.pick_symbol().await else {
            return Ok(());
        };

        if self.positions.read().await.contains(&symbol) {
            self.manage_existing_position(&symbol).await;
            return Ok(());
        }

        self.open_new_position(&symbol, venue_hint).await
    }

    /// Step 1: refresh allocation, roll the day boundary for both the
    /// per-agent and aggregate daily-loss breakers.
    async fn pre_roll(&self) {
        self.agents.write().await.roll_day_boundary();
        self.risk.roll_day_boundary().await;
    }

    fn dynamic_allocation(&self, equity: f64, active_agents: usize) -> f64 {
        if active_agents == 0 {
            0.0
        } else {
            0.9 * equity / active_agents as f64
        }
    }

    /// Step 2: reconcile internal positions against venue state. A query
    /// failure (the common case for the paper/on-chain adapters in this
    /// crate, which don't model live position enumeration) carries the
    /// internal record forward unchanged rather than treating "unknown" as
    /// "flat"; only a confirmed-flat response drops the internal position.
    async fn reconcile_with_venue(&self) {
        let snapshot = self.positions_snapshot().await;
        if snapshot.is_empty() {
            return;
        }

        let mut venue_positions = HashMap::new();
        for (symbol, position) in &snapshot {
            match self.execution.query_position(symbol, None).await {
                Ok(Some(state)) => {
                    venue_positions.insert(symbol.clone(), state);
                }
                Ok(None) => {}
                Err(_) => {
                    venue_positions.insert(symbol.clone(), (position.side, position.quantity, position.entry_price));
                }
            }
        }

        let actions = self.positions.write().await.reconcile(&venue_positions, "reviewer");
        for action in actions {
            warn!(action, "position reconciliation");
        }
    }

    /// Step 3: TP/SL, scalp, staleness exits over a batched ticker fetch.
    async fn monitor_positions(&self) {
        let symbols = self.positions.read().await.symbols();
        if symbols.is_empty() {
            return;
        }

        let mut tickers = HashMap::new();
        for symbol in &symbols {
            if let Some(price) = self.current_price(symbol).await {
                tickers.insert(symbol.clone(), price);
            }
        }

        let specializations: HashMap<String, crate::agents::Specialization> = {
            let agents = self.agents.read().await;
            agents.states().into_iter().map(|s| (s.id.clone(), s.specialization)).collect()
        };

        let exits = {
            let positions = self.positions.read().await;
            positions.evaluate_exits(&tickers, &specializations, chrono::Utc::now())
        };

        for (symbol, reason) in exits {
            if let Some(&price) = tickers.get(&symbol) {
                self.close_position(&symbol, price, reason).await;
            }
        }

        for symbol in &symbols {
            if let Some(&price) = tickers.get(symbol) {
                self.positions.write().await.apply_trailing_stop(symbol, price);
            }
        }
    }

    /// Step 4: close the two largest positions by notional if maintenance
    /// margin exceeds 80% of margin balance.
    async fn run_liquidation_guard(&self) {
        let margin_balance = self.risk.equity().await;
        let open_positions: Vec<OpenPosition> = {
            let positions = self.positions.read().await;
            positions
                .symbols()
                .into_iter()
                .filter_map(|symbol| {
                    let position = positions.get(&symbol)?;
                    let notional = Decimal::from_f64(position.quantity * position.entry_price)?;
                    let maintenance_margin = notional * Decimal::new(5, 2);
                    Some(OpenPosition { symbol, notional, maintenance_margin })
                })
                .collect()
        };

        let to_close = self.risk.check_liquidation(margin_balance, &open_positions).await;
        for symbol in to_close {
            warn!(symbol, "liquidation guard: closing position");
            if let Some(price) = self.current_price(&symbol).await {
                self.close_position(&symbol, price, ExitReason::StopLoss).await;
            }
        }
    }

    async fn current_price(&self, symbol: &Symbol) -> Option<f64> {
        self.data_store.get("price", symbol).await.and_then(|v| v.as_scalar())
    }

    /// Step 5: pick a ranked opportunity, or fall back to a random eligible
    /// agent's allowed symbol.
    async fn pick_symbol(&self) -> Option<(Symbol, Option<String>)> {
        let opportunities = self.scanner.scan(&self.config.symbols, 1).await;
        if let Some(top) = opportunities.into_iter().next() {
            return Some((top.symbol, top.venue_hint));
        }
        let mut rng = rand::thread_rng();
        self.config.symbols.choose(&mut rng).map(|s| (s.clone(), None))
    }

    /// Scalp/reversal/double-down handling when a position already exists.
    async fn manage_existing_position(&self, symbol: &Symbol) {
        let Some(price) = self.current_price(symbol).await else { return };
        let thesis_signal = self.fresh_signal(symbol).await;

        let (opposes, confidence) = match thesis_signal {
            Some((signal, confidence)) => {
                let position_side = self.positions.read().await.get(symbol).map(|p| p.side);
                let opposes = match (position_side, signal) {
                    (Some(PositionSide::Long), Signal::Sell) => true,
                    (Some(PositionSide::Short), Signal::Buy) => true,
                    _ => false,
                };
                (opposes, confidence)
            }
            None => (false, 0.0),
        };

        let reversal = self.positions.read().await.check_reversal(symbol, opposes, confidence);
        if let Some(reason) = reversal {
            self.close_position(symbol, price, reason).await;
            return;
        }

        if confidence >= 0.85 && !opposes {
            self.scale_in(symbol, price, confidence).await;
        }
    }

    async fn fresh_signal(&self, symbol: &Symbol) -> Option<(Signal, f64)> {
        let eligible = self.agents.read().await.eligible_ids();
        let agent_id = eligible.first()?.clone();
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(&agent_id)?;
        let thesis = agent.analyze(symbol, &self.data_store).await;
        Some((thesis.signal, thesis.confidence))
    }

    /// Step 10: add a unit-size slice and reset SL/TP around the new average.
    async fn scale_in(&self, symbol: &Symbol, price: f64, confidence: f64) {
        let add_qty = {
            let positions = self.positions.read().await;
            positions.get(symbol).map(|p| p.quantity * 0.25)
        };
        let Some(add_qty) = add_qty else { return };
        info!(symbol, confidence, add_qty, "scaling in on high-confidence fresh thesis");
        self.positions.write().await.merge_scale_in(symbol, add_qty, price);
    }

    /// Steps 5-9 for a symbol with no existing position: thesis -> fuse ->
    /// recall -> size -> execute -> record.
    async fn open_new_position(&self, symbol: &Symbol, venue_hint: Option<String>) -> anyhow::Result<()> {
        let eligible = self.agents.read().await.eligible_ids();
        if eligible.is_empty() {
            return Ok(());
        }

        let theses = self.agents.write().await.analyze_all(symbol, &self.data_store).await;
        if theses.is_empty() {
            return Ok(());
        }

        let win_rates: HashMap<String, f64> = {
            let agents = self.agents.read().await;
            agents.states().into_iter().map(|s| (s.id.clone(), s.win_rate())).collect()
        };
        let votes = votes_from_theses(&theses, &win_rates);
        let consensus = fuse(symbol, votes);

        if consensus.signal == Signal::Hold {
            return Ok(());
        }

        let min_threshold = {
            let agents = self.agents.read().await;
            theses
                .iter()
                .find_map(|t| agents.states().into_iter().find(|s| s.id == t.agent_id).map(|s| s.adaptive_params.confidence_threshold))
                .unwrap_or(0.6)
        };
        if consensus.confidence < min_threshold {
            return Ok(());
        }

        let Some(price) = self.current_price(symbol).await else { return Ok(()) };
        let atr_pct = self.data_store.get("atr_pct", symbol).await.and_then(|v| v.as_scalar()).unwrap_or(1.0);
        let trend = match self.data_store.get("trend", symbol).await {
            Some(crate::data_store::IndicatorValue::Trend(t)) => t,
            _ => crate::types::Trend::Neutral,
        };

        let query_text = format!("{symbol} trend={trend:?} atr_pct={atr_pct:.2} signal={:?}", consensus.signal);
        let memories: Vec<Episode> = self
            .memory
            .read()
            .await
            .recall_similar(&query_text, Some(symbol), 5, true)
            .into_iter()
            .cloned()
            .collect();
        let recall_summary: String = memories.iter().filter(|m| !m.lesson.is_empty()).map(|m| m.lesson.clone()).collect::<Vec<_>>().join("; ");

        let long = consensus.signal == Signal::Buy;
        let sized = self
            .risk
            .size_trade(symbol, price, atr_pct, consensus.confidence, self.config.reward_to_risk, 5.0, long, &[], trend)
            .await;
        let Some(sized) = sized else { return Ok(()) };

        let equity = self.risk.equity().await;
        let active_agents = self.agents.read().await.eligible_ids().len();
        let allocation = self.dynamic_allocation(equity, active_agents.max(1));
        if sized.notional > allocation {
            info!(symbol, notional = sized.notional, allocation, "sizing capped at per-agent exposure limit");
        }
        let notional = sized.notional.min(allocation);
        if notional <= 0.0 {
            return Ok(());
        }
        let quantity = notional / price;

        let side = if long { Side::Buy } else { Side::Sell };
        let order = ExecutionOrder {
            symbol: symbol.clone(),
            side,
            total_quantity: quantity,
            algo: Algo::Adaptive,
            venue_hint,
            reference_price: price,
            arbitrage_leg2: None,
            volume_profile: None,
            market_state: None,
            reasoning: format!("{}; recalled: {}", consensus.votes.iter().map(|v| v.reasoning.clone()).collect::<Vec<_>>().join(" | "), recall_summary),
        };

        let result = self.execution.execute(order.clone()).await;
        if !result.success {
            warn!(symbol, "execution did not reach the fill threshold");
            return Ok(());
        }

        let opened_at = chrono::Utc::now();
        let episode_id = Episode::make_id(opened_at, symbol, consensus.signal);

        let closing_side = if long { Side::Sell } else { Side::Buy };
        let (tp_order_id, sl_order_id) = self
            .execution
            .place_protective_orders(symbol, closing_side, result.total_executed, sized.stop_loss, sized.take_profit, order.venue_hint.as_deref())
            .await;

        let position_side = if long { PositionSide::Long } else { PositionSide::Short };
        let position = Position {
            symbol: symbol.clone(),
            agent_id: theses.first().map(|t| t.agent_id.clone()).unwrap_or_default(),
            side: position_side,
            quantity: result.total_executed,
            entry_price: result.avg_price,
            stop_loss: sized.stop_loss,
            take_profit: sized.take_profit,
            opened_at,
            venue: "adaptive".to_string(),
            tp_order_id,
            sl_order_id,
            episode_id: episode_id.clone(),
        };
        self.positions.write().await.insert(position.clone());
        self.store.save_positions(&self.positions_snapshot().await).await;

        let episode = Episode {
            episode_id: episode_id.clone(),
            timestamp: chrono::Utc::now(),
            market_state_text: order.reasoning.clone(),
            market_state_embedding_text: order.reasoning.clone(),
            symbol: symbol.clone(),
            venue: position.venue.clone(),
            signal: consensus.signal,
            entry_price: position.entry_price,
            quantity: position.quantity,
            stop_loss: Some(position.stop_loss),
            take_profit: Some(position.take_profit),
            agent_id: position.agent_id.clone(),
            reasoning: order.reasoning,
            confidence: consensus.confidence,
            outcome: None,
            what_worked: None,
            what_failed: None,
            lesson: String::new(),
            tags: vec![],
        };
        self.memory.write().await.store(episode.clone());
        self.store.save_episode(&episode).await;

        Ok(())
    }

    async fn positions_snapshot(&self) -> HashMap<Symbol, Position> {
        let positions = self.positions.read().await;
        positions.symbols().into_iter().filter_map(|s| positions.get(&s).cloned().map(|p| (s, p))).collect()
    }

    async fn close_position(&self, symbol: &Symbol, exit_price: f64, reason: ExitReason) {
        let Some(position) = self.positions.write().await.remove(symbol) else { return };
        let pnl_pct = position.pnl_pct(exit_price);
        let pnl = pnl_pct * position.quantity * position.entry_price;

        info!(symbol = %symbol, reason = reason.as_str(), pnl, "closing position");

        let side = match position.side {
            PositionSide::Long => Side::Sell,
            PositionSide::Short => Side::Buy,
        };
        let close_order = ExecutionOrder {
            symbol: symbol.clone(),
            side,
            total_quantity: position.quantity,
            algo: Algo::Market,
            venue_hint: None,
            reference_price: exit_price,
            arbitrage_leg2: None,
            volume_profile: None,
            market_state: None,
            reasoning: format!("close: {}", reason.as_str()),
        };
        let _ = self.execution.execute(close_order).await;
        self.risk.record_realized_pnl(pnl).await;

        let equity = self.risk.equity().await;
        let active_agents = self.agents.read().await.eligible_ids().len();
        let margin_allocation = self.dynamic_allocation(equity, active_agents.max(1));

        {
            let mut agents = self.agents.write().await;
            if let Some(agent) = agents.get_mut(&position.agent_id) {
                let thesis = crate::agents::Thesis {
                    agent_id: position.agent_id.clone(),
                    symbol: symbol.clone(),
                    signal: match position.side {
                        PositionSide::Long => Signal::Buy,
                        PositionSide::Short => Signal::Sell,
                    },
                    confidence: 0.0,
                    reasoning: String::new(),
                    data_used: vec![],
                    model_used: None,
                    timestamp: position.opened_at,
                };
                agents.record_outcome(&position.agent_id, &thesis, pnl_pct * 100.0, pnl, margin_allocation);
            }
        }

        if !position.episode_id.is_empty() {
            let outcome = Outcome { pnl, pnl_pct, exit_reason: reason.as_str().to_string(), closed_at: chrono::Utc::now() };
            let mut memory = self.memory.write().await;
            memory.update_outcome(&position.episode_id, outcome);
            if let Some(episode) = memory.get_by_id(&position.episode_id) {
                let (what_worked, what_failed, lesson) = crate::memory::synthesize_reflection(episode);
                memory.add_reflection(&position.episode_id, what_worked, what_failed, lesson);
            }
        }

        self.store
            .append_trade(&TradeRecord {
                symbol: symbol.clone(),
                agent_id: position.agent_id.clone(),
                signal: match position.side {
                    PositionSide::Long => Signal::Buy,
                    PositionSide::Short => Signal::Sell,
                },
                pnl,
                reasoning: reason.as_str().to_string(),
                closed_at: chrono::Utc::now(),
            })
            .await;
        self.store.save_positions(&self.positions_snapshot().await).await;
    }

    /// On stop: submit reduce-only exits for every open position, bounded by
    /// a ~5s window per position.
    async fn graceful_shutdown(&self) {
        let symbols = self.positions.read().await.symbols();
        for symbol in symbols {
            if let Some(price) = self.current_price(&symbol).await {
                let fut = self.close_position(&symbol, price, ExitReason::Stagnation);
                if tokio::time::timeout(Duration::from_secs(5), fut).await.is_err() {
                    warn!(symbol, "graceful shutdown: close did not confirm within the exit window");
                }
            }
        }
        info!("orchestrator shut down cleanly");
    }
}
