//! The trading loop: per-tick orchestration across all enabled symbols.
//!
//! On each tick the loop polls the control plane once, runs the exit
//! pipeline for IN_POSITION symbols, runs the entry gate stack for IDLE
//! symbols, stamps a heartbeat, and writes an equity snapshot. Symbols are
//! processed sequentially so event order stays deterministic; every
//! symbol's work sits inside an error boundary that emits `error.tick` and
//! moves on.

use crate::breakers::{check_consecutive_losses, check_spread_spike, check_volatility_spike, BreakerManager};
use crate::config::BotConfig;
use crate::control::ControlPlane;
use crate::engine::exit_pipeline::{ExitPipeline, OutcomeGates};
use crate::engine::{StateMachine, TradingState};
use crate::execution::ExecutionEngine;
use crate::gates::{
    estimators, CooldownGate, DailyLockManager, DailySymbolLossLimit, DynamicSizer,
    PortfolioRiskManager, ProfitabilityGate, RegimeFilter, StreakSizer,
};
use crate::indicators::calculate_atr;
use crate::market_data::MarketDataProvider;
use crate::models::{Side, SignalType, TradePlan};
use crate::persistence::{EngineRepository, EquitySnapshotRecord, EventDraft};
use crate::strategies::SignalProvider;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

const CANDLE_INTERVAL: &str = "5m";
const CANDLE_LIMIT: usize = 200;
const TICK_INTERVAL: Duration = Duration::from_secs(5);
const KELLY_LOOKBACK_TRADES: usize = 50;

enum EntryDecision {
    Reject {
        gate: &'static str,
        reason: String,
        payload: serde_json::Value,
    },
    Enter(TradePlan),
}

pub struct TradingLoop {
    config: BotConfig,
    repo: EngineRepository,
    market_data: Arc<dyn MarketDataProvider>,
    signals: Arc<dyn SignalProvider>,
    execution: Arc<dyn ExecutionEngine>,
    control: Arc<dyn ControlPlane>,

    breakers: BreakerManager,
    daily_lock: DailyLockManager,
    regime: RegimeFilter,
    portfolio: PortfolioRiskManager,
    cooldown: CooldownGate,
    daily_limit: DailySymbolLossLimit,
    streak: StreakSizer,
    sizer: DynamicSizer,
    profitability: ProfitabilityGate,
    exit_pipeline: ExitPipeline,

    state_machines: HashMap<String, StateMachine>,
    open_trades: HashMap<String, String>,
    shutdown: Arc<AtomicBool>,
    kill_notified: bool,
}

impl TradingLoop {
    pub fn new(
        config: BotConfig,
        repo: EngineRepository,
        market_data: Arc<dyn MarketDataProvider>,
        signals: Arc<dyn SignalProvider>,
        execution: Arc<dyn ExecutionEngine>,
        control: Arc<dyn ControlPlane>,
    ) -> Self {
        let tz = config.daily_timezone();
        let state_machines = config
            .symbols
            .enabled
            .iter()
            .map(|s| (s.clone(), StateMachine::new(s.clone())))
            .collect();

        Self {
            breakers: BreakerManager::new(repo.clone(), config.breakers.news.enabled),
            daily_lock: DailyLockManager::new(config.daily.clone(), tz, repo.clone()),
            regime: RegimeFilter::new(config.strategies.regime.clone()),
            portfolio: PortfolioRiskManager::new(
                config.symbols.clone(),
                config.portfolio.clone(),
                config.risk.clone(),
            ),
            cooldown: CooldownGate::new(config.cooldown.clone()),
            daily_limit: DailySymbolLossLimit::new(config.daily_symbol_limit.clone()),
            streak: StreakSizer::new(config.streak_sizer.clone()),
            sizer: DynamicSizer::new(config.position_sizing.clone()),
            profitability: ProfitabilityGate::new(config.execution.min_profit_usd),
            exit_pipeline: ExitPipeline::new(
                config.clone(),
                repo.clone(),
                market_data.clone(),
                execution.clone(),
            ),
            state_machines,
            open_trades: HashMap::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            kill_notified: false,
            config,
            repo,
            market_data,
            signals,
            execution,
            control,
        }
    }

    /// Flag observed between symbols; SIGINT/SIGTERM handlers set it.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn symbol_state(&self, symbol: &str) -> Option<TradingState> {
        self.state_machines.get(symbol).map(|sm| sm.current_state())
    }

    pub fn open_trade_id(&self, symbol: &str) -> Option<&String> {
        self.open_trades.get(symbol)
    }

    /// Rebuild in-memory state from open trades on startup.
    pub async fn recover_open_positions(&mut self) -> Result<usize> {
        let open = self.repo.open_trades()?;
        let mut recovered = 0;

        for trade in &open {
            if !self.config.symbols.enabled.contains(&trade.symbol) {
                warn!(
                    symbol = %trade.symbol,
                    trade_id = %trade.id,
                    "open trade on a disabled symbol, leaving untouched"
                );
                continue;
            }
            if let Err(e) = self.execution.restore_open_trade(trade).await {
                warn!(trade_id = %trade.id, error = %e, "could not restore trade into executor");
                continue;
            }

            self.state_machines.insert(
                trade.symbol.clone(),
                StateMachine::with_state(trade.symbol.clone(), TradingState::InPosition),
            );
            self.open_trades
                .insert(trade.symbol.clone(), trade.id.clone());
            self.portfolio
                .restore_position(&trade.symbol, trade.entry_notional_usd, trade.opened_at);
            if let Some(stop) = trade.stop_price {
                self.exit_pipeline
                    .track_position(&trade.id, trade.entry_price, stop);
            }
            recovered += 1;
        }

        if recovered > 0 {
            info!(recovered, "recovered open positions from repository");
        }
        Ok(recovered)
    }

    /// Run until shutdown, or for `max_ticks` when bounded (smoke runs and
    /// tests set `MAX_TICKS`).
    pub async fn run(&mut self, max_ticks: Option<u64>) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        let mut ticks = 0u64;

        info!(
            symbols = ?self.config.symbols.enabled,
            mode = self.config.execution.mode.as_str(),
            "trading loop started"
        );

        while !self.shutdown.load(Ordering::SeqCst) {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                error!(error = %e, "tick failed");
            }
            ticks += 1;
            if let Some(max) = max_ticks {
                if ticks >= max {
                    info!(ticks, "max ticks reached, stopping");
                    break;
                }
            }
        }

        info!(ticks, "trading loop stopped");
    }

    /// Process one tick over all enabled symbols.
    pub async fn tick(&mut self) -> Result<()> {
        let now = Utc::now();

        let plane_entries = self.control.entries_allowed().await;
        let exits_allowed = self.control.exits_allowed().await;
        let news_active = self.control.news_pause_active().await;
        let kill_active = self.control.kill_switch_active().await;

        if kill_active && !self.kill_notified {
            self.kill_notified = true;
            self.repo.append_event(
                EventDraft::error("emergency.stop")
                    .payload(json!({"message": "kill switch engaged, all entries blocked"}))
                    .public(),
            )?;
        } else if !kill_active {
            self.kill_notified = false;
        }

        // Consecutive-loss breaker is portfolio-wide; evaluate once per tick.
        if !self.breakers.is_active("consecutive_losses") {
            if let Some(context) =
                check_consecutive_losses(&self.config.breakers.consecutive_losses, &self.repo)?
            {
                let reason = format!(
                    "{} consecutive losing trades",
                    context["consecutive_losses"]
                );
                self.breakers.trigger(
                    "consecutive_losses",
                    reason,
                    self.config.breakers.consecutive_losses.pause_minutes,
                    context,
                )?;
            }
        }

        let daily_lock = self.daily_lock.check(now)?;
        let entries_allowed = plane_entries && !kill_active && daily_lock.is_allowed();

        for symbol in self.config.symbols.enabled.clone() {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("shutdown requested, finishing tick early");
                break;
            }
            if let Err(e) = self
                .tick_symbol(&symbol, entries_allowed, exits_allowed, news_active, now)
                .await
            {
                error!(symbol, error = %e, "symbol tick failed");
                let _ = self.repo.append_event(
                    EventDraft::error("error.tick")
                        .symbol(symbol.clone())
                        .payload(json!({"error": e.to_string()})),
                );
                // Never leave a symbol stranded mid-evaluation.
                if let Some(sm) = self.state_machines.get_mut(&symbol) {
                    if matches!(
                        sm.current_state(),
                        TradingState::Eval | TradingState::EntryPending | TradingState::ExitPending
                    ) {
                        sm.reset();
                    }
                }
            }
        }

        self.control.heartbeat().await;

        if let Err(e) = self.write_equity_snapshot(now) {
            error!(error = %e, "equity snapshot failed");
            let _ = self.repo.append_event(
                EventDraft::error("error.persistence")
                    .payload(json!({"error": e.to_string()})),
            );
        }
        Ok(())
    }

    async fn tick_symbol(
        &mut self,
        symbol: &str,
        entries_allowed: bool,
        exits_allowed: bool,
        news_active: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let state = self
            .state_machines
            .get(symbol)
            .map(|sm| sm.current_state())
            .unwrap_or(TradingState::Idle);

        match state {
            TradingState::InPosition if exits_allowed => {
                self.process_exit(symbol).await?;
            }
            TradingState::Idle if entries_allowed => {
                self.process_entry(symbol, news_active, now).await?;
            }
            TradingState::InPosition | TradingState::Idle => {}
            // A symbol should never carry a transient state across ticks.
            other => {
                warn!(symbol, state = other.as_str(), "stale transient state, resetting");
                if let Some(sm) = self.state_machines.get_mut(symbol) {
                    sm.reset();
                }
            }
        }
        Ok(())
    }

    async fn process_exit(&mut self, symbol: &str) -> Result<()> {
        let Some(trade_id) = self.open_trades.get(symbol).cloned() else {
            warn!(symbol, "IN_POSITION without a tracked trade id, resetting");
            if let Some(sm) = self.state_machines.get_mut(symbol) {
                sm.reset();
            }
            return Ok(());
        };

        let Some(fill) = self.exit_pipeline.check(symbol, &trade_id).await? else {
            return Ok(());
        };

        self.transition(symbol, TradingState::ExitPending)?;

        {
            let mut gates = OutcomeGates {
                cooldown: &mut self.cooldown,
                daily_limit: &mut self.daily_limit,
                streak: &mut self.streak,
                portfolio: &mut self.portfolio,
            };
            self.exit_pipeline.finalize(symbol, &fill, &mut gates)?;
        }

        self.open_trades.remove(symbol);
        self.transition(symbol, TradingState::Idle)?;
        Ok(())
    }

    async fn process_entry(
        &mut self,
        symbol: &str,
        news_active: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.transition(symbol, TradingState::Eval)?;

        let decision = self.evaluate_entry(symbol, news_active, now).await?;
        let plan = match decision {
            EntryDecision::Reject {
                gate,
                reason,
                mut payload,
            } => {
                if let Some(map) = payload.as_object_mut() {
                    map.insert("reason".to_string(), json!(reason));
                }
                self.repo.append_event(
                    EventDraft::info(format!("gate.{gate}.rejected"))
                        .symbol(symbol)
                        .payload(payload)
                        .public(),
                )?;
                self.transition(symbol, TradingState::Idle)?;
                return Ok(());
            }
            EntryDecision::Enter(plan) => plan,
        };

        self.transition(symbol, TradingState::EntryPending)?;

        match self.execution.execute_entry(&plan).await {
            Ok(fill) => {
                if !fill.idempotency_hit {
                    let mut trade = fill.trade.clone();
                    trade.trailing_enabled = self.config.trailing_stop.enabled;
                    self.repo.save_trade(&trade)?;
                    for order in &fill.orders {
                        self.repo.save_order(order)?;
                    }
                }

                self.repo.append_event(
                    EventDraft::info("trade.opened")
                        .symbol(symbol)
                        .trade(fill.trade.id.clone())
                        .payload(json!({
                            "symbol": symbol,
                            "side": fill.trade.side.as_str(),
                            "entry_price": fill.trade.entry_price,
                            "quantity": fill.trade.entry_qty,
                            "stop_loss": plan.stop_loss_price,
                            "take_profit": plan.take_profit_price,
                            "mode": fill.trade.mode.as_str(),
                        }))
                        .public(),
                )?;
                if let Some(entry_order) = fill.orders.first() {
                    self.repo.append_event(
                        EventDraft::info("order.filled")
                            .trade(fill.trade.id.clone())
                            .payload(json!({
                                "order_id": entry_order.id,
                                "order_type": entry_order.order_type.as_str(),
                            })),
                    )?;
                }

                self.portfolio
                    .add_position(symbol, fill.trade.entry_notional_usd, now);
                self.exit_pipeline.track_position(
                    &fill.trade.id,
                    fill.trade.entry_price,
                    plan.stop_loss_price,
                );
                self.open_trades
                    .insert(symbol.to_string(), fill.trade.id.clone());
                self.transition(symbol, TradingState::InPosition)?;
                Ok(())
            }
            Err(e) => {
                error!(symbol, error = %e, "entry execution failed");
                self.repo.append_event(
                    EventDraft::error("execution.failed")
                        .symbol(symbol)
                        .payload(json!({"error": e.to_string()})),
                )?;
                self.transition(symbol, TradingState::Idle)?;
                Ok(())
            }
        }
    }

    /// The gate stack, in fixed order. The first rejection wins.
    async fn evaluate_entry(
        &mut self,
        symbol: &str,
        news_active: bool,
        now: DateTime<Utc>,
    ) -> Result<EntryDecision> {
        // 1. News pause.
        if self.config.breakers.news.enabled && news_active {
            return Ok(EntryDecision::Reject {
                gate: "news_pause",
                reason: "negative news pause active".to_string(),
                payload: json!({}),
            });
        }

        let candles = self
            .market_data
            .get_candles(symbol, CANDLE_INTERVAL, CANDLE_LIMIT)
            .await
            .with_context(|| format!("candle fetch failed for {symbol}"))?;
        let orderbook = self
            .market_data
            .get_orderbook(symbol, 20)
            .await
            .with_context(|| format!("orderbook fetch failed for {symbol}"))?;

        let atr_values = calculate_atr(&candles, self.config.stop_loss.atr_period);
        let current_atr = atr_values.last().copied().unwrap_or(Decimal::ZERO);

        // 2. Active breakers, after giving the per-symbol triggers a chance
        //    to fire on this tick's data.
        if !self.breakers.is_active("volatility") {
            if let Some(context) =
                check_volatility_spike(&self.config.breakers.volatility, &candles, &atr_values)
            {
                self.breakers.trigger(
                    "volatility",
                    format!("candle range {} x ATR", context["atr_multiple"]),
                    self.config.breakers.volatility.pause_minutes,
                    context,
                )?;
            }
        }
        if !self.breakers.is_active("spread_slippage") {
            if let Some(context) =
                check_spread_spike(&self.config.breakers.spread_slippage, &orderbook)
            {
                self.breakers.trigger(
                    "spread_slippage",
                    format!("spread {} bps", context["spread_bps"]),
                    self.config.breakers.spread_slippage.pause_minutes,
                    context,
                )?;
            }
        }
        let breaker_check = self.breakers.entries_allowed(now, false)?;
        if let Some(reason) = breaker_check.reason() {
            return Ok(EntryDecision::Reject {
                gate: "breaker",
                reason: reason.to_string(),
                payload: json!({}),
            });
        }

        // 3. Regime filter.
        let (regime, regime_check) = self.regime.check(&candles, symbol, "default");
        if let Some(reason) = regime_check.reason() {
            return Ok(EntryDecision::Reject {
                gate: "regime",
                reason: reason.to_string(),
                payload: json!({"regime": regime.as_str()}),
            });
        }

        // 4. Ensemble signal.
        let signal = self
            .signals
            .generate_signal(symbol, &candles, &orderbook, &self.config);
        if signal.signal_type != SignalType::EnterLong {
            return Ok(EntryDecision::Reject {
                gate: "signal",
                reason: format!("ensemble returned {:?}", signal.signal_type),
                payload: json!({"confidence": signal.confidence}),
            });
        }

        // Entry at the touch; stop and target from the configured methods.
        let entry_price = orderbook.best_ask();
        let stop_loss = self.stop_loss_level(entry_price, current_atr);
        let take_profit = self.take_profit_level(entry_price, stop_loss);
        let sl_distance = entry_price - stop_loss;

        let equity = self.repo.calculate_equity(self.config.risk.starting_cash_usd)?;
        let (win_rate, avg_ratio) = self.kelly_inputs()?;
        let base_qty = self.sizer.calculate(
            equity,
            entry_price,
            current_atr,
            Some(sl_distance),
            win_rate,
            avg_ratio,
        );

        // 5. Portfolio risk manager.
        let notional = entry_price * base_qty;
        let portfolio_check = self.portfolio.can_open_position(symbol, notional, now);
        if let Some(reason) = portfolio_check.reason() {
            return Ok(EntryDecision::Reject {
                gate: "portfolio",
                reason: reason.to_string(),
                payload: json!({"notional_usd": notional}),
            });
        }

        // 6. Stop-loss cooldown.
        let cooldown_check = self.cooldown.check(symbol, now);
        if let Some(reason) = cooldown_check.reason() {
            return Ok(EntryDecision::Reject {
                gate: "cooldown",
                reason: reason.to_string(),
                payload: json!({}),
            });
        }

        // 7. Daily per-symbol loss limit.
        let daily_check = self.daily_limit.check(symbol, now);
        if let Some(reason) = daily_check.reason() {
            return Ok(EntryDecision::Reject {
                gate: "daily_symbol_limit",
                reason: reason.to_string(),
                payload: json!({}),
            });
        }

        // 8/9. Streak-adjusted position size.
        let multiplier = self.streak.multiplier(symbol);
        let quantity = (base_qty * multiplier).round_dp(8);
        if quantity <= Decimal::ZERO {
            return Ok(EntryDecision::Reject {
                gate: "position_sizer",
                reason: "quantity rounded to zero".to_string(),
                payload: json!({"base_qty": base_qty, "multiplier": multiplier}),
            });
        }

        let fee = estimators::calculate_fee(
            entry_price * quantity,
            self.config.execution.taker_fee_bps,
        );
        let (_, slippage) = match estimators::calculate_slippage(Side::Buy, quantity, &orderbook) {
            Ok(result) => result,
            Err(e) => {
                return Ok(EntryDecision::Reject {
                    gate: "position_sizer",
                    reason: e.to_string(),
                    payload: json!({"quantity": quantity}),
                });
            }
        };
        let spread_cost = estimators::calculate_spread_cost(Side::Buy, quantity, &orderbook);

        let plan = TradePlan::new(
            symbol,
            Side::Buy,
            entry_price,
            quantity,
            stop_loss,
            take_profit,
            fee,
            slippage,
            spread_cost,
            Uuid::new_v4().to_string(),
            now,
        )?;

        // 10. Profitability gate.
        let (profit_check, breakdown) = self.profitability.evaluate(&plan);
        if let Some(reason) = profit_check.reason() {
            return Ok(EntryDecision::Reject {
                gate: "profitability",
                reason: reason.to_string(),
                payload: breakdown,
            });
        }

        Ok(EntryDecision::Enter(plan))
    }

    fn stop_loss_level(&self, entry_price: Decimal, atr: Decimal) -> Decimal {
        let sl = &self.config.stop_loss;
        match sl.method.as_str() {
            "atr" if atr > Decimal::ZERO => entry_price - atr * sl.atr_multiplier,
            _ => entry_price * (Decimal::ONE - sl.fixed_pct / dec!(100)),
        }
    }

    fn take_profit_level(&self, entry_price: Decimal, stop_loss: Decimal) -> Decimal {
        let tp = &self.config.take_profit;
        match tp.method.as_str() {
            "risk_reward" => entry_price + (entry_price - stop_loss) * tp.risk_reward_ratio,
            _ => entry_price * (Decimal::ONE + tp.fixed_pct / dec!(100)),
        }
    }

    /// Win rate and average win/loss ratio over recent closed trades, for
    /// Kelly sizing. None until there is history.
    fn kelly_inputs(&self) -> Result<(Option<Decimal>, Option<Decimal>)> {
        let recent = self.repo.recent_closed_trades(KELLY_LOOKBACK_TRADES)?;
        if recent.is_empty() {
            return Ok((None, None));
        }

        let mut wins = Vec::new();
        let mut losses = Vec::new();
        for trade in &recent {
            match trade.realized_pnl_usd {
                Some(pnl) if pnl > Decimal::ZERO => wins.push(pnl),
                Some(pnl) if pnl < Decimal::ZERO => losses.push(-pnl),
                _ => {}
            }
        }
        let total = wins.len() + losses.len();
        if total == 0 {
            return Ok((None, None));
        }

        let win_rate = Decimal::from(wins.len() as u64) / Decimal::from(total as u64);
        let avg_ratio = if !wins.is_empty() && !losses.is_empty() {
            let avg_win: Decimal = wins.iter().sum::<Decimal>() / Decimal::from(wins.len() as u64);
            let avg_loss: Decimal =
                losses.iter().sum::<Decimal>() / Decimal::from(losses.len() as u64);
            if avg_loss > Decimal::ZERO {
                Some(avg_win / avg_loss)
            } else {
                None
            }
        } else {
            None
        };

        Ok((Some(win_rate), avg_ratio))
    }

    fn transition(&mut self, symbol: &str, target: TradingState) -> Result<()> {
        let Some(sm) = self.state_machines.get_mut(symbol) else {
            anyhow::bail!("no state machine for {symbol}");
        };
        if let Err(e) = sm.transition_to(target) {
            sm.reset();
            self.repo.append_event(
                EventDraft::error("error.state_machine")
                    .symbol(symbol)
                    .payload(json!({"error": e.to_string()})),
            )?;
            return Err(e);
        }
        Ok(())
    }

    fn write_equity_snapshot(&mut self, now: DateTime<Utc>) -> Result<()> {
        let equity = self
            .repo
            .calculate_equity(self.config.risk.starting_cash_usd)?;
        let realized_today = self
            .repo
            .get_today_realized_pnl(self.config.daily_timezone(), now)?;

        let open_notional: Decimal = self
            .open_trades
            .values()
            .filter_map(|id| self.repo.get_trade(id).ok().flatten())
            .map(|t| t.entry_notional_usd)
            .sum();

        self.repo.save_equity_snapshot(&EquitySnapshotRecord {
            id: Uuid::new_v4().to_string(),
            ts: now,
            equity_usd: equity,
            cash_usd: equity - open_notional,
            unrealized_pnl_usd: Decimal::ZERO,
            realized_pnl_today_usd: realized_today,
            open_positions: self.open_trades.len() as i64,
            meta: None,
        })
    }
}
