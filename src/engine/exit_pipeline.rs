//! Exit pipeline: trailing-stop management, SL/TP detection, and trade
//! close finalisation.

use crate::config::BotConfig;
use crate::execution::{ExecutionEngine, ExitFill};
use crate::gates::{CooldownGate, DailySymbolLossLimit, PortfolioRiskManager, StreakSizer};
use crate::indicators::calculate_atr;
use crate::market_data::MarketDataProvider;
use crate::models::ExitReason;
use crate::persistence::{EngineRepository, EventDraft};
use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use super::TrailingStopManager;

/// Gates that record trade outcomes on every close.
pub(crate) struct OutcomeGates<'a> {
    pub cooldown: &'a mut CooldownGate,
    pub daily_limit: &'a mut DailySymbolLossLimit,
    pub streak: &'a mut StreakSizer,
    pub portfolio: &'a mut PortfolioRiskManager,
}

pub struct ExitPipeline {
    config: BotConfig,
    repo: EngineRepository,
    market_data: Arc<dyn MarketDataProvider>,
    execution: Arc<dyn ExecutionEngine>,
    trailing: TrailingStopManager,
}

impl ExitPipeline {
    pub fn new(
        config: BotConfig,
        repo: EngineRepository,
        market_data: Arc<dyn MarketDataProvider>,
        execution: Arc<dyn ExecutionEngine>,
    ) -> Self {
        let trailing = TrailingStopManager::new(config.trailing_stop.clone());
        Self {
            config,
            repo,
            market_data,
            execution,
            trailing,
        }
    }

    /// Begin trailing-stop tracking for a freshly opened position.
    pub fn track_position(&mut self, trade_id: &str, entry_price: Decimal, stop: Decimal) {
        self.trailing.init_position(trade_id, entry_price, stop);
    }

    /// Evaluate exits for one IN_POSITION symbol. Returns the fill when an
    /// exit executed; the caller finalises it and transitions state.
    pub async fn check(&mut self, symbol: &str, trade_id: &str) -> Result<Option<ExitFill>> {
        let orderbook = self
            .market_data
            .get_orderbook(symbol, 5)
            .await
            .with_context(|| format!("orderbook fetch failed for {symbol}"))?;
        let mark = orderbook.mid_price();

        // 1. Trailing stop: ratchet and, when breached, force the exit at
        //    the trailing level.
        if self.trailing.enabled() {
            let candles = self
                .market_data
                .get_candles(symbol, "5m", 100)
                .await
                .with_context(|| format!("candle fetch failed for {symbol}"))?;
            let atr = calculate_atr(&candles, self.config.trailing_stop.atr_period);
            let current_atr = atr.last().copied().unwrap_or(Decimal::ZERO);

            let before = self.trailing.stop_level(trade_id);
            if let Some(stop) = self.trailing.update(trade_id, mark, current_atr) {
                if Some(stop) != before {
                    self.execution.update_stop(trade_id, stop).await?;
                    self.repo.update_trade_stop(trade_id, stop)?;
                }
                if mark <= stop {
                    info!(symbol, trade_id, stop = %stop, mark = %mark, "trailing stop hit");
                    self.repo.append_event(
                        EventDraft::info("trailing_stop.triggered")
                            .symbol(symbol)
                            .trade(trade_id)
                            .payload(json!({
                                "stop_level": stop,
                                "current_price": mark,
                            }))
                            .public(),
                    )?;
                    return self
                        .execution
                        .execute_exit(trade_id, stop, ExitReason::TrailingStop)
                        .await;
                }
            }
        }

        // 2. Plain SL/TP detection against the executor's levels.
        self.execution.check_exits(trade_id, mark).await
    }

    /// Persist the close, update resting orders, emit events, and record the
    /// outcome in the realism gates.
    pub(crate) fn finalize(
        &mut self,
        symbol: &str,
        fill: &ExitFill,
        gates: &mut OutcomeGates<'_>,
    ) -> Result<()> {
        let trade = &fill.trade;
        let pnl = trade.realized_pnl_usd.unwrap_or(Decimal::ZERO);
        let closed_at = trade.closed_at.unwrap_or_else(Utc::now);
        let exit_price = trade.exit_price.unwrap_or(Decimal::ZERO);

        let closed = self.repo.close_trade(
            &trade.id,
            exit_price,
            closed_at,
            pnl,
            trade.fees_paid_usd,
        )?;
        if !closed {
            // Double close: the CAS refused the update. Nothing else to do.
            warn!(trade_id = %trade.id, "close rejected: trade was not OPEN");
            return Ok(());
        }

        self.repo.save_order(&fill.exit_order)?;
        for order in &fill.updated_orders {
            self.repo.update_order_status(
                &order.id,
                order.status,
                order.filled_price,
                order.filled_qty,
                order.filled_at,
            )?;
        }

        let notional = trade.entry_price * trade.entry_qty;
        let pnl_pct = if notional > Decimal::ZERO {
            pnl / notional * Decimal::from(100)
        } else {
            Decimal::ZERO
        };

        self.repo.append_event(
            EventDraft::info("trade.closed")
                .symbol(symbol)
                .trade(trade.id.clone())
                .payload(json!({
                    "symbol": symbol,
                    "exit_reason": fill.reason.as_str(),
                    "exit_price": exit_price,
                    "pnl_usd": pnl,
                    "pnl_pct": pnl_pct,
                }))
                .public(),
        )?;
        self.repo.append_event(
            EventDraft::info("order.filled")
                .trade(trade.id.clone())
                .payload(json!({
                    "order_id": fill.exit_order.id,
                    "order_type": fill.exit_order.order_type.as_str(),
                })),
        )?;

        // Record the outcome for cooldown, daily limit, streak sizing, and
        // portfolio tracking.
        let won = pnl > Decimal::ZERO;
        gates.cooldown.record_exit(symbol, fill.reason, closed_at);
        if won {
            gates.daily_limit.record_win(symbol, closed_at);
        } else {
            gates.daily_limit.record_loss(symbol, closed_at);
        }
        gates.streak.record_result(symbol, won);
        gates.portfolio.close_position(symbol, pnl);

        self.trailing.remove_position(&trade.id);

        info!(
            symbol,
            trade_id = %trade.id,
            reason = fill.reason.as_str(),
            pnl = %pnl,
            "position closed"
        );
        Ok(())
    }
}
