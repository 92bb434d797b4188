//! Live executor: idempotent exchange orders keyed by deterministic client
//! order ids, with startup reconciliation against the exchange.
//!
//! Idempotency keys take the form `QS-<trade_id>-<ENTRY|STOP_LOSS|
//! TAKE_PROFIT>`. Before submitting an entry, the repository is consulted;
//! a hit re-returns the stored trade without touching the exchange, so a
//! retry after a crash can never double-fill.

use super::{EntryFill, ExchangeAdapter, ExecutionEngine, ExitFill};
use crate::models::{ExitReason, Side, TradePlan};
use crate::persistence::{
    EngineRepository, EventDraft, OrderRecord, OrderStatus, OrderType, TradeMode, TradeRecord,
    TradeStatus,
};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

pub struct LiveExecutor {
    repo: EngineRepository,
    adapter: Arc<dyn ExchangeAdapter>,
}

impl LiveExecutor {
    pub fn new(repo: EngineRepository, adapter: Arc<dyn ExchangeAdapter>) -> Self {
        Self { repo, adapter }
    }

    fn entry_key(trade_id: &str) -> String {
        format!("QS-{trade_id}-ENTRY")
    }

    fn exit_key(trade_id: &str, reason: ExitReason) -> String {
        format!("QS-{trade_id}-{}", reason.as_str())
    }

    /// Submit the closing market sell and build the exit fill.
    async fn close_position(
        &self,
        trade: &TradeRecord,
        target_price: Decimal,
        reason: ExitReason,
    ) -> Result<ExitFill> {
        let client_order_id = Self::exit_key(&trade.id, reason);
        let response = self
            .adapter
            .create_order(&trade.symbol, Side::Sell, trade.entry_qty, Some(&client_order_id))
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                self.repo.append_event(
                    EventDraft::error("error.exit_execution")
                        .trade(trade.id.clone())
                        .symbol(trade.symbol.clone())
                        .payload(json!({
                            "error": e.to_string(),
                            "reason": reason.as_str(),
                        })),
                )?;
                return Err(e).context("exit order failed");
            }
        };

        let fill_price = response.avg_fill_price.unwrap_or(target_price);
        let now = Utc::now();
        let pnl = (fill_price - trade.entry_price) * trade.entry_qty;

        let mut closed = trade.clone();
        closed.status = TradeStatus::Closed;
        closed.closed_at = Some(now);
        closed.exit_price = Some(fill_price);
        closed.realized_pnl_usd = Some(pnl);

        let exit_order = OrderRecord {
            id: Uuid::new_v4().to_string(),
            trade_id: trade.id.clone(),
            symbol: trade.symbol.clone(),
            side: Side::Sell,
            order_type: match reason {
                ExitReason::StopLoss => OrderType::StopLoss,
                ExitReason::TakeProfit => OrderType::TakeProfit,
                ExitReason::TrailingStop => OrderType::Market,
            },
            status: OrderStatus::Filled,
            qty: trade.entry_qty,
            price: Some(fill_price),
            filled_qty: response.filled_qty.or(Some(trade.entry_qty)),
            filled_price: Some(fill_price),
            exchange_order_id: Some(response.exchange_order_id),
            idempotency_key: Some(client_order_id),
            created_at: now,
            filled_at: Some(now),
        };

        info!(
            trade_id = %trade.id,
            symbol = %trade.symbol,
            reason = reason.as_str(),
            pnl = %pnl,
            "live exit filled"
        );

        Ok(ExitFill {
            trade: closed,
            exit_order,
            updated_orders: vec![],
            reason,
        })
    }

    /// Reconcile engine state against the exchange on startup: verify
    /// connectivity and log open orders per symbol with an open trade.
    pub async fn reconcile(&self, open_trades: &[TradeRecord]) -> Result<()> {
        self.repo.append_event(
            EventDraft::info("reconcile.started")
                .payload(json!({"open_trades_count": open_trades.len()}))
                .public(),
        )?;

        let result = self.reconcile_inner(open_trades).await;
        match &result {
            Ok(()) => {
                self.repo.append_event(
                    EventDraft::info("reconcile.completed")
                        .payload(json!({"checked_trades": open_trades.len()}))
                        .public(),
                )?;
            }
            Err(e) => {
                error!(error = %e, "reconciliation failed");
                self.repo.append_event(
                    EventDraft::error("error.reconcile")
                        .payload(json!({"error": e.to_string()})),
                )?;
            }
        }
        result
    }

    async fn reconcile_inner(&self, open_trades: &[TradeRecord]) -> Result<()> {
        // Connectivity check before walking symbols.
        self.adapter
            .fetch_balance()
            .await
            .context("balance fetch failed during reconcile")?;

        for trade in open_trades {
            let open_orders = self
                .adapter
                .fetch_open_orders(&trade.symbol)
                .await
                .with_context(|| format!("open-orders fetch failed for {}", trade.symbol))?;
            self.repo.append_event(
                EventDraft::info("reconcile.symbol")
                    .symbol(trade.symbol.clone())
                    .payload(json!({
                        "db_open_trade": trade.id,
                        "exchange_open_orders": open_orders.len(),
                    })),
            )?;
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionEngine for LiveExecutor {
    async fn execute_entry(&self, plan: &TradePlan) -> Result<EntryFill> {
        // Idempotency: a trade row with this id means the entry already
        // executed; re-return it without contacting the exchange.
        if let Some(existing) = self.repo.get_trade(&plan.trade_id)? {
            self.repo.append_event(
                EventDraft::warn("execution.idempotency_hit")
                    .trade(plan.trade_id.clone())
                    .symbol(plan.symbol.clone())
                    .payload(json!({"trade_id": plan.trade_id})),
            )?;
            let orders = self.repo.orders_for_trade(&plan.trade_id)?;
            return Ok(EntryFill {
                trade: existing,
                orders,
                idempotency_hit: true,
            });
        }

        let client_order_id = Self::entry_key(&plan.trade_id);
        let response = self
            .adapter
            .create_order(&plan.symbol, plan.side, plan.quantity, Some(&client_order_id))
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                self.repo.append_event(
                    EventDraft::error("error.execution")
                        .trade(plan.trade_id.clone())
                        .symbol(plan.symbol.clone())
                        .payload(json!({"error": e.to_string()})),
                )?;
                return Err(e).context("entry order failed");
            }
        };

        let fill_price = response.avg_fill_price.unwrap_or(plan.entry_price);
        let filled_qty = response.filled_qty.unwrap_or(plan.quantity);
        let now = Utc::now();

        let trade = TradeRecord {
            id: plan.trade_id.clone(),
            symbol: plan.symbol.clone(),
            side: plan.side,
            status: TradeStatus::Open,
            mode: TradeMode::Live,
            entry_price: fill_price,
            entry_qty: filled_qty,
            entry_notional_usd: fill_price * filled_qty,
            opened_at: now,
            stop_price: Some(plan.stop_loss_price),
            take_profit_price: Some(plan.take_profit_price),
            trailing_enabled: false,
            trailing_offset: None,
            exit_price: None,
            closed_at: None,
            realized_pnl_usd: None,
            fees_paid_usd: Some(plan.estimated_fee_usd),
            slippage_est_usd: Some(plan.estimated_slippage_usd),
            notes: None,
        };

        let entry_order = OrderRecord {
            id: Uuid::new_v4().to_string(),
            trade_id: plan.trade_id.clone(),
            symbol: plan.symbol.clone(),
            side: plan.side,
            order_type: OrderType::Market,
            status: OrderStatus::Filled,
            qty: filled_qty,
            price: Some(fill_price),
            filled_qty: Some(filled_qty),
            filled_price: Some(fill_price),
            exchange_order_id: Some(response.exchange_order_id),
            idempotency_key: Some(client_order_id),
            created_at: now,
            filled_at: Some(now),
        };

        info!(
            trade_id = %plan.trade_id,
            symbol = %plan.symbol,
            fill_price = %fill_price,
            "live entry filled"
        );

        // SL/TP are not parked on the exchange; the engine loop detects
        // exits against the stored levels and submits market sells.
        Ok(EntryFill {
            trade,
            orders: vec![entry_order],
            idempotency_hit: false,
        })
    }

    async fn check_exits(&self, trade_id: &str, mark: Decimal) -> Result<Option<ExitFill>> {
        let Some(trade) = self.repo.get_trade(trade_id)? else {
            return Ok(None);
        };
        if trade.status != TradeStatus::Open {
            return Ok(None);
        }
        if trade.side != Side::Buy {
            bail!("only long positions are supported");
        }

        let sl = trade.stop_price;
        let tp = trade.take_profit_price;

        let (reason, target) = match (sl, tp) {
            (Some(sl), _) if mark <= sl => (ExitReason::StopLoss, sl),
            (_, Some(tp)) if mark >= tp => (ExitReason::TakeProfit, tp),
            _ => return Ok(None),
        };

        Ok(Some(self.close_position(&trade, target, reason).await?))
    }

    async fn execute_exit(
        &self,
        trade_id: &str,
        exit_price: Decimal,
        reason: ExitReason,
    ) -> Result<Option<ExitFill>> {
        let Some(trade) = self.repo.get_trade(trade_id)? else {
            return Ok(None);
        };
        if trade.status != TradeStatus::Open {
            return Ok(None);
        }
        Ok(Some(self.close_position(&trade, exit_price, reason).await?))
    }

    async fn update_stop(&self, trade_id: &str, new_stop: Decimal) -> Result<()> {
        self.repo.update_trade_stop(trade_id, new_stop)
    }

    async fn restore_open_trade(&self, _trade: &TradeRecord) -> Result<()> {
        // Exit levels live in the trade row; nothing to rebuild.
        Ok(())
    }
}
