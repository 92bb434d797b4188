//! Dry-run executor with deterministic simulated fills.
//!
//! Keeps an in-memory ledger of open simulated positions. An entry fills at
//! the plan's entry price and creates pending SL/TP orders at the plan
//! levels; exits fill exactly at the triggered level.

use super::{EntryFill, ExecutionEngine, ExitFill};
use crate::models::{ExitReason, Side, TradePlan};
use crate::persistence::{OrderRecord, OrderStatus, OrderType, TradeMode, TradeRecord, TradeStatus};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

struct LedgerEntry {
    trade: TradeRecord,
    sl_price: Decimal,
    tp_price: Decimal,
    sl_order: OrderRecord,
    tp_order: OrderRecord,
}

#[derive(Default)]
pub struct DryRunExecutor {
    ledger: Mutex<HashMap<String, LedgerEntry>>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.ledger.lock().len()
    }

    fn build_exit(
        entry: &mut LedgerEntry,
        exit_price: Decimal,
        reason: ExitReason,
    ) -> ExitFill {
        let now = Utc::now();
        let trade = &mut entry.trade;

        let pnl = (exit_price - trade.entry_price) * trade.entry_qty;
        trade.status = TradeStatus::Closed;
        trade.closed_at = Some(now);
        trade.exit_price = Some(exit_price);
        trade.realized_pnl_usd = Some(pnl);

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
            price: Some(exit_price),
            filled_qty: Some(trade.entry_qty),
            filled_price: Some(exit_price),
            exchange_order_id: None,
            idempotency_key: None,
            created_at: now,
            filled_at: Some(now),
        };

        // The triggered resting order fills; its counterpart is cancelled.
        // A trailing exit supersedes both.
        match reason {
            ExitReason::StopLoss => {
                entry.sl_order.status = OrderStatus::Filled;
                entry.sl_order.filled_price = Some(exit_price);
                entry.sl_order.filled_qty = Some(trade.entry_qty);
                entry.sl_order.filled_at = Some(now);
                entry.tp_order.status = OrderStatus::Cancelled;
            }
            ExitReason::TakeProfit => {
                entry.tp_order.status = OrderStatus::Filled;
                entry.tp_order.filled_price = Some(exit_price);
                entry.tp_order.filled_qty = Some(trade.entry_qty);
                entry.tp_order.filled_at = Some(now);
                entry.sl_order.status = OrderStatus::Cancelled;
            }
            ExitReason::TrailingStop => {
                entry.sl_order.status = OrderStatus::Cancelled;
                entry.tp_order.status = OrderStatus::Cancelled;
            }
        }

        ExitFill {
            trade: trade.clone(),
            exit_order,
            updated_orders: vec![entry.sl_order.clone(), entry.tp_order.clone()],
            reason,
        }
    }
}

#[async_trait]
impl ExecutionEngine for DryRunExecutor {
    async fn execute_entry(&self, plan: &TradePlan) -> Result<EntryFill> {
        let mut ledger = self.ledger.lock();
        if let Some(existing) = ledger.get(&plan.trade_id) {
            return Ok(EntryFill {
                trade: existing.trade.clone(),
                orders: vec![],
                idempotency_hit: true,
            });
        }

        let now = Utc::now();
        let trade = TradeRecord {
            id: plan.trade_id.clone(),
            symbol: plan.symbol.clone(),
            side: plan.side,
            status: TradeStatus::Open,
            mode: TradeMode::DryRun,
            entry_price: plan.entry_price,
            entry_qty: plan.quantity,
            entry_notional_usd: plan.position_value_usd(),
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
            trade_id: trade.id.clone(),
            symbol: plan.symbol.clone(),
            side: plan.side,
            order_type: OrderType::Market,
            status: OrderStatus::Filled,
            qty: plan.quantity,
            price: Some(plan.entry_price),
            filled_qty: Some(plan.quantity),
            filled_price: Some(plan.entry_price),
            exchange_order_id: None,
            idempotency_key: None,
            created_at: now,
            filled_at: Some(now),
        };
        let sl_order = OrderRecord {
            id: Uuid::new_v4().to_string(),
            trade_id: trade.id.clone(),
            symbol: plan.symbol.clone(),
            side: Side::Sell,
            order_type: OrderType::StopLoss,
            status: OrderStatus::Pending,
            qty: plan.quantity,
            price: Some(plan.stop_loss_price),
            filled_qty: None,
            filled_price: None,
            exchange_order_id: None,
            idempotency_key: None,
            created_at: now,
            filled_at: None,
        };
        let tp_order = OrderRecord {
            id: Uuid::new_v4().to_string(),
            trade_id: trade.id.clone(),
            symbol: plan.symbol.clone(),
            side: Side::Sell,
            order_type: OrderType::TakeProfit,
            status: OrderStatus::Pending,
            qty: plan.quantity,
            price: Some(plan.take_profit_price),
            filled_qty: None,
            filled_price: None,
            exchange_order_id: None,
            idempotency_key: None,
            created_at: now,
            filled_at: None,
        };

        let orders = vec![entry_order, sl_order.clone(), tp_order.clone()];
        ledger.insert(
            plan.trade_id.clone(),
            LedgerEntry {
                trade: trade.clone(),
                sl_price: plan.stop_loss_price,
                tp_price: plan.take_profit_price,
                sl_order,
                tp_order,
            },
        );

        Ok(EntryFill {
            trade,
            orders,
            idempotency_hit: false,
        })
    }

    async fn check_exits(&self, trade_id: &str, mark: Decimal) -> Result<Option<ExitFill>> {
        let mut ledger = self.ledger.lock();
        let Some(entry) = ledger.get_mut(trade_id) else {
            return Ok(None);
        };
        if entry.trade.side != Side::Buy {
            bail!("only long positions are supported");
        }

        // Stop-loss beats take-profit on a tie.
        let (reason, exit_price) = if mark <= entry.sl_price {
            (ExitReason::StopLoss, entry.sl_price)
        } else if mark >= entry.tp_price {
            (ExitReason::TakeProfit, entry.tp_price)
        } else {
            return Ok(None);
        };

        let fill = Self::build_exit(entry, exit_price, reason);
        ledger.remove(trade_id);
        Ok(Some(fill))
    }

    async fn execute_exit(
        &self,
        trade_id: &str,
        exit_price: Decimal,
        reason: ExitReason,
    ) -> Result<Option<ExitFill>> {
        let mut ledger = self.ledger.lock();
        let Some(entry) = ledger.get_mut(trade_id) else {
            return Ok(None);
        };
        let fill = Self::build_exit(entry, exit_price, reason);
        ledger.remove(trade_id);
        Ok(Some(fill))
    }

    async fn update_stop(&self, trade_id: &str, new_stop: Decimal) -> Result<()> {
        let mut ledger = self.ledger.lock();
        if let Some(entry) = ledger.get_mut(trade_id) {
            entry.sl_price = new_stop;
            entry.sl_order.price = Some(new_stop);
            entry.trade.stop_price = Some(new_stop);
        }
        Ok(())
    }

    async fn restore_open_trade(&self, trade: &TradeRecord) -> Result<()> {
        let (Some(sl), Some(tp)) = (trade.stop_price, trade.take_profit_price) else {
            bail!("cannot restore trade {} without stop/take-profit levels", trade.id);
        };

        let now = Utc::now();
        let resting = |order_type: OrderType, price: Decimal| OrderRecord {
            id: Uuid::new_v4().to_string(),
            trade_id: trade.id.clone(),
            symbol: trade.symbol.clone(),
            side: Side::Sell,
            order_type,
            status: OrderStatus::Pending,
            qty: trade.entry_qty,
            price: Some(price),
            filled_qty: None,
            filled_price: None,
            exchange_order_id: None,
            idempotency_key: None,
            created_at: now,
            filled_at: None,
        };

        self.ledger.lock().insert(
            trade.id.clone(),
            LedgerEntry {
                trade: trade.clone(),
                sl_price: sl,
                tp_price: tp,
                sl_order: resting(OrderType::StopLoss, sl),
                tp_order: resting(OrderType::TakeProfit, tp),
            },
        );
        Ok(())
    }
}
