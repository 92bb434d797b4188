//! Execution abstraction: deterministic dry-run fills and idempotent live
//! exchange orders behind one contract.

mod adapter;
mod binance;
mod dry_run;
mod live;

pub use adapter::{ExchangeAdapter, ExchangeOrder, Ticker};
pub use binance::BinanceSpotAdapter;
pub use dry_run::DryRunExecutor;
pub use live::LiveExecutor;

use crate::models::{ExitReason, TradePlan};
use crate::persistence::{OrderRecord, TradeRecord};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Result of a filled entry.
#[derive(Debug, Clone)]
pub struct EntryFill {
    pub trade: TradeRecord,
    pub orders: Vec<OrderRecord>,
    /// True when this call re-returned an already-executed trade instead of
    /// contacting the exchange.
    pub idempotency_hit: bool,
}

/// Result of a filled exit.
#[derive(Debug, Clone)]
pub struct ExitFill {
    pub trade: TradeRecord,
    pub exit_order: OrderRecord,
    /// SL/TP order rows whose status changed (FILLED / CANCELLED).
    pub updated_orders: Vec<OrderRecord>,
    pub reason: ExitReason,
}

/// Common execution contract for dry-run and live trading.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Execute the entry for a plan. Idempotent on `plan.trade_id`.
    async fn execute_entry(&self, plan: &TradePlan) -> Result<EntryFill>;

    /// Check whether the stop-loss or take-profit level is hit at `mark`;
    /// stop-loss wins on a tie. Returns the exit when one fired.
    async fn check_exits(&self, trade_id: &str, mark: Decimal) -> Result<Option<ExitFill>>;

    /// Force an exit at `exit_price` (trailing-stop path).
    async fn execute_exit(
        &self,
        trade_id: &str,
        exit_price: Decimal,
        reason: ExitReason,
    ) -> Result<Option<ExitFill>>;

    /// Ratchet the tracked stop level for an open trade.
    async fn update_stop(&self, trade_id: &str, new_stop: Decimal) -> Result<()>;

    /// Re-seed executor state for an open trade found in the repository on
    /// startup. Persistence-backed executors need no work here.
    async fn restore_open_trade(&self, trade: &TradeRecord) -> Result<()>;
}
