//! Exchange adapter contract.

use crate::models::Side;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// A submitted (or queried) exchange order in normalized form.
#[derive(Debug, Clone)]
pub struct ExchangeOrder {
    pub exchange_order_id: String,
    pub client_order_id: Option<String>,
    pub avg_fill_price: Option<Decimal>,
    pub filled_qty: Option<Decimal>,
    pub status: String,
}

#[derive(Debug, Clone, Copy)]
pub struct Ticker {
    pub last: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
}

/// Exchange interactions used by the live executor and reconciliation.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Submit a market order. `client_order_id` is the idempotency key; the
    /// exchange deduplicates resubmissions carrying the same id.
    async fn create_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        client_order_id: Option<&str>,
    ) -> Result<ExchangeOrder>;

    async fn cancel_order(&self, symbol: &str, exchange_order_id: &str) -> Result<()>;

    /// Free balances per asset.
    async fn fetch_balance(&self) -> Result<HashMap<String, Decimal>>;

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<ExchangeOrder>>;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker>;
}
