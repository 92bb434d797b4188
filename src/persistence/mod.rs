//! Persistence layer: entity records and the SQLite-backed repository.
//!
//! All database access in the system goes through [`EngineRepository`];
//! entities are exclusively owned here and flow out as plain records.

mod repository;

pub use repository::EngineRepository;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::Side;

/// Event severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Info => "INFO",
            EventLevel::Warn => "WARN",
            EventLevel::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INFO" => Some(EventLevel::Info),
            "WARN" => Some(EventLevel::Warn),
            "ERROR" => Some(EventLevel::Error),
            _ => None,
        }
    }
}

/// A new event to append to the log.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_type: String,
    pub level: EventLevel,
    pub symbol: Option<String>,
    pub trade_id: Option<String>,
    pub payload: serde_json::Value,
    pub public_safe: bool,
}

impl EventDraft {
    pub fn new(event_type: impl Into<String>, level: EventLevel) -> Self {
        Self {
            event_type: event_type.into(),
            level,
            symbol: None,
            trade_id: None,
            payload: serde_json::json!({}),
            public_safe: false,
        }
    }

    pub fn info(event_type: impl Into<String>) -> Self {
        Self::new(event_type, EventLevel::Info)
    }

    pub fn warn(event_type: impl Into<String>) -> Self {
        Self::new(event_type, EventLevel::Warn)
    }

    pub fn error(event_type: impl Into<String>) -> Self {
        Self::new(event_type, EventLevel::Error)
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn trade(mut self, trade_id: impl Into<String>) -> Self {
        self.trade_id = Some(trade_id.into());
        self
    }

    pub fn public(mut self) -> Self {
        self.public_safe = true;
        self
    }
}

/// A persisted event row. `seq` is assigned by the database and is strictly
/// monotonic across the whole table, never reused.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub seq: i64,
    pub id: String,
    pub ts: DateTime<Utc>,
    pub level: EventLevel,
    pub event_type: String,
    pub symbol: Option<String>,
    pub trade_id: Option<String>,
    pub payload: serde_json::Value,
    pub public_safe: bool,
}

/// Filters for event queries. Events are returned with `seq > cursor`,
/// ascending.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub cursor: Option<i64>,
    pub limit: usize,
    pub event_types: Vec<String>,
    pub level: Option<EventLevel>,
    pub symbol: Option<String>,
    pub public_safe: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Open,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "OPEN",
            TradeStatus::Closed => "CLOSED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeMode {
    DryRun,
    Live,
}

impl TradeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeMode::DryRun => "DRY_RUN",
            TradeMode::Live => "LIVE",
        }
    }
}

/// A trade entity. Created OPEN by the executor on entry fill; mutated once
/// to CLOSED with exit fields; never mutated again.
#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub status: TradeStatus,
    pub mode: TradeMode,
    pub entry_price: Decimal,
    pub entry_qty: Decimal,
    pub entry_notional_usd: Decimal,
    pub opened_at: DateTime<Utc>,
    pub stop_price: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
    pub trailing_enabled: bool,
    pub trailing_offset: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
    pub realized_pnl_usd: Option<Decimal>,
    pub fees_paid_usd: Option<Decimal>,
    pub slippage_est_usd: Option<Decimal>,
    pub notes: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    StopLoss,
    TakeProfit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::StopLoss => "STOP_LOSS",
            OrderType::TakeProfit => "TAKE_PROFIT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

/// An order entity, owned by the executor.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRecord {
    pub id: String,
    pub trade_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub qty: Decimal,
    pub price: Option<Decimal>,
    pub filled_qty: Option<Decimal>,
    pub filled_price: Option<Decimal>,
    pub exchange_order_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EquitySnapshotRecord {
    pub id: String,
    pub ts: DateTime<Utc>,
    pub equity_usd: Decimal,
    pub cash_usd: Decimal,
    pub unrealized_pnl_usd: Decimal,
    pub realized_pnl_today_usd: Decimal,
    pub open_positions: i64,
    pub meta: Option<serde_json::Value>,
}

/// Encrypted exchange credential. At most one active, unrevoked row exists
/// per exchange.
#[derive(Debug, Clone)]
pub struct ExchangeKeyRecord {
    pub id: String,
    pub exchange: String,
    pub label: Option<String>,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub key_version: i64,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigVersionRecord {
    pub id: String,
    pub version: i64,
    pub config_json: serde_json::Value,
    pub config_hash: String,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}
