//! SQLite-backed engine repository.
//!
//! Single writer for trades, orders, events, equity snapshots, exchange
//! keys, users, and config versions. Uses WAL mode and keeps the connection
//! behind a mutex; decimals are stored as TEXT and parsed on the way out so
//! no precision is lost to floating point.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{
    ConfigVersionRecord, EquitySnapshotRecord, EventDraft, EventLevel, EventQuery, EventRecord,
    ExchangeKeyRecord, OrderRecord, OrderStatus, OrderType, TradeMode, TradeRecord, TradeStatus,
    UserRecord,
};
use crate::models::Side;
use crate::security::EncryptionService;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS trades (
    id TEXT PRIMARY KEY,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    status TEXT NOT NULL,
    mode TEXT NOT NULL,
    entry_price TEXT NOT NULL,
    entry_qty TEXT NOT NULL,
    entry_notional_usd TEXT NOT NULL,
    opened_at TEXT NOT NULL,
    stop_price TEXT,
    take_profit_price TEXT,
    trailing_enabled INTEGER NOT NULL DEFAULT 0,
    trailing_offset TEXT,
    exit_price TEXT,
    closed_at TEXT,
    realized_pnl_usd TEXT,
    fees_paid_usd TEXT,
    slippage_est_usd TEXT,
    notes TEXT
);

CREATE INDEX IF NOT EXISTS ix_trades_symbol_opened_at
    ON trades(symbol, opened_at DESC);
CREATE INDEX IF NOT EXISTS ix_trades_status ON trades(status);

CREATE TABLE IF NOT EXISTS orders (
    id TEXT PRIMARY KEY,
    trade_id TEXT NOT NULL REFERENCES trades(id) ON DELETE CASCADE,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    order_type TEXT NOT NULL,
    status TEXT NOT NULL,
    qty TEXT NOT NULL,
    price TEXT,
    filled_qty TEXT,
    filled_price TEXT,
    exchange_order_id TEXT,
    idempotency_key TEXT,
    created_at TEXT NOT NULL,
    filled_at TEXT
);

CREATE INDEX IF NOT EXISTS ix_orders_trade_id ON orders(trade_id);
CREATE INDEX IF NOT EXISTS ix_orders_exchange_order_id
    ON orders(exchange_order_id);

-- seq doubles as the rowid: AUTOINCREMENT makes it strictly increasing and
-- never reused, which is the cursor contract for the live stream.
CREATE TABLE IF NOT EXISTS events (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    ts TEXT NOT NULL,
    level TEXT NOT NULL,
    type TEXT NOT NULL,
    symbol TEXT,
    trade_id TEXT REFERENCES trades(id) ON DELETE SET NULL,
    payload TEXT NOT NULL,
    public_safe INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS ix_events_ts ON events(ts DESC);
CREATE INDEX IF NOT EXISTS ix_events_type ON events(type);
CREATE INDEX IF NOT EXISTS ix_events_symbol ON events(symbol);
CREATE INDEX IF NOT EXISTS ix_events_public_safe ON events(public_safe);

CREATE TABLE IF NOT EXISTS equity_snapshots (
    id TEXT PRIMARY KEY,
    ts TEXT NOT NULL,
    equity_usd TEXT NOT NULL,
    cash_usd TEXT NOT NULL,
    unrealized_pnl_usd TEXT NOT NULL,
    realized_pnl_today_usd TEXT NOT NULL,
    open_positions INTEGER NOT NULL,
    meta TEXT
);

CREATE INDEX IF NOT EXISTS ix_equity_snapshots_ts ON equity_snapshots(ts DESC);

CREATE TABLE IF NOT EXISTS exchange_keys (
    id TEXT PRIMARY KEY,
    exchange TEXT NOT NULL,
    label TEXT,
    ciphertext BLOB NOT NULL,
    nonce BLOB NOT NULL,
    key_version INTEGER NOT NULL DEFAULT 1,
    created_by TEXT,
    created_at TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    revoked_at TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_exchange_keys_active
    ON exchange_keys(exchange) WHERE is_active = 1 AND revoked_at IS NULL;

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    role TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS bot_config_versions (
    id TEXT PRIMARY KEY,
    version INTEGER NOT NULL UNIQUE,
    config_json TEXT NOT NULL,
    config_hash TEXT NOT NULL,
    created_by TEXT,
    created_at TEXT NOT NULL,
    activated_at TEXT,
    is_active INTEGER NOT NULL DEFAULT 0
);
"#;

/// Shared handle to the engine database.
#[derive(Clone)]
pub struct EngineRepository {
    conn: Arc<Mutex<Connection>>,
}

impl EngineRepository {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn, path)
    }

    /// In-memory database for tests and throwaway dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::init(conn, ":memory:")
    }

    fn init(conn: Connection, path: &str) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to apply database schema")?;
        info!(path, "engine repository ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ---- trades ----

    pub fn save_trade(&self, trade: &TradeRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO trades (
                id, symbol, side, status, mode, entry_price, entry_qty,
                entry_notional_usd, opened_at, stop_price, take_profit_price,
                trailing_enabled, trailing_offset, exit_price, closed_at,
                realized_pnl_usd, fees_paid_usd, slippage_est_usd, notes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                      ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                trade.id,
                trade.symbol,
                trade.side.as_str(),
                trade.status.as_str(),
                trade.mode.as_str(),
                dec_sql(trade.entry_price),
                dec_sql(trade.entry_qty),
                dec_sql(trade.entry_notional_usd),
                ts_sql(trade.opened_at),
                trade.stop_price.map(dec_sql),
                trade.take_profit_price.map(dec_sql),
                trade.trailing_enabled as i64,
                trade.trailing_offset.map(dec_sql),
                trade.exit_price.map(dec_sql),
                trade.closed_at.map(ts_sql),
                trade.realized_pnl_usd.map(dec_sql),
                trade.fees_paid_usd.map(dec_sql),
                trade.slippage_est_usd.map(dec_sql),
                trade.notes.as_ref().map(|n| n.to_string()),
            ],
        )
        .context("failed to insert trade")?;
        Ok(())
    }

    pub fn get_trade(&self, trade_id: &str) -> Result<Option<TradeRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM trades WHERE id = ?1",
            params![trade_id],
            trade_from_row,
        )
        .optional()
        .context("failed to query trade")
    }

    /// Close an OPEN trade. The status check is a compare-and-set: a second
    /// close of the same trade returns `Ok(false)` and changes nothing.
    pub fn close_trade(
        &self,
        trade_id: &str,
        exit_price: Decimal,
        closed_at: DateTime<Utc>,
        realized_pnl_usd: Decimal,
        fees_paid_usd: Option<Decimal>,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE trades
                 SET status = 'CLOSED', exit_price = ?1, closed_at = ?2,
                     realized_pnl_usd = ?3,
                     fees_paid_usd = COALESCE(?4, fees_paid_usd)
                 WHERE id = ?5 AND status = 'OPEN'",
                params![
                    dec_sql(exit_price),
                    ts_sql(closed_at),
                    dec_sql(realized_pnl_usd),
                    fees_paid_usd.map(dec_sql),
                    trade_id,
                ],
            )
            .context("failed to close trade")?;
        Ok(changed == 1)
    }

    /// Move the stop of an open trade (trailing stop ratchet).
    pub fn update_trade_stop(&self, trade_id: &str, stop_price: Decimal) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE trades SET stop_price = ?1 WHERE id = ?2 AND status = 'OPEN'",
            params![dec_sql(stop_price), trade_id],
        )
        .context("failed to update trade stop")?;
        Ok(())
    }

    pub fn list_trades(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM trades ORDER BY opened_at DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], trade_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to list trades")
    }

    /// Most recent closed trades, newest first by close time.
    pub fn recent_closed_trades(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM trades WHERE status = 'CLOSED'
             ORDER BY closed_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], trade_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to list closed trades")
    }

    pub fn open_trades(&self) -> Result<Vec<TradeRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM trades WHERE status = 'OPEN' ORDER BY opened_at ASC",
        )?;
        let rows = stmt.query_map([], trade_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to list open trades")
    }

    /// Sum of realized PnL over trades closed within the current day of the
    /// given timezone.
    pub fn get_today_realized_pnl(&self, tz: Tz, now: DateTime<Utc>) -> Result<Decimal> {
        Ok(self
            .get_today_closed_trades(tz, now)?
            .iter()
            .filter_map(|t| t.realized_pnl_usd)
            .sum())
    }

    /// Trades closed within the current day of the given timezone, oldest
    /// first (close order).
    pub fn get_today_closed_trades(&self, tz: Tz, now: DateTime<Utc>) -> Result<Vec<TradeRecord>> {
        let (start, end) = day_bounds(tz, now);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM trades
             WHERE status = 'CLOSED' AND closed_at >= ?1 AND closed_at < ?2
             ORDER BY closed_at ASC",
        )?;
        let rows = stmt.query_map(params![ts_sql(start), ts_sql(end)], trade_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to list today's closed trades")
    }

    /// Equity = starting cash + sum of all closed-trade PnL. Open trades are
    /// carried at cost and do not move equity here.
    pub fn calculate_equity(&self, starting_cash_usd: Decimal) -> Result<Decimal> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT realized_pnl_usd FROM trades
             WHERE status = 'CLOSED' AND realized_pnl_usd IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut total = starting_cash_usd;
        for raw in rows {
            total += parse_dec(&raw?)?;
        }
        Ok(total)
    }

    // ---- orders ----

    pub fn save_order(&self, order: &OrderRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO orders (
                id, trade_id, symbol, side, order_type, status, qty, price,
                filled_qty, filled_price, exchange_order_id, idempotency_key,
                created_at, filled_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                order.id,
                order.trade_id,
                order.symbol,
                order.side.as_str(),
                order.order_type.as_str(),
                order.status.as_str(),
                dec_sql(order.qty),
                order.price.map(dec_sql),
                order.filled_qty.map(dec_sql),
                order.filled_price.map(dec_sql),
                order.exchange_order_id,
                order.idempotency_key,
                ts_sql(order.created_at),
                order.filled_at.map(ts_sql),
            ],
        )
        .context("failed to insert order")?;
        Ok(())
    }

    pub fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        filled_price: Option<Decimal>,
        filled_qty: Option<Decimal>,
        filled_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE orders
             SET status = ?1,
                 filled_price = COALESCE(?2, filled_price),
                 filled_qty = COALESCE(?3, filled_qty),
                 filled_at = COALESCE(?4, filled_at)
             WHERE id = ?5",
            params![
                status.as_str(),
                filled_price.map(dec_sql),
                filled_qty.map(dec_sql),
                filled_at.map(ts_sql),
                order_id,
            ],
        )
        .context("failed to update order status")?;
        Ok(())
    }

    pub fn orders_for_trade(&self, trade_id: &str) -> Result<Vec<OrderRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM orders WHERE trade_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![trade_id], order_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to list orders for trade")
    }

    // ---- events ----

    /// Append an event row. Returns the database-assigned `seq`.
    pub fn append_event(&self, draft: EventDraft) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO events (id, ts, level, type, symbol, trade_id, payload, public_safe)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                Uuid::new_v4().to_string(),
                ts_sql(Utc::now()),
                draft.level.as_str(),
                draft.event_type,
                draft.symbol,
                draft.trade_id,
                draft.payload.to_string(),
                draft.public_safe as i64,
            ],
        )
        .context("failed to append event")?;
        Ok(conn.last_insert_rowid())
    }

    /// Query events with `seq > cursor`, ascending, with optional filters.
    pub fn query_events(&self, query: &EventQuery) -> Result<Vec<EventRecord>> {
        let mut sql = String::from("SELECT * FROM events WHERE seq > ?");
        let cursor = query.cursor.unwrap_or(0);
        let limit = if query.limit == 0 { 100 } else { query.limit } as i64;
        let level = query.level.map(|l| l.as_str().to_string());
        let public_safe = query.public_safe.map(|p| p as i64);

        let mut args: Vec<&dyn rusqlite::types::ToSql> = vec![&cursor];
        if !query.event_types.is_empty() {
            let placeholders = vec!["?"; query.event_types.len()].join(", ");
            sql.push_str(&format!(" AND type IN ({placeholders})"));
            for t in &query.event_types {
                args.push(t);
            }
        }
        if let Some(level) = &level {
            sql.push_str(" AND level = ?");
            args.push(level);
        }
        if let Some(symbol) = &query.symbol {
            sql.push_str(" AND symbol = ?");
            args.push(symbol);
        }
        if let Some(public_safe) = &public_safe {
            sql.push_str(" AND public_safe = ?");
            args.push(public_safe);
        }
        sql.push_str(" ORDER BY seq ASC LIMIT ?");
        args.push(&limit);

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(&args[..], event_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to query events")
    }

    // ---- equity snapshots ----

    pub fn save_equity_snapshot(&self, snapshot: &EquitySnapshotRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO equity_snapshots (
                id, ts, equity_usd, cash_usd, unrealized_pnl_usd,
                realized_pnl_today_usd, open_positions, meta
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                snapshot.id,
                ts_sql(snapshot.ts),
                dec_sql(snapshot.equity_usd),
                dec_sql(snapshot.cash_usd),
                dec_sql(snapshot.unrealized_pnl_usd),
                dec_sql(snapshot.realized_pnl_today_usd),
                snapshot.open_positions,
                snapshot.meta.as_ref().map(|m| m.to_string()),
            ],
        )
        .context("failed to insert equity snapshot")?;
        Ok(())
    }

    pub fn latest_equity_snapshot(&self) -> Result<Option<EquitySnapshotRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM equity_snapshots ORDER BY ts DESC LIMIT 1",
            [],
            snapshot_from_row,
        )
        .optional()
        .context("failed to query latest equity snapshot")
    }

    // ---- exchange keys ----

    /// Insert a new active key for an exchange, deactivating any previous
    /// active key in the same transaction.
    pub fn insert_exchange_key(
        &self,
        exchange: &str,
        label: Option<&str>,
        ciphertext: Vec<u8>,
        nonce: Vec<u8>,
        created_by: Option<&str>,
    ) -> Result<ExchangeKeyRecord> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE exchange_keys SET is_active = 0 WHERE exchange = ?1 AND is_active = 1",
            params![exchange],
        )?;
        let record = ExchangeKeyRecord {
            id: Uuid::new_v4().to_string(),
            exchange: exchange.to_string(),
            label: label.map(str::to_string),
            ciphertext,
            nonce,
            key_version: 1,
            created_by: created_by.map(str::to_string),
            created_at: Utc::now(),
            is_active: true,
            revoked_at: None,
        };
        tx.execute(
            "INSERT INTO exchange_keys (
                id, exchange, label, ciphertext, nonce, key_version,
                created_by, created_at, is_active, revoked_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, NULL)",
            params![
                record.id,
                record.exchange,
                record.label,
                record.ciphertext,
                record.nonce,
                record.key_version,
                record.created_by,
                ts_sql(record.created_at),
            ],
        )?;
        tx.commit()?;
        Ok(record)
    }

    pub fn list_exchange_keys(&self) -> Result<Vec<ExchangeKeyRecord>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM exchange_keys ORDER BY created_at DESC")?;
        let rows = stmt.query_map([], exchange_key_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to list exchange keys")
    }

    /// Revoke a key. Returns false when the id is unknown or already revoked.
    pub fn revoke_exchange_key(&self, key_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE exchange_keys SET is_active = 0, revoked_at = ?1
             WHERE id = ?2 AND revoked_at IS NULL",
            params![ts_sql(Utc::now()), key_id],
        )?;
        Ok(changed == 1)
    }

    pub fn get_active_exchange_key(&self, exchange: &str) -> Result<Option<ExchangeKeyRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM exchange_keys
             WHERE exchange = ?1 AND is_active = 1 AND revoked_at IS NULL",
            params![exchange],
            exchange_key_from_row,
        )
        .optional()
        .context("failed to query active exchange key")
    }

    /// Decrypt the active credentials for an exchange, if any.
    pub fn get_active_exchange_credentials(
        &self,
        exchange: &str,
        encryption: &EncryptionService,
    ) -> Result<Option<(String, String)>> {
        match self.get_active_exchange_key(exchange)? {
            Some(key) => {
                let creds = encryption
                    .decrypt(&key.ciphertext, &key.nonce)
                    .with_context(|| format!("failed to decrypt key for {exchange}"))?;
                Ok(Some(creds))
            }
            None => Ok(None),
        }
    }

    // ---- users ----

    /// Insert a user. Fails with a "user exists" error on a duplicate email.
    pub fn insert_user(&self, email: &str, role: &str) -> Result<UserRecord> {
        let record = UserRecord {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
            created_at: Utc::now(),
        };
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO users (id, email, role, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![record.id, record.email, record.role, ts_sql(record.created_at)],
        );
        match result {
            Ok(_) => Ok(record),
            Err(e) if is_unique_violation(&e) => bail!("user exists: {email}"),
            Err(e) => Err(e).context("failed to insert user"),
        }
    }

    pub fn list_users(&self) -> Result<Vec<UserRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM users ORDER BY created_at ASC")?;
        let rows = stmt.query_map([], user_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to list users")
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM users WHERE email = ?1",
            params![email],
            user_from_row,
        )
        .optional()
        .context("failed to query user")
    }

    pub fn delete_user(&self, user_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
        Ok(changed == 1)
    }

    // ---- bot config versions ----

    /// Insert the next config version. Versions are monotonically assigned.
    pub fn insert_config_version(
        &self,
        config_json: &serde_json::Value,
        created_by: Option<&str>,
    ) -> Result<ConfigVersionRecord> {
        let serialized = config_json.to_string();
        let hash = hex::encode(Sha256::digest(serialized.as_bytes()));

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let version: i64 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM bot_config_versions",
            [],
            |row| row.get(0),
        )?;
        let record = ConfigVersionRecord {
            id: Uuid::new_v4().to_string(),
            version,
            config_json: config_json.clone(),
            config_hash: hash,
            created_by: created_by.map(str::to_string),
            created_at: Utc::now(),
            activated_at: None,
            is_active: false,
        };
        tx.execute(
            "INSERT INTO bot_config_versions (
                id, version, config_json, config_hash, created_by,
                created_at, activated_at, is_active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, 0)",
            params![
                record.id,
                record.version,
                serialized,
                record.config_hash,
                record.created_by,
                ts_sql(record.created_at),
            ],
        )?;
        tx.commit()?;
        Ok(record)
    }

    /// Activate one version, deactivating all others. Returns false when the
    /// version does not exist.
    pub fn activate_config_version(&self, version: i64) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("UPDATE bot_config_versions SET is_active = 0", [])?;
        let changed = tx.execute(
            "UPDATE bot_config_versions
             SET is_active = 1, activated_at = ?1 WHERE version = ?2",
            params![ts_sql(Utc::now()), version],
        )?;
        tx.commit()?;
        Ok(changed == 1)
    }

    pub fn active_config_version(&self) -> Result<Option<ConfigVersionRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM bot_config_versions WHERE is_active = 1",
            [],
            config_version_from_row,
        )
        .optional()
        .context("failed to query active config version")
    }
}

// ---- row mapping and conversions ----

fn ts_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn dec_sql(value: Decimal) -> String {
    value.to_string()
}

fn parse_dec(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("invalid decimal in database: {raw}"))
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp in database: {raw}"))
}

/// Start/end of the current day in `tz`, expressed in UTC.
fn day_bounds(tz: Tz, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let local_date = now.with_timezone(&tz).date_naive();
    let start_naive = local_date.and_hms_opt(0, 0, 0).unwrap_or_default();
    let start = tz
        .from_local_datetime(&start_naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&start_naive));
    (start, start + Duration::days(1))
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn sql_err(e: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
}

fn parse_side(raw: &str) -> Result<Side> {
    match raw {
        "BUY" => Ok(Side::Buy),
        "SELL" => Ok(Side::Sell),
        other => Err(anyhow!("unknown side: {other}")),
    }
}

fn get_dec(row: &Row<'_>, idx: &str) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    parse_dec(&raw).map_err(sql_err)
}

fn get_opt_dec(row: &Row<'_>, idx: &str) -> rusqlite::Result<Option<Decimal>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| parse_dec(&r).map_err(sql_err)).transpose()
}

fn get_ts(row: &Row<'_>, idx: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(sql_err)
}

fn get_opt_ts(row: &Row<'_>, idx: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| parse_ts(&r).map_err(sql_err)).transpose()
}

fn get_json(row: &Row<'_>, idx: &str) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| serde_json::from_str(&r).map_err(|e| sql_err(e.into())))
        .transpose()
}

fn trade_from_row(row: &Row<'_>) -> rusqlite::Result<TradeRecord> {
    let side: String = row.get("side")?;
    let status: String = row.get("status")?;
    let mode: String = row.get("mode")?;
    Ok(TradeRecord {
        id: row.get("id")?,
        symbol: row.get("symbol")?,
        side: parse_side(&side).map_err(sql_err)?,
        status: match status.as_str() {
            "OPEN" => TradeStatus::Open,
            "CLOSED" => TradeStatus::Closed,
            other => return Err(sql_err(anyhow!("unknown trade status: {other}"))),
        },
        mode: match mode.as_str() {
            "DRY_RUN" => TradeMode::DryRun,
            "LIVE" => TradeMode::Live,
            other => return Err(sql_err(anyhow!("unknown trade mode: {other}"))),
        },
        entry_price: get_dec(row, "entry_price")?,
        entry_qty: get_dec(row, "entry_qty")?,
        entry_notional_usd: get_dec(row, "entry_notional_usd")?,
        opened_at: get_ts(row, "opened_at")?,
        stop_price: get_opt_dec(row, "stop_price")?,
        take_profit_price: get_opt_dec(row, "take_profit_price")?,
        trailing_enabled: row.get::<_, i64>("trailing_enabled")? != 0,
        trailing_offset: get_opt_dec(row, "trailing_offset")?,
        exit_price: get_opt_dec(row, "exit_price")?,
        closed_at: get_opt_ts(row, "closed_at")?,
        realized_pnl_usd: get_opt_dec(row, "realized_pnl_usd")?,
        fees_paid_usd: get_opt_dec(row, "fees_paid_usd")?,
        slippage_est_usd: get_opt_dec(row, "slippage_est_usd")?,
        notes: get_json(row, "notes")?,
    })
}

fn order_from_row(row: &Row<'_>) -> rusqlite::Result<OrderRecord> {
    let side: String = row.get("side")?;
    let order_type: String = row.get("order_type")?;
    let status: String = row.get("status")?;
    Ok(OrderRecord {
        id: row.get("id")?,
        trade_id: row.get("trade_id")?,
        symbol: row.get("symbol")?,
        side: parse_side(&side).map_err(sql_err)?,
        order_type: match order_type.as_str() {
            "MARKET" => OrderType::Market,
            "STOP_LOSS" => OrderType::StopLoss,
            "TAKE_PROFIT" => OrderType::TakeProfit,
            other => return Err(sql_err(anyhow!("unknown order type: {other}"))),
        },
        status: match status.as_str() {
            "PENDING" => OrderStatus::Pending,
            "FILLED" => OrderStatus::Filled,
            "CANCELLED" => OrderStatus::Cancelled,
            other => return Err(sql_err(anyhow!("unknown order status: {other}"))),
        },
        qty: get_dec(row, "qty")?,
        price: get_opt_dec(row, "price")?,
        filled_qty: get_opt_dec(row, "filled_qty")?,
        filled_price: get_opt_dec(row, "filled_price")?,
        exchange_order_id: row.get("exchange_order_id")?,
        idempotency_key: row.get("idempotency_key")?,
        created_at: get_ts(row, "created_at")?,
        filled_at: get_opt_ts(row, "filled_at")?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventRecord> {
    let level: String = row.get("level")?;
    let payload: String = row.get("payload")?;
    Ok(EventRecord {
        seq: row.get("seq")?,
        id: row.get("id")?,
        ts: get_ts(row, "ts")?,
        level: EventLevel::parse(&level)
            .ok_or_else(|| sql_err(anyhow!("unknown event level: {level}")))?,
        event_type: row.get("type")?,
        symbol: row.get("symbol")?,
        trade_id: row.get("trade_id")?,
        payload: serde_json::from_str(&payload).map_err(|e| sql_err(e.into()))?,
        public_safe: row.get::<_, i64>("public_safe")? != 0,
    })
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<EquitySnapshotRecord> {
    Ok(EquitySnapshotRecord {
        id: row.get("id")?,
        ts: get_ts(row, "ts")?,
        equity_usd: get_dec(row, "equity_usd")?,
        cash_usd: get_dec(row, "cash_usd")?,
        unrealized_pnl_usd: get_dec(row, "unrealized_pnl_usd")?,
        realized_pnl_today_usd: get_dec(row, "realized_pnl_today_usd")?,
        open_positions: row.get("open_positions")?,
        meta: get_json(row, "meta")?,
    })
}

fn exchange_key_from_row(row: &Row<'_>) -> rusqlite::Result<ExchangeKeyRecord> {
    Ok(ExchangeKeyRecord {
        id: row.get("id")?,
        exchange: row.get("exchange")?,
        label: row.get("label")?,
        ciphertext: row.get("ciphertext")?,
        nonce: row.get("nonce")?,
        key_version: row.get("key_version")?,
        created_by: row.get("created_by")?,
        created_at: get_ts(row, "created_at")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        revoked_at: get_opt_ts(row, "revoked_at")?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get("id")?,
        email: row.get("email")?,
        role: row.get("role")?,
        created_at: get_ts(row, "created_at")?,
    })
}

fn config_version_from_row(row: &Row<'_>) -> rusqlite::Result<ConfigVersionRecord> {
    let config_json: String = row.get("config_json")?;
    Ok(ConfigVersionRecord {
        id: row.get("id")?,
        version: row.get("version")?,
        config_json: serde_json::from_str(&config_json).map_err(|e| sql_err(e.into()))?,
        config_hash: row.get("config_hash")?,
        created_by: row.get("created_by")?,
        created_at: get_ts(row, "created_at")?,
        activated_at: get_opt_ts(row, "activated_at")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn open_trade(id: &str, symbol: &str) -> TradeRecord {
        TradeRecord {
            id: id.to_string(),
            symbol: symbol.to_string(),
            side: Side::Buy,
            status: TradeStatus::Open,
            mode: TradeMode::DryRun,
            entry_price: dec!(50000),
            entry_qty: dec!(0.1),
            entry_notional_usd: dec!(5000),
            opened_at: Utc::now(),
            stop_price: Some(dec!(49000)),
            take_profit_price: Some(dec!(52000)),
            trailing_enabled: false,
            trailing_offset: None,
            exit_price: None,
            closed_at: None,
            realized_pnl_usd: None,
            fees_paid_usd: None,
            slippage_est_usd: None,
            notes: None,
        }
    }

    #[test]
    fn save_and_get_trade_round_trip() {
        let repo = EngineRepository::open_in_memory().unwrap();
        repo.save_trade(&open_trade("t1", "BTC/USDT")).unwrap();
        let trade = repo.get_trade("t1").unwrap().unwrap();
        assert_eq!(trade.symbol, "BTC/USDT");
        assert_eq!(trade.entry_price, dec!(50000));
        assert_eq!(trade.status, TradeStatus::Open);
        assert!(repo.get_trade("missing").unwrap().is_none());
    }

    #[test]
    fn close_trade_is_cas_on_open_status() {
        let repo = EngineRepository::open_in_memory().unwrap();
        repo.save_trade(&open_trade("t1", "BTC/USDT")).unwrap();

        let closed = repo
            .close_trade("t1", dec!(52000), Utc::now(), dec!(200), None)
            .unwrap();
        assert!(closed);

        // Double close is rejected.
        let closed_again = repo
            .close_trade("t1", dec!(53000), Utc::now(), dec!(300), None)
            .unwrap();
        assert!(!closed_again);

        let trade = repo.get_trade("t1").unwrap().unwrap();
        assert_eq!(trade.status, TradeStatus::Closed);
        assert_eq!(trade.exit_price, Some(dec!(52000)));
        assert_eq!(trade.realized_pnl_usd, Some(dec!(200)));
    }

    #[test]
    fn event_seq_is_strictly_increasing() {
        let repo = EngineRepository::open_in_memory().unwrap();
        let mut last = 0;
        for i in 0..5 {
            let seq = repo
                .append_event(EventDraft::info("test.event").payload(json!({"i": i})))
                .unwrap();
            assert!(seq > last);
            last = seq;
        }
    }

    #[test]
    fn query_events_cursor_pagination() {
        let repo = EngineRepository::open_in_memory().unwrap();
        let mut seqs = Vec::new();
        for i in 0..4 {
            seqs.push(
                repo.append_event(EventDraft::info("test.event").payload(json!({"i": i})))
                    .unwrap(),
            );
        }

        let all = repo
            .query_events(&EventQuery {
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|w| w[0].seq < w[1].seq));

        let after_second = repo
            .query_events(&EventQuery {
                cursor: Some(seqs[1]),
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(after_second.len(), 2);
        assert_eq!(after_second[0].seq, seqs[2]);
    }

    #[test]
    fn query_events_filters() {
        let repo = EngineRepository::open_in_memory().unwrap();
        repo.append_event(EventDraft::info("a.one").public()).unwrap();
        repo.append_event(EventDraft::warn("b.two").symbol("BTC/USDT"))
            .unwrap();

        let public_only = repo
            .query_events(&EventQuery {
                public_safe: Some(true),
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(public_only.len(), 1);
        assert_eq!(public_only[0].event_type, "a.one");

        let by_symbol = repo
            .query_events(&EventQuery {
                symbol: Some("BTC/USDT".to_string()),
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_symbol.len(), 1);
        assert_eq!(by_symbol[0].level, EventLevel::Warn);
    }

    #[test]
    fn today_realized_pnl_in_utc_day() {
        let repo = EngineRepository::open_in_memory().unwrap();
        let mut t1 = open_trade("t1", "BTC/USDT");
        repo.save_trade(&t1).unwrap();
        repo.close_trade("t1", dec!(52000), Utc::now(), dec!(200), None)
            .unwrap();

        t1.id = "t2".to_string();
        repo.save_trade(&t1).unwrap();
        repo.close_trade("t2", dec!(49000), Utc::now(), dec!(-100), None)
            .unwrap();

        let pnl = repo.get_today_realized_pnl(chrono_tz::UTC, Utc::now()).unwrap();
        assert_eq!(pnl, dec!(100));

        let trades = repo
            .get_today_closed_trades(chrono_tz::UTC, Utc::now())
            .unwrap();
        assert_eq!(trades.len(), 2);
    }

    #[test]
    fn equity_ignores_open_trades() {
        let repo = EngineRepository::open_in_memory().unwrap();
        repo.save_trade(&open_trade("t1", "BTC/USDT")).unwrap();
        repo.close_trade("t1", dec!(51000), Utc::now(), dec!(100), None)
            .unwrap();
        repo.save_trade(&open_trade("t2", "ETH/USDT")).unwrap();

        let equity = repo.calculate_equity(dec!(10000)).unwrap();
        assert_eq!(equity, dec!(10100));
    }

    #[test]
    fn exchange_key_single_active_per_exchange() {
        let repo = EngineRepository::open_in_memory().unwrap();
        let first = repo
            .insert_exchange_key("binance", Some("old"), vec![1, 2], vec![3, 4], None)
            .unwrap();
        let second = repo
            .insert_exchange_key("binance", Some("new"), vec![5, 6], vec![7, 8], None)
            .unwrap();

        let active = repo.get_active_exchange_key("binance").unwrap().unwrap();
        assert_eq!(active.id, second.id);

        assert!(repo.revoke_exchange_key(&second.id).unwrap());
        assert!(repo.get_active_exchange_key("binance").unwrap().is_none());
        // Revoking again is a no-op.
        assert!(!repo.revoke_exchange_key(&second.id).unwrap());
    }

    #[test]
    fn user_unique_email() {
        let repo = EngineRepository::open_in_memory().unwrap();
        repo.insert_user("a@example.com", "ADMIN").unwrap();
        let err = repo.insert_user("a@example.com", "VIEWER").unwrap_err();
        assert!(err.to_string().contains("user exists"));
    }

    #[test]
    fn config_versions_single_active() {
        let repo = EngineRepository::open_in_memory().unwrap();
        let v1 = repo
            .insert_config_version(&json!({"a": 1}), None)
            .unwrap();
        let v2 = repo
            .insert_config_version(&json!({"a": 2}), None)
            .unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
        assert_ne!(v1.config_hash, v2.config_hash);

        assert!(repo.activate_config_version(2).unwrap());
        assert_eq!(repo.active_config_version().unwrap().unwrap().version, 2);
        assert!(repo.activate_config_version(1).unwrap());
        assert_eq!(repo.active_config_version().unwrap().unwrap().version, 1);
        assert!(!repo.activate_config_version(99).unwrap());
    }

    #[test]
    fn order_round_trip_and_status_update() {
        let repo = EngineRepository::open_in_memory().unwrap();
        repo.save_trade(&open_trade("t1", "BTC/USDT")).unwrap();
        let order = OrderRecord {
            id: "o1".to_string(),
            trade_id: "t1".to_string(),
            symbol: "BTC/USDT".to_string(),
            side: Side::Sell,
            order_type: OrderType::StopLoss,
            status: OrderStatus::Pending,
            qty: dec!(0.1),
            price: Some(dec!(49000)),
            filled_qty: None,
            filled_price: None,
            exchange_order_id: None,
            idempotency_key: Some("QS-t1-STOP_LOSS".to_string()),
            created_at: Utc::now(),
            filled_at: None,
        };
        repo.save_order(&order).unwrap();
        repo.update_order_status(
            "o1",
            OrderStatus::Filled,
            Some(dec!(49000)),
            Some(dec!(0.1)),
            Some(Utc::now()),
        )
        .unwrap();

        let orders = repo.orders_for_trade("t1").unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Filled);
        assert_eq!(orders[0].filled_price, Some(dec!(49000)));
    }
}
