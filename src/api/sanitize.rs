//! Payload scrubbing for the public API and the live stream.
//!
//! The public sanitizer drops identifiers as well as secret material; the
//! stream redactor keeps identifiers (they appear at envelope level for
//! authenticated subscribers) but strips everything secret-like.

use crate::persistence::{EquitySnapshotRecord, EventRecord, TradeRecord};
use serde_json::{json, Map, Value};

/// Keys never allowed out through the public API.
const FORBIDDEN_KEYS: [&str; 8] = [
    "exchange_order_id",
    "idempotency_key",
    "ciphertext",
    "nonce",
    "api_key",
    "secret",
    "id",
    "trade_id",
];

/// Keys stripped from stream payloads (identifiers stay).
const SECRET_KEYS: [&str; 6] = [
    "exchange_order_id",
    "idempotency_key",
    "ciphertext",
    "nonce",
    "api_key",
    "secret",
];

fn scrub(payload: &Value, dropped: &[&str]) -> Value {
    let Some(map) = payload.as_object() else {
        return json!({});
    };

    let mut clean = Map::new();
    for (key, value) in map {
        let lower = key.to_lowercase();
        if dropped.contains(&key.as_str()) {
            continue;
        }
        if lower.contains("secret") || lower.contains("key") {
            continue;
        }
        clean.insert(key.clone(), value.clone());
    }
    Value::Object(clean)
}

/// Remove forbidden fields and secrets from an event payload (public API).
pub fn sanitize_payload(payload: &Value) -> Value {
    scrub(payload, &FORBIDDEN_KEYS)
}

/// Remove secret fields from payloads for the live stream.
pub fn redact_payload(payload: &Value) -> Value {
    scrub(payload, &SECRET_KEYS)
}

/// Public-safe event response.
pub fn sanitize_event(event: &EventRecord) -> Value {
    json!({
        "ts": event.ts,
        "level": event.level,
        "type": event.event_type,
        "symbol": event.symbol,
        "payload": sanitize_payload(&event.payload),
    })
}

/// Public-safe trade response.
pub fn sanitize_trade(trade: &TradeRecord) -> Value {
    json!({
        "symbol": trade.symbol,
        "side": trade.side,
        "status": trade.status,
        "mode": trade.mode,
        "opened_at": trade.opened_at,
        "closed_at": trade.closed_at,
        "entry_price": trade.entry_price,
        "exit_price": trade.exit_price,
        "realized_pnl_usd": trade.realized_pnl_usd,
    })
}

/// Public-safe summary from the latest equity snapshot.
pub fn sanitize_summary(snapshot: Option<&EquitySnapshotRecord>) -> Value {
    match snapshot {
        Some(s) => json!({
            "ts": s.ts,
            "equity_usd": s.equity_usd,
            "cash_usd": s.cash_usd,
            "unrealized_pnl_usd": s.unrealized_pnl_usd,
            "realized_pnl_today_usd": s.realized_pnl_today_usd,
            "open_positions": s.open_positions,
        }),
        None => json!({
            "ts": null,
            "equity_usd": null,
            "cash_usd": null,
            "unrealized_pnl_usd": null,
            "realized_pnl_today_usd": null,
            "open_positions": null,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded_payload() -> Value {
        json!({
            "symbol": "BTC/USDT",
            "pnl_usd": 12.5,
            "id": "abc",
            "trade_id": "def",
            "exchange_order_id": "123",
            "idempotency_key": "QS-def-ENTRY",
            "api_key": "AKIA",
            "secret": "hunter2",
            "ciphertext": "zz",
            "nonce": "yy",
            "master_secret_thing": "x",
            "some_key_name": "x",
            "SomeSecretValue": "x",
        })
    }

    #[test]
    fn sanitize_drops_all_forbidden_and_secret_like_keys() {
        let clean = sanitize_payload(&loaded_payload());
        let map = clean.as_object().unwrap();
        assert_eq!(map.len(), 2);
        assert!(map.contains_key("symbol"));
        assert!(map.contains_key("pnl_usd"));
    }

    #[test]
    fn redact_keeps_identifiers_but_not_secrets() {
        let clean = redact_payload(&loaded_payload());
        let map = clean.as_object().unwrap();
        assert!(map.contains_key("id"));
        assert!(map.contains_key("trade_id"));
        assert!(!map.contains_key("api_key"));
        assert!(!map.contains_key("exchange_order_id"));
        assert!(!map.contains_key("master_secret_thing"));
        assert!(!map.contains_key("some_key_name"));
    }

    #[test]
    fn secret_matching_is_case_insensitive() {
        let clean = sanitize_payload(&json!({"MySECRET": 1, "ApiKey": 2, "fine": 3}));
        let map = clean.as_object().unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("fine"));
    }

    #[test]
    fn non_object_payload_becomes_empty_object() {
        assert_eq!(sanitize_payload(&json!("just a string")), json!({}));
        assert_eq!(sanitize_payload(&json!(null)), json!({}));
    }
}
