//! Live event stream: a long-lived WebSocket that tails the event log with
//! cursor resume.
//!
//! The client connects with an optional `?cursor=<seq>`; the server drains
//! the backlog, then polls for new events and emits a `status` heartbeat
//! when nothing moves. Payloads are redacted before leaving the process.

use super::sanitize::redact_payload;
use super::AppState;
use crate::auth::{bearer_token, Claims};
use crate::persistence::{EventQuery, EventRecord};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{RawQuery, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use serde_json::json;
use std::borrow::Cow;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const CLOSE_POLICY_VIOLATION: u16 = 1008;
const CLOSE_UNSUPPORTED_DATA: u16 = 1003;
const CLOSE_INTERNAL_ERROR: u16 = 1011;

fn poll_interval() -> Duration {
    let seconds = std::env::var("WS_POLL_SECONDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1.0_f64);
    Duration::from_secs_f64(seconds)
}

fn heartbeat_interval() -> Duration {
    let seconds = std::env::var("WS_HEARTBEAT_SECONDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(15.0_f64);
    Duration::from_secs_f64(seconds)
}

fn backlog_limit() -> usize {
    std::env::var("WS_BACKLOG_LIMIT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(100)
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/ws", get(upgrade)).with_state(state)
}

/// Map event types to stream message categories.
fn message_type(event_type: &str) -> &'static str {
    if event_type.starts_with("trade.") {
        "trade"
    } else if event_type == "snapshot" {
        "snapshot"
    } else {
        "event"
    }
}

fn build_envelope(event: &EventRecord) -> serde_json::Value {
    json!({
        "type": message_type(&event.event_type),
        "ts": event.ts,
        "cursor": event.seq,
        "event_type": event.event_type,
        "level": event.level,
        "symbol": event.symbol,
        "trade_id": event.trade_id,
        "public_safe": event.public_safe,
        "payload": redact_payload(&event.payload),
    })
}

fn heartbeat_envelope() -> serde_json::Value {
    json!({
        "type": "status",
        "ts": Utc::now(),
        "cursor": null,
        "event_type": null,
        "level": "INFO",
        "symbol": null,
        "trade_id": null,
        "public_safe": false,
        "payload": {"ok": true},
    })
}

fn parse_cursor(query: Option<&str>) -> Result<i64, ()> {
    let Some(raw) = query.and_then(|q| {
        q.split('&')
            .find_map(|pair| pair.strip_prefix("cursor="))
    }) else {
        return Ok(0);
    };
    raw.parse::<i64>().map_err(|_| ()).and_then(|c| {
        if c < 0 {
            Err(())
        } else {
            Ok(c)
        }
    })
}

async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: Cow::Borrowed(reason),
        })))
        .await;
}

async fn upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    ws_upgrade: WebSocketUpgrade,
) -> Response {
    // Authenticate before streaming; failures surface as close codes so
    // browser clients can distinguish them.
    let claims: Option<Claims> = bearer_token(&headers, query.as_deref())
        .and_then(|token| state.jwt.verify(&token).ok());

    ws_upgrade.on_upgrade(move |socket| async move {
        let Some(claims) = claims else {
            close_with(socket, CLOSE_POLICY_VIOLATION, "AUTH_REQUIRED").await;
            return;
        };
        if !claims.role.can_stream() {
            close_with(socket, CLOSE_POLICY_VIOLATION, "RBAC_FORBIDDEN").await;
            return;
        }
        let cursor = match parse_cursor(query.as_deref()) {
            Ok(cursor) => cursor,
            Err(()) => {
                close_with(socket, CLOSE_UNSUPPORTED_DATA, "INVALID_CURSOR").await;
                return;
            }
        };

        debug!(email = %claims.email, cursor, "live stream connected");
        stream_events(socket, state, cursor).await;
    })
}

async fn stream_events(mut socket: WebSocket, state: AppState, cursor: i64) {
    let mut last_cursor = cursor;
    let mut last_sent = Instant::now();
    let poll = poll_interval();
    let heartbeat = heartbeat_interval();
    let batch = backlog_limit();

    let mut ticker = tokio::time::interval(poll);
    // The first tick fires immediately and drains the backlog.
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let events = match state.repo.query_events(&EventQuery {
                    cursor: Some(last_cursor),
                    limit: batch,
                    ..Default::default()
                }) {
                    Ok(events) => events,
                    Err(e) => {
                        warn!(error = %e, "event query failed, closing stream");
                        close_with(socket, CLOSE_INTERNAL_ERROR, "EVENT_QUERY_FAILED").await;
                        return;
                    }
                };

                for event in &events {
                    last_cursor = event.seq;
                    let envelope = build_envelope(event);
                    if socket.send(Message::Text(envelope.to_string())).await.is_err() {
                        // Slow or gone client; stop rather than buffer.
                        close_with(socket, CLOSE_INTERNAL_ERROR, "SEND_FAILED").await;
                        return;
                    }
                    last_sent = Instant::now();
                }

                if last_sent.elapsed() >= heartbeat {
                    if socket
                        .send(Message::Text(heartbeat_envelope().to_string()))
                        .await
                        .is_err()
                    {
                        return;
                    }
                    last_sent = Instant::now();
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // Any client frame counts as a wakeup; a close or error
                    // ends the stream.
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Err(_)) => return,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::EventLevel;

    #[test]
    fn cursor_parsing() {
        assert_eq!(parse_cursor(None), Ok(0));
        assert_eq!(parse_cursor(Some("cursor=17")), Ok(17));
        assert_eq!(parse_cursor(Some("token=t&cursor=5")), Ok(5));
        assert!(parse_cursor(Some("cursor=abc")).is_err());
        assert!(parse_cursor(Some("cursor=-1")).is_err());
    }

    #[test]
    fn message_type_mapping() {
        assert_eq!(message_type("trade.opened"), "trade");
        assert_eq!(message_type("trade.closed"), "trade");
        assert_eq!(message_type("snapshot"), "snapshot");
        assert_eq!(message_type("breaker.triggered"), "event");
    }

    #[test]
    fn envelope_redacts_payload_but_keeps_identity() {
        let event = EventRecord {
            seq: 42,
            id: "e1".to_string(),
            ts: Utc::now(),
            level: EventLevel::Info,
            event_type: "trade.opened".to_string(),
            symbol: Some("BTC/USDT".to_string()),
            trade_id: Some("t1".to_string()),
            payload: json!({"symbol": "BTC/USDT", "idempotency_key": "QS-t1-ENTRY"}),
            public_safe: true,
        };
        let envelope = build_envelope(&event);
        assert_eq!(envelope["cursor"], json!(42));
        assert_eq!(envelope["trade_id"], json!("t1"));
        assert!(envelope["payload"].get("idempotency_key").is_none());
        assert_eq!(envelope["payload"]["symbol"], json!("BTC/USDT"));
    }
}
