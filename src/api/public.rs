//! Public read-only endpoints, rate-limited per client IP.

use super::sanitize::{sanitize_event, sanitize_summary, sanitize_trade};
use super::{ApiError, AppState};
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::persistence::EventQuery;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/summary", get(summary))
        .route("/trades", get(trades))
        .route("/events", get(events))
        .route("/heartbeat", get(heartbeat))
        .with_state(state)
}

/// Latest equity snapshot, scrubbed.
async fn summary(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let snapshot = state.repo.latest_equity_snapshot()?;
    Ok(Json(sanitize_summary(snapshot.as_ref())))
}

/// Most recent closed trades, public fields only.
async fn trades(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let limit = clamp_limit(query.limit);
    let closed: Vec<Value> = state
        .repo
        .recent_closed_trades(limit)?
        .iter()
        .map(sanitize_trade)
        .collect();
    Ok(Json(closed))
}

/// Public-safe events with sanitized payloads.
async fn events(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let limit = clamp_limit(query.limit);
    let rows = state.repo.query_events(&EventQuery {
        public_safe: Some(true),
        limit,
        ..Default::default()
    })?;
    Ok(Json(rows.iter().map(sanitize_event).collect()))
}

/// Liveness probe.
async fn heartbeat() -> Json<Value> {
    Json(json!({"ok": true, "ts": Utc::now()}))
}
