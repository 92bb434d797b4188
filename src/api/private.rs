//! Private bearer-authenticated endpoints: queries, bot lifecycle, exchange
//! keys, users, news ingest, and config versions.

use super::{ApiError, AppState};
use crate::auth::{Claims, Role};
use crate::config::ExecutionMode;
use crate::persistence::{EventLevel, EventQuery};
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/trades", get(list_trades))
        .route("/events", get(list_events))
        .route("/equity", get(equity))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/bot/arm", post(arm))
        .route("/bot/start", post(start))
        .route("/bot/pause", post(pause))
        .route("/bot/resume", post(resume))
        .route("/bot/stop", post(stop))
        .route("/bot/kill", post(kill))
        .route("/bot/kill/reset", post(kill_reset))
        .route("/news/pause", post(news_pause))
        .route("/news/clear", post(news_clear))
        .route("/keys", get(list_keys).post(create_key))
        .route("/keys/:id", delete(revoke_key))
        .route("/users", get(list_users).post(create_user))
        .route("/users/:id", delete(delete_user))
        .route("/config/active", get(active_config))
        .route("/config", post(push_config))
        .route("/config/:version/activate", post(activate_config))
        .with_state(state)
}

fn require_operator(claims: &Claims) -> Result<(), ApiError> {
    if claims.role.can_operate() {
        Ok(())
    } else {
        Err(ApiError::forbidden())
    }
}

// ---- queries ----

#[derive(Debug, Deserialize)]
struct TradesQuery {
    limit: Option<usize>,
}

async fn list_trades(
    State(state): State<AppState>,
    Query(query): Query<TradesQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let trades = state.repo.list_trades(limit)?;
    Ok(Json(json!({"trades": trades})))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    cursor: Option<i64>,
    limit: Option<usize>,
    level: Option<String>,
    symbol: Option<String>,
    event_type: Option<String>,
}

async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Value>, ApiError> {
    if query.cursor.is_some_and(|c| c < 0) {
        return Err(ApiError::invalid_cursor());
    }
    let level = match &query.level {
        Some(raw) => Some(
            EventLevel::parse(&raw.to_uppercase())
                .ok_or_else(|| ApiError::invalid_update(format!("unknown level '{raw}'")))?,
        ),
        None => None,
    };
    let event_types = query
        .event_type
        .map(|raw| raw.split(',').map(str::to_string).collect())
        .unwrap_or_default();

    let events = state.repo.query_events(&EventQuery {
        cursor: query.cursor,
        limit: query.limit.unwrap_or(100).clamp(1, 1000),
        event_types,
        level,
        symbol: query.symbol,
        public_safe: None,
    })?;
    let next_cursor = events.last().map(|e| e.seq);
    Ok(Json(json!({"events": events, "next_cursor": next_cursor})))
}

async fn equity(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let snapshot = state.repo.latest_equity_snapshot()?;
    Ok(Json(json!({"snapshot": snapshot})))
}

async fn health(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let db_ok = state.repo.latest_equity_snapshot().is_ok();
    Ok(Json(json!({"ok": db_ok, "db": db_ok})))
}

async fn status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let plane = state.controller.plane();
    let bot_state = plane.get_state().await;
    let open = state.repo.open_trades()?;
    Ok(Json(json!({
        "state": bot_state,
        "mode": state.config.execution.mode,
        "kill_switch": plane.kill_switch_active().await,
        "news_pause": plane.news_pause_active().await,
        "open_positions": open.len(),
        "symbols": state.config.symbols.enabled,
    })))
}

// ---- bot lifecycle ----

async fn arm(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>, ApiError> {
    require_operator(&claims)?;
    let token = state.controller.arm().await?;
    Ok(Json(json!({"arming_token": token})))
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    mode: ExecutionMode,
    arming_token: Option<String>,
}

async fn start(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<StartRequest>,
) -> Result<Json<Value>, ApiError> {
    require_operator(&claims)?;
    state
        .controller
        .start(body.mode, body.arming_token.as_deref())
        .await?;
    Ok(Json(json!({"state": "RUNNING"})))
}

async fn pause(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>, ApiError> {
    require_operator(&claims)?;
    state.controller.pause().await?;
    Ok(Json(json!({"state": "PAUSED_ENTRIES"})))
}

async fn resume(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>, ApiError> {
    require_operator(&claims)?;
    state.controller.resume().await?;
    Ok(Json(json!({"state": "RUNNING"})))
}

async fn stop(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>, ApiError> {
    require_operator(&claims)?;
    state.controller.stop().await?;
    Ok(Json(json!({"state": "STOPPED"})))
}

async fn kill(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>, ApiError> {
    require_operator(&claims)?;
    state.controller.kill().await?;
    Ok(Json(json!({"kill_switch": true})))
}

async fn kill_reset(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>, ApiError> {
    require_operator(&claims)?;
    state.controller.reset_kill().await?;
    Ok(Json(json!({"kill_switch": false})))
}

// ---- news ingest ----

#[derive(Debug, Deserialize)]
struct NewsPauseRequest {
    minutes: i64,
}

async fn news_pause(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<NewsPauseRequest>,
) -> Result<Json<Value>, ApiError> {
    require_operator(&claims)?;
    if body.minutes <= 0 {
        return Err(ApiError::invalid_update("minutes must be positive"));
    }
    state
        .controller
        .plane()
        .set_news_pause(body.minutes)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(json!({"news_pause": true, "minutes": body.minutes})))
}

async fn news_clear(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>, ApiError> {
    require_operator(&claims)?;
    state
        .controller
        .plane()
        .clear_news_pause()
        .await
        .map_err(ApiError::from)?;
    Ok(Json(json!({"news_pause": false})))
}

// ---- exchange keys ----

fn key_metadata(key: &crate::persistence::ExchangeKeyRecord) -> Value {
    json!({
        "id": key.id,
        "exchange": key.exchange,
        "label": key.label,
        "key_version": key.key_version,
        "created_at": key.created_at,
        "is_active": key.is_active,
        "revoked_at": key.revoked_at,
    })
}

async fn list_keys(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>, ApiError> {
    require_operator(&claims)?;
    let keys = state.repo.list_exchange_keys()?;
    let metadata: Vec<Value> = keys.iter().map(key_metadata).collect();
    Ok(Json(json!({"keys": metadata})))
}

#[derive(Debug, Deserialize)]
struct CreateKeyRequest {
    exchange: String,
    label: Option<String>,
    api_key: String,
    secret: String,
}

async fn create_key(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<CreateKeyRequest>,
) -> Result<Json<Value>, ApiError> {
    require_operator(&claims)?;
    let Some(encryption) = &state.encryption else {
        return Err(ApiError::invalid_update(
            "MASTER_KEY is not configured; key storage unavailable",
        ));
    };
    if body.exchange.is_empty() || body.api_key.is_empty() || body.secret.is_empty() {
        return Err(ApiError::invalid_update(
            "exchange, api_key, and secret are required",
        ));
    }

    let plaintext = format!("{}:{}", body.api_key, body.secret);
    let (ciphertext, nonce) = encryption.encrypt(&plaintext)?;
    let record = state.repo.insert_exchange_key(
        &body.exchange,
        body.label.as_deref(),
        ciphertext,
        nonce,
        Some(&claims.sub),
    )?;
    Ok(Json(key_metadata(&record)))
}

async fn revoke_key(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_operator(&claims)?;
    let keys = state.repo.list_exchange_keys()?;
    let Some(key) = keys.iter().find(|k| k.id == id) else {
        return Err(ApiError::not_found(format!("no exchange key {id}")));
    };
    if key.revoked_at.is_some() {
        return Err(ApiError::key_revoked());
    }
    state.repo.revoke_exchange_key(&id)?;
    Ok(Json(json!({"revoked": true, "id": id})))
}

// ---- users ----

async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>, ApiError> {
    require_operator(&claims)?;
    let users = state.repo.list_users()?;
    Ok(Json(json!({"users": users})))
}

#[derive(Debug, Deserialize)]
struct CreateUserRequest {
    email: String,
    role: String,
}

async fn create_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<CreateUserRequest>,
) -> Result<Json<Value>, ApiError> {
    require_operator(&claims)?;
    let Some(role) = Role::parse(&body.role) else {
        return Err(ApiError::invalid_update(format!(
            "unknown role '{}'",
            body.role
        )));
    };
    if !body.email.contains('@') {
        return Err(ApiError::invalid_update("email is not valid"));
    }
    if state.repo.get_user_by_email(&body.email)?.is_some() {
        return Err(ApiError::user_exists(&body.email));
    }
    let user = state.repo.insert_user(&body.email, role.as_str())?;
    Ok(Json(json!({"user": user})))
}

async fn delete_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_operator(&claims)?;
    if Uuid::parse_str(&id).is_err() {
        return Err(ApiError::invalid_id(format!("'{id}' is not a valid id")));
    }
    if !state.repo.delete_user(&id)? {
        return Err(ApiError::not_found(format!("no user {id}")));
    }
    Ok(Json(json!({"deleted": true, "id": id})))
}

// ---- config versions ----

async fn active_config(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>, ApiError> {
    require_operator(&claims)?;
    let active = state.repo.active_config_version()?;
    Ok(Json(json!({"config_version": active})))
}

async fn push_config(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    require_operator(&claims)?;
    // The document must at least deserialize into a valid BotConfig.
    let parsed: Result<crate::config::BotConfig, _> = serde_json::from_value(body.clone());
    let config = parsed.map_err(|e| ApiError::invalid_update(format!("invalid config: {e}")))?;
    config
        .validate()
        .map_err(|e| ApiError::invalid_update(e.to_string()))?;

    let record = state.repo.insert_config_version(&body, Some(&claims.sub))?;
    Ok(Json(json!({
        "version": record.version,
        "config_hash": record.config_hash,
    })))
}

async fn activate_config(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(version): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    require_operator(&claims)?;
    if !state.repo.activate_config_version(version)? {
        return Err(ApiError::not_found(format!("no config version {version}")));
    }
    Ok(Json(json!({"active_version": version})))
}
