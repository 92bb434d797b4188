//! HTTP/WS API: public read surface, private control plane, and the live
//! event stream.

mod errors;
mod private;
mod public;
pub mod sanitize;
mod ws;

pub use errors::ApiError;

use crate::auth::{auth_middleware, JwtService};
use crate::config::BotConfig;
use crate::control::BotController;
use crate::middleware::{rate_limit_middleware, RateLimitConfig, RateLimiter};
use crate::persistence::EngineRepository;
use crate::security::EncryptionService;
use axum::{middleware as axum_mw, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state for all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BotConfig>,
    pub repo: EngineRepository,
    pub controller: BotController,
    pub jwt: Arc<JwtService>,
    pub encryption: Option<Arc<EncryptionService>>,
}

/// Assemble the full API router.
pub fn router(state: AppState) -> Router {
    let limiter = RateLimiter::new(RateLimitConfig::default());

    let public = public::router(state.clone()).layer(axum_mw::from_fn_with_state(
        limiter,
        rate_limit_middleware,
    ));

    let private = private::router(state.clone()).layer(axum_mw::from_fn_with_state(
        state.jwt.clone(),
        auth_middleware,
    ));

    Router::new()
        .nest("/public/v1", public)
        .nest("/v1", private)
        .merge(ws::router(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
