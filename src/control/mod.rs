//! Control plane: bot lifecycle state shared between the API and the
//! engine, with the arming-token protocol, news pause, and kill switch.
//!
//! Backed by Redis when `REDIS_URL` is configured so state changes made via
//! the API are immediately visible to the engine. Falls back to an
//! in-memory store for dry runs and tests. All reads degrade to the safe
//! state (STOPPED) when the backend is unreachable.

mod arming;
mod memory;
mod redis_plane;

pub use arming::{ArmingCache, InMemoryArmingCache, RedisArmingCache, ARMING_TOKEN_TTL_SECONDS};
pub use memory::MemoryControlPlane;
pub use redis_plane::RedisControlPlane;

use crate::config::ExecutionMode;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Redis key namespace.
pub(crate) const KEY_STATE: &str = "quantsail:control:state";
pub(crate) const KEY_ARMED_AT: &str = "quantsail:control:armed_at";
pub(crate) const KEY_HEARTBEAT: &str = "quantsail:control:heartbeat";
pub(crate) const KEY_KILL_SWITCH: &str = "quantsail:control:kill_switch";
pub(crate) const KEY_NEWS_PAUSE: &str = "news:pause:negative";

/// Bot lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotState {
    Stopped,
    Armed,
    Running,
    PausedEntries,
}

impl BotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotState::Stopped => "STOPPED",
            BotState::Armed => "ARMED",
            BotState::Running => "RUNNING",
            BotState::PausedEntries => "PAUSED_ENTRIES",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STOPPED" => Some(BotState::Stopped),
            "ARMED" => Some(BotState::Armed),
            "RUNNING" => Some(BotState::Running),
            "PAUSED_ENTRIES" => Some(BotState::PausedEntries),
            _ => None,
        }
    }
}

/// Shared control plane contract.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Current desired bot state. Never fails: an unreachable backend reads
    /// as STOPPED.
    async fn get_state(&self) -> BotState;

    /// Set the desired bot state. Backend failure is surfaced to the caller.
    async fn set_state(&self, state: BotState) -> Result<()>;

    /// Entries are allowed only while RUNNING.
    async fn entries_allowed(&self) -> bool {
        self.get_state().await == BotState::Running
    }

    /// Exits stay allowed in RUNNING, PAUSED_ENTRIES, and ARMED. Existing
    /// positions must be manageable even while entries are held back.
    async fn exits_allowed(&self) -> bool {
        matches!(
            self.get_state().await,
            BotState::Running | BotState::PausedEntries | BotState::Armed
        )
    }

    /// Stamp the engine heartbeat. Write failures are logged, not raised.
    async fn heartbeat(&self);

    async fn set_kill_switch(&self, active: bool) -> Result<()>;
    async fn kill_switch_active(&self) -> bool;

    /// Set the shared negative-news pause flag for `minutes`.
    async fn set_news_pause(&self, minutes: i64) -> Result<()>;
    async fn clear_news_pause(&self) -> Result<()>;
    async fn news_pause_active(&self) -> bool;
}

/// Errors from the bot lifecycle protocol, mapped to API error codes.
#[derive(Debug)]
pub enum ControlError {
    /// Live start without a token, or from a state that was never armed.
    ArmRequired,
    /// Token already consumed or timed out.
    ArmExpired,
    Backend(anyhow::Error),
}

impl std::fmt::Display for ControlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlError::ArmRequired => write!(f, "arming token required for live start"),
            ControlError::ArmExpired => write!(f, "arming token expired or already used"),
            ControlError::Backend(e) => write!(f, "control plane backend error: {e}"),
        }
    }
}

impl std::error::Error for ControlError {}

/// Enforces the arming protocol on top of the raw control plane.
#[derive(Clone)]
pub struct BotController {
    plane: Arc<dyn ControlPlane>,
    arming: Arc<dyn ArmingCache>,
}

impl BotController {
    pub fn new(plane: Arc<dyn ControlPlane>, arming: Arc<dyn ArmingCache>) -> Self {
        Self { plane, arming }
    }

    pub fn plane(&self) -> &Arc<dyn ControlPlane> {
        &self.plane
    }

    /// Transition to ARMED and issue a one-time token with a short TTL.
    pub async fn arm(&self) -> Result<String, ControlError> {
        self.plane
            .set_state(BotState::Armed)
            .await
            .map_err(ControlError::Backend)?;
        let token = self
            .arming
            .create_token(ARMING_TOKEN_TTL_SECONDS)
            .await
            .map_err(ControlError::Backend)?;
        info!("bot armed, one-time token issued");
        Ok(token)
    }

    /// Transition to RUNNING. Live mode requires a valid arming token,
    /// consumed atomically; dry-run starts unconditionally.
    pub async fn start(
        &self,
        mode: ExecutionMode,
        token: Option<&str>,
    ) -> Result<(), ControlError> {
        if mode == ExecutionMode::Live {
            let token = token.ok_or(ControlError::ArmRequired)?;
            let consumed = self
                .arming
                .verify_and_consume(token)
                .await
                .map_err(ControlError::Backend)?;
            if !consumed {
                return Err(ControlError::ArmExpired);
            }
        }
        self.plane
            .set_state(BotState::Running)
            .await
            .map_err(ControlError::Backend)?;
        info!(mode = mode.as_str(), "bot started");
        Ok(())
    }

    pub async fn pause(&self) -> Result<(), ControlError> {
        self.plane
            .set_state(BotState::PausedEntries)
            .await
            .map_err(ControlError::Backend)
    }

    pub async fn resume(&self) -> Result<(), ControlError> {
        self.plane
            .set_state(BotState::Running)
            .await
            .map_err(ControlError::Backend)
    }

    pub async fn stop(&self) -> Result<(), ControlError> {
        self.plane
            .set_state(BotState::Stopped)
            .await
            .map_err(ControlError::Backend)
    }

    pub async fn kill(&self) -> Result<(), ControlError> {
        self.plane
            .set_kill_switch(true)
            .await
            .map_err(ControlError::Backend)
    }

    pub async fn reset_kill(&self) -> Result<(), ControlError> {
        self.plane
            .set_kill_switch(false)
            .await
            .map_err(ControlError::Backend)
    }
}

/// Connect to Redis when a URL is configured, otherwise fall back to the
/// in-memory store. Initialised once at startup and injected everywhere.
pub async fn connect(redis_url: Option<&str>) -> (Arc<dyn ControlPlane>, Arc<dyn ArmingCache>) {
    if let Some(url) = redis_url {
        match RedisControlPlane::connect(url).await {
            Ok(plane) => {
                info!(url, "control plane connected to Redis");
                let arming = Arc::new(RedisArmingCache::new(plane.manager()));
                return (Arc::new(plane), arming);
            }
            Err(e) => {
                error!(url, error = %e, "Redis unavailable, falling back to in-memory control plane");
            }
        }
    } else {
        warn!("REDIS_URL not set, using in-memory control plane (single-process only)");
    }
    (
        Arc::new(MemoryControlPlane::new(BotState::Stopped)),
        Arc::new(InMemoryArmingCache::new()),
    )
}
