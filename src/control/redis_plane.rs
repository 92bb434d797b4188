//! Redis-backed control plane.
//!
//! Both the API and the engine connect to the same Redis instance, so state
//! changes made via the API are immediately visible to the engine. Reads
//! degrade to STOPPED on any backend error to protect capital.

use super::{
    BotState, ControlPlane, KEY_ARMED_AT, KEY_HEARTBEAT, KEY_KILL_SWITCH, KEY_NEWS_PAUSE,
    KEY_STATE,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{error, info, warn};

pub struct RedisControlPlane {
    manager: ConnectionManager,
}

impl RedisControlPlane {
    /// Connect and verify the backend with a PING.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("invalid Redis URL")?;
        let mut manager = ConnectionManager::new(client)
            .await
            .context("failed to connect to Redis")?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut manager)
            .await
            .context("Redis PING failed")?;
        Ok(Self { manager })
    }

    pub fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl ControlPlane for RedisControlPlane {
    async fn get_state(&self) -> BotState {
        let mut conn = self.manager.clone();
        match conn.get::<_, Option<String>>(KEY_STATE).await {
            Ok(Some(raw)) => BotState::parse(&raw).unwrap_or_else(|| {
                warn!(raw, "unknown bot state in Redis, treating as STOPPED");
                BotState::Stopped
            }),
            Ok(None) => BotState::Stopped,
            Err(e) => {
                error!(error = %e, "Redis read failed, defaulting to STOPPED");
                BotState::Stopped
            }
        }
    }

    async fn set_state(&self, state: BotState) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.set::<_, _, ()>(KEY_STATE, state.as_str())
            .await
            .context("failed to write control state")?;
        if state == BotState::Armed {
            let _: Result<(), _> = conn.set::<_, _, ()>(KEY_ARMED_AT, Utc::now().to_rfc3339()).await;
        }
        info!(state = state.as_str(), "control plane state set");
        Ok(())
    }

    async fn heartbeat(&self) {
        let mut conn = self.manager.clone();
        if let Err(e) = conn
            .set::<_, _, ()>(KEY_HEARTBEAT, Utc::now().timestamp())
            .await
        {
            warn!(error = %e, "heartbeat write failed");
        }
    }

    async fn set_kill_switch(&self, active: bool) -> Result<()> {
        let mut conn = self.manager.clone();
        if active {
            conn.set::<_, _, ()>(KEY_KILL_SWITCH, "1")
                .await
                .context("failed to set kill switch")?;
        } else {
            conn.del::<_, ()>(KEY_KILL_SWITCH)
                .await
                .context("failed to clear kill switch")?;
        }
        Ok(())
    }

    async fn kill_switch_active(&self) -> bool {
        let mut conn = self.manager.clone();
        match conn.exists::<_, bool>(KEY_KILL_SWITCH).await {
            Ok(active) => active,
            Err(e) => {
                // Fail closed: an unreachable backend blocks entries anyway
                // because get_state reads as STOPPED.
                warn!(error = %e, "kill switch read failed");
                false
            }
        }
    }

    async fn set_news_pause(&self, minutes: i64) -> Result<()> {
        let mut conn = self.manager.clone();
        let seconds = (minutes.max(0) * 60) as u64;
        conn.set_ex::<_, _, ()>(KEY_NEWS_PAUSE, "1", seconds)
            .await
            .context("failed to set news pause")?;
        Ok(())
    }

    async fn clear_news_pause(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(KEY_NEWS_PAUSE)
            .await
            .context("failed to clear news pause")?;
        Ok(())
    }

    async fn news_pause_active(&self) -> bool {
        let mut conn = self.manager.clone();
        match conn.exists::<_, bool>(KEY_NEWS_PAUSE).await {
            Ok(active) => active,
            Err(e) => {
                warn!(error = %e, "news pause read failed");
                false
            }
        }
    }
}
