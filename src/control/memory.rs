//! In-memory control plane for dry runs and tests.
//!
//! Not suitable for production where the API and engine are separate
//! processes.

use super::{BotState, ControlPlane};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct MemoryControlPlane {
    state: Mutex<BotState>,
    kill_switch: AtomicBool,
    news_pause_until: Mutex<Option<DateTime<Utc>>>,
    last_heartbeat: Mutex<Option<DateTime<Utc>>>,
}

impl MemoryControlPlane {
    pub fn new(initial_state: BotState) -> Self {
        Self {
            state: Mutex::new(initial_state),
            kill_switch: AtomicBool::new(false),
            news_pause_until: Mutex::new(None),
            last_heartbeat: Mutex::new(None),
        }
    }

    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        *self.last_heartbeat.lock()
    }
}

#[async_trait]
impl ControlPlane for MemoryControlPlane {
    async fn get_state(&self) -> BotState {
        *self.state.lock()
    }

    async fn set_state(&self, state: BotState) -> Result<()> {
        *self.state.lock() = state;
        Ok(())
    }

    async fn heartbeat(&self) {
        *self.last_heartbeat.lock() = Some(Utc::now());
    }

    async fn set_kill_switch(&self, active: bool) -> Result<()> {
        self.kill_switch.store(active, Ordering::SeqCst);
        Ok(())
    }

    async fn kill_switch_active(&self) -> bool {
        self.kill_switch.load(Ordering::SeqCst)
    }

    async fn set_news_pause(&self, minutes: i64) -> Result<()> {
        *self.news_pause_until.lock() = Some(Utc::now() + Duration::minutes(minutes));
        Ok(())
    }

    async fn clear_news_pause(&self) -> Result<()> {
        *self.news_pause_until.lock() = None;
        Ok(())
    }

    async fn news_pause_active(&self) -> bool {
        let mut guard = self.news_pause_until.lock();
        match *guard {
            Some(until) if Utc::now() < until => true,
            Some(_) => {
                // Expired; clear lazily like a TTL key.
                *guard = None;
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn kill_switch_toggles() {
        let plane = MemoryControlPlane::new(BotState::Running);
        assert!(!plane.kill_switch_active().await);
        plane.set_kill_switch(true).await.unwrap();
        assert!(plane.kill_switch_active().await);
        plane.set_kill_switch(false).await.unwrap();
        assert!(!plane.kill_switch_active().await);
    }

    #[tokio::test]
    async fn news_pause_expires() {
        let plane = MemoryControlPlane::new(BotState::Running);
        plane.set_news_pause(30).await.unwrap();
        assert!(plane.news_pause_active().await);
        plane.clear_news_pause().await.unwrap();
        assert!(!plane.news_pause_active().await);

        // A zero-minute pause is already expired.
        plane.set_news_pause(0).await.unwrap();
        assert!(!plane.news_pause_active().await);
    }

    #[tokio::test]
    async fn heartbeat_is_recorded() {
        let plane = MemoryControlPlane::new(BotState::Running);
        assert!(plane.last_heartbeat().is_none());
        plane.heartbeat().await;
        assert!(plane.last_heartbeat().is_some());
    }
}
