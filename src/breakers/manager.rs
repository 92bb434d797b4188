//! Circuit breaker manager: tracks active breakers, expires them, and gates
//! entries.

use super::ActiveBreaker;
use crate::gates::GateDecision;
use crate::persistence::{EngineRepository, EventDraft};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::HashMap;
use tracing::warn;

pub struct BreakerManager {
    repo: EngineRepository,
    news_enabled: bool,
    active: HashMap<String, ActiveBreaker>,
}

impl BreakerManager {
    pub fn new(repo: EngineRepository, news_enabled: bool) -> Self {
        Self {
            repo,
            news_enabled,
            active: HashMap::new(),
        }
    }

    /// Whether entries are currently allowed. `news_pause_active` is the
    /// shared flag read from the control plane by the caller; it is only
    /// honoured when the news breaker is enabled in config.
    pub fn entries_allowed(
        &mut self,
        now: DateTime<Utc>,
        news_pause_active: bool,
    ) -> Result<GateDecision> {
        self.expire_breakers(now)?;

        if self.news_enabled && news_pause_active {
            return Ok(GateDecision::reject("negative news pause active"));
        }

        if let Some(breaker) = self.active.values().next() {
            return Ok(GateDecision::reject(format!(
                "{} breaker active: {}",
                breaker.breaker_type, breaker.reason
            )));
        }

        Ok(GateDecision::Allow)
    }

    /// Exits are never blocked by breakers.
    pub fn exits_allowed(&self) -> bool {
        true
    }

    pub fn is_active(&self, breaker_type: &str) -> bool {
        self.active.contains_key(breaker_type)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Trigger a breaker for `pause_minutes`. Re-triggering an already
    /// active breaker extends it.
    pub fn trigger(
        &mut self,
        breaker_type: &str,
        reason: impl Into<String>,
        pause_minutes: i64,
        context: serde_json::Value,
    ) -> Result<()> {
        let reason = reason.into();
        let now = Utc::now();
        let expires_at = now + Duration::minutes(pause_minutes);

        warn!(breaker_type, %reason, %expires_at, "circuit breaker triggered");

        let mut payload = json!({
            "breaker_type": breaker_type,
            "reason": reason,
            "triggered_at": now.to_rfc3339(),
            "expires_at": expires_at.to_rfc3339(),
            "pause_minutes": pause_minutes,
        });
        if let (Some(map), Some(extra)) = (payload.as_object_mut(), context.as_object()) {
            for (k, v) in extra {
                map.insert(k.clone(), v.clone());
            }
        }

        self.repo
            .append_event(EventDraft::warn("breaker.triggered").payload(payload).public())?;

        self.active.insert(
            breaker_type.to_string(),
            ActiveBreaker {
                breaker_type: breaker_type.to_string(),
                triggered_at: now,
                expires_at,
                reason,
                context,
            },
        );
        Ok(())
    }

    /// Drop breakers past their expiry, emitting `breaker.expired` with the
    /// active duration.
    fn expire_breakers(&mut self, now: DateTime<Utc>) -> Result<()> {
        let expired: Vec<String> = self
            .active
            .values()
            .filter(|b| now >= b.expires_at)
            .map(|b| b.breaker_type.clone())
            .collect();

        for breaker_type in expired {
            if let Some(breaker) = self.active.remove(&breaker_type) {
                let active_minutes =
                    (now - breaker.triggered_at).num_seconds() as f64 / 60.0;
                self.repo.append_event(
                    EventDraft::info("breaker.expired")
                        .payload(json!({
                            "breaker_type": breaker_type,
                            "expired_at": now.to_rfc3339(),
                            "was_active_for_minutes": (active_minutes * 100.0).round() / 100.0,
                        }))
                        .public(),
                )?;
            }
        }
        Ok(())
    }
}
