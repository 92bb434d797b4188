//! Circuit breakers: named safety conditions that block entries for a fixed
//! duration when triggered. Exits are never blocked by a breaker.

mod manager;
mod triggers;

pub use manager::BreakerManager;
pub use triggers::{check_consecutive_losses, check_spread_spike, check_volatility_spike};

use chrono::{DateTime, Utc};

/// An active circuit breaker.
#[derive(Debug, Clone)]
pub struct ActiveBreaker {
    pub breaker_type: String,
    pub triggered_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reason: String,
    pub context: serde_json::Value,
}
