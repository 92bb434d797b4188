//! Daily per-symbol consecutive-loss limit.
//!
//! Pauses trading on a symbol after N consecutive losses within one UTC day.
//! The counter resets on a new UTC day or a winning trade on the symbol.

use crate::config::DailySymbolLimitConfig;
use crate::gates::GateDecision;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::info;

pub struct DailySymbolLossLimit {
    config: DailySymbolLimitConfig,
    // symbol -> (consecutive losses, UTC day of last update)
    state: HashMap<String, (usize, String)>,
}

impl DailySymbolLossLimit {
    pub fn new(config: DailySymbolLimitConfig) -> Self {
        Self {
            config,
            state: HashMap::new(),
        }
    }

    fn day_key(timestamp: DateTime<Utc>) -> String {
        timestamp.format("%Y-%m-%d").to_string()
    }

    pub fn record_loss(&mut self, symbol: &str, timestamp: DateTime<Utc>) {
        if !self.config.enabled {
            return;
        }
        let day = Self::day_key(timestamp);
        let losses = match self.state.get(symbol) {
            Some((count, last_day)) if *last_day == day => count + 1,
            _ => 1,
        };
        self.state.insert(symbol.to_string(), (losses, day.clone()));
        info!(symbol, losses, day, "daily consecutive loss recorded");
    }

    pub fn record_win(&mut self, symbol: &str, timestamp: DateTime<Utc>) {
        if !self.config.enabled {
            return;
        }
        self.state
            .insert(symbol.to_string(), (0, Self::day_key(timestamp)));
    }

    pub fn check(&self, symbol: &str, now: DateTime<Utc>) -> GateDecision {
        if !self.config.enabled {
            return GateDecision::Allow;
        }
        let Some((losses, day)) = self.state.get(symbol) else {
            return GateDecision::Allow;
        };
        // A new day resets the counter.
        if *day != Self::day_key(now) {
            return GateDecision::Allow;
        }
        if *losses >= self.config.max_consecutive_losses {
            GateDecision::reject(format!(
                "daily_symbol_loss_limit ({losses} consecutive losses today, max={})",
                self.config.max_consecutive_losses
            ))
        } else {
            GateDecision::Allow
        }
    }

    pub fn reset(&mut self) {
        self.state.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn gate(max: usize) -> DailySymbolLossLimit {
        DailySymbolLossLimit::new(DailySymbolLimitConfig {
            enabled: true,
            max_consecutive_losses: max,
        })
    }

    #[test]
    fn blocks_after_max_losses() {
        let mut gate = gate(2);
        let now = Utc::now();
        gate.record_loss("BTC/USDT", now);
        assert!(gate.check("BTC/USDT", now).is_allowed());
        gate.record_loss("BTC/USDT", now);
        assert!(!gate.check("BTC/USDT", now).is_allowed());
    }

    #[test]
    fn win_resets_counter() {
        let mut gate = gate(2);
        let now = Utc::now();
        gate.record_loss("BTC/USDT", now);
        gate.record_loss("BTC/USDT", now);
        gate.record_win("BTC/USDT", now);
        assert!(gate.check("BTC/USDT", now).is_allowed());
    }

    #[test]
    fn new_day_resets_counter() {
        let mut gate = gate(2);
        let now = Utc::now();
        gate.record_loss("BTC/USDT", now);
        gate.record_loss("BTC/USDT", now);
        assert!(!gate.check("BTC/USDT", now).is_allowed());
        assert!(gate.check("BTC/USDT", now + Duration::days(1)).is_allowed());
    }
}
