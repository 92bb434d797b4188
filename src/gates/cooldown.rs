//! Stop-loss cooldown gate: blocks re-entry after a stop-loss exit.
//!
//! Prevents cluster losses caused by immediate re-entry into a still
//! unfavorable market after being stopped out.

use crate::config::CooldownConfig;
use crate::gates::GateDecision;
use crate::models::ExitReason;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::info;

pub struct CooldownGate {
    config: CooldownConfig,
    last_sl_exit: HashMap<String, DateTime<Utc>>,
}

impl CooldownGate {
    pub fn new(config: CooldownConfig) -> Self {
        Self {
            config,
            last_sl_exit: HashMap::new(),
        }
    }

    /// Record a trade exit; only stop-loss exits start a cooldown.
    pub fn record_exit(&mut self, symbol: &str, reason: ExitReason, timestamp: DateTime<Utc>) {
        if !self.config.enabled {
            return;
        }
        if matches!(reason, ExitReason::StopLoss) {
            let until = timestamp + Duration::minutes(self.config.cooldown_minutes);
            self.last_sl_exit.insert(symbol.to_string(), timestamp);
            info!(symbol, until = %until, "cooldown started after stop-loss");
        }
    }

    pub fn check(&self, symbol: &str, now: DateTime<Utc>) -> GateDecision {
        if !self.config.enabled {
            return GateDecision::Allow;
        }
        let Some(last_sl) = self.last_sl_exit.get(symbol) else {
            return GateDecision::Allow;
        };

        let cooldown_end = *last_sl + Duration::minutes(self.config.cooldown_minutes);
        if now < cooldown_end {
            let remaining_min = (cooldown_end - now).num_seconds() as f64 / 60.0;
            GateDecision::reject(format!(
                "stop_loss_cooldown_active (remaining={remaining_min:.0}min)"
            ))
        } else {
            GateDecision::Allow
        }
    }

    pub fn reset(&mut self) {
        self.last_sl_exit.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(minutes: i64) -> CooldownGate {
        CooldownGate::new(CooldownConfig {
            enabled: true,
            cooldown_minutes: minutes,
        })
    }

    #[test]
    fn blocks_within_window_allows_after() {
        let mut gate = gate(30);
        let t0 = Utc::now();
        gate.record_exit("BTC/USDT", ExitReason::StopLoss, t0);

        let blocked = gate.check("BTC/USDT", t0 + Duration::minutes(29));
        assert!(!blocked.is_allowed());
        assert!(blocked.reason().unwrap().contains("stop_loss_cooldown_active"));

        let allowed = gate.check("BTC/USDT", t0 + Duration::minutes(31));
        assert!(allowed.is_allowed());
    }

    #[test]
    fn take_profit_exit_does_not_start_cooldown() {
        let mut gate = gate(30);
        let t0 = Utc::now();
        gate.record_exit("BTC/USDT", ExitReason::TakeProfit, t0);
        assert!(gate.check("BTC/USDT", t0 + Duration::minutes(1)).is_allowed());
    }

    #[test]
    fn other_symbols_unaffected() {
        let mut gate = gate(30);
        let t0 = Utc::now();
        gate.record_exit("BTC/USDT", ExitReason::StopLoss, t0);
        assert!(gate.check("ETH/USDT", t0 + Duration::minutes(1)).is_allowed());
    }

    #[test]
    fn disabled_gate_always_allows() {
        let mut gate = CooldownGate::new(CooldownConfig {
            enabled: false,
            cooldown_minutes: 30,
        });
        let t0 = Utc::now();
        gate.record_exit("BTC/USDT", ExitReason::StopLoss, t0);
        assert!(gate.check("BTC/USDT", t0).is_allowed());
    }
}
