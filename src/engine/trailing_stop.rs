//! Trailing stop-loss manager.
//!
//! Tracks the highest price seen per open position and ratchets the stop
//! behind it once the activation threshold over entry is cleared. The stop
//! only moves up, never down.

use crate::config::TrailingStopConfig;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

struct PositionState {
    entry_price: Decimal,
    highest_price: Decimal,
    current_stop: Decimal,
}

pub struct TrailingStopManager {
    config: TrailingStopConfig,
    positions: HashMap<String, PositionState>,
}

impl TrailingStopManager {
    pub fn new(config: TrailingStopConfig) -> Self {
        Self {
            config,
            positions: HashMap::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Start tracking a new position. Returns the initial stop.
    pub fn init_position(
        &mut self,
        trade_id: &str,
        entry_price: Decimal,
        initial_stop: Decimal,
    ) -> Decimal {
        self.positions.insert(
            trade_id.to_string(),
            PositionState {
                entry_price,
                highest_price: entry_price,
                current_stop: initial_stop,
            },
        );
        initial_stop
    }

    /// Update with the latest price, returning the (possibly ratcheted)
    /// stop level, or None for untracked positions.
    pub fn update(
        &mut self,
        trade_id: &str,
        current_price: Decimal,
        atr_value: Decimal,
    ) -> Option<Decimal> {
        let state = self.positions.get_mut(trade_id)?;
        if !self.config.enabled {
            return Some(state.current_stop);
        }

        if current_price > state.highest_price {
            state.highest_price = current_price;
        }

        // Hold the initial stop until price has run `activation_pct` above
        // entry.
        if state.entry_price > Decimal::ZERO {
            let profit_pct = (state.highest_price - state.entry_price) / state.entry_price
                * dec!(100);
            if profit_pct < self.config.activation_pct {
                return Some(state.current_stop);
            }
        }

        let candidate = match self.config.method.as_str() {
            "pct" => state.highest_price * (Decimal::ONE - self.config.trail_pct / dec!(100)),
            // Chandelier trails ATR from the highest high, which for this
            // tracker is the same reference price as the plain ATR method.
            "atr" | "chandelier" if atr_value > Decimal::ZERO => {
                state.highest_price - atr_value * self.config.atr_multiplier
            }
            _ => state.current_stop,
        };

        // Ratchet only.
        if candidate > state.current_stop {
            state.current_stop = candidate;
        }
        Some(state.current_stop)
    }

    pub fn stop_level(&self, trade_id: &str) -> Option<Decimal> {
        self.positions.get(trade_id).map(|s| s.current_stop)
    }

    pub fn remove_position(&mut self, trade_id: &str) {
        self.positions.remove(trade_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(method: &str) -> TrailingStopManager {
        TrailingStopManager::new(TrailingStopConfig {
            enabled: true,
            method: method.to_string(),
            activation_pct: dec!(1.0),
            trail_pct: dec!(1.0),
            atr_period: 14,
            atr_multiplier: dec!(2.0),
        })
    }

    #[test]
    fn stop_holds_until_activation() {
        let mut m = manager("pct");
        m.init_position("t1", dec!(100), dec!(95));
        // +0.5% is below the 1% activation threshold.
        assert_eq!(m.update("t1", dec!(100.5), Decimal::ZERO), Some(dec!(95)));
    }

    #[test]
    fn pct_stop_ratchets_with_new_highs() {
        let mut m = manager("pct");
        m.init_position("t1", dec!(100), dec!(95));

        // +2%: stop moves to 102 * 0.99 = 100.98.
        let stop = m.update("t1", dec!(102), Decimal::ZERO).unwrap();
        assert_eq!(stop, dec!(100.98));

        // Price retreats: stop never decreases.
        let stop = m.update("t1", dec!(101), Decimal::ZERO).unwrap();
        assert_eq!(stop, dec!(100.98));

        // New high: stop follows.
        let stop = m.update("t1", dec!(104), Decimal::ZERO).unwrap();
        assert_eq!(stop, dec!(102.96));
    }

    #[test]
    fn atr_stop_trails_by_multiple() {
        let mut m = manager("atr");
        m.init_position("t1", dec!(100), dec!(95));
        // High 104, ATR 1.5 -> stop = 104 - 3 = 101.
        let stop = m.update("t1", dec!(104), dec!(1.5)).unwrap();
        assert_eq!(stop, dec!(101));
    }

    #[test]
    fn zero_atr_keeps_current_stop() {
        let mut m = manager("atr");
        m.init_position("t1", dec!(100), dec!(95));
        assert_eq!(m.update("t1", dec!(104), Decimal::ZERO), Some(dec!(95)));
    }

    #[test]
    fn untracked_trade_returns_none() {
        let mut m = manager("pct");
        assert!(m.update("missing", dec!(100), Decimal::ZERO).is_none());
    }

    #[test]
    fn removed_position_is_forgotten() {
        let mut m = manager("pct");
        m.init_position("t1", dec!(100), dec!(95));
        m.remove_position("t1");
        assert!(m.stop_level("t1").is_none());
    }
}
