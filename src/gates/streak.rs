//! Losing-streak position size reducer.
//!
//! After `min_consecutive_losses` losses on a symbol, the sizing multiplier
//! drops to `reduction_factor`. A win restores full sizing. This gate never
//! rejects; it only adjusts quantity.

use crate::config::StreakSizerConfig;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::info;

pub struct StreakSizer {
    config: StreakSizerConfig,
    streaks: HashMap<String, usize>,
}

impl StreakSizer {
    pub fn new(config: StreakSizerConfig) -> Self {
        Self {
            config,
            streaks: HashMap::new(),
        }
    }

    pub fn record_result(&mut self, symbol: &str, won: bool) {
        if !self.config.enabled {
            return;
        }
        if won {
            if let Some(prev) = self.streaks.insert(symbol.to_string(), 0) {
                if prev >= self.config.min_consecutive_losses {
                    info!(symbol, previous_streak = prev, "win restores full sizing");
                }
            }
        } else {
            let streak = self.streaks.get(symbol).copied().unwrap_or(0) + 1;
            self.streaks.insert(symbol.to_string(), streak);
            if streak >= self.config.min_consecutive_losses {
                info!(
                    symbol,
                    streak,
                    factor = %self.config.reduction_factor,
                    "loss streak reduces sizing"
                );
            }
        }
    }

    pub fn multiplier(&self, symbol: &str) -> Decimal {
        if !self.config.enabled {
            return Decimal::ONE;
        }
        let streak = self.streaks.get(symbol).copied().unwrap_or(0);
        if streak >= self.config.min_consecutive_losses {
            self.config.reduction_factor
        } else {
            Decimal::ONE
        }
    }

    pub fn reset(&mut self) {
        self.streaks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sizer() -> StreakSizer {
        StreakSizer::new(StreakSizerConfig {
            enabled: true,
            min_consecutive_losses: 2,
            reduction_factor: dec!(0.5),
        })
    }

    #[test]
    fn reduces_after_streak() {
        let mut sizer = sizer();
        assert_eq!(sizer.multiplier("BTC/USDT"), Decimal::ONE);
        sizer.record_result("BTC/USDT", false);
        assert_eq!(sizer.multiplier("BTC/USDT"), Decimal::ONE);
        sizer.record_result("BTC/USDT", false);
        assert_eq!(sizer.multiplier("BTC/USDT"), dec!(0.5));
    }

    #[test]
    fn win_restores_full_size() {
        let mut sizer = sizer();
        sizer.record_result("BTC/USDT", false);
        sizer.record_result("BTC/USDT", false);
        sizer.record_result("BTC/USDT", true);
        assert_eq!(sizer.multiplier("BTC/USDT"), Decimal::ONE);
    }

    #[test]
    fn disabled_sizer_is_neutral() {
        let mut sizer = StreakSizer::new(StreakSizerConfig {
            enabled: false,
            min_consecutive_losses: 1,
            reduction_factor: dec!(0.5),
        });
        sizer.record_result("BTC/USDT", false);
        assert_eq!(sizer.multiplier("BTC/USDT"), Decimal::ONE);
    }
}
