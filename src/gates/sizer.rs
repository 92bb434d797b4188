//! Dynamic position sizer.
//!
//! Supports three methods:
//! - fixed: static quantity from config
//! - risk_pct: risk a percentage of equity against the stop distance
//! - kelly: fractional Kelly on historical win rate and payoff ratio

use crate::config::{PositionSizingConfig, SizingMethod};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub struct DynamicSizer {
    config: PositionSizingConfig,
}

impl DynamicSizer {
    pub fn new(config: PositionSizingConfig) -> Self {
        Self { config }
    }

    /// Calculate position quantity in base units, capped at
    /// `max_position_pct` of equity. Returns zero when inputs cannot
    /// produce a positive quantity.
    pub fn calculate(
        &self,
        equity_usd: Decimal,
        entry_price: Decimal,
        atr_value: Decimal,
        sl_distance: Option<Decimal>,
        win_rate: Option<Decimal>,
        avg_win_loss_ratio: Option<Decimal>,
    ) -> Decimal {
        if entry_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let quantity = match self.config.method {
            SizingMethod::Fixed => self.config.fixed_quantity,
            SizingMethod::RiskPct => {
                self.risk_pct_size(equity_usd, atr_value, sl_distance)
            }
            SizingMethod::Kelly => {
                self.kelly_size(equity_usd, entry_price, win_rate, avg_win_loss_ratio)
            }
        };

        let max_position_usd = equity_usd * self.config.max_position_pct / dec!(100);
        let max_quantity = max_position_usd / entry_price;

        quantity.min(max_quantity).max(Decimal::ZERO)
    }

    /// quantity = (equity * risk%) / stop distance, falling back to 2x ATR
    /// when the stop distance is unknown. A zero stop distance sizes to
    /// zero, which the entry pipeline rejects.
    fn risk_pct_size(
        &self,
        equity_usd: Decimal,
        atr_value: Decimal,
        sl_distance: Option<Decimal>,
    ) -> Decimal {
        let risk_usd = equity_usd * self.config.risk_pct / dec!(100);
        let stop_distance = match sl_distance {
            Some(d) if d > Decimal::ZERO => d,
            _ => atr_value * dec!(2),
        };
        if stop_distance <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        risk_usd / stop_distance
    }

    /// f* = (p*b - q) / b applied as fractional Kelly. Falls back to the
    /// fixed quantity when Kelly says not to bet.
    fn kelly_size(
        &self,
        equity_usd: Decimal,
        entry_price: Decimal,
        win_rate: Option<Decimal>,
        avg_ratio: Option<Decimal>,
    ) -> Decimal {
        let p = match win_rate {
            Some(p) if p > Decimal::ZERO && p < Decimal::ONE => p,
            _ => dec!(0.5),
        };
        let b = match avg_ratio {
            Some(b) if b > Decimal::ZERO => b,
            _ => dec!(1.5),
        };

        let q = Decimal::ONE - p;
        let kelly_f = (p * b - q) / b;
        if kelly_f <= Decimal::ZERO {
            return self.config.fixed_quantity;
        }

        let position_usd = equity_usd * kelly_f * self.config.kelly_fraction;
        position_usd / entry_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(method: SizingMethod) -> PositionSizingConfig {
        PositionSizingConfig {
            method,
            fixed_quantity: dec!(0.01),
            risk_pct: dec!(1.0),
            max_position_pct: dec!(20.0),
            kelly_fraction: dec!(0.25),
        }
    }

    #[test]
    fn fixed_method_returns_config_quantity() {
        let sizer = DynamicSizer::new(config(SizingMethod::Fixed));
        let qty = sizer.calculate(dec!(10000), dec!(100), dec!(1), None, None, None);
        assert_eq!(qty, dec!(0.01));
    }

    #[test]
    fn risk_pct_uses_stop_distance() {
        let sizer = DynamicSizer::new(config(SizingMethod::RiskPct));
        // risk = 100 USD, stop distance = 10 -> 10 units, capped at
        // 20% * 10000 / 100 = 20 units.
        let qty = sizer.calculate(dec!(10000), dec!(100), dec!(1), Some(dec!(10)), None, None);
        assert_eq!(qty, dec!(10));
    }

    #[test]
    fn risk_pct_falls_back_to_twice_atr() {
        let sizer = DynamicSizer::new(config(SizingMethod::RiskPct));
        // risk = 100 USD, stop distance = 2 * 2.5 = 5 -> 20 units == cap.
        let qty = sizer.calculate(dec!(10000), dec!(100), dec!(2.5), None, None, None);
        assert_eq!(qty, dec!(20));
    }

    #[test]
    fn zero_stop_distance_sizes_to_zero() {
        let sizer = DynamicSizer::new(config(SizingMethod::RiskPct));
        let qty = sizer.calculate(dec!(10000), dec!(100), Decimal::ZERO, None, None, None);
        assert_eq!(qty, Decimal::ZERO);

        let explicit = sizer.calculate(
            dec!(10000),
            dec!(100),
            Decimal::ZERO,
            Some(Decimal::ZERO),
            None,
            None,
        );
        assert_eq!(explicit, Decimal::ZERO);
    }

    #[test]
    fn cap_limits_oversized_positions() {
        let sizer = DynamicSizer::new(config(SizingMethod::RiskPct));
        // Tiny stop distance explodes the raw quantity; cap wins.
        let qty = sizer.calculate(
            dec!(10000),
            dec!(100),
            dec!(1),
            Some(dec!(0.01)),
            None,
            None,
        );
        assert_eq!(qty, dec!(20));
    }

    #[test]
    fn kelly_negative_edge_falls_back_to_fixed() {
        let sizer = DynamicSizer::new(config(SizingMethod::Kelly));
        let qty = sizer.calculate(
            dec!(10000),
            dec!(100),
            dec!(1),
            None,
            Some(dec!(0.2)),
            Some(dec!(1.0)),
        );
        assert_eq!(qty, dec!(0.01));
    }

    #[test]
    fn kelly_positive_edge_sizes_fraction_of_equity() {
        let sizer = DynamicSizer::new(config(SizingMethod::Kelly));
        // p=0.6, b=2 -> f* = (1.2 - 0.4) / 2 = 0.4; quarter-Kelly = 0.1.
        // Position = 1000 USD -> 10 units at 100.
        let qty = sizer.calculate(
            dec!(10000),
            dec!(100),
            dec!(1),
            None,
            Some(dec!(0.6)),
            Some(dec!(2.0)),
        );
        assert_eq!(qty, dec!(10));
    }
}
