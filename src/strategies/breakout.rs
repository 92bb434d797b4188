//! Breakout: close above the previous Donchian high plus an ATR filter.

use crate::config::BotConfig;
use crate::indicators::{calculate_atr, calculate_donchian_channels};
use crate::models::{Candle, Orderbook, SignalType, StrategyOutput};
use crate::strategies::Strategy;
use anyhow::Result;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;

pub struct BreakoutStrategy;

impl Strategy for BreakoutStrategy {
    fn name(&self) -> &'static str {
        "breakout"
    }

    /// Rule: close > previous Donchian high + ATR * filter -> ENTER_LONG.
    /// Confidence grows with how far price clears the level, in ATR units.
    fn analyze(
        &self,
        _symbol: &str,
        candles: &[Candle],
        _orderbook: &Orderbook,
        config: &BotConfig,
    ) -> Result<StrategyOutput> {
        let bo = &config.strategies.breakout;
        let required = bo.donchian_period.max(bo.atr_period) + 2;
        if candles.len() < required {
            return Ok(StrategyOutput::hold(
                self.name(),
                json!({"reason": "insufficient_data"}),
            ));
        }

        let current_price = candles.last().unwrap().close;
        let donchian = calculate_donchian_channels(candles, bo.donchian_period);
        let atr = calculate_atr(candles, bo.atr_period);

        // The last bar is still forming; break out of the channel as of the
        // previous closed bar.
        let prev_high = donchian.high[donchian.high.len() - 2];
        let current_atr = *atr.last().unwrap();

        let breakout_level = prev_high + current_atr * bo.atr_filter_mult;

        let mut signal = SignalType::Hold;
        let mut confidence = 0.0;

        if current_price > breakout_level {
            signal = SignalType::EnterLong;
            confidence = if current_atr > Decimal::ZERO {
                let excess = ((current_price - breakout_level) / current_atr)
                    .to_f64()
                    .unwrap_or(0.0);
                (0.5 + excess * 0.5).min(1.0)
            } else {
                0.5
            };
        }

        Ok(StrategyOutput {
            signal,
            confidence,
            strategy_name: self.name(),
            rationale: json!({
                "price": current_price,
                "prev_donchian_high": prev_high,
                "atr": current_atr,
                "breakout_level": breakout_level,
            }),
        })
    }
}
