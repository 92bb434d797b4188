//! Mean reversion: lower Bollinger Band touch with RSI confirmation.

use crate::config::BotConfig;
use crate::indicators::{calculate_bollinger_bands, calculate_rsi};
use crate::models::{Candle, Orderbook, SignalType, StrategyOutput};
use crate::strategies::Strategy;
use anyhow::Result;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;

pub struct MeanReversionStrategy;

impl Strategy for MeanReversionStrategy {
    fn name(&self) -> &'static str {
        "mean_reversion"
    }

    /// Rule: close <= lower band AND RSI < oversold -> ENTER_LONG.
    /// Confidence blends RSI depth (60%) and band-penetration depth (40%),
    /// floored at 0.5 since the entry conditions are already met.
    fn analyze(
        &self,
        _symbol: &str,
        candles: &[Candle],
        _orderbook: &Orderbook,
        config: &BotConfig,
    ) -> Result<StrategyOutput> {
        let mr = &config.strategies.mean_reversion;
        let required = mr.bb_period.max(mr.rsi_period) + 1;
        if candles.len() < required {
            return Ok(StrategyOutput::hold(
                self.name(),
                json!({"reason": "insufficient_data"}),
            ));
        }

        let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
        let current_price = *closes.last().unwrap();

        let bb = calculate_bollinger_bands(&closes, mr.bb_period, mr.bb_std_dev);
        let rsi = calculate_rsi(&closes, mr.rsi_period);

        let lower = *bb.lower.last().unwrap();
        let upper = *bb.upper.last().unwrap();
        let current_rsi = *rsi.last().unwrap();

        let mut signal = SignalType::Hold;
        let mut confidence = 0.0;

        if current_price <= lower && current_rsi < mr.rsi_oversold {
            signal = SignalType::EnterLong;

            let oversold = mr.rsi_oversold.max(Decimal::ONE);
            let rsi_depth = ((mr.rsi_oversold - current_rsi) / oversold)
                .to_f64()
                .unwrap_or(0.0)
                .min(1.0);

            let band_width = upper - lower;
            let bb_depth = if band_width > Decimal::ZERO && current_price < lower {
                ((lower - current_price) / band_width)
                    .to_f64()
                    .unwrap_or(0.0)
                    .min(1.0)
            } else {
                0.0
            };

            confidence = (rsi_depth * 0.6 + bb_depth * 0.4).max(0.5);
        }

        Ok(StrategyOutput {
            signal,
            confidence,
            strategy_name: self.name(),
            rationale: json!({
                "price": current_price,
                "lower_bb": lower,
                "rsi": current_rsi,
                "rsi_oversold": mr.rsi_oversold,
            }),
        })
    }
}
