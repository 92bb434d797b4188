//! Trend following: EMA crossover confirmed by ADX.

use crate::config::BotConfig;
use crate::indicators::{calculate_adx, calculate_ema};
use crate::models::{Candle, Orderbook, SignalType, StrategyOutput};
use crate::strategies::Strategy;
use anyhow::Result;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;

pub struct TrendStrategy;

impl Strategy for TrendStrategy {
    fn name(&self) -> &'static str {
        "trend"
    }

    /// Rule: EMA fast > EMA slow AND ADX > threshold -> ENTER_LONG.
    /// Confidence maps ADX strength linearly, capped at ADX 50.
    fn analyze(
        &self,
        _symbol: &str,
        candles: &[Candle],
        _orderbook: &Orderbook,
        config: &BotConfig,
    ) -> Result<StrategyOutput> {
        let trend = &config.strategies.trend;
        // ADX needs two smoothing passes before it stabilises.
        let required = trend.ema_slow.max(trend.ema_fast).max(2 * trend.adx_period);
        if candles.len() < required {
            return Ok(StrategyOutput::hold(
                self.name(),
                json!({"reason": "insufficient_data"}),
            ));
        }

        let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
        let ema_fast = calculate_ema(&closes, trend.ema_fast);
        let ema_slow = calculate_ema(&closes, trend.ema_slow);
        let adx = calculate_adx(candles, trend.adx_period);

        let current_fast = *ema_fast.last().unwrap_or(&Decimal::ZERO);
        let current_slow = *ema_slow.last().unwrap_or(&Decimal::ZERO);
        let current_adx = *adx.last().unwrap_or(&Decimal::ZERO);

        let mut signal = SignalType::Hold;
        let mut confidence = 0.0;

        if current_fast > current_slow && current_adx > trend.adx_threshold {
            signal = SignalType::EnterLong;
            confidence = (current_adx / dec!(50))
                .to_f64()
                .unwrap_or(0.0)
                .min(1.0);
        }

        Ok(StrategyOutput {
            signal,
            confidence,
            strategy_name: self.name(),
            rationale: json!({
                "ema_fast": ema_fast.last(),
                "ema_slow": ema_slow.last(),
                "adx": adx.last(),
                "adx_threshold": trend.adx_threshold,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::stub_book;
    use chrono::Utc;

    fn uptrend_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = Decimal::from(100 + i as u64 * 2);
                Candle::new(
                    Utc::now(),
                    base,
                    base + dec!(3),
                    base - dec!(1),
                    base + dec!(2),
                    dec!(10),
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn uptrend_enters_long_with_high_confidence() {
        let config = BotConfig::default();
        let candles = uptrend_candles(80);
        let output = TrendStrategy
            .analyze("BTC/USDT", &candles, &stub_book(dec!(260)), &config)
            .unwrap();
        assert_eq!(output.signal, SignalType::EnterLong);
        assert!(output.confidence > 0.5);
    }

    #[test]
    fn insufficient_data_holds() {
        let config = BotConfig::default();
        let candles = uptrend_candles(10);
        let output = TrendStrategy
            .analyze("BTC/USDT", &candles, &stub_book(dec!(120)), &config)
            .unwrap();
        assert_eq!(output.signal, SignalType::Hold);
        assert_eq!(output.confidence, 0.0);
    }
}
