//! VWAP reversion: price stretched below VWAP with RSI and OBV confirmation.

use crate::config::BotConfig;
use crate::indicators::{calculate_obv, calculate_rsi, calculate_vwap};
use crate::models::{Candle, Orderbook, SignalType, StrategyOutput};
use crate::strategies::Strategy;
use anyhow::Result;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;

pub struct VwapReversionStrategy;

impl Strategy for VwapReversionStrategy {
    fn name(&self) -> &'static str {
        "vwap_reversion"
    }

    /// Rule: price below VWAP by >= deviation% AND RSI < oversold AND
    /// (optionally) smoothed OBV rising -> ENTER_LONG.
    fn analyze(
        &self,
        _symbol: &str,
        candles: &[Candle],
        _orderbook: &Orderbook,
        config: &BotConfig,
    ) -> Result<StrategyOutput> {
        let vw = &config.strategies.vwap_reversion;
        if !vw.enabled {
            return Ok(StrategyOutput::hold(
                self.name(),
                json!({"reason": "disabled"}),
            ));
        }

        let required = (vw.rsi_period + 1).max(5);
        if candles.len() < required {
            return Ok(StrategyOutput::hold(
                self.name(),
                json!({"reason": "insufficient_data"}),
            ));
        }

        let vwap = calculate_vwap(candles);
        let current_vwap = *vwap.last().unwrap();
        if current_vwap <= Decimal::ZERO {
            return Ok(StrategyOutput::hold(
                self.name(),
                json!({"reason": "invalid_vwap"}),
            ));
        }

        let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
        let current_price = *closes.last().unwrap();
        let rsi = calculate_rsi(&closes, vw.rsi_period);
        let current_rsi = *rsi.last().unwrap();

        // Smoothed OBV trend: 3-bar average comparison is less noisy than a
        // single-bar delta on short intervals.
        let obv = calculate_obv(candles);
        let obv_rising = if obv.len() >= 6 {
            let recent: Decimal = obv[obv.len() - 3..].iter().sum();
            let earlier: Decimal = obv[obv.len() - 6..obv.len() - 3].iter().sum();
            recent > earlier
        } else if obv.len() >= 2 {
            obv[obv.len() - 1] > obv[obv.len() - 2]
        } else {
            false
        };

        let deviation_pct = (current_vwap - current_price) / current_vwap * dec!(100);

        let price_below_vwap = deviation_pct >= vw.deviation_entry_pct;
        let rsi_oversold = current_rsi > Decimal::ZERO && current_rsi < vw.rsi_oversold;
        let obv_ok = !vw.obv_confirmation || obv_rising;

        let mut signal = SignalType::Hold;
        let mut confidence = 0.0;

        if price_below_vwap && rsi_oversold && obv_ok {
            signal = SignalType::EnterLong;

            let dev_score = (deviation_pct / (vw.deviation_entry_pct * dec!(2)))
                .to_f64()
                .unwrap_or(0.0)
                .min(1.0);
            let rsi_score = if vw.rsi_oversold > Decimal::ZERO {
                ((vw.rsi_oversold - current_rsi) / vw.rsi_oversold.max(Decimal::ONE))
                    .to_f64()
                    .unwrap_or(0.0)
            } else {
                0.5
            };
            confidence = ((dev_score + rsi_score) / 2.0).max(0.5);
        }

        Ok(StrategyOutput {
            signal,
            confidence,
            strategy_name: self.name(),
            rationale: json!({
                "price": current_price,
                "vwap": current_vwap,
                "deviation_pct": deviation_pct,
                "rsi": current_rsi,
                "obv_rising": obv_rising,
                "entry_threshold_pct": vw.deviation_entry_pct,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::stub_book;
    use chrono::Utc;

    fn candle(close: Decimal, volume: Decimal) -> Candle {
        Candle::new(Utc::now(), close, close, close, close, volume).unwrap()
    }

    #[test]
    fn stretched_below_vwap_enters_long() {
        let mut config = BotConfig::default();
        config.strategies.vwap_reversion.obv_confirmation = false;
        // High-volume flat base holds VWAP near 100; the tail sells off.
        let mut candles: Vec<Candle> = (0..20).map(|_| candle(dec!(100), dec!(100))).collect();
        for i in 0..10 {
            candles.push(candle(dec!(99) - Decimal::from(i as u64), dec!(1)));
        }
        let output = VwapReversionStrategy
            .analyze("BTC/USDT", &candles, &stub_book(dec!(90)), &config)
            .unwrap();
        assert_eq!(output.signal, SignalType::EnterLong);
        assert!(output.confidence >= 0.5);
    }

    #[test]
    fn disabled_strategy_holds() {
        let mut config = BotConfig::default();
        config.strategies.vwap_reversion.enabled = false;
        let candles: Vec<Candle> = (0..30).map(|_| candle(dec!(100), dec!(10))).collect();
        let output = VwapReversionStrategy
            .analyze("BTC/USDT", &candles, &stub_book(dec!(100)), &config)
            .unwrap();
        assert_eq!(output.signal, SignalType::Hold);
        assert_eq!(
            output.rationale.get("reason").and_then(|v| v.as_str()),
            Some("disabled")
        );
    }
}
