//! Market regime filter: strategy-aware classification of market conditions
//! from ADX (directional strength) and ATR% (movement).

use crate::config::RegimeConfig;
use crate::gates::GateDecision;
use crate::indicators::{calculate_adx, calculate_atr};
use crate::models::Candle;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

/// Detected market regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegimeState {
    /// ADX high, clear direction.
    Trending,
    /// ADX low, low ATR% — sideways.
    Ranging,
    /// High ATR% but low ADX — choppy but moving.
    Volatile,
    /// Low ADX and very low ATR% — dead market.
    Quiet,
    /// Insufficient data; defaults to allow.
    Unknown,
}

impl RegimeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegimeState::Trending => "TRENDING",
            RegimeState::Ranging => "RANGING",
            RegimeState::Volatile => "VOLATILE",
            RegimeState::Quiet => "QUIET",
            RegimeState::Unknown => "UNKNOWN",
        }
    }
}

/// Which regimes allow which strategy families.
fn allowed_regimes(strategy_family: &str) -> &'static [RegimeState] {
    match strategy_family {
        "trend" => &[RegimeState::Trending],
        "momentum" => &[RegimeState::Trending, RegimeState::Volatile],
        "mean_reversion" => &[RegimeState::Ranging, RegimeState::Volatile],
        "breakout" => &[RegimeState::Volatile, RegimeState::Trending],
        _ => &[RegimeState::Trending, RegimeState::Volatile],
    }
}

pub struct RegimeFilter {
    config: RegimeConfig,
}

impl RegimeFilter {
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    /// Classify the current market regime for a symbol. Needs roughly
    /// `adx_period + 20` candles before committing to a classification.
    pub fn classify(&self, candles: &[Candle], symbol: Option<&str>) -> RegimeState {
        if !self.config.enabled {
            return RegimeState::Trending;
        }
        if candles.len() < self.config.adx_period + 20 {
            return RegimeState::Unknown;
        }

        let (adx_threshold, atr_threshold_pct) = self.resolve_thresholds(symbol);

        let adx = calculate_adx(candles, self.config.adx_period);
        let atr = calculate_atr(candles, self.config.atr_period);
        let current_adx = *adx.last().unwrap_or(&Decimal::ZERO);
        let current_atr = *atr.last().unwrap_or(&Decimal::ZERO);
        let current_close = candles.last().map(|c| c.close).unwrap_or(Decimal::ZERO);
        if current_close <= Decimal::ZERO {
            return RegimeState::Unknown;
        }
        let atr_pct = current_atr / current_close * dec!(100);

        let is_trending = current_adx >= adx_threshold;
        let is_volatile = atr_pct >= atr_threshold_pct;

        let regime = if is_trending {
            // Trending but calm is still tradeable.
            RegimeState::Trending
        } else if is_volatile {
            RegimeState::Volatile
        } else if atr_pct < atr_threshold_pct / dec!(2) {
            RegimeState::Quiet
        } else {
            RegimeState::Ranging
        };

        debug!(
            regime = regime.as_str(),
            adx = %current_adx,
            atr_pct = %atr_pct,
            symbol = symbol.unwrap_or("-"),
            "regime classified"
        );

        regime
    }

    /// Gate check: does the current regime allow this strategy family?
    pub fn check(
        &self,
        candles: &[Candle],
        symbol: &str,
        strategy_family: &str,
    ) -> (RegimeState, GateDecision) {
        let regime = self.classify(candles, Some(symbol));
        if regime == RegimeState::Unknown {
            return (regime, GateDecision::Allow);
        }
        if allowed_regimes(strategy_family).contains(&regime) {
            (regime, GateDecision::Allow)
        } else {
            let decision = GateDecision::reject(format!(
                "regime {} does not allow {} entries",
                regime.as_str(),
                strategy_family
            ));
            (regime, decision)
        }
    }

    /// Per-symbol threshold overrides match on exact symbol or key prefix
    /// ("BTC" covers "BTC/USDT").
    fn resolve_thresholds(&self, symbol: Option<&str>) -> (Decimal, Decimal) {
        let mut adx_threshold = self.config.adx_threshold;
        let mut atr_threshold_pct = self.config.atr_threshold_pct;

        if let Some(symbol) = symbol {
            for (key, ov) in &self.config.per_symbol_overrides {
                if symbol == key || symbol.starts_with(key.as_str()) {
                    if let Some(v) = ov.adx_threshold {
                        adx_threshold = v;
                    }
                    if let Some(v) = ov.atr_threshold_pct {
                        atr_threshold_pct = v;
                    }
                    break;
                }
            }
        }

        (adx_threshold, atr_threshold_pct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegimeOverride;
    use chrono::Utc;

    fn flat_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|_| {
                Candle::new(
                    Utc::now(),
                    dec!(100),
                    dec!(100.01),
                    dec!(99.99),
                    dec!(100),
                    dec!(10),
                )
                .unwrap()
            })
            .collect()
    }

    fn trending_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = Decimal::from(100 + i as u64 * 3);
                Candle::new(
                    Utc::now(),
                    base,
                    base + dec!(4),
                    base - dec!(1),
                    base + dec!(3),
                    dec!(10),
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn insufficient_data_is_unknown_and_allowed() {
        let filter = RegimeFilter::new(RegimeConfig::default());
        let (regime, decision) = filter.check(&flat_candles(5), "BTC/USDT", "trend");
        assert_eq!(regime, RegimeState::Unknown);
        assert!(decision.is_allowed());
    }

    #[test]
    fn dead_market_is_quiet_and_rejected() {
        let filter = RegimeFilter::new(RegimeConfig::default());
        let (regime, decision) = filter.check(&flat_candles(60), "BTC/USDT", "trend");
        assert_eq!(regime, RegimeState::Quiet);
        assert!(!decision.is_allowed());
    }

    #[test]
    fn strong_uptrend_is_trending_and_allowed() {
        let filter = RegimeFilter::new(RegimeConfig::default());
        let (regime, decision) = filter.check(&trending_candles(60), "BTC/USDT", "trend");
        assert_eq!(regime, RegimeState::Trending);
        assert!(decision.is_allowed());
    }

    #[test]
    fn disabled_filter_assumes_trending() {
        let config = RegimeConfig {
            enabled: false,
            ..RegimeConfig::default()
        };
        let filter = RegimeFilter::new(config);
        assert_eq!(filter.classify(&flat_candles(60), None), RegimeState::Trending);
    }

    #[test]
    fn per_symbol_override_changes_classification() {
        let mut config = RegimeConfig::default();
        // An absurdly low ADX threshold flips a quiet market to trending.
        config.per_symbol_overrides.insert(
            "BTC".to_string(),
            RegimeOverride {
                adx_threshold: Some(dec!(0)),
                atr_threshold_pct: None,
            },
        );
        let filter = RegimeFilter::new(config);
        let regime = filter.classify(&flat_candles(60), Some("BTC/USDT"));
        assert_eq!(regime, RegimeState::Trending);
    }
}
