//! Ensemble combiner: agreement and weighted consensus over the strategy set.

use crate::config::{BotConfig, EnsembleMode};
use crate::models::{Candle, Orderbook, Signal, SignalType, StrategyOutput};
use crate::strategies::{
    BreakoutStrategy, MeanReversionStrategy, Strategy, TrendStrategy, VwapReversionStrategy,
};
use serde_json::json;
use tracing::error;

/// Effective ensemble parameters for one symbol after override resolution.
struct EnsembleParams {
    weight_trend: f64,
    weight_mean_reversion: f64,
    weight_breakout: f64,
    weight_vwap: f64,
    min_agreement: usize,
    confidence_threshold: f64,
    weighted_threshold: f64,
}

pub struct EnsembleCombiner {
    strategies: Vec<Box<dyn Strategy>>,
}

impl Default for EnsembleCombiner {
    fn default() -> Self {
        Self::new()
    }
}

impl EnsembleCombiner {
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(TrendStrategy),
                Box::new(MeanReversionStrategy),
                Box::new(BreakoutStrategy),
                Box::new(VwapReversionStrategy),
            ],
        }
    }

    /// Run all strategies and combine their outputs. Never fails: a strategy
    /// error becomes a HOLD vote with the error captured in its rationale.
    pub fn analyze(
        &self,
        symbol: &str,
        candles: &[Candle],
        orderbook: &Orderbook,
        config: &BotConfig,
    ) -> Signal {
        let mut outputs: Vec<StrategyOutput> = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            match strategy.analyze(symbol, candles, orderbook, config) {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    error!(symbol, strategy = strategy.name(), error = %e, "strategy failed");
                    outputs.push(StrategyOutput::hold(
                        strategy.name(),
                        json!({"error": e.to_string()}),
                    ));
                }
            }
        }

        match config.strategies.ensemble.mode {
            EnsembleMode::Weighted => self.weighted_consensus(symbol, outputs, config),
            EnsembleMode::Agreement => self.agreement_consensus(symbol, outputs, config),
        }
    }

    /// Resolve effective params for a symbol, consulting per-coin overrides
    /// first. Override keys match either the full symbol or its base with
    /// the `/USDT` or `_USDT` suffix stripped.
    fn resolve_params(&self, symbol: &str, config: &BotConfig) -> EnsembleParams {
        let ensemble = &config.strategies.ensemble;
        let clean = symbol.replace("/USDT", "").replace("_USDT", "");
        let ov = ensemble
            .per_coin_overrides
            .get(&clean)
            .or_else(|| ensemble.per_coin_overrides.get(symbol));

        EnsembleParams {
            weight_trend: ov
                .and_then(|o| o.weight_trend)
                .unwrap_or(ensemble.weight_trend),
            weight_mean_reversion: ov
                .and_then(|o| o.weight_mean_reversion)
                .unwrap_or(ensemble.weight_mean_reversion),
            weight_breakout: ov
                .and_then(|o| o.weight_breakout)
                .unwrap_or(ensemble.weight_breakout),
            weight_vwap: ov
                .and_then(|o| o.weight_vwap)
                .unwrap_or(ensemble.weight_vwap),
            min_agreement: ov
                .and_then(|o| o.min_agreement)
                .unwrap_or(ensemble.min_agreement),
            confidence_threshold: ov
                .and_then(|o| o.confidence_threshold)
                .unwrap_or(ensemble.confidence_threshold),
            weighted_threshold: ov
                .and_then(|o| o.weighted_threshold)
                .unwrap_or(ensemble.weighted_threshold),
        }
    }

    /// Agreement mode: at least `min_agreement` strategies must vote
    /// ENTER_LONG with confidence at or above the threshold. Combined
    /// confidence is the mean of the voting confidences.
    fn agreement_consensus(
        &self,
        symbol: &str,
        outputs: Vec<StrategyOutput>,
        config: &BotConfig,
    ) -> Signal {
        let params = self.resolve_params(symbol, config);

        let mut votes = 0usize;
        let mut conf_sum = 0.0;
        for output in &outputs {
            if output.signal == SignalType::EnterLong
                && output.confidence >= params.confidence_threshold
            {
                votes += 1;
                conf_sum += output.confidence;
            }
        }

        let (signal_type, confidence) = if votes >= params.min_agreement && votes > 0 {
            (SignalType::EnterLong, conf_sum / votes as f64)
        } else {
            (SignalType::Hold, 0.0)
        };

        Signal {
            signal_type,
            symbol: symbol.to_string(),
            confidence,
            strategy_outputs: outputs,
        }
    }

    /// Weighted mode: each ENTER_LONG vote contributes weight x confidence;
    /// the score is normalized by the total weight and compared to the
    /// weighted threshold.
    fn weighted_consensus(
        &self,
        symbol: &str,
        outputs: Vec<StrategyOutput>,
        config: &BotConfig,
    ) -> Signal {
        let params = self.resolve_params(symbol, config);

        let mut total_score = 0.0;
        let mut total_weight = 0.0;
        for output in &outputs {
            let weight = match output.strategy_name {
                "trend" => params.weight_trend,
                "mean_reversion" => params.weight_mean_reversion,
                "breakout" => params.weight_breakout,
                "vwap_reversion" => params.weight_vwap,
                _ => 0.0,
            };
            if output.signal == SignalType::EnterLong && output.confidence > 0.0 {
                total_score += weight * output.confidence;
            }
            total_weight += weight;
        }

        let normalized = if total_weight > 0.0 {
            total_score / total_weight
        } else {
            0.0
        };

        let signal_type = if normalized >= params.weighted_threshold {
            SignalType::EnterLong
        } else {
            SignalType::Hold
        };

        Signal {
            signal_type,
            symbol: symbol.to_string(),
            confidence: normalized,
            strategy_outputs: outputs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnsembleOverride;

    fn output(name: &'static str, signal: SignalType, confidence: f64) -> StrategyOutput {
        StrategyOutput {
            signal,
            confidence,
            strategy_name: name,
            rationale: json!({}),
        }
    }

    fn all_outputs(trend: f64, mr: f64, bo: f64, vwap: f64) -> Vec<StrategyOutput> {
        let vote = |c: f64| {
            if c > 0.0 {
                SignalType::EnterLong
            } else {
                SignalType::Hold
            }
        };
        vec![
            output("trend", vote(trend), trend),
            output("mean_reversion", vote(mr), mr),
            output("breakout", vote(bo), bo),
            output("vwap_reversion", vote(vwap), vwap),
        ]
    }

    #[test]
    fn agreement_requires_min_votes() {
        let mut config = BotConfig::default();
        config.strategies.ensemble.mode = EnsembleMode::Agreement;
        config.strategies.ensemble.min_agreement = 2;
        config.strategies.ensemble.confidence_threshold = 0.6;
        let combiner = EnsembleCombiner::new();

        let one_vote = combiner.agreement_consensus(
            "BTC/USDT",
            all_outputs(0.8, 0.0, 0.0, 0.0),
            &config,
        );
        assert_eq!(one_vote.signal_type, SignalType::Hold);

        let two_votes = combiner.agreement_consensus(
            "BTC/USDT",
            all_outputs(0.8, 0.7, 0.0, 0.0),
            &config,
        );
        assert_eq!(two_votes.signal_type, SignalType::EnterLong);
        assert!((two_votes.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn agreement_ignores_votes_below_confidence_threshold() {
        let mut config = BotConfig::default();
        config.strategies.ensemble.min_agreement = 2;
        config.strategies.ensemble.confidence_threshold = 0.6;
        let combiner = EnsembleCombiner::new();

        let signal = combiner.agreement_consensus(
            "BTC/USDT",
            all_outputs(0.8, 0.5, 0.0, 0.0),
            &config,
        );
        assert_eq!(signal.signal_type, SignalType::Hold);
    }

    #[test]
    fn weighted_single_strong_voter_clears_threshold() {
        let mut config = BotConfig::default();
        config.strategies.ensemble.mode = EnsembleMode::Weighted;
        config.strategies.ensemble.weighted_threshold = 0.25;
        config.strategies.ensemble.weight_trend = 1.0;
        config.strategies.ensemble.weight_mean_reversion = 0.5;
        config.strategies.ensemble.weight_breakout = 0.5;
        config.strategies.ensemble.weight_vwap = 0.5;
        let combiner = EnsembleCombiner::new();

        // Score = 0.8 / 2.5 = 0.32 >= 0.25.
        let signal = combiner.weighted_consensus(
            "BTC/USDT",
            all_outputs(0.8, 0.0, 0.0, 0.0),
            &config,
        );
        assert_eq!(signal.signal_type, SignalType::EnterLong);
        assert!((signal.confidence - 0.32).abs() < 1e-9);
    }

    #[test]
    fn weighted_below_threshold_holds() {
        let mut config = BotConfig::default();
        config.strategies.ensemble.mode = EnsembleMode::Weighted;
        config.strategies.ensemble.weighted_threshold = 0.5;
        let combiner = EnsembleCombiner::new();

        let signal = combiner.weighted_consensus(
            "BTC/USDT",
            all_outputs(0.8, 0.0, 0.0, 0.0),
            &config,
        );
        assert_eq!(signal.signal_type, SignalType::Hold);
    }

    #[test]
    fn per_coin_override_replaces_threshold() {
        let mut config = BotConfig::default();
        config.strategies.ensemble.mode = EnsembleMode::Weighted;
        config.strategies.ensemble.weighted_threshold = 0.9;
        config.strategies.ensemble.per_coin_overrides.insert(
            "BTC".to_string(),
            EnsembleOverride {
                weighted_threshold: Some(0.1),
                ..Default::default()
            },
        );
        let combiner = EnsembleCombiner::new();

        let signal = combiner.weighted_consensus(
            "BTC/USDT",
            all_outputs(0.8, 0.0, 0.0, 0.0),
            &config,
        );
        assert_eq!(signal.signal_type, SignalType::EnterLong);
    }
}
