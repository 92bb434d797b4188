//! Trading strategies and the ensemble combiner.
//!
//! Each strategy is a pure evaluation over `(symbol, candles, orderbook,
//! config)` producing a [`StrategyOutput`]. Strategies never mutate state;
//! the ensemble combiner owns the strategy set and never fails — a strategy
//! error is downgraded to HOLD with the error captured in its rationale.

mod breakout;
mod ensemble;
mod mean_reversion;
mod trend;
mod vwap_reversion;

pub use breakout::BreakoutStrategy;
pub use ensemble::EnsembleCombiner;
pub use mean_reversion::MeanReversionStrategy;
pub use trend::TrendStrategy;
pub use vwap_reversion::VwapReversionStrategy;

use crate::config::BotConfig;
use crate::models::{Candle, Orderbook, Signal, StrategyOutput};
use anyhow::Result;

/// A single trading strategy.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn analyze(
        &self,
        symbol: &str,
        candles: &[Candle],
        orderbook: &Orderbook,
        config: &BotConfig,
    ) -> Result<StrategyOutput>;
}

/// Signal source injected into the trading loop. Production uses the
/// ensemble; tests substitute scripted providers.
pub trait SignalProvider: Send + Sync {
    fn generate_signal(
        &self,
        symbol: &str,
        candles: &[Candle],
        orderbook: &Orderbook,
        config: &BotConfig,
    ) -> Signal;
}

/// Default signal provider backed by the ensemble combiner.
#[derive(Default)]
pub struct EnsembleSignalProvider {
    combiner: EnsembleCombiner,
}

impl EnsembleSignalProvider {
    pub fn new() -> Self {
        Self {
            combiner: EnsembleCombiner::new(),
        }
    }
}

impl SignalProvider for EnsembleSignalProvider {
    fn generate_signal(
        &self,
        symbol: &str,
        candles: &[Candle],
        orderbook: &Orderbook,
        config: &BotConfig,
    ) -> Signal {
        self.combiner.analyze(symbol, candles, orderbook, config)
    }
}
