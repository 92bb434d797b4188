//! Core value types flowing through the trading pipeline.
//!
//! Entities owned by the repository (trades, orders, events) live in
//! `persistence`; everything here is an immutable value passed by copy.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// OHLCV candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Result<Self> {
        if high < open.max(close).max(low) {
            bail!("candle high must be >= open, close, and low");
        }
        if low > open.min(close).min(high) {
            bail!("candle low must be <= open, close, and high");
        }
        if volume < Decimal::ZERO {
            bail!("candle volume must be non-negative");
        }
        Ok(Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        })
    }

    /// True range against a previous close, falling back to the bar range.
    pub fn true_range(&self, prev_close: Option<Decimal>) -> Decimal {
        let range = self.high - self.low;
        match prev_close {
            Some(pc) => range
                .max((self.high - pc).abs())
                .max((self.low - pc).abs()),
            None => range,
        }
    }
}

/// Top-of-book orderbook snapshot with synthetic depth levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Orderbook {
    /// (price, quantity), strictly descending by price.
    pub bids: Vec<(Decimal, Decimal)>,
    /// (price, quantity), strictly ascending by price.
    pub asks: Vec<(Decimal, Decimal)>,
}

impl Orderbook {
    pub fn new(bids: Vec<(Decimal, Decimal)>, asks: Vec<(Decimal, Decimal)>) -> Result<Self> {
        if bids.is_empty() {
            bail!("orderbook must have at least one bid");
        }
        if asks.is_empty() {
            bail!("orderbook must have at least one ask");
        }
        if !bids.windows(2).all(|w| w[0].0 > w[1].0) {
            bail!("bid prices must be strictly descending");
        }
        if !asks.windows(2).all(|w| w[0].0 < w[1].0) {
            bail!("ask prices must be strictly ascending");
        }
        Ok(Self { bids, asks })
    }

    pub fn best_bid(&self) -> Decimal {
        self.bids[0].0
    }

    pub fn best_ask(&self) -> Decimal {
        self.asks[0].0
    }

    pub fn spread(&self) -> Decimal {
        self.best_ask() - self.best_bid()
    }

    pub fn mid_price(&self) -> Decimal {
        (self.best_bid() + self.best_ask()) / dec!(2)
    }
}

/// Trading signal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    Hold,
    EnterLong,
    Exit,
}

/// Type alias used to keep serde's derive macro from inferring a `'static`-only
/// `Deserialize` impl from the literal `&'static str` field type below.
type StaticStr = &'static str;

/// Output of a single strategy evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyOutput {
    pub signal: SignalType,
    pub confidence: f64,
    #[serde(deserialize_with = "deserialize_leaked_str")]
    pub strategy_name: StaticStr,
    pub rationale: serde_json::Value,
}

fn deserialize_leaked_str<'de, D>(deserializer: D) -> std::result::Result<StaticStr, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(Box::leak(s.into_boxed_str()))
}

impl StrategyOutput {
    pub fn hold(strategy_name: &'static str, rationale: serde_json::Value) -> Self {
        Self {
            signal: SignalType::Hold,
            confidence: 0.0,
            strategy_name,
            rationale,
        }
    }
}

/// Combined trading signal with the per-strategy outputs that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub signal_type: SignalType,
    pub symbol: String,
    pub confidence: f64,
    pub strategy_outputs: Vec<StrategyOutput>,
}

impl Signal {
    pub fn new(
        signal_type: SignalType,
        symbol: impl Into<String>,
        confidence: f64,
        strategy_outputs: Vec<StrategyOutput>,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&confidence) {
            bail!("signal confidence must be between 0.0 and 1.0");
        }
        Ok(Self {
            signal_type,
            symbol: symbol.into(),
            confidence,
            strategy_outputs,
        })
    }
}

/// Order side. Only long entries are supported; SELL appears on exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// Reason an exit fired. SL beats TP on a tie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::TrailingStop => "TRAILING_STOP",
        }
    }
}

/// Pre-execution trade plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradePlan {
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub stop_loss_price: Decimal,
    pub take_profit_price: Decimal,
    pub estimated_fee_usd: Decimal,
    pub estimated_slippage_usd: Decimal,
    pub estimated_spread_cost_usd: Decimal,
    /// Deterministic identifier assigned before execution; the executor
    /// derives idempotency keys from it.
    pub trade_id: String,
    pub timestamp: DateTime<Utc>,
}

impl TradePlan {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        entry_price: Decimal,
        quantity: Decimal,
        stop_loss_price: Decimal,
        take_profit_price: Decimal,
        estimated_fee_usd: Decimal,
        estimated_slippage_usd: Decimal,
        estimated_spread_cost_usd: Decimal,
        trade_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        if entry_price <= Decimal::ZERO {
            bail!("entry price must be positive");
        }
        if quantity <= Decimal::ZERO {
            bail!("quantity must be positive");
        }
        if stop_loss_price <= Decimal::ZERO {
            bail!("stop loss price must be positive");
        }
        if take_profit_price <= Decimal::ZERO {
            bail!("take profit price must be positive");
        }
        if side == Side::Buy {
            if stop_loss_price >= entry_price {
                bail!("stop loss must be below entry price for long");
            }
            if take_profit_price <= entry_price {
                bail!("take profit must be above entry price for long");
            }
        }
        Ok(Self {
            symbol: symbol.into(),
            side,
            entry_price,
            quantity,
            stop_loss_price,
            take_profit_price,
            estimated_fee_usd,
            estimated_slippage_usd,
            estimated_spread_cost_usd,
            trade_id: trade_id.into(),
            timestamp,
        })
    }

    pub fn position_value_usd(&self) -> Decimal {
        self.entry_price * self.quantity
    }

    pub fn risk_usd(&self) -> Decimal {
        (self.entry_price - self.stop_loss_price) * self.quantity
    }

    pub fn reward_usd(&self) -> Decimal {
        (self.take_profit_price - self.entry_price) * self.quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn candle_rejects_high_below_close() {
        let result = Candle::new(ts(), dec!(100), dec!(99), dec!(98), dec!(101), dec!(1));
        assert!(result.is_err());
    }

    #[test]
    fn candle_rejects_negative_volume() {
        let result = Candle::new(ts(), dec!(100), dec!(102), dec!(98), dec!(101), dec!(-1));
        assert!(result.is_err());
    }

    #[test]
    fn orderbook_derivations() {
        let book = Orderbook::new(
            vec![(dec!(99), dec!(1)), (dec!(98), dec!(2))],
            vec![(dec!(101), dec!(1)), (dec!(102), dec!(2))],
        )
        .unwrap();
        assert_eq!(book.best_bid(), dec!(99));
        assert_eq!(book.best_ask(), dec!(101));
        assert_eq!(book.spread(), dec!(2));
        assert_eq!(book.mid_price(), dec!(100));
    }

    #[test]
    fn orderbook_rejects_unsorted_bids() {
        let result = Orderbook::new(
            vec![(dec!(98), dec!(1)), (dec!(99), dec!(2))],
            vec![(dec!(101), dec!(1))],
        );
        assert!(result.is_err());
    }

    #[test]
    fn orderbook_rejects_empty_side() {
        assert!(Orderbook::new(vec![], vec![(dec!(101), dec!(1))]).is_err());
    }

    #[test]
    fn trade_plan_rejects_stop_above_entry() {
        let result = TradePlan::new(
            "BTC/USDT",
            Side::Buy,
            dec!(50000),
            dec!(0.1),
            dec!(51000),
            dec!(52000),
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
            "t-1",
            ts(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn trade_plan_risk_reward() {
        let plan = TradePlan::new(
            "BTC/USDT",
            Side::Buy,
            dec!(50000),
            dec!(0.1),
            dec!(49000),
            dec!(52000),
            Decimal::ZERO,
            Decimal::ZERO,
            Decimal::ZERO,
            "t-1",
            ts(),
        )
        .unwrap();
        assert_eq!(plan.risk_usd(), dec!(100));
        assert_eq!(plan.reward_usd(), dec!(200));
        assert_eq!(plan.position_value_usd(), dec!(5000));
    }

    #[test]
    fn signal_rejects_out_of_range_confidence() {
        assert!(Signal::new(SignalType::Hold, "BTC/USDT", 1.5, vec![]).is_err());
    }
}
