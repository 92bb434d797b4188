//! Stateless trigger detection for circuit breakers.

use crate::config::{
    ConsecutiveLossesBreakerConfig, SpreadBreakerConfig, VolatilityBreakerConfig,
};
use crate::models::{Candle, Orderbook};
use crate::persistence::EngineRepository;
use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;

/// Latest candle range exceeds `atr_multiple_pause` times the current ATR.
pub fn check_volatility_spike(
    config: &VolatilityBreakerConfig,
    candles: &[Candle],
    atr_values: &[Decimal],
) -> Option<serde_json::Value> {
    if !config.enabled {
        return None;
    }
    let candle = candles.last()?;
    let atr = *atr_values.last()?;
    if atr.is_zero() {
        return None;
    }

    let range = candle.high - candle.low;
    let threshold = config.atr_multiple_pause * atr;
    if range > threshold {
        Some(json!({
            "candle_range": range,
            "atr": atr,
            "atr_multiple": range / atr,
            "threshold": threshold,
        }))
    } else {
        None
    }
}

/// Spread in basis points of mid exceeds `max_spread_bps`.
pub fn check_spread_spike(
    config: &SpreadBreakerConfig,
    orderbook: &Orderbook,
) -> Option<serde_json::Value> {
    if !config.enabled {
        return None;
    }
    let mid = orderbook.mid_price();
    if mid.is_zero() {
        return None;
    }

    let spread_bps = orderbook.spread() / mid * dec!(10000);
    if spread_bps > config.max_spread_bps {
        Some(json!({
            "spread_bps": spread_bps,
            "max_spread_bps": config.max_spread_bps,
            "best_bid": orderbook.best_bid(),
            "best_ask": orderbook.best_ask(),
            "mid_price": mid,
        }))
    } else {
        None
    }
}

/// Walk the most recent closed trades newest-first and count losses until
/// the streak is broken; fire when the streak reaches `max_losses`.
pub fn check_consecutive_losses(
    config: &ConsecutiveLossesBreakerConfig,
    repo: &EngineRepository,
) -> Result<Option<serde_json::Value>> {
    if !config.enabled {
        return Ok(None);
    }

    let recent = repo.recent_closed_trades(config.max_losses + 5)?;
    if recent.is_empty() {
        return Ok(None);
    }

    let mut streak = 0usize;
    let mut losing_trade_ids = Vec::new();
    for trade in &recent {
        match trade.realized_pnl_usd {
            Some(pnl) if pnl < Decimal::ZERO => {
                streak += 1;
                losing_trade_ids.push(trade.id.clone());
            }
            // A winner or breakeven breaks the streak.
            _ => break,
        }
    }

    if streak >= config.max_losses {
        losing_trade_ids.truncate(config.max_losses);
        Ok(Some(json!({
            "consecutive_losses": streak,
            "max_losses": config.max_losses,
            "losing_trade_ids": losing_trade_ids,
        })))
    } else {
        Ok(None)
    }
}
