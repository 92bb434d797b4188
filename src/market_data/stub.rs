//! Deterministic market data stub for dry runs and tests.

use super::{stub_book, MarketDataProvider};
use crate::models::{Candle, Orderbook};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

/// Serves a gentle deterministic oscillation around a base price. Per-symbol
/// price overrides let tests steer marks without real data.
pub struct StubMarketData {
    base_price: Decimal,
    overrides: Mutex<HashMap<String, Decimal>>,
}

impl StubMarketData {
    pub fn new(base_price: Decimal) -> Self {
        Self {
            base_price,
            overrides: Mutex::new(HashMap::new()),
        }
    }

    /// Pin the current price for a symbol (exit-path testing).
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.overrides.lock().insert(symbol.to_string(), price);
    }

    fn current_price(&self, symbol: &str) -> Decimal {
        self.overrides
            .lock()
            .get(symbol)
            .copied()
            .unwrap_or(self.base_price)
    }
}

#[async_trait]
impl MarketDataProvider for StubMarketData {
    async fn get_candles(
        &self,
        symbol: &str,
        _interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let price = self.current_price(symbol);
        let now = Utc::now();
        // Repeating 8-step oscillation, roughly +/-0.2% around the price.
        let pattern = [0i64, 5, 10, 15, 10, 5, 0, -5];

        let mut candles = Vec::with_capacity(limit);
        for i in 0..limit {
            let offset = Decimal::from(pattern[i % pattern.len()]) * price / dec!(10000);
            let close = price + offset;
            let open = close - price / dec!(20000);
            let high = close.max(open) + price / dec!(10000);
            let low = close.min(open) - price / dec!(10000);
            let ts = now - Duration::minutes(5 * (limit - i) as i64);
            candles.push(Candle::new(ts, open, high, low, close, dec!(100))?);
        }
        Ok(candles)
    }

    async fn get_orderbook(&self, symbol: &str, _depth: usize) -> Result<Orderbook> {
        Ok(stub_book(self.current_price(symbol)))
    }
}
