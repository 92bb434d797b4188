//! Market data providers: candles and orderbook snapshots.

mod binance;
mod stub;

pub use binance::BinanceMarketData;
pub use stub::StubMarketData;

use crate::models::{Candle, Orderbook};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Recent OHLCV candles, oldest first; the last candle may still be
    /// forming.
    async fn get_candles(&self, symbol: &str, interval: &str, limit: usize)
        -> Result<Vec<Candle>>;

    /// Current orderbook snapshot with up to `depth` levels per side.
    async fn get_orderbook(&self, symbol: &str, depth: usize) -> Result<Orderbook>;
}

/// Tight two-level book around `mid`, used by stubs and tests.
pub fn stub_book(mid: Decimal) -> Orderbook {
    let tick = (mid * dec!(0.0001)).max(dec!(0.01));
    Orderbook::new(
        vec![(mid - tick, dec!(5)), (mid - tick * dec!(2), dec!(10))],
        vec![(mid + tick, dec!(5)), (mid + tick * dec!(2), dec!(10))],
    )
    .unwrap_or_else(|_| {
        // mid <= tick can only happen with absurd inputs; fall back to a
        // unit book rather than panic.
        Orderbook::new(vec![(dec!(0.99), dec!(1))], vec![(dec!(1.01), dec!(1))]).unwrap()
    })
}
