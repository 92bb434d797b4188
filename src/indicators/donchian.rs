//! Donchian Channels.

use crate::models::Candle;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[derive(Debug, Clone, PartialEq)]
pub struct DonchianChannels {
    pub high: Vec<Decimal>,
    pub low: Vec<Decimal>,
    pub mid: Vec<Decimal>,
}

/// Donchian Channels over `period`: rolling highest high and lowest low.
/// Values before index `period - 1` are zero.
pub fn calculate_donchian_channels(candles: &[Candle], period: usize) -> DonchianChannels {
    let length = candles.len();
    let mut high = vec![Decimal::ZERO; length];
    let mut low = vec![Decimal::ZERO; length];
    let mut mid = vec![Decimal::ZERO; length];

    if period == 0 || length < period {
        return DonchianChannels { high, low, mid };
    }

    for i in (period - 1)..length {
        let window = &candles[i + 1 - period..=i];
        let highest = window
            .iter()
            .map(|c| c.high)
            .max()
            .unwrap_or(Decimal::ZERO);
        let lowest = window.iter().map(|c| c.low).min().unwrap_or(Decimal::ZERO);
        high[i] = highest;
        low[i] = lowest;
        mid[i] = (highest + lowest) / dec!(2);
    }

    DonchianChannels { high, low, mid }
}
