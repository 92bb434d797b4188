//! Volume Weighted Average Price.

use crate::models::Candle;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Cumulative VWAP over the candle window using the typical price
/// `(high + low + close) / 3`. Positions with zero cumulative volume are
/// zero.
pub fn calculate_vwap(candles: &[Candle]) -> Vec<Decimal> {
    let mut vwap = Vec::with_capacity(candles.len());
    let mut cum_tp_vol = Decimal::ZERO;
    let mut cum_vol = Decimal::ZERO;

    for candle in candles {
        let typical = (candle.high + candle.low + candle.close) / dec!(3);
        cum_tp_vol += typical * candle.volume;
        cum_vol += candle.volume;
        if cum_vol > Decimal::ZERO {
            vwap.push(cum_tp_vol / cum_vol);
        } else {
            vwap.push(Decimal::ZERO);
        }
    }

    vwap
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candle(price: Decimal, volume: Decimal) -> Candle {
        Candle::new(Utc::now(), price, price, price, price, volume).unwrap()
    }

    #[test]
    fn vwap_weights_by_volume() {
        let candles = vec![candle(dec!(100), dec!(1)), candle(dec!(200), dec!(3))];
        let vwap = calculate_vwap(&candles);
        assert_eq!(vwap[0], dec!(100));
        // (100*1 + 200*3) / 4 = 175
        assert_eq!(vwap[1], dec!(175));
    }

    #[test]
    fn vwap_zero_volume_prefix() {
        let candles = vec![candle(dec!(100), dec!(0)), candle(dec!(110), dec!(2))];
        let vwap = calculate_vwap(&candles);
        assert_eq!(vwap[0], Decimal::ZERO);
        assert_eq!(vwap[1], dec!(110));
    }
}
