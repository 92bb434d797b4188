//! Average True Range (Wilder smoothing).

use crate::models::Candle;
use rust_decimal::Decimal;

/// ATR over `period`. The first valid value is at index `period - 1`,
/// seeded with the SMA of the first `period` true ranges.
pub fn calculate_atr(candles: &[Candle], period: usize) -> Vec<Decimal> {
    let length = candles.len();
    let mut atr = vec![Decimal::ZERO; length];
    if period == 0 || length < period + 1 {
        return atr;
    }

    let mut tr = vec![Decimal::ZERO; length];
    tr[0] = candles[0].high - candles[0].low;
    for i in 1..length {
        tr[i] = candles[i].true_range(Some(candles[i - 1].close));
    }

    let period_dec = Decimal::from(period as u64);
    atr[period - 1] = tr[..period].iter().sum::<Decimal>() / period_dec;
    for i in period..length {
        atr[i] = (atr[i - 1] * (period_dec - Decimal::ONE) + tr[i]) / period_dec;
    }

    atr
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn candle(high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle::new(Utc::now(), low, high, low, close, dec!(1)).unwrap()
    }

    #[test]
    fn atr_constant_range() {
        // Every bar spans exactly 2.0 with no gaps, so ATR converges to 2.0.
        let candles: Vec<Candle> = (0..20)
            .map(|_| candle(dec!(102), dec!(100), dec!(101)))
            .collect();
        let atr = calculate_atr(&candles, 14);
        assert_eq!(atr[12], Decimal::ZERO);
        assert_eq!(atr[13], dec!(2));
        assert_eq!(*atr.last().unwrap(), dec!(2));
    }

    #[test]
    fn atr_insufficient_data() {
        let candles: Vec<Candle> = (0..5)
            .map(|_| candle(dec!(102), dec!(100), dec!(101)))
            .collect();
        assert_eq!(calculate_atr(&candles, 14), vec![Decimal::ZERO; 5]);
    }
}
