//! Average Directional Index (Wilder smoothing).

use crate::models::Candle;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// ADX over `period`. Needs at least `2 * period` candles; the first valid
/// value is at index `2 * period - 1`.
pub fn calculate_adx(candles: &[Candle], period: usize) -> Vec<Decimal> {
    let length = candles.len();
    let mut adx = vec![Decimal::ZERO; length];
    if period == 0 || length < 2 * period {
        return adx;
    }

    let mut tr = vec![Decimal::ZERO; length];
    let mut plus_dm = vec![Decimal::ZERO; length];
    let mut minus_dm = vec![Decimal::ZERO; length];

    for i in 1..length {
        let c = &candles[i];
        let prev = &candles[i - 1];
        tr[i] = c.true_range(Some(prev.close));

        let up_move = c.high - prev.high;
        let down_move = prev.low - c.low;
        if up_move > down_move && up_move > Decimal::ZERO {
            plus_dm[i] = up_move;
        }
        if down_move > up_move && down_move > Decimal::ZERO {
            minus_dm[i] = down_move;
        }
    }

    // Wilder smoothing: initial sums over indices 1..=period, then decay.
    let period_dec = Decimal::from(period as u64);
    let mut smooth_tr = vec![Decimal::ZERO; length];
    let mut smooth_plus = vec![Decimal::ZERO; length];
    let mut smooth_minus = vec![Decimal::ZERO; length];
    smooth_tr[period] = tr[1..=period].iter().sum();
    smooth_plus[period] = plus_dm[1..=period].iter().sum();
    smooth_minus[period] = minus_dm[1..=period].iter().sum();
    for i in (period + 1)..length {
        smooth_tr[i] = smooth_tr[i - 1] - smooth_tr[i - 1] / period_dec + tr[i];
        smooth_plus[i] = smooth_plus[i - 1] - smooth_plus[i - 1] / period_dec + plus_dm[i];
        smooth_minus[i] = smooth_minus[i - 1] - smooth_minus[i - 1] / period_dec + minus_dm[i];
    }

    let mut dx = vec![Decimal::ZERO; length];
    for i in period..length {
        if smooth_tr[i].is_zero() {
            continue;
        }
        let plus_di = smooth_plus[i] / smooth_tr[i] * dec!(100);
        let minus_di = smooth_minus[i] / smooth_tr[i] * dec!(100);
        let sum_di = plus_di + minus_di;
        if !sum_di.is_zero() {
            dx[i] = (plus_di - minus_di).abs() / sum_di * dec!(100);
        }
    }

    let first_adx = 2 * period - 1;
    adx[first_adx] = dx[period..2 * period].iter().sum::<Decimal>() / period_dec;
    for i in (first_adx + 1)..length {
        adx[i] = (adx[i - 1] * (period_dec - Decimal::ONE) + dx[i]) / period_dec;
    }

    adx
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn trending_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = Decimal::from(100 + i as u64 * 2);
                Candle::new(
                    Utc::now(),
                    base,
                    base + dec!(3),
                    base - dec!(1),
                    base + dec!(2),
                    dec!(10),
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn adx_strong_uptrend_is_high() {
        let candles = trending_candles(60);
        let adx = calculate_adx(&candles, 14);
        assert_eq!(adx[26], Decimal::ZERO);
        assert!(adx[27] > Decimal::ZERO);
        assert!(*adx.last().unwrap() > dec!(50), "adx={}", adx.last().unwrap());
    }

    #[test]
    fn adx_insufficient_data() {
        let candles = trending_candles(20);
        assert_eq!(calculate_adx(&candles, 14), vec![Decimal::ZERO; 20]);
    }
}
