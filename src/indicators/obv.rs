//! On-Balance Volume.

use crate::models::Candle;
use rust_decimal::Decimal;

/// Cumulative volume indicator: volume is added on up closes, subtracted on
/// down closes, and carried on unchanged closes. The first value is the
/// first candle's volume.
pub fn calculate_obv(candles: &[Candle]) -> Vec<Decimal> {
    let Some(first) = candles.first() else {
        return Vec::new();
    };

    let mut obv = Vec::with_capacity(candles.len());
    obv.push(first.volume);

    for i in 1..candles.len() {
        let prev = obv[i - 1];
        let delta = match candles[i].close.cmp(&candles[i - 1].close) {
            std::cmp::Ordering::Greater => candles[i].volume,
            std::cmp::Ordering::Less => -candles[i].volume,
            std::cmp::Ordering::Equal => Decimal::ZERO,
        };
        obv.push(prev + delta);
    }

    obv
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn candle(close: Decimal, volume: Decimal) -> Candle {
        Candle::new(Utc::now(), close, close, close, close, volume).unwrap()
    }

    #[test]
    fn obv_accumulates_by_close_direction() {
        let candles = vec![
            candle(dec!(100), dec!(10)),
            candle(dec!(101), dec!(5)),
            candle(dec!(100), dec!(3)),
            candle(dec!(100), dec!(7)),
        ];
        let obv = calculate_obv(&candles);
        assert_eq!(obv, vec![dec!(10), dec!(15), dec!(12), dec!(12)]);
    }

    #[test]
    fn obv_empty_input() {
        assert!(calculate_obv(&[]).is_empty());
    }
}
