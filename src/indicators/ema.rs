//! Exponential and simple moving averages.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Exponential Moving Average. The first valid value, at index
/// `period - 1`, is seeded with the SMA of the first `period` inputs;
/// earlier positions are zero.
pub fn calculate_ema(values: &[Decimal], period: usize) -> Vec<Decimal> {
    if values.is_empty() {
        return Vec::new();
    }
    if period == 0 || values.len() < period {
        return vec![Decimal::ZERO; values.len()];
    }

    let mut ema = vec![Decimal::ZERO; values.len()];
    let period_dec = Decimal::from(period as u64);

    let sma: Decimal = values[..period].iter().sum::<Decimal>() / period_dec;
    ema[period - 1] = sma;

    let multiplier = dec!(2) / Decimal::from(period as u64 + 1);
    for i in period..values.len() {
        ema[i] = (values[i] - ema[i - 1]) * multiplier + ema[i - 1];
    }
    ema
}

/// Simple Moving Average over a rolling window.
pub fn calculate_sma(values: &[Decimal], period: usize) -> Vec<Decimal> {
    if values.is_empty() {
        return Vec::new();
    }
    if period == 0 || values.len() < period {
        return vec![Decimal::ZERO; values.len()];
    }

    let mut sma = vec![Decimal::ZERO; values.len()];
    let period_dec = Decimal::from(period as u64);
    let mut window_sum: Decimal = values[..period].iter().sum();
    sma[period - 1] = window_sum / period_dec;
    for i in period..values.len() {
        window_sum += values[i] - values[i - period];
        sma[i] = window_sum / period_dec;
    }
    sma
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_warmup_is_zero_padded() {
        let values: Vec<Decimal> = (1..=10).map(Decimal::from).collect();
        let ema = calculate_ema(&values, 5);
        assert_eq!(ema.len(), 10);
        assert_eq!(ema[3], Decimal::ZERO);
        // Seed SMA of 1..=5 is 3.
        assert_eq!(ema[4], dec!(3));
        assert!(ema[9] > ema[4]);
    }

    #[test]
    fn ema_short_input_all_zero() {
        let values = vec![dec!(1), dec!(2)];
        assert_eq!(calculate_ema(&values, 5), vec![Decimal::ZERO; 2]);
    }

    #[test]
    fn sma_rolling_window() {
        let values: Vec<Decimal> = (1..=5).map(Decimal::from).collect();
        let sma = calculate_sma(&values, 3);
        assert_eq!(sma[2], dec!(2));
        assert_eq!(sma[3], dec!(3));
        assert_eq!(sma[4], dec!(4));
    }
}
