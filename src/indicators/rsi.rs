//! Relative Strength Index.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// RSI with Wilder smoothing. The first valid value is at index `period`;
/// earlier positions are zero.
pub fn calculate_rsi(values: &[Decimal], period: usize) -> Vec<Decimal> {
    if period == 0 || values.len() < period + 1 {
        return vec![Decimal::ZERO; values.len()];
    }

    let mut rsi = vec![Decimal::ZERO; values.len()];
    let period_dec = Decimal::from(period as u64);

    let mut gains = Vec::with_capacity(values.len() - 1);
    let mut losses = Vec::with_capacity(values.len() - 1);
    for w in values.windows(2) {
        let change = w[1] - w[0];
        if change > Decimal::ZERO {
            gains.push(change);
            losses.push(Decimal::ZERO);
        } else {
            gains.push(Decimal::ZERO);
            losses.push(-change);
        }
    }

    let mut avg_gain: Decimal = gains[..period].iter().sum::<Decimal>() / period_dec;
    let mut avg_loss: Decimal = losses[..period].iter().sum::<Decimal>() / period_dec;
    rsi[period] = rsi_from_averages(avg_gain, avg_loss);

    for i in (period + 1)..values.len() {
        // gains[i - 1] is the change landing at values[i].
        avg_gain = (avg_gain * (period_dec - Decimal::ONE) + gains[i - 1]) / period_dec;
        avg_loss = (avg_loss * (period_dec - Decimal::ONE) + losses[i - 1]) / period_dec;
        rsi[i] = rsi_from_averages(avg_gain, avg_loss);
    }

    rsi
}

fn rsi_from_averages(avg_gain: Decimal, avg_loss: Decimal) -> Decimal {
    if avg_loss.is_zero() {
        return dec!(100);
    }
    let rs = avg_gain / avg_loss;
    dec!(100) - dec!(100) / (Decimal::ONE + rs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_monotone_increase_approaches_100() {
        let values: Vec<Decimal> = (1..=40).map(Decimal::from).collect();
        let rsi = calculate_rsi(&values, 14);
        assert_eq!(*rsi.last().unwrap(), dec!(100));
    }

    #[test]
    fn rsi_monotone_decrease_approaches_zero() {
        let values: Vec<Decimal> = (1..=40).rev().map(Decimal::from).collect();
        let rsi = calculate_rsi(&values, 14);
        assert!(*rsi.last().unwrap() < dec!(1));
    }

    #[test]
    fn rsi_warmup_is_zero_padded() {
        let values: Vec<Decimal> = (1..=20).map(Decimal::from).collect();
        let rsi = calculate_rsi(&values, 14);
        assert_eq!(rsi[13], Decimal::ZERO);
        assert!(rsi[14] > Decimal::ZERO);
    }

    #[test]
    fn rsi_insufficient_data() {
        let values = vec![dec!(1), dec!(2), dec!(3)];
        assert_eq!(calculate_rsi(&values, 14), vec![Decimal::ZERO; 3]);
    }
}
