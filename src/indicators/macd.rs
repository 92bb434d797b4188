//! Moving Average Convergence Divergence.

use super::ema::calculate_ema;
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq)]
pub struct MacdResult {
    pub macd_line: Vec<Decimal>,
    pub signal_line: Vec<Decimal>,
    pub histogram: Vec<Decimal>,
}

/// MACD line = EMA(fast) − EMA(slow); signal line = EMA(signal) of the MACD
/// line; histogram = MACD − signal. Warmup positions are zero.
pub fn calculate_macd(
    values: &[Decimal],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> MacdResult {
    let n = values.len();
    if n < slow_period {
        return MacdResult {
            macd_line: vec![Decimal::ZERO; n],
            signal_line: vec![Decimal::ZERO; n],
            histogram: vec![Decimal::ZERO; n],
        };
    }

    let ema_fast = calculate_ema(values, fast_period);
    let ema_slow = calculate_ema(values, slow_period);

    let macd_line: Vec<Decimal> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| *f - *s)
        .collect();
    let signal_line = calculate_ema(&macd_line, signal_period);
    let histogram: Vec<Decimal> = macd_line
        .iter()
        .zip(&signal_line)
        .map(|(m, s)| *m - *s)
        .collect();

    MacdResult {
        macd_line,
        signal_line,
        histogram,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn macd_positive_in_uptrend() {
        let values: Vec<Decimal> = (1..=60).map(Decimal::from).collect();
        let macd = calculate_macd(&values, 12, 26, 9);
        let last = values.len() - 1;
        assert!(macd.macd_line[last] > Decimal::ZERO);
        assert_eq!(macd.histogram[last], macd.macd_line[last] - macd.signal_line[last]);
    }

    #[test]
    fn macd_insufficient_data() {
        let values = vec![dec!(1); 10];
        let macd = calculate_macd(&values, 12, 26, 9);
        assert_eq!(macd.macd_line, vec![Decimal::ZERO; 10]);
    }
}
