//! Bollinger Bands.

use rust_decimal::{Decimal, MathematicalOps};

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerBands {
    pub mid: Vec<Decimal>,
    pub upper: Vec<Decimal>,
    pub lower: Vec<Decimal>,
}

/// Bollinger Bands: SMA mid band with `std_dev_mult` standard deviations
/// above and below. Values before index `period - 1` are zero.
pub fn calculate_bollinger_bands(
    values: &[Decimal],
    period: usize,
    std_dev_mult: Decimal,
) -> BollingerBands {
    let length = values.len();
    let mut mid = vec![Decimal::ZERO; length];
    let mut upper = vec![Decimal::ZERO; length];
    let mut lower = vec![Decimal::ZERO; length];

    if period == 0 || length < period {
        return BollingerBands { mid, upper, lower };
    }

    let period_dec = Decimal::from(period as u64);
    for i in (period - 1)..length {
        let window = &values[i + 1 - period..=i];
        let sma: Decimal = window.iter().sum::<Decimal>() / period_dec;
        mid[i] = sma;

        let variance: Decimal = window
            .iter()
            .map(|v| {
                let d = *v - sma;
                d * d
            })
            .sum::<Decimal>()
            / period_dec;
        let std_dev = variance.sqrt().unwrap_or(Decimal::ZERO);

        upper[i] = sma + std_dev * std_dev_mult;
        lower[i] = sma - std_dev * std_dev_mult;
    }

    BollingerBands { mid, upper, lower }
}
