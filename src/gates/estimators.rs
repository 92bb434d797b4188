//! Cost estimators for fee, slippage, and spread.

use crate::models::{Orderbook, Side};
use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Trading fee in USD for a notional at `rate_bps` basis points.
pub fn calculate_fee(notional_usd: Decimal, rate_bps: Decimal) -> Decimal {
    notional_usd * rate_bps / dec!(10000)
}

/// Walk the book to estimate the average fill price and total slippage cost
/// versus the best level. Errors when the visible depth cannot absorb the
/// quantity.
pub fn calculate_slippage(
    side: Side,
    quantity: Decimal,
    orderbook: &Orderbook,
) -> Result<(Decimal, Decimal)> {
    if quantity <= Decimal::ZERO {
        return Ok((Decimal::ZERO, Decimal::ZERO));
    }

    let levels = match side {
        Side::Buy => &orderbook.asks,
        Side::Sell => &orderbook.bids,
    };

    let mut remaining = quantity;
    let mut total_cost = Decimal::ZERO;
    for (price, qty) in levels {
        let fill = remaining.min(*qty);
        total_cost += fill * price;
        remaining -= fill;
        if remaining <= Decimal::ZERO {
            break;
        }
    }
    if remaining > Decimal::ZERO {
        bail!("insufficient liquidity for quantity {quantity}");
    }

    let avg_fill = total_cost / quantity;
    let best = levels[0].0;
    let slippage = match side {
        Side::Buy => (avg_fill - best) * quantity,
        Side::Sell => (best - avg_fill) * quantity,
    };

    Ok((avg_fill, slippage))
}

/// Half-spread cost versus mid for a marketable order.
pub fn calculate_spread_cost(side: Side, quantity: Decimal, orderbook: &Orderbook) -> Decimal {
    let per_unit = match side {
        Side::Buy => orderbook.best_ask() - orderbook.mid_price(),
        Side::Sell => orderbook.mid_price() - orderbook.best_bid(),
    };
    per_unit * quantity
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> Orderbook {
        Orderbook::new(
            vec![(dec!(99), dec!(1)), (dec!(98), dec!(2))],
            vec![(dec!(101), dec!(1)), (dec!(102), dec!(2))],
        )
        .unwrap()
    }

    #[test]
    fn fee_from_basis_points() {
        assert_eq!(calculate_fee(dec!(10000), dec!(10)), dec!(10));
        assert_eq!(calculate_fee(dec!(5000), dec!(0)), Decimal::ZERO);
    }

    #[test]
    fn slippage_within_best_level_is_zero() {
        let (avg, slip) = calculate_slippage(Side::Buy, dec!(1), &book()).unwrap();
        assert_eq!(avg, dec!(101));
        assert_eq!(slip, Decimal::ZERO);
    }

    #[test]
    fn slippage_across_levels() {
        let (avg, slip) = calculate_slippage(Side::Buy, dec!(2), &book()).unwrap();
        // (1*101 + 1*102) / 2 = 101.5
        assert_eq!(avg, dec!(101.5));
        assert_eq!(slip, dec!(1));
    }

    #[test]
    fn slippage_errors_on_thin_book() {
        assert!(calculate_slippage(Side::Buy, dec!(10), &book()).is_err());
    }

    #[test]
    fn spread_cost_is_half_spread_times_qty() {
        // mid = 100, ask = 101 -> 1.0 per unit.
        assert_eq!(calculate_spread_cost(Side::Buy, dec!(2), &book()), dec!(2));
    }
}
