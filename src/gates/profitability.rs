//! Profitability gate: rejects entries whose expected net profit at the
//! take-profit level would not clear the configured minimum.

use crate::gates::GateDecision;
use crate::models::TradePlan;
use rust_decimal::Decimal;
use serde_json::json;

pub struct ProfitabilityGate {
    min_profit_usd: Decimal,
}

impl ProfitabilityGate {
    pub fn new(min_profit_usd: Decimal) -> Self {
        Self { min_profit_usd }
    }

    /// net = (tp - entry) * qty - fee - slippage - spread cost.
    /// Passes when net >= min_profit_usd (inclusive lower bound).
    pub fn evaluate(&self, plan: &TradePlan) -> (GateDecision, serde_json::Value) {
        let gross = (plan.take_profit_price - plan.entry_price) * plan.quantity;
        let costs = plan.estimated_fee_usd
            + plan.estimated_slippage_usd
            + plan.estimated_spread_cost_usd;
        let net = gross - costs;

        let passed = net >= self.min_profit_usd;
        let breakdown = json!({
            "gross_profit_usd": gross,
            "fee_usd": plan.estimated_fee_usd,
            "slippage_usd": plan.estimated_slippage_usd,
            "spread_cost_usd": plan.estimated_spread_cost_usd,
            "net_profit_usd": net,
            "min_profit_usd": self.min_profit_usd,
            "passed": passed,
        });

        let decision = if passed {
            GateDecision::Allow
        } else {
            GateDecision::reject(format!(
                "expected net profit {net} below minimum {}",
                self.min_profit_usd
            ))
        };

        (decision, breakdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn plan(tp: Decimal, fee: Decimal, slip: Decimal, spread: Decimal) -> TradePlan {
        TradePlan::new(
            "BTC/USDT",
            Side::Buy,
            dec!(100),
            dec!(1),
            dec!(95),
            tp,
            fee,
            slip,
            spread,
            "t-1",
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn passes_when_net_clears_minimum() {
        let gate = ProfitabilityGate::new(dec!(1.0));
        // Gross 5, costs 2, net 3.
        let (decision, breakdown) =
            gate.evaluate(&plan(dec!(105), dec!(1.0), dec!(0.5), dec!(0.5)));
        assert!(decision.is_allowed());
        assert_eq!(breakdown["net_profit_usd"], json!(3.0));
    }

    #[test]
    fn rejects_when_net_below_minimum() {
        let gate = ProfitabilityGate::new(dec!(5.0));
        let (decision, _) = gate.evaluate(&plan(dec!(105), dec!(1.0), dec!(0.5), dec!(0.5)));
        assert!(!decision.is_allowed());
    }

    #[test]
    fn exact_minimum_is_inclusive() {
        let gate = ProfitabilityGate::new(dec!(3.0));
        let (decision, _) = gate.evaluate(&plan(dec!(105), dec!(1.0), dec!(0.5), dec!(0.5)));
        assert!(decision.is_allowed());
    }

    #[test]
    fn negative_net_rejected_at_zero_minimum() {
        let gate = ProfitabilityGate::new(Decimal::ZERO);
        // Gross 1, costs 2, net -1.
        let (decision, breakdown) =
            gate.evaluate(&plan(dec!(101), dec!(1.0), dec!(0.5), dec!(0.5)));
        assert!(!decision.is_allowed());
        assert_eq!(breakdown["net_profit_usd"], json!(-1.0));
    }
}
