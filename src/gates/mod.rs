//! Entry-gate stack: single-responsibility evaluators run in fixed order
//! before any position is opened. The first rejection short-circuits the
//! entry with a `gate.<name>.rejected` event.

mod cooldown;
mod daily_limit;
mod daily_lock;
pub mod estimators;
mod portfolio;
mod profitability;
mod regime;
mod sizer;
mod streak;

pub use cooldown::CooldownGate;
pub use daily_limit::DailySymbolLossLimit;
pub use daily_lock::DailyLockManager;
pub use portfolio::PortfolioRiskManager;
pub use profitability::ProfitabilityGate;
pub use regime::{RegimeFilter, RegimeState};
pub use sizer::DynamicSizer;
pub use streak::StreakSizer;

/// Outcome of a single gate evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Reject { reason: String },
}

impl GateDecision {
    pub fn reject(reason: impl Into<String>) -> Self {
        GateDecision::Reject {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            GateDecision::Allow => None,
            GateDecision::Reject { reason } => Some(reason),
        }
    }
}
