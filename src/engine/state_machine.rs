//! Per-symbol trading state machine with validated transitions.

use anyhow::{bail, Result};

/// Trading states for the per-symbol state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingState {
    /// No position, no pending orders.
    Idle,
    /// Evaluating market data and generating signals.
    Eval,
    /// Entry order being placed.
    EntryPending,
    /// Position open, monitoring for exits.
    InPosition,
    /// Exit order being placed.
    ExitPending,
}

impl TradingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingState::Idle => "IDLE",
            TradingState::Eval => "EVAL",
            TradingState::EntryPending => "ENTRY_PENDING",
            TradingState::InPosition => "IN_POSITION",
            TradingState::ExitPending => "EXIT_PENDING",
        }
    }

    fn allowed_transitions(&self) -> &'static [TradingState] {
        match self {
            TradingState::Idle => &[TradingState::Eval],
            TradingState::Eval => &[TradingState::Idle, TradingState::EntryPending],
            TradingState::EntryPending => &[TradingState::InPosition, TradingState::Idle],
            TradingState::InPosition => &[TradingState::ExitPending],
            TradingState::ExitPending => &[TradingState::Idle],
        }
    }
}

pub struct StateMachine {
    symbol: String,
    state: TradingState,
}

impl StateMachine {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self::with_state(symbol, TradingState::Idle)
    }

    pub fn with_state(symbol: impl Into<String>, state: TradingState) -> Self {
        Self {
            symbol: symbol.into(),
            state,
        }
    }

    pub fn current_state(&self) -> TradingState {
        self.state
    }

    pub fn can_transition_to(&self, target: TradingState) -> bool {
        self.state.allowed_transitions().contains(&target)
    }

    /// Move to `target`, failing on any edge outside the transition table.
    pub fn transition_to(&mut self, target: TradingState) -> Result<()> {
        if !self.can_transition_to(target) {
            bail!(
                "invalid transition from {} to {} for {}",
                self.state.as_str(),
                target.as_str(),
                self.symbol
            );
        }
        self.state = target;
        Ok(())
    }

    /// Force the machine back to IDLE (error recovery).
    pub fn reset(&mut self) {
        self.state = TradingState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lifecycle_path_is_valid() {
        let mut sm = StateMachine::new("BTC/USDT");
        sm.transition_to(TradingState::Eval).unwrap();
        sm.transition_to(TradingState::EntryPending).unwrap();
        sm.transition_to(TradingState::InPosition).unwrap();
        sm.transition_to(TradingState::ExitPending).unwrap();
        sm.transition_to(TradingState::Idle).unwrap();
    }

    #[test]
    fn eval_can_bail_back_to_idle() {
        let mut sm = StateMachine::new("BTC/USDT");
        sm.transition_to(TradingState::Eval).unwrap();
        sm.transition_to(TradingState::Idle).unwrap();
    }

    #[test]
    fn entry_failure_returns_to_idle() {
        let mut sm = StateMachine::new("BTC/USDT");
        sm.transition_to(TradingState::Eval).unwrap();
        sm.transition_to(TradingState::EntryPending).unwrap();
        sm.transition_to(TradingState::Idle).unwrap();
    }

    #[test]
    fn invalid_edges_are_rejected() {
        let mut sm = StateMachine::new("BTC/USDT");
        assert!(sm.transition_to(TradingState::InPosition).is_err());
        assert!(sm.transition_to(TradingState::ExitPending).is_err());

        sm.transition_to(TradingState::Eval).unwrap();
        let err = sm.transition_to(TradingState::InPosition).unwrap_err();
        assert!(err.to_string().contains("invalid transition"));
        // Failed transition leaves the state unchanged.
        assert_eq!(sm.current_state(), TradingState::Eval);
    }

    #[test]
    fn in_position_cannot_jump_to_idle() {
        let mut sm = StateMachine::with_state("BTC/USDT", TradingState::InPosition);
        assert!(sm.transition_to(TradingState::Idle).is_err());
        sm.reset();
        assert_eq!(sm.current_state(), TradingState::Idle);
    }
}
