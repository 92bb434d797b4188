//! The trading engine: per-symbol state machines, the tick loop, and the
//! exit pipeline.

mod exit_pipeline;
mod state_machine;
mod trading_loop;
mod trailing_stop;

pub use exit_pipeline::ExitPipeline;
pub use state_machine::{StateMachine, TradingState};
pub use trading_loop::TradingLoop;
pub use trailing_stop::TrailingStopManager;
