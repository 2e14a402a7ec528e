//! Crisis Manager
//!
//! Multi-level crisis-escalation state machine with hysteresis, and the
//! protective action executor that carries out level transitions.

pub mod executor;
pub mod hedge;
pub mod state_machine;

pub use executor::{ActionRateLimiter, ProtectiveActionExecutor, TradingSuspension};
pub use state_machine::{CrisisInputs, CrisisStateMachine, Transition};
