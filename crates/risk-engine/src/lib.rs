//! Risk Engine
//!
//! Periodic evaluation cycle tying the correlation matrix, drawdown
//! analyzer, crisis state machine, protective executor and sizing advisor
//! together over live account and market feeds.

pub mod context;
pub mod cycle;

pub use context::RiskContext;
pub use cycle::{CycleOutcome, RiskEngine};
