//! Pre-trade position sizing against portfolio correlation and crisis state.

pub mod advisor;

pub use advisor::{AppliedTier, SizeRequest, SizingAdvice, SizingAdvisor, SizingDecision};
