//! RiskGuard: Portfolio Risk Control Engine
//!
//! This is the root crate that provides benchmark access to the internal modules.
//! For actual functionality, use the individual crates directly:
//!
//! - `risk-core`: Shared types, configuration, errors, alerting
//! - `correlation-engine`: Rolling pairwise correlations, concentration clusters
//! - `drawdown-analyzer`: Equity peaks, drawdown periods, recovery statistics
//! - `crisis-manager`: Crisis state machine, protective action executor
//! - `sizing-advisor`: Correlation-aware pre-trade position sizing
//! - `risk-engine`: The periodic evaluation cycle tying it all together

// Re-export for benchmarks
pub use correlation_engine as correlation;
pub use crisis_manager as crisis;
pub use drawdown_analyzer as drawdown;
pub use risk_core as core;
pub use risk_engine as engine;
pub use sizing_advisor as sizing;
