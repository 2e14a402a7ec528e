//! Drawdown Analyzer
//!
//! Equity-curve peak tracking, drawdown period lifecycle, and empirical
//! drawdown statistics.

pub mod analyzer;

pub use analyzer::{DrawdownAnalyzer, DrawdownPeriod, DrawdownStats};
