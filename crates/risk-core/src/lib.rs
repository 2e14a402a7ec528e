//! Risk Core Library
//!
//! Shared data model, error taxonomy, configuration, alerting, and the
//! external-interface traits for the portfolio risk control engine.

pub mod alerts;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
