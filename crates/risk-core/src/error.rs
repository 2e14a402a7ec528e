//! Error types for the risk control engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Too few valid samples to compute a statistic. Callers must treat the
    /// result as unknown, never as zero correlation.
    #[error("insufficient data for {instrument_a}/{instrument_b}: {have} return pairs, need {need}")]
    InsufficientData {
        instrument_a: String,
        instrument_b: String,
        have: usize,
        need: usize,
    },

    /// The execution gateway rejected a close/reduce/open instruction.
    #[error("execution failure during {action}: {message}")]
    Execution { action: String, message: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    /// A data or account feed was unavailable this cycle.
    #[error("connectivity error from {feed}: {message}")]
    Connectivity { feed: String, message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration file error: {0}")]
    ConfigFile(#[from] config::ConfigError),
}

impl Error {
    /// Shorthand for gateway failures.
    pub fn execution(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            action: action.into(),
            message: message.into(),
        }
    }

    /// Shorthand for feed outages.
    pub fn connectivity(feed: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connectivity {
            feed: feed.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
