//! Account equity and margin snapshots.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One equity observation on the account curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquitySample {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
}

impl EquitySample {
    pub fn new(timestamp: DateTime<Utc>, equity: Decimal) -> Self {
        Self { timestamp, equity }
    }
}

/// Immutable account state captured once per evaluation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
    pub balance: Decimal,
    /// Margin level as equity/margin-used (e.g. 2.5 = 250%).
    pub margin_level: Decimal,
}

impl AccountSnapshot {
    pub fn equity_sample(&self) -> EquitySample {
        EquitySample::new(self.timestamp, self.equity)
    }
}
