//! Immutable per-cycle risk snapshot.

use chrono::{DateTime, Utc};
use correlation_engine::Cluster;
use risk_core::types::{CrisisLevel, Position};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Everything downstream consumers need from one completed evaluation
/// cycle. Built once per cycle and published behind an `Arc`; it is never
/// mutated afterwards, so readers see one mutually consistent snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskContext {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
    pub balance: Decimal,
    pub margin_level: Decimal,
    pub crisis_level: CrisisLevel,
    /// Current open drawdown depth as a fraction of the running peak.
    pub drawdown_pct: Decimal,
    /// Depth gained per day over the open drawdown period.
    pub drawdown_velocity: f64,
    pub clusters: Vec<Cluster>,
    pub max_cluster_risk: f64,
    pub volatility_spike: bool,
    pub open_positions: Vec<Position>,
}

impl RiskContext {
    /// Total notional exposure across open positions.
    pub fn total_exposure(&self) -> Decimal {
        self.open_positions
            .iter()
            .map(|p| p.notional_exposure)
            .sum()
    }

    pub fn cluster_for(&self, instrument: &str) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.contains(instrument))
    }
}
