//! Protective actions and their append-only audit trail.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Remedial action the executor can take against the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ProtectiveAction {
    /// Emit an alert only; no gateway calls.
    Alert,
    /// Close every open position.
    CloseAll,
    /// Close only positions with negative unrealized P&L.
    CloseLosingOnly,
    /// Reduce every open position by the given fraction (0 < f < 1).
    ReduceSizes { fraction: Decimal },
    /// Signal the external stop layer to tighten stops.
    TightenStops,
    /// Offset concentrated net currency exposure via the hedge resolver.
    EmergencyHedge,
    /// Suspend new position openings for the given duration.
    RestrictTrading { minutes: i64 },
}

impl ProtectiveAction {
    /// Short identifier used in logs and audit records.
    pub fn name(&self) -> &'static str {
        match self {
            ProtectiveAction::Alert => "alert",
            ProtectiveAction::CloseAll => "close_all",
            ProtectiveAction::CloseLosingOnly => "close_losing_only",
            ProtectiveAction::ReduceSizes { .. } => "reduce_sizes",
            ProtectiveAction::TightenStops => "tighten_stops",
            ProtectiveAction::EmergencyHedge => "emergency_hedge",
            ProtectiveAction::RestrictTrading { .. } => "restrict_trading",
        }
    }

    /// Whether the action issues real gateway orders and therefore counts
    /// against the emergency-action rate limit.
    pub fn is_emergency(&self) -> bool {
        !matches!(self, ProtectiveAction::Alert | ProtectiveAction::TightenStops)
    }
}

/// Outcome of one executed protective action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Every per-position call succeeded.
    Success,
    /// Some per-position calls failed after retry.
    Partial,
    /// No per-position call succeeded.
    Failed,
    /// Suppressed by the rate limiter; surfaced via alert, never silent.
    Skipped,
}

/// Immutable audit entry for one protective action. Append-only; retention
/// pruning lives outside the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectiveActionRecord {
    pub id: Uuid,
    pub action: ProtectiveAction,
    pub trigger_reason: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: ActionOutcome,
    pub affected_position_ids: Vec<Uuid>,
    /// Failure detail when outcome is Partial or Failed.
    pub detail: Option<String>,
}

impl ProtectiveActionRecord {
    pub fn new(
        action: ProtectiveAction,
        trigger_reason: impl Into<String>,
        outcome: ActionOutcome,
        affected_position_ids: Vec<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            trigger_reason: trigger_reason.into(),
            timestamp: Utc::now(),
            outcome,
            affected_position_ids,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
