//! Alerting: fire-and-forget sink plus a key-indexed alert book.
//!
//! Alert delivery must never block the evaluation cycle, so the channel sink
//! uses `try_send` and drops on a full buffer (with a log line). The alert
//! book deduplicates by (kind, scope) with O(1) update-or-create and counts
//! repeats instead of re-emitting identical entries.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Alert severity, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// Closed set of alert categories raised by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    CrisisTransition,
    ActionFailure,
    ActionRateLimited,
    ConnectivityLoss,
    ClusterRisk,
    SizingRejection,
    StopTightening,
    DataQuality,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertKind::CrisisTransition => "crisis_transition",
            AlertKind::ActionFailure => "action_failure",
            AlertKind::ActionRateLimited => "action_rate_limited",
            AlertKind::ConnectivityLoss => "connectivity_loss",
            AlertKind::ClusterRisk => "cluster_risk",
            AlertKind::SizingRejection => "sizing_rejection",
            AlertKind::StopTightening => "stop_tightening",
            AlertKind::DataQuality => "data_quality",
        };
        write!(f, "{s}")
    }
}

/// One alert instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub kind: AlertKind,
    /// Instrument, pair, or currency the alert is scoped to, if any.
    pub scope: Option<String>,
    pub severity: AlertSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// How many times this (kind, scope) has fired since first raised.
    pub repeat_count: u32,
}

/// Delivery sink for alerts. Implementations must not block.
pub trait AlertSink: Send + Sync {
    fn emit(&self, alert: Alert);
}

/// Sink backed by a bounded tokio channel; full or closed channels drop the
/// alert rather than stalling the cycle.
pub struct ChannelAlertSink {
    tx: mpsc::Sender<Alert>,
}

impl ChannelAlertSink {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Alert>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelAlertSink {
    fn emit(&self, alert: Alert) {
        if let Err(e) = self.tx.try_send(alert) {
            warn!(error = %e, "Alert channel unavailable, dropping alert");
        }
    }
}

/// Sink that discards everything; useful in tests and benches.
#[derive(Default)]
pub struct NullAlertSink;

impl AlertSink for NullAlertSink {
    fn emit(&self, _alert: Alert) {}
}

type AlertKey = (AlertKind, Option<String>);

/// Key-indexed alert registry shared by all components.
pub struct AlertBook {
    entries: DashMap<AlertKey, Alert>,
    sink: Arc<dyn AlertSink>,
}

impl AlertBook {
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self { entries: DashMap::new(), sink }
    }

    /// Update-or-create the entry for (kind, scope), bump its repeat count,
    /// and forward it to the sink.
    pub fn raise(
        &self,
        kind: AlertKind,
        scope: Option<String>,
        severity: AlertSeverity,
        message: impl Into<String>,
    ) -> Alert {
        let message = message.into();
        let mut entry = self
            .entries
            .entry((kind, scope.clone()))
            .or_insert_with(|| Alert {
                id: Uuid::new_v4(),
                kind,
                scope,
                severity,
                message: String::new(),
                timestamp: Utc::now(),
                repeat_count: 0,
            });
        entry.severity = severity;
        entry.message = message;
        entry.timestamp = Utc::now();
        entry.repeat_count += 1;
        let alert = entry.clone();
        drop(entry);

        self.sink.emit(alert.clone());
        alert
    }

    /// Clear the entry for (kind, scope), e.g. when a condition resolves.
    pub fn resolve(&self, kind: AlertKind, scope: Option<&str>) {
        self.entries.remove(&(kind, scope.map(str::to_string)));
    }

    pub fn get(&self, kind: AlertKind, scope: Option<&str>) -> Option<Alert> {
        self.entries
            .get(&(kind, scope.map(str::to_string)))
            .map(|e| e.clone())
    }

    pub fn active(&self) -> Vec<Alert> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }
}
