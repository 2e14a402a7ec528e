//! Correlation Engine
//!
//! Rolling pairwise return correlations and concentration clustering among
//! held and candidate instruments.

pub mod cluster;
pub mod matrix;
pub mod rolling;

pub use cluster::{build_clusters, cluster_alert_severity, max_risk_contribution, Cluster};
pub use matrix::{CorrelationEngine, CorrelationEntry, CorrelationStatus, MatrixUpdate, PairKey};
pub use rolling::RollingCorrelation;
