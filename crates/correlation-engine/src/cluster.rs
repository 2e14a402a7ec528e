//! Concentration clustering over the correlation matrix.
//!
//! Instruments whose pairwise correlation meets the cluster threshold are
//! chained into one concentrated-risk unit. Grouping runs over a union-find
//! so the fixpoint of greedy absorption costs near-linear time, and every
//! ordering is fixed (exposure descending, ties by instrument id) so the
//! same input always yields the same clusters.

use risk_core::types::CrisisLevel;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::matrix::CorrelationEngine;

/// A concentrated-risk set of held instruments (size >= 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    /// Members sorted by exposure descending, ties by id.
    pub instruments: Vec<String>,
    /// Mean coefficient over intra-cluster pairs with known correlation.
    pub average_intra_correlation: f64,
    pub total_exposure: Decimal,
    /// Share of total portfolio exposure weighted by internal correlation;
    /// 1.0 means all exposure sits in one fully correlated block.
    pub risk_contribution: f64,
}

impl Cluster {
    pub fn contains(&self, instrument: &str) -> bool {
        self.instruments.iter().any(|i| i == instrument)
    }

    /// Scope string for alerting, e.g. "EURUSD+GBPUSD".
    pub fn scope(&self) -> String {
        self.instruments.join("+")
    }
}

struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            self.parent[i] = self.find(self.parent[i]);
        }
        self.parent[i]
    }

    fn union(&mut self, i: usize, j: usize) {
        let (ri, rj) = (self.find(i), self.find(j));
        if ri == rj {
            return;
        }
        match self.rank[ri].cmp(&self.rank[rj]) {
            std::cmp::Ordering::Less => self.parent[ri] = rj,
            std::cmp::Ordering::Greater => self.parent[rj] = ri,
            std::cmp::Ordering::Equal => {
                self.parent[rj] = ri;
                self.rank[ri] += 1;
            }
        }
    }
}

/// Partition the held instruments into correlation clusters.
///
/// `holdings` maps each held instrument to its notional exposure. Singletons
/// are discarded; running twice on identical input yields identical output.
pub fn build_clusters(
    engine: &CorrelationEngine,
    holdings: &[(String, Decimal)],
    threshold: f64,
) -> Vec<Cluster> {
    // Fixed seed ordering for reproducibility.
    let mut ordered: Vec<(String, Decimal)> = holdings.to_vec();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ordered.dedup_by(|a, b| a.0 == b.0);

    let index: HashMap<&str, usize> = ordered
        .iter()
        .enumerate()
        .map(|(i, (id, _))| (id.as_str(), i))
        .collect();

    let mut uf = UnionFind::new(ordered.len());
    for entry in engine.entries() {
        if entry.coefficient < threshold {
            continue;
        }
        if let (Some(&i), Some(&j)) = (index.get(entry.pair.a()), index.get(entry.pair.b())) {
            uf.union(i, j);
        }
    }

    let total_exposure: Decimal = ordered.iter().map(|(_, e)| *e).sum();

    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..ordered.len() {
        groups.entry(uf.find(i)).or_default().push(i);
    }

    let mut clusters: Vec<Cluster> = groups
        .into_values()
        .filter(|members| members.len() >= 2)
        .map(|mut members| {
            members.sort_unstable(); // already exposure-desc by seed order
            let instruments: Vec<String> =
                members.iter().map(|&i| ordered[i].0.clone()).collect();
            let exposure: Decimal = members.iter().map(|&i| ordered[i].1).sum();

            let mut corr_sum = 0.0;
            let mut corr_count = 0usize;
            for (a_idx, a) in instruments.iter().enumerate() {
                for b in instruments.iter().skip(a_idx + 1) {
                    if let crate::matrix::CorrelationStatus::Known(entry) = engine.lookup(a, b) {
                        corr_sum += entry.coefficient;
                        corr_count += 1;
                    }
                }
            }
            let average = if corr_count > 0 { corr_sum / corr_count as f64 } else { 0.0 };

            let exposure_share = if total_exposure > Decimal::ZERO {
                (exposure / total_exposure).to_f64().unwrap_or(0.0)
            } else {
                0.0
            };

            Cluster {
                instruments,
                average_intra_correlation: average,
                total_exposure: exposure,
                risk_contribution: exposure_share * average.max(0.0),
            }
        })
        .collect();

    clusters.sort_by(|a, b| {
        b.total_exposure
            .cmp(&a.total_exposure)
            .then_with(|| a.instruments.cmp(&b.instruments))
    });

    debug!(clusters = clusters.len(), "Clustering complete");
    clusters
}

/// Largest risk contribution across clusters; the state machine compares
/// this against per-level cluster thresholds.
pub fn max_risk_contribution(clusters: &[Cluster]) -> f64 {
    clusters
        .iter()
        .map(|c| c.risk_contribution)
        .fold(0.0, f64::max)
}

/// Severity hint for cluster alerts based on the crisis level in force.
pub fn cluster_alert_severity(level: CrisisLevel) -> risk_core::alerts::AlertSeverity {
    use risk_core::alerts::AlertSeverity;
    if level >= CrisisLevel::Severe {
        AlertSeverity::Critical
    } else if level >= CrisisLevel::Warning {
        AlertSeverity::Warning
    } else {
        AlertSeverity::Info
    }
}
