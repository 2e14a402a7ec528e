//! Equity drawdown tracking and statistics.

use chrono::{DateTime, Utc};
use risk_core::types::EquitySample;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// One decline from a running equity peak to a trough.
///
/// Open while equity sits below the peak that started it; closed (recovered)
/// the moment a new peak is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawdownPeriod {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub peak: Decimal,
    pub trough: Decimal,
    pub trough_time: DateTime<Utc>,
    pub is_recovered: bool,
}

impl DrawdownPeriod {
    fn open(start_time: DateTime<Utc>, peak: Decimal, equity: Decimal) -> Self {
        Self {
            start_time,
            end_time: None,
            peak,
            trough: equity,
            trough_time: start_time,
            is_recovered: false,
        }
    }

    /// (peak - trough) / peak, always >= 0.
    pub fn depth_pct(&self) -> Decimal {
        if self.peak <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.peak - self.trough) / self.peak).max(Decimal::ZERO)
    }

    /// Days from start to close, or to `asof` while still open.
    pub fn duration_days(&self, asof: DateTime<Utc>) -> f64 {
        let end = self.end_time.unwrap_or(asof);
        (end - self.start_time).num_seconds().max(0) as f64 / SECONDS_PER_DAY
    }

    /// Days from the trough back to the recovery peak; None while open.
    pub fn recovery_days(&self) -> Option<f64> {
        self.end_time
            .map(|end| (end - self.trough_time).num_seconds().max(0) as f64 / SECONDS_PER_DAY)
    }
}

/// Summary statistics over the closed-period history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrawdownStats {
    pub period_count: usize,
    pub mean_depth: f64,
    pub max_depth: f64,
    pub mean_duration_days: f64,
    pub mean_recovery_days: f64,
}

/// Tracks the equity curve: running peak, the open drawdown period if any,
/// and a bounded history of closed periods.
///
/// The running peak never decreases except through `reset_peak`.
#[derive(Debug, Clone)]
pub struct DrawdownAnalyzer {
    running_peak: Decimal,
    open: Option<DrawdownPeriod>,
    history: VecDeque<DrawdownPeriod>,
    history_capacity: usize,
    last_sample: Option<EquitySample>,
}

impl DrawdownAnalyzer {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            running_peak: Decimal::ZERO,
            open: None,
            history: VecDeque::with_capacity(history_capacity),
            history_capacity,
            last_sample: None,
        }
    }

    /// Fold in one equity sample. Out-of-order samples are dropped.
    pub fn update(&mut self, sample: EquitySample) {
        if let Some(last) = self.last_sample {
            if sample.timestamp < last.timestamp {
                warn!(
                    last = %last.timestamp,
                    incoming = %sample.timestamp,
                    "Dropping out-of-order equity sample"
                );
                return;
            }
        }
        self.last_sample = Some(sample);

        if sample.equity > self.running_peak {
            // New peak: any open period has just recovered.
            if let Some(mut period) = self.open.take() {
                period.end_time = Some(sample.timestamp);
                period.is_recovered = true;
                info!(
                    depth_pct = %period.depth_pct(),
                    duration_days = period.duration_days(sample.timestamp),
                    "Drawdown period recovered"
                );
                self.push_history(period);
            }
            self.running_peak = sample.equity;
            return;
        }

        if sample.equity < self.running_peak {
            match &mut self.open {
                Some(period) => {
                    if sample.equity < period.trough {
                        period.trough = sample.equity;
                        period.trough_time = sample.timestamp;
                    }
                }
                None => {
                    debug!(
                        peak = %self.running_peak,
                        equity = %sample.equity,
                        "Drawdown period opened"
                    );
                    self.open = Some(DrawdownPeriod::open(
                        sample.timestamp,
                        self.running_peak,
                        sample.equity,
                    ));
                }
            }
        }
    }

    /// Re-baseline the peak, e.g. after a deposit or withdrawal. The only
    /// permitted peak decrease; an open period is closed unrecovered.
    pub fn reset_peak(&mut self, equity: Decimal, asof: DateTime<Utc>) {
        if let Some(mut period) = self.open.take() {
            period.end_time = Some(asof);
            period.is_recovered = false;
            self.push_history(period);
        }
        info!(old_peak = %self.running_peak, new_peak = %equity, "Peak equity reset");
        self.running_peak = equity;
    }

    pub fn running_peak(&self) -> Decimal {
        self.running_peak
    }

    pub fn open_period(&self) -> Option<&DrawdownPeriod> {
        self.open.as_ref()
    }

    pub fn history(&self) -> impl Iterator<Item = &DrawdownPeriod> {
        self.history.iter()
    }

    /// (peak - equity) / peak for the most recent sample; zero at a peak.
    pub fn current_drawdown_pct(&self) -> Decimal {
        let Some(sample) = self.last_sample else {
            return Decimal::ZERO;
        };
        if self.running_peak <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.running_peak - sample.equity) / self.running_peak).max(Decimal::ZERO)
    }

    /// Current depth divided by days since the open period started; zero
    /// with no open period or a same-timestamp start.
    pub fn velocity(&self, asof: DateTime<Utc>) -> f64 {
        let Some(period) = &self.open else {
            return 0.0;
        };
        let days = period.duration_days(asof);
        if days <= 0.0 {
            return 0.0;
        }
        self.current_drawdown_pct().to_f64().unwrap_or(0.0) / days
    }

    /// On-demand statistics over closed periods.
    pub fn stats(&self) -> DrawdownStats {
        if self.history.is_empty() {
            return DrawdownStats::default();
        }
        let n = self.history.len() as f64;
        let depths: Vec<f64> = self
            .history
            .iter()
            .map(|p| p.depth_pct().to_f64().unwrap_or(0.0))
            .collect();
        let recoveries: Vec<f64> = self.history.iter().filter_map(|p| p.recovery_days()).collect();

        DrawdownStats {
            period_count: self.history.len(),
            mean_depth: depths.iter().sum::<f64>() / n,
            max_depth: depths.iter().fold(0.0, |a, &b| a.max(b)),
            mean_duration_days: self
                .history
                .iter()
                .map(|p| p.duration_days(p.end_time.unwrap_or_else(Utc::now)))
                .sum::<f64>()
                / n,
            mean_recovery_days: if recoveries.is_empty() {
                0.0
            } else {
                recoveries.iter().sum::<f64>() / recoveries.len() as f64
            },
        }
    }

    /// Empirical fraction of historical periods at least `threshold` deep.
    pub fn prob_depth_at_least(&self, threshold: Decimal) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        let exceeding = self
            .history
            .iter()
            .filter(|p| p.depth_pct() >= threshold)
            .count();
        exceeding as f64 / self.history.len() as f64
    }

    fn push_history(&mut self, period: DrawdownPeriod) {
        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(period);
    }
}
