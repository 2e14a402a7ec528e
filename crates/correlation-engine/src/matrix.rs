//! Pairwise correlation matrix over rolling log returns.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use risk_core::config::CorrelationConfig;
use risk_core::types::{PriceBar, PriceSeries};
use risk_core::{Error, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

use crate::rolling::RollingCorrelation;

/// Canonical unordered instrument pair: `a` sorts before `b`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairKey {
    a: String,
    b: String,
}

impl PairKey {
    pub fn new(i: &str, j: &str) -> Self {
        if i <= j {
            Self { a: i.to_string(), b: j.to_string() }
        } else {
            Self { a: j.to_string(), b: i.to_string() }
        }
    }

    pub fn a(&self) -> &str {
        &self.a
    }

    pub fn b(&self) -> &str {
        &self.b
    }

    pub fn involves(&self, instrument: &str) -> bool {
        self.a == instrument || self.b == instrument
    }

    /// The member that is not `instrument`, if the pair involves it.
    pub fn other(&self, instrument: &str) -> Option<&str> {
        if self.a == instrument {
            Some(&self.b)
        } else if self.b == instrument {
            Some(&self.a)
        } else {
            None
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.a, self.b)
    }
}

/// One matrix cell; stored once per unordered pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationEntry {
    pub pair: PairKey,
    /// Pearson coefficient over the short window, in [-1, 1].
    pub coefficient: f64,
    pub sample_count: usize,
    /// Approximate t-statistic test against the configured bound.
    pub is_significant: bool,
    /// Short- and long-window coefficients agree within tolerance.
    pub is_stable: bool,
    pub last_updated: DateTime<Utc>,
}

/// Query result for one pair.
#[derive(Debug, Clone)]
pub enum CorrelationStatus {
    Known(CorrelationEntry),
    /// Too few valid return pairs. Not the same as uncorrelated; callers
    /// must treat this as unknown.
    Insufficient { have: usize, need: usize },
    /// The pair has never been part of a matrix update.
    Untracked,
}

/// Summary of one `update_matrix` pass.
#[derive(Debug, Default)]
pub struct MatrixUpdate {
    pub recomputed: usize,
    pub insufficient: Vec<PairKey>,
}

struct PairState {
    last_sample_ts: Option<DateTime<Utc>>,
    short: RollingCorrelation,
    long: RollingCorrelation,
    entry: Option<CorrelationEntry>,
}

impl PairState {
    fn new(config: &CorrelationConfig) -> Self {
        Self {
            last_sample_ts: None,
            short: RollingCorrelation::new(config.short_window),
            long: RollingCorrelation::new(config.long_window),
            entry: None,
        }
    }
}

/// Rolling correlation matrix over the instruments currently in play.
///
/// Price series are fed incrementally; per-pair rolling accumulators append
/// and evict rather than rescanning the window each cycle. Only pairs among
/// held instruments plus pairs involving a sizing candidate are maintained.
pub struct CorrelationEngine {
    config: CorrelationConfig,
    series: DashMap<String, PriceSeries>,
    pairs: DashMap<PairKey, PairState>,
}

impl CorrelationEngine {
    pub fn new(config: CorrelationConfig) -> Self {
        Self {
            config,
            series: DashMap::new(),
            pairs: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Feed history for an instrument. Bars already seen (at or before the
    /// series tail) are ignored, so passing a full history slice each cycle
    /// appends only the new tail.
    pub fn observe_history(&self, instrument: &str, bars: &[PriceBar]) {
        let mut series = self
            .series
            .entry(instrument.to_string())
            .or_insert_with(|| PriceSeries::new(instrument, self.config.price_capacity()));
        for bar in bars {
            series.push(*bar);
        }
    }

    pub fn series_len(&self, instrument: &str) -> usize {
        self.series.get(instrument).map(|s| s.len()).unwrap_or(0)
    }

    /// Pearson correlation of log returns over the most recent `window`
    /// return pairs, computed from scratch.
    ///
    /// Returns `Error::InsufficientData` below the configured sample floor —
    /// a distinct outcome from a coefficient of zero.
    pub fn compute_correlation(&self, i: &str, j: &str, window: usize) -> Result<(f64, usize)> {
        let need = self.config.min_samples;
        if i == j {
            let have = self.series_len(i).saturating_sub(1).min(window);
            if have < need {
                return Err(self.insufficient(i, j, have));
            }
            return Ok((1.0, have));
        }

        let returns = self.aligned_returns(i, j, window)?;
        if returns.len() < need {
            return Err(self.insufficient(i, j, returns.len()));
        }
        let mut roll = RollingCorrelation::new(window);
        for &(x, y) in &returns {
            roll.push(x, y);
        }
        match roll.correlation() {
            Some(r) => Ok((r, returns.len())),
            None => Err(self.insufficient(i, j, 0)),
        }
    }

    /// Recompute the matrix for the held instruments plus an optional sizing
    /// candidate — O(k^2) in open positions, never the full universe. Pairs
    /// that left the active set are evicted.
    pub fn update_matrix(&self, held: &[String], candidate: Option<&str>) -> MatrixUpdate {
        let mut active: Vec<&str> = held.iter().map(String::as_str).collect();
        if let Some(c) = candidate {
            if !active.contains(&c) {
                active.push(c);
            }
        }
        active.sort_unstable();
        active.dedup();

        let active_set: HashSet<&str> = active.iter().copied().collect();
        self.pairs.retain(|key, _| {
            active_set.contains(key.a()) && active_set.contains(key.b())
        });

        let mut update = MatrixUpdate::default();
        for (idx, i) in active.iter().enumerate() {
            for j in active.iter().skip(idx + 1) {
                let key = PairKey::new(i, j);
                match self.update_pair(&key) {
                    Some(_) => update.recomputed += 1,
                    None => update.insufficient.push(key),
                }
            }
        }

        debug!(
            pairs = update.recomputed,
            insufficient = update.insufficient.len(),
            "Correlation matrix updated"
        );
        update
    }

    /// Current status for a pair.
    pub fn lookup(&self, i: &str, j: &str) -> CorrelationStatus {
        if i == j {
            return CorrelationStatus::Untracked;
        }
        let key = PairKey::new(i, j);
        match self.pairs.get(&key) {
            Some(state) => match &state.entry {
                Some(entry) => CorrelationStatus::Known(entry.clone()),
                None => CorrelationStatus::Insufficient {
                    have: state.short.len(),
                    need: self.config.min_samples,
                },
            },
            None => CorrelationStatus::Untracked,
        }
    }

    /// All valid matrix entries.
    pub fn entries(&self) -> Vec<CorrelationEntry> {
        self.pairs
            .iter()
            .filter_map(|e| e.value().entry.clone())
            .collect()
    }

    /// Most recent closes for one tracked instrument, oldest first.
    pub fn recent_closes(&self, instrument: &str, n: usize) -> Vec<Decimal> {
        self.series
            .get(instrument)
            .map(|s| s.recent_closes(n))
            .unwrap_or_default()
    }

    /// Valid entries involving `instrument`.
    pub fn entries_for(&self, instrument: &str) -> Vec<CorrelationEntry> {
        self.pairs
            .iter()
            .filter(|e| e.key().involves(instrument))
            .filter_map(|e| e.value().entry.clone())
            .collect()
    }

    // Feed any new aligned return samples into the pair's rolling windows
    // and refresh its entry. Returns None while below the sample floor.
    fn update_pair(&self, key: &PairKey) -> Option<CorrelationEntry> {
        let returns = self.aligned_returns(key.a(), key.b(), usize::MAX).ok()?;
        let timestamps = self.aligned_timestamps(key.a(), key.b());

        let mut state = self
            .pairs
            .entry(key.clone())
            .or_insert_with(|| PairState::new(&self.config));

        for (&(x, y), &ts) in returns.iter().zip(timestamps.iter()) {
            if state.last_sample_ts.map(|last| ts > last).unwrap_or(true) {
                state.short.push(x, y);
                state.long.push(x, y);
                state.last_sample_ts = Some(ts);
            }
        }

        if state.short.len() < self.config.min_samples {
            state.entry = None;
            return None;
        }
        let coefficient = match state.short.correlation() {
            Some(r) => r,
            None => {
                state.entry = None;
                return None;
            }
        };

        let n = state.short.len();
        let is_significant = significant(coefficient, n, self.config.significance_t);
        let is_stable = state
            .long
            .correlation()
            .filter(|_| state.long.len() >= self.config.min_samples)
            .map(|long_r| (coefficient - long_r).abs() < self.config.stability_tolerance)
            .unwrap_or(false);

        let entry = CorrelationEntry {
            pair: key.clone(),
            coefficient,
            sample_count: n,
            is_significant,
            is_stable,
            last_updated: Utc::now(),
        };
        state.entry = Some(entry.clone());
        Some(entry)
    }

    // Log returns over bars the two series share, oldest first, capped to
    // the most recent `window` samples.
    fn aligned_returns(&self, i: &str, j: &str, window: usize) -> Result<Vec<(f64, f64)>> {
        let (closes_i, closes_j) = self.common_closes(i, j)?;
        let mut returns = Vec::with_capacity(closes_i.len().saturating_sub(1));
        for k in 1..closes_i.len() {
            if let (Some(x), Some(y)) = (
                log_return(closes_i[k - 1], closes_i[k]),
                log_return(closes_j[k - 1], closes_j[k]),
            ) {
                returns.push((x, y));
            }
        }
        if returns.len() > window {
            let skip = returns.len() - window;
            returns.drain(..skip);
        }
        Ok(returns)
    }

    // Timestamps of the return samples produced by `aligned_returns` with an
    // unbounded window (the timestamp of each interval's later bar).
    fn aligned_timestamps(&self, i: &str, j: &str) -> Vec<DateTime<Utc>> {
        match self.common_bars(i, j) {
            Some(common) => {
                let mut out = Vec::new();
                for k in 1..common.len() {
                    let (_, ci0, cj0) = common[k - 1];
                    let (ts, ci1, cj1) = common[k];
                    if log_return(ci0, ci1).is_some() && log_return(cj0, cj1).is_some() {
                        out.push(ts);
                    }
                }
                out
            }
            None => Vec::new(),
        }
    }

    fn common_closes(&self, i: &str, j: &str) -> Result<(Vec<f64>, Vec<f64>)> {
        match self.common_bars(i, j) {
            Some(common) => Ok((
                common.iter().map(|(_, a, _)| *a).collect(),
                common.iter().map(|(_, _, b)| *b).collect(),
            )),
            None => Err(self.insufficient(i, j, 0)),
        }
    }

    // Merge the two series on timestamp, keeping only bars both have.
    fn common_bars(&self, i: &str, j: &str) -> Option<Vec<(DateTime<Utc>, f64, f64)>> {
        let series_i = self.series.get(i)?;
        let series_j = self.series.get(j)?;
        let bars_i: Vec<PriceBar> = series_i.bars().copied().collect();
        let bars_j: Vec<PriceBar> = series_j.bars().copied().collect();
        drop(series_i);
        drop(series_j);

        let mut out = Vec::with_capacity(bars_i.len().min(bars_j.len()));
        let (mut a, mut b) = (0, 0);
        while a < bars_i.len() && b < bars_j.len() {
            match bars_i[a].timestamp.cmp(&bars_j[b].timestamp) {
                std::cmp::Ordering::Less => a += 1,
                std::cmp::Ordering::Greater => b += 1,
                std::cmp::Ordering::Equal => {
                    if let (Some(ci), Some(cj)) =
                        (bars_i[a].close.to_f64(), bars_j[b].close.to_f64())
                    {
                        out.push((bars_i[a].timestamp, ci, cj));
                    }
                    a += 1;
                    b += 1;
                }
            }
        }
        Some(out)
    }

    fn insufficient(&self, i: &str, j: &str, have: usize) -> Error {
        Error::InsufficientData {
            instrument_a: i.to_string(),
            instrument_b: j.to_string(),
            have,
            need: self.config.min_samples,
        }
    }
}

fn log_return(prev: f64, current: f64) -> Option<f64> {
    if prev > 0.0 && current > 0.0 {
        Some((current / prev).ln())
    } else {
        None
    }
}

// Approximate inferential test: t = r * sqrt((n-2) / (1-r^2)).
fn significant(r: f64, n: usize, bound: f64) -> bool {
    if n <= 2 {
        return false;
    }
    let r2 = r * r;
    if r2 >= 1.0 - f64::EPSILON {
        return true;
    }
    let t = r * ((n as f64 - 2.0) / (1.0 - r2)).sqrt();
    t.abs() >= bound
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn config() -> CorrelationConfig {
        CorrelationConfig {
            short_window: 20,
            long_window: 60,
            min_samples: 10,
            significance_t: 2.0,
            stability_tolerance: 0.25,
            cluster_threshold: 0.7,
        }
    }

    fn bars_from(prices: &[f64]) -> Vec<PriceBar> {
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| {
                PriceBar::new(
                    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                        + chrono::Duration::minutes(i as i64),
                    Decimal::try_from(*p).unwrap(),
                )
            })
            .collect()
    }

    // Two series driven by a shared factor, correlated ~1.
    fn driven_prices(n: usize, scale: f64) -> (Vec<f64>, Vec<f64>) {
        let mut pa = vec![100.0];
        let mut pb = vec![50.0];
        for i in 1..n {
            let shock = (i as f64 * 0.9).sin() * 0.01;
            pa.push(pa[i - 1] * (1.0 + shock));
            pb.push(pb[i - 1] * (1.0 + shock * scale));
        }
        (pa, pb)
    }

    #[test]
    fn test_coefficient_bounded_and_self_correlation_is_one() {
        let engine = CorrelationEngine::new(config());
        let (pa, pb) = driven_prices(40, 1.0);
        engine.observe_history("EURUSD", &bars_from(&pa));
        engine.observe_history("GBPUSD", &bars_from(&pb));

        let (r, _) = engine.compute_correlation("EURUSD", "GBPUSD", 20).unwrap();
        assert!((-1.0..=1.0).contains(&r));
        assert!(r > 0.99);

        let (self_r, _) = engine.compute_correlation("EURUSD", "EURUSD", 20).unwrap();
        assert_eq!(self_r, 1.0);
    }

    #[test]
    fn test_insufficient_data_is_an_error_not_zero() {
        let engine = CorrelationEngine::new(config());
        let (pa, pb) = driven_prices(5, 1.0);
        engine.observe_history("EURUSD", &bars_from(&pa));
        engine.observe_history("GBPUSD", &bars_from(&pb));

        let err = engine.compute_correlation("EURUSD", "GBPUSD", 20).unwrap_err();
        match err {
            Error::InsufficientData { have, need, .. } => {
                assert!(have < need);
            }
            other => panic!("expected InsufficientData, got {other:?}"),
        }
    }

    #[test]
    fn test_update_matrix_builds_entries_and_flags_significance() {
        let engine = CorrelationEngine::new(config());
        let (pa, pb) = driven_prices(61, 1.0);
        engine.observe_history("EURUSD", &bars_from(&pa));
        engine.observe_history("GBPUSD", &bars_from(&pb));

        let held = vec!["EURUSD".to_string(), "GBPUSD".to_string()];
        let update = engine.update_matrix(&held, None);
        assert_eq!(update.recomputed, 1);
        assert!(update.insufficient.is_empty());

        match engine.lookup("GBPUSD", "EURUSD") {
            CorrelationStatus::Known(entry) => {
                assert!(entry.coefficient > 0.9);
                assert!(entry.is_significant);
                assert!(entry.is_stable);
                assert_eq!(entry.sample_count, 20);
            }
            other => panic!("expected Known, got {other:?}"),
        }
    }

    #[test]
    fn test_update_matrix_reports_insufficient_pairs() {
        let engine = CorrelationEngine::new(config());
        let (pa, pb) = driven_prices(6, 1.0);
        engine.observe_history("EURUSD", &bars_from(&pa));
        engine.observe_history("GBPUSD", &bars_from(&pb));

        let held = vec!["EURUSD".to_string(), "GBPUSD".to_string()];
        let update = engine.update_matrix(&held, None);
        assert_eq!(update.recomputed, 0);
        assert_eq!(update.insufficient.len(), 1);
        assert!(matches!(
            engine.lookup("EURUSD", "GBPUSD"),
            CorrelationStatus::Insufficient { .. }
        ));
    }

    #[test]
    fn test_departed_pairs_are_evicted() {
        let engine = CorrelationEngine::new(config());
        let (pa, pb) = driven_prices(61, 1.0);
        let (pc, _) = driven_prices(61, -0.5);
        engine.observe_history("EURUSD", &bars_from(&pa));
        engine.observe_history("GBPUSD", &bars_from(&pb));
        engine.observe_history("USDJPY", &bars_from(&pc));

        let all = vec!["EURUSD".to_string(), "GBPUSD".to_string(), "USDJPY".to_string()];
        engine.update_matrix(&all, None);
        assert_eq!(engine.entries().len(), 3);

        let fewer = vec!["EURUSD".to_string(), "GBPUSD".to_string()];
        engine.update_matrix(&fewer, None);
        assert_eq!(engine.entries().len(), 1);
        assert!(matches!(
            engine.lookup("EURUSD", "USDJPY"),
            CorrelationStatus::Untracked
        ));
    }

    #[test]
    fn test_candidate_pairs_included_without_held_membership() {
        let engine = CorrelationEngine::new(config());
        let (pa, pb) = driven_prices(61, 1.0);
        engine.observe_history("EURUSD", &bars_from(&pa));
        engine.observe_history("AUDUSD", &bars_from(&pb));

        let held = vec!["EURUSD".to_string()];
        let update = engine.update_matrix(&held, Some("AUDUSD"));
        assert_eq!(update.recomputed, 1);
        assert!(matches!(
            engine.lookup("EURUSD", "AUDUSD"),
            CorrelationStatus::Known(_)
        ));
    }

    #[test]
    fn test_incremental_update_matches_fresh_engine() {
        let (pa, pb) = driven_prices(61, 0.8);
        let held = vec!["EURUSD".to_string(), "GBPUSD".to_string()];

        // Fed bar-by-bar with a matrix update per cycle.
        let incremental = CorrelationEngine::new(config());
        for k in 1..=pa.len() {
            incremental.observe_history("EURUSD", &bars_from(&pa[..k]));
            incremental.observe_history("GBPUSD", &bars_from(&pb[..k]));
            incremental.update_matrix(&held, None);
        }

        // Fed in one shot.
        let fresh = CorrelationEngine::new(config());
        fresh.observe_history("EURUSD", &bars_from(&pa));
        fresh.observe_history("GBPUSD", &bars_from(&pb));
        fresh.update_matrix(&held, None);

        let (a, b) = match (
            incremental.lookup("EURUSD", "GBPUSD"),
            fresh.lookup("EURUSD", "GBPUSD"),
        ) {
            (CorrelationStatus::Known(x), CorrelationStatus::Known(y)) => (x, y),
            other => panic!("expected Known entries, got {other:?}"),
        };
        assert!((a.coefficient - b.coefficient).abs() < 1e-9);
        assert_eq!(a.sample_count, b.sample_count);
    }

    #[test]
    fn test_significance_helper() {
        assert!(!significant(0.9, 2, 2.0));
        assert!(significant(0.9, 12, 2.0));
        assert!(!significant(0.1, 12, 2.0));
        assert!(significant(1.0, 10, 2.0));
    }
}
