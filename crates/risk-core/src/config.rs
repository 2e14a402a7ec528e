//! Configuration for the risk control engine.
//!
//! Loaded once and snapshotted per evaluation cycle; every threshold the
//! components compare against lives here. Validation runs at load time and
//! rejects malformed threshold ordering before the evaluation loop starts.

use crate::types::{CrisisLevel, ProtectiveAction};
use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration snapshot, immutable per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub correlation: CorrelationConfig,
    pub levels: LevelTable,
    /// Consecutive calm cycles required before de-escalating one level.
    pub debounce_cycles: u32,
    pub sizing: SizingConfig,
    pub hedge: HedgeConfig,
    pub rate_limit: RateLimitConfig,
    /// Consecutive skipped cycles (feed outage) before a connectivity alert.
    pub max_consecutive_skips: u32,
    /// Closed drawdown periods retained for statistics.
    pub drawdown_history: usize,
}

/// Windows and bounds for the correlation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Short rolling window W, in return samples.
    pub short_window: usize,
    /// Long rolling window L > W, used for the stability check.
    pub long_window: usize,
    /// Minimum valid return pairs before a coefficient is reported.
    pub min_samples: usize,
    /// t-statistic bound for the approximate significance flag.
    pub significance_t: f64,
    /// |corr(W) - corr(L)| below this marks the pair stable.
    pub stability_tolerance: f64,
    /// Pairwise correlation at or above this chains instruments into a cluster.
    pub cluster_threshold: f64,
}

impl CorrelationConfig {
    /// Price bars needed to cover the long window of returns.
    pub fn price_capacity(&self) -> usize {
        self.long_window + 1
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            short_window: 20,
            long_window: 60,
            min_samples: 10,
            significance_t: 2.0,
            stability_tolerance: 0.25,
            cluster_threshold: 0.7,
        }
    }
}

/// Entry/exit thresholds and action list for one crisis level.
///
/// Entry thresholds are strictly tighter than exits, creating the hysteresis
/// band the debounced de-escalation moves through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelThresholds {
    /// Escalate when drawdown >= this.
    pub drawdown_entry: Decimal,
    /// A calm cycle requires drawdown to be below this (exit < entry).
    pub drawdown_exit: Decimal,
    /// Escalate when margin level <= this.
    pub margin_entry: Decimal,
    /// A calm cycle requires margin level above this (exit > entry).
    pub margin_exit: Decimal,
    /// Escalate when the max cluster risk contribution >= this.
    pub cluster_entry: f64,
    /// A calm cycle requires cluster risk below this (exit < entry).
    pub cluster_exit: f64,
    /// Escalate when consecutive losses >= this, if set.
    pub losses_entry: Option<u32>,
    /// A calm cycle requires consecutive losses <= this, if set.
    pub losses_exit: Option<u32>,
    /// Ordered actions emitted when this level becomes the destination.
    pub actions: Vec<ProtectiveAction>,
}

/// Thresholds for every level above Normal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelTable {
    pub warning: LevelThresholds,
    pub moderate: LevelThresholds,
    pub severe: LevelThresholds,
    pub critical: LevelThresholds,
}

impl LevelTable {
    /// Thresholds for a level; Normal has none.
    pub fn get(&self, level: CrisisLevel) -> Option<&LevelThresholds> {
        match level {
            CrisisLevel::Normal => None,
            CrisisLevel::Warning => Some(&self.warning),
            CrisisLevel::Moderate => Some(&self.moderate),
            CrisisLevel::Severe => Some(&self.severe),
            CrisisLevel::Critical => Some(&self.critical),
        }
    }

    /// (level, thresholds) pairs in ascending severity.
    pub fn entries(&self) -> [(CrisisLevel, &LevelThresholds); 4] {
        [
            (CrisisLevel::Warning, &self.warning),
            (CrisisLevel::Moderate, &self.moderate),
            (CrisisLevel::Severe, &self.severe),
            (CrisisLevel::Critical, &self.critical),
        ]
    }
}

impl Default for LevelTable {
    // Illustrative defaults; production values come from configuration.
    fn default() -> Self {
        Self {
            warning: LevelThresholds {
                drawdown_entry: Decimal::new(5, 2),
                drawdown_exit: Decimal::new(3, 2),
                margin_entry: Decimal::new(20, 1),
                margin_exit: Decimal::new(25, 1),
                cluster_entry: 0.30,
                cluster_exit: 0.20,
                losses_entry: Some(4),
                losses_exit: Some(2),
                actions: vec![ProtectiveAction::Alert],
            },
            moderate: LevelThresholds {
                drawdown_entry: Decimal::new(10, 2),
                drawdown_exit: Decimal::new(7, 2),
                margin_entry: Decimal::new(15, 1),
                margin_exit: Decimal::new(20, 1),
                cluster_entry: 0.45,
                cluster_exit: 0.35,
                losses_entry: Some(6),
                losses_exit: Some(4),
                actions: vec![
                    ProtectiveAction::ReduceSizes { fraction: Decimal::new(25, 2) },
                    ProtectiveAction::TightenStops,
                ],
            },
            severe: LevelThresholds {
                drawdown_entry: Decimal::new(20, 2),
                drawdown_exit: Decimal::new(15, 2),
                margin_entry: Decimal::new(12, 1),
                margin_exit: Decimal::new(15, 1),
                cluster_entry: 0.60,
                cluster_exit: 0.50,
                losses_entry: Some(8),
                losses_exit: Some(6),
                actions: vec![
                    ProtectiveAction::CloseLosingOnly,
                    ProtectiveAction::ReduceSizes { fraction: Decimal::new(50, 2) },
                    ProtectiveAction::EmergencyHedge,
                ],
            },
            critical: LevelThresholds {
                drawdown_entry: Decimal::new(40, 2),
                drawdown_exit: Decimal::new(30, 2),
                margin_entry: Decimal::new(105, 2),
                margin_exit: Decimal::new(12, 1),
                cluster_entry: 0.75,
                cluster_exit: 0.65,
                losses_entry: None,
                losses_exit: None,
                actions: vec![
                    ProtectiveAction::CloseAll,
                    ProtectiveAction::RestrictTrading { minutes: 24 * 60 },
                ],
            },
        }
    }
}

/// One correlation tier for the sizing advisor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SizingTier {
    pub min_abs_correlation: f64,
    pub multiplier: Decimal,
}

/// Sizing advisor knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Tiers sorted by descending correlation bound; the first match applies
    /// per correlated counterpart and matches compound multiplicatively.
    pub tiers: Vec<SizingTier>,
    /// Correlation at or above which the hard exposure gate applies.
    pub hard_gate_correlation: f64,
    /// Combined exposure of candidate + >=hard-gate-correlated positions may
    /// not exceed this fraction of equity.
    pub max_correlated_exposure_pct: Decimal,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                SizingTier { min_abs_correlation: 0.8, multiplier: Decimal::new(50, 2) },
                SizingTier { min_abs_correlation: 0.6, multiplier: Decimal::new(70, 2) },
                SizingTier { min_abs_correlation: 0.4, multiplier: Decimal::new(90, 2) },
            ],
            hard_gate_correlation: 0.9,
            max_correlated_exposure_pct: Decimal::new(30, 2),
        }
    }
}

/// Emergency hedge sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HedgeConfig {
    /// Net currency exposure above this fraction of equity triggers a hedge.
    pub trigger_equity_fraction: Decimal,
}

impl Default for HedgeConfig {
    fn default() -> Self {
        Self { trigger_equity_fraction: Decimal::new(50, 2) }
    }
}

/// Throttle for emergency actions, guarding against runaway liquidation
/// driven by noisy inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum emergency actions per rolling 24 hours.
    pub max_actions_per_day: u32,
    /// Minimum minutes between emergency actions.
    pub cooldown_minutes: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { max_actions_per_day: 10, cooldown_minutes: 5 }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            correlation: CorrelationConfig::default(),
            levels: LevelTable::default(),
            debounce_cycles: 3,
            sizing: SizingConfig::default(),
            hedge: HedgeConfig::default(),
            rate_limit: RateLimitConfig::default(),
            max_consecutive_skips: 3,
            drawdown_history: 100,
        }
    }
}

impl RiskConfig {
    /// Load from an optional file layered under `RISKGUARD_*` env overrides,
    /// then validate. Fails fast so the evaluation loop never starts on a
    /// malformed threshold table.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let cfg: Self = builder
            .add_source(config::Environment::with_prefix("RISKGUARD").separator("__"))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.correlation;
        if c.long_window <= c.short_window {
            return Err(config_err(format!(
                "long_window ({}) must exceed short_window ({})",
                c.long_window, c.short_window
            )));
        }
        if c.min_samples < 3 || c.min_samples > c.short_window {
            return Err(config_err(format!(
                "min_samples ({}) must be in [3, short_window]",
                c.min_samples
            )));
        }
        if !(0.0..=1.0).contains(&c.cluster_threshold) || c.cluster_threshold == 0.0 {
            return Err(config_err("cluster_threshold must be in (0, 1]"));
        }
        if c.stability_tolerance <= 0.0 {
            return Err(config_err("stability_tolerance must be positive"));
        }

        if self.debounce_cycles == 0 {
            return Err(config_err("debounce_cycles must be at least 1"));
        }

        let entries = self.levels.entries();
        for (level, t) in entries {
            self.validate_level(level, t)?;
        }
        // Entry thresholds must tighten monotonically with severity.
        for pair in entries.windows(2) {
            let (lo_level, lo) = pair[0];
            let (hi_level, hi) = pair[1];
            if hi.drawdown_entry <= lo.drawdown_entry {
                return Err(config_err(format!(
                    "{hi_level} drawdown entry must exceed {lo_level} entry"
                )));
            }
            if hi.margin_entry >= lo.margin_entry {
                return Err(config_err(format!(
                    "{hi_level} margin entry must be below {lo_level} entry"
                )));
            }
            if hi.cluster_entry <= lo.cluster_entry {
                return Err(config_err(format!(
                    "{hi_level} cluster entry must exceed {lo_level} entry"
                )));
            }
        }

        let s = &self.sizing;
        if !(0.0..=1.0).contains(&s.hard_gate_correlation) || s.hard_gate_correlation == 0.0 {
            return Err(config_err("hard_gate_correlation must be in (0, 1]"));
        }
        if s.max_correlated_exposure_pct <= Decimal::ZERO {
            return Err(config_err("max_correlated_exposure_pct must be positive"));
        }
        for pair in s.tiers.windows(2) {
            if pair[1].min_abs_correlation >= pair[0].min_abs_correlation {
                return Err(config_err("sizing tiers must be sorted by descending correlation"));
            }
        }
        for tier in &s.tiers {
            if tier.multiplier <= Decimal::ZERO || tier.multiplier > Decimal::ONE {
                return Err(config_err("sizing tier multipliers must be in (0, 1]"));
            }
        }

        if self.hedge.trigger_equity_fraction <= Decimal::ZERO {
            return Err(config_err("hedge trigger_equity_fraction must be positive"));
        }
        if self.rate_limit.max_actions_per_day == 0 {
            return Err(config_err("max_actions_per_day must be at least 1"));
        }
        if self.rate_limit.cooldown_minutes < 0 {
            return Err(config_err("cooldown_minutes must not be negative"));
        }
        if self.drawdown_history == 0 {
            return Err(config_err("drawdown_history must be at least 1"));
        }

        Ok(())
    }

    fn validate_level(&self, level: CrisisLevel, t: &LevelThresholds) -> Result<()> {
        if t.drawdown_exit >= t.drawdown_entry {
            return Err(config_err(format!(
                "{level}: drawdown exit ({}) must be below entry ({})",
                t.drawdown_exit, t.drawdown_entry
            )));
        }
        if t.margin_exit <= t.margin_entry {
            return Err(config_err(format!(
                "{level}: margin exit ({}) must be above entry ({})",
                t.margin_exit, t.margin_entry
            )));
        }
        if t.cluster_exit >= t.cluster_entry {
            return Err(config_err(format!(
                "{level}: cluster exit ({}) must be below entry ({})",
                t.cluster_exit, t.cluster_entry
            )));
        }
        if let (Some(entry), Some(exit)) = (t.losses_entry, t.losses_exit) {
            if exit >= entry {
                return Err(config_err(format!(
                    "{level}: losses exit ({exit}) must be below entry ({entry})"
                )));
            }
        }
        for action in &t.actions {
            match action {
                ProtectiveAction::ReduceSizes { fraction } => {
                    if *fraction <= Decimal::ZERO || *fraction >= Decimal::ONE {
                        return Err(config_err(format!(
                            "{level}: reduce_sizes fraction must be in (0, 1)"
                        )));
                    }
                }
                ProtectiveAction::RestrictTrading { minutes } => {
                    if *minutes <= 0 {
                        return Err(config_err(format!(
                            "{level}: restrict_trading minutes must be positive"
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn config_err(message: impl Into<String>) -> Error {
    Error::Config { message: message.into() }
}
