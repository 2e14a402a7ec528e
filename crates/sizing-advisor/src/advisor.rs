//! Correlation-aware position sizing.
//!
//! Every proposed position is scaled down once per significantly correlated
//! holding, with the per-counterpart multipliers compounding, then scaled by
//! the global crisis factor. A hard exposure gate rejects candidates that
//! would concentrate too much equity in near-identical exposure regardless
//! of how small the compounded multiplier already is.

use correlation_engine::{CorrelationEngine, CorrelationStatus};
use risk_core::alerts::{AlertBook, AlertKind, AlertSeverity};
use risk_core::config::SizingConfig;
use risk_core::types::{CrisisLevel, Direction, Position};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A position the caller would like to open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeRequest {
    pub instrument: String,
    pub direction: Direction,
    pub proposed_size: Decimal,
    /// Notional exposure the position would add at the proposed size.
    pub notional_exposure: Decimal,
}

/// One counterpart that contributed a haircut to the final multiplier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedTier {
    pub instrument: String,
    pub abs_correlation: f64,
    pub multiplier: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum SizingDecision {
    Approved {
        adjusted_size: Decimal,
        /// Compounded counterpart multipliers times the crisis factor.
        multiplier: Decimal,
    },
    Rejected {
        reason: String,
    },
}

/// Full advice for one request, including what could not be assessed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingAdvice {
    pub decision: SizingDecision,
    /// The single factor that cut the size the most, when any did.
    pub dominant_reason: Option<String>,
    /// Haircuts applied, one per correlated counterpart instrument.
    pub applied_tiers: Vec<AppliedTier>,
    /// Held instruments whose correlation with the candidate is unknown
    /// (insufficient samples or untracked). No penalty is applied for these,
    /// but callers should treat the advice as correspondingly weaker.
    pub unknown_counterparts: Vec<String>,
}

pub struct SizingAdvisor {
    config: SizingConfig,
    alerts: Arc<AlertBook>,
}

impl SizingAdvisor {
    pub fn new(config: SizingConfig, alerts: Arc<AlertBook>) -> Self {
        Self { config, alerts }
    }

    /// Advise on one proposed position against the current holdings.
    ///
    /// `trading_suspended` is the executor's restriction latch; a suspended
    /// book rejects every candidate outright.
    pub fn advise(
        &self,
        request: &SizeRequest,
        held: &[Position],
        correlations: &CorrelationEngine,
        crisis: CrisisLevel,
        equity: Decimal,
        trading_suspended: bool,
    ) -> SizingAdvice {
        if trading_suspended {
            return self.reject(request, "trading is suspended".to_string());
        }

        let crisis_factor = crisis.size_factor();
        if crisis_factor.is_zero() {
            return self.reject(request, format!("crisis level {crisis} blocks new positions"));
        }

        // Aggregate exposure per held instrument; tiers apply once per
        // instrument, not once per position row.
        let mut exposure_by_instrument: BTreeMap<&str, Decimal> = BTreeMap::new();
        for position in held {
            *exposure_by_instrument
                .entry(position.instrument.as_str())
                .or_insert(Decimal::ZERO) += position.notional_exposure;
        }

        let mut applied_tiers = Vec::new();
        let mut unknown_counterparts = Vec::new();
        let mut gated_exposure = request.notional_exposure;
        let mut multiplier = crisis_factor;

        for (instrument, exposure) in &exposure_by_instrument {
            let (abs_r, significant) = if *instrument == request.instrument {
                // Adding to an existing instrument is perfect correlation.
                (1.0, true)
            } else {
                match correlations.lookup(&request.instrument, instrument) {
                    CorrelationStatus::Known(entry) => {
                        (entry.coefficient.abs(), entry.is_significant)
                    }
                    CorrelationStatus::Insufficient { have, need } => {
                        debug!(
                            candidate = %request.instrument,
                            counterpart = %instrument,
                            have,
                            need,
                            "Correlation unknown, skipping counterpart"
                        );
                        unknown_counterparts.push((*instrument).to_string());
                        continue;
                    }
                    CorrelationStatus::Untracked => {
                        unknown_counterparts.push((*instrument).to_string());
                        continue;
                    }
                }
            };

            // The hard gate counts every known coefficient; only the
            // haircut waits for statistical significance.
            if abs_r >= self.config.hard_gate_correlation {
                gated_exposure += *exposure;
            }
            if !significant {
                continue;
            }
            if let Some(tier_multiplier) = self.tier_multiplier(abs_r) {
                multiplier *= tier_multiplier;
                applied_tiers.push(AppliedTier {
                    instrument: (*instrument).to_string(),
                    abs_correlation: abs_r,
                    multiplier: tier_multiplier,
                });
            }
        }

        let exposure_limit = equity * self.config.max_correlated_exposure_pct;
        if gated_exposure > exposure_limit {
            return self.reject(
                request,
                format!(
                    "correlated exposure {gated_exposure} would exceed limit {exposure_limit}"
                ),
            );
        }

        let adjusted_size = request.proposed_size * multiplier;
        let dominant_reason = dominant_reason(crisis, crisis_factor, &applied_tiers);
        debug!(
            instrument = %request.instrument,
            %multiplier,
            %adjusted_size,
            haircuts = applied_tiers.len(),
            "Sizing advice computed"
        );
        SizingAdvice {
            decision: SizingDecision::Approved { adjusted_size, multiplier },
            dominant_reason,
            applied_tiers,
            unknown_counterparts,
        }
    }

    /// First tier whose bound the correlation reaches; tiers are sorted by
    /// descending bound, so this is the tightest applicable haircut.
    fn tier_multiplier(&self, abs_r: f64) -> Option<Decimal> {
        self.config
            .tiers
            .iter()
            .find(|tier| abs_r >= tier.min_abs_correlation)
            .map(|tier| tier.multiplier)
    }

    fn reject(&self, request: &SizeRequest, reason: String) -> SizingAdvice {
        warn!(instrument = %request.instrument, reason = %reason, "Sizing request rejected");
        self.alerts.raise(
            AlertKind::SizingRejection,
            Some(request.instrument.clone()),
            AlertSeverity::Warning,
            reason.clone(),
        );
        SizingAdvice {
            dominant_reason: Some(reason.clone()),
            decision: SizingDecision::Rejected { reason },
            applied_tiers: Vec::new(),
            unknown_counterparts: Vec::new(),
        }
    }
}

// Whichever single factor cut the size the most.
fn dominant_reason(
    crisis: CrisisLevel,
    crisis_factor: Decimal,
    applied_tiers: &[AppliedTier],
) -> Option<String> {
    let mut reason = None;
    let mut smallest = Decimal::ONE;
    if crisis_factor < smallest {
        smallest = crisis_factor;
        reason = Some(format!("crisis level {crisis} scales size by {crisis_factor}"));
    }
    for tier in applied_tiers {
        if tier.multiplier < smallest {
            smallest = tier.multiplier;
            reason = Some(format!(
                "correlation {:.2} with held {}",
                tier.abs_correlation, tier.instrument
            ));
        }
    }
    reason
}
