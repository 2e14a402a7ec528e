//! Crisis-level state machine.
//!
//! Escalation is single-cycle: any entry condition of any higher level jumps
//! straight to the highest such level. De-escalation is debounced: every
//! metric must sit below the current level's exit thresholds (exit < entry,
//! the hysteresis band) for a configured number of consecutive cycles before
//! dropping one level.

use risk_core::config::{LevelTable, LevelThresholds};
use risk_core::types::{CrisisLevel, ProtectiveAction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Metrics the state machine evaluates each cycle, drawn from one mutually
/// consistent snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrisisInputs {
    pub drawdown_pct: Decimal,
    pub margin_level: Decimal,
    /// Largest cluster risk contribution this cycle.
    pub max_cluster_risk: f64,
    /// Externally computed volatility regime flag.
    pub volatility_spike: bool,
    /// Folded in from the external trade-outcome feed.
    pub consecutive_losses: u32,
    /// False when a feed failed this cycle; the machine holds state.
    pub data_healthy: bool,
}

/// A committed level change plus the destination's configured action list.
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: CrisisLevel,
    pub to: CrisisLevel,
    pub reason: String,
    pub actions: Vec<ProtectiveAction>,
}

impl Transition {
    pub fn is_escalation(&self) -> bool {
        self.to > self.from
    }
}

/// The only component allowed to mutate the crisis level, once per cycle.
#[derive(Debug)]
pub struct CrisisStateMachine {
    level: CrisisLevel,
    /// Consecutive cycles with every metric below the exit thresholds.
    calm_cycles: u32,
}

impl Default for CrisisStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CrisisStateMachine {
    pub fn new() -> Self {
        Self { level: CrisisLevel::Normal, calm_cycles: 0 }
    }

    pub fn level(&self) -> CrisisLevel {
        self.level
    }

    pub fn calm_cycles(&self) -> u32 {
        self.calm_cycles
    }

    /// Evaluate one cycle. Returns the transition committed this cycle, if
    /// any. Unhealthy data holds the current state untouched.
    pub fn evaluate(
        &mut self,
        inputs: &CrisisInputs,
        levels: &LevelTable,
        debounce_cycles: u32,
    ) -> Option<Transition> {
        if !inputs.data_healthy {
            warn!(level = %self.level, "Data unhealthy, crisis state retained");
            return None;
        }

        if let Some((target, reason)) = self.escalation_target(inputs, levels) {
            let from = self.level;
            self.level = target;
            self.calm_cycles = 0;
            info!(from = %from, to = %target, reason = %reason, "Crisis level escalated");
            return Some(Transition {
                from,
                to: target,
                reason,
                actions: destination_actions(levels, target),
            });
        }

        if self.level == CrisisLevel::Normal {
            return None;
        }

        let Some(current) = levels.get(self.level) else {
            return None;
        };
        if exit_clear(current, inputs) {
            self.calm_cycles += 1;
            if self.calm_cycles >= debounce_cycles {
                let from = self.level;
                let to = from.step_down();
                self.level = to;
                self.calm_cycles = 0;
                let reason = format!(
                    "metrics below {from} exit thresholds for {debounce_cycles} cycles"
                );
                info!(from = %from, to = %to, "Crisis level de-escalated");
                return Some(Transition {
                    from,
                    to,
                    reason,
                    actions: destination_actions(levels, to),
                });
            }
        } else {
            self.calm_cycles = 0;
        }

        None
    }

    // Highest level above current whose entry conditions hold. A volatility
    // spike alone forces at least Warning.
    fn escalation_target(
        &self,
        inputs: &CrisisInputs,
        levels: &LevelTable,
    ) -> Option<(CrisisLevel, String)> {
        let mut found: Option<(CrisisLevel, String)> = None;
        for (level, thresholds) in levels.entries() {
            if level <= self.level {
                continue;
            }
            if let Some(reason) = entry_reason(thresholds, inputs, level) {
                found = Some((level, reason));
            }
        }
        if found.is_none() && inputs.volatility_spike && self.level < CrisisLevel::Warning {
            found = Some((CrisisLevel::Warning, "volatility spike".to_string()));
        }
        found
    }
}

// First entry condition that holds for this level, rendered for the audit
// trail; None when the level is not entered.
fn entry_reason(
    t: &LevelThresholds,
    inputs: &CrisisInputs,
    level: CrisisLevel,
) -> Option<String> {
    if inputs.drawdown_pct >= t.drawdown_entry {
        return Some(format!(
            "drawdown {} >= {level} entry {}",
            inputs.drawdown_pct, t.drawdown_entry
        ));
    }
    if inputs.margin_level <= t.margin_entry {
        return Some(format!(
            "margin level {} <= {level} entry {}",
            inputs.margin_level, t.margin_entry
        ));
    }
    if inputs.max_cluster_risk >= t.cluster_entry {
        return Some(format!(
            "cluster risk {:.3} >= {level} entry {:.3}",
            inputs.max_cluster_risk, t.cluster_entry
        ));
    }
    if let Some(entry) = t.losses_entry {
        if inputs.consecutive_losses >= entry {
            return Some(format!(
                "{} consecutive losses >= {level} entry {entry}",
                inputs.consecutive_losses
            ));
        }
    }
    None
}

// A calm cycle: every metric strictly inside the exit band and no active
// volatility spike.
fn exit_clear(t: &LevelThresholds, inputs: &CrisisInputs) -> bool {
    if inputs.volatility_spike {
        return false;
    }
    if inputs.drawdown_pct >= t.drawdown_exit {
        return false;
    }
    if inputs.margin_level <= t.margin_exit {
        return false;
    }
    if inputs.max_cluster_risk >= t.cluster_exit {
        return false;
    }
    if let Some(exit) = t.losses_exit {
        if inputs.consecutive_losses > exit {
            return false;
        }
    }
    true
}

fn destination_actions(levels: &LevelTable, destination: CrisisLevel) -> Vec<ProtectiveAction> {
    levels
        .get(destination)
        .map(|t| t.actions.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use risk_core::config::RiskConfig;

    fn calm_inputs() -> CrisisInputs {
        CrisisInputs {
            drawdown_pct: Decimal::ZERO,
            margin_level: Decimal::new(50, 1),
            max_cluster_risk: 0.0,
            volatility_spike: false,
            consecutive_losses: 0,
            data_healthy: true,
        }
    }

    fn with_drawdown(pct_bp: i64) -> CrisisInputs {
        CrisisInputs { drawdown_pct: Decimal::new(pct_bp, 4), ..calm_inputs() }
    }

    fn levels() -> LevelTable {
        RiskConfig::default().levels
    }

    #[test]
    fn test_escalates_to_highest_matching_level_in_one_cycle() {
        let mut sm = CrisisStateMachine::new();
        // 22% drawdown crosses Warning (5%), Moderate (10%) and Severe (20%).
        let t = sm.evaluate(&with_drawdown(2200), &levels(), 3).unwrap();
        assert_eq!(t.from, CrisisLevel::Normal);
        assert_eq!(t.to, CrisisLevel::Severe);
        assert!(t.is_escalation());
        assert!(!t.actions.is_empty());
        assert_eq!(sm.level(), CrisisLevel::Severe);
    }

    #[test]
    fn test_margin_entry_escalates() {
        let mut sm = CrisisStateMachine::new();
        let inputs = CrisisInputs { margin_level: Decimal::new(14, 1), ..calm_inputs() };
        let t = sm.evaluate(&inputs, &levels(), 3).unwrap();
        // Margin 1.4 breaches Moderate entry (1.5) but not Severe (1.2).
        assert_eq!(t.to, CrisisLevel::Moderate);
        assert!(t.reason.contains("margin"));
    }

    #[test]
    fn test_cluster_risk_escalates() {
        let mut sm = CrisisStateMachine::new();
        let inputs = CrisisInputs { max_cluster_risk: 0.5, ..calm_inputs() };
        let t = sm.evaluate(&inputs, &levels(), 3).unwrap();
        assert_eq!(t.to, CrisisLevel::Moderate);
        assert!(t.reason.contains("cluster"));
    }

    #[test]
    fn test_volatility_spike_forces_warning() {
        let mut sm = CrisisStateMachine::new();
        let inputs = CrisisInputs { volatility_spike: true, ..calm_inputs() };
        let t = sm.evaluate(&inputs, &levels(), 3).unwrap();
        assert_eq!(t.to, CrisisLevel::Warning);
    }

    #[test]
    fn test_deescalation_requires_debounce() {
        let mut sm = CrisisStateMachine::new();
        sm.evaluate(&with_drawdown(600), &levels(), 2).unwrap(); // -> Warning

        // First calm cycle: no drop yet.
        assert!(sm.evaluate(&with_drawdown(100), &levels(), 2).is_none());
        assert_eq!(sm.level(), CrisisLevel::Warning);

        // Second consecutive calm cycle: drop exactly one level.
        let t = sm.evaluate(&with_drawdown(100), &levels(), 2).unwrap();
        assert_eq!(t.from, CrisisLevel::Warning);
        assert_eq!(t.to, CrisisLevel::Normal);
    }

    #[test]
    fn test_calm_counter_resets_on_noisy_reading() {
        let mut sm = CrisisStateMachine::new();
        sm.evaluate(&with_drawdown(600), &levels(), 2).unwrap(); // -> Warning

        assert!(sm.evaluate(&with_drawdown(100), &levels(), 2).is_none());
        // Back above the exit threshold (3%): counter resets.
        assert!(sm.evaluate(&with_drawdown(400), &levels(), 2).is_none());
        assert_eq!(sm.calm_cycles(), 0);
        // Needs two fresh calm cycles again.
        assert!(sm.evaluate(&with_drawdown(100), &levels(), 2).is_none());
        let t = sm.evaluate(&with_drawdown(100), &levels(), 2).unwrap();
        assert_eq!(t.to, CrisisLevel::Normal);
    }

    #[test]
    fn test_hysteresis_band_prevents_oscillation() {
        let mut sm = CrisisStateMachine::new();
        sm.evaluate(&with_drawdown(600), &levels(), 2).unwrap(); // -> Warning

        // Oscillating between 4% and 6%: inside the band (exit 3%, entry 5%)
        // readings are not calm, and 6% is not above Warning, so the level
        // never changes.
        for pct in [400, 600, 400, 600, 400, 600] {
            assert!(sm.evaluate(&with_drawdown(pct), &levels(), 2).is_none());
            assert_eq!(sm.level(), CrisisLevel::Warning);
        }
    }

    #[test]
    fn test_unhealthy_data_holds_state() {
        let mut sm = CrisisStateMachine::new();
        sm.evaluate(&with_drawdown(1200), &levels(), 2).unwrap(); // -> Moderate

        let inputs = CrisisInputs { data_healthy: false, ..with_drawdown(0) };
        for _ in 0..5 {
            assert!(sm.evaluate(&inputs, &levels(), 2).is_none());
        }
        assert_eq!(sm.level(), CrisisLevel::Moderate);
        assert_eq!(sm.calm_cycles(), 0);
    }

    #[test]
    fn test_full_walk_up_and_debounced_walk_down() {
        // Warning entry 5%/exit 3%, Moderate entry 10%/exit 7%, debounce 2.
        let mut sm = CrisisStateMachine::new();
        let table = levels();

        assert!(sm.evaluate(&with_drawdown(400), &table, 2).is_none());
        assert_eq!(sm.level(), CrisisLevel::Normal);

        let t = sm.evaluate(&with_drawdown(600), &table, 2).unwrap();
        assert_eq!(t.to, CrisisLevel::Warning);

        let t = sm.evaluate(&with_drawdown(1100), &table, 2).unwrap();
        assert_eq!(t.to, CrisisLevel::Moderate);

        // 8% is below Moderate entry but above its 7% exit: no change.
        assert!(sm.evaluate(&with_drawdown(800), &table, 2).is_none());
        assert_eq!(sm.level(), CrisisLevel::Moderate);

        // Two consecutive 4% readings drop back to Warning, not further.
        assert!(sm.evaluate(&with_drawdown(400), &table, 2).is_none());
        let t = sm.evaluate(&with_drawdown(400), &table, 2).unwrap();
        assert_eq!(t.from, CrisisLevel::Moderate);
        assert_eq!(t.to, CrisisLevel::Warning);
        assert_eq!(sm.level(), CrisisLevel::Warning);
    }

    #[test]
    fn test_losses_entry_escalates_when_configured() {
        let mut sm = CrisisStateMachine::new();
        let inputs = CrisisInputs { consecutive_losses: 7, ..calm_inputs() };
        let t = sm.evaluate(&inputs, &levels(), 2).unwrap();
        // 7 losses crosses Warning (4) and Moderate (6) but not Severe (8).
        assert_eq!(t.to, CrisisLevel::Moderate);
        assert!(t.reason.contains("losses"));
    }
}
