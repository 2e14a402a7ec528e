//! Ordered crisis escalation levels.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discrete risk-escalation state, totally ordered.
///
/// Only the crisis state machine mutates the current level, once per
/// evaluation cycle; everything else reads it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum CrisisLevel {
    #[default]
    Normal,
    Warning,
    Moderate,
    Severe,
    Critical,
}

impl CrisisLevel {
    /// All levels in ascending severity.
    pub const ALL: [CrisisLevel; 5] = [
        CrisisLevel::Normal,
        CrisisLevel::Warning,
        CrisisLevel::Moderate,
        CrisisLevel::Severe,
        CrisisLevel::Critical,
    ];

    /// Levels strictly above this one, ascending.
    pub fn above(&self) -> impl Iterator<Item = CrisisLevel> + '_ {
        Self::ALL.iter().copied().filter(move |l| l > self)
    }

    /// One level calmer; Normal stays Normal.
    pub fn step_down(&self) -> CrisisLevel {
        match self {
            CrisisLevel::Normal | CrisisLevel::Warning => CrisisLevel::Normal,
            CrisisLevel::Moderate => CrisisLevel::Warning,
            CrisisLevel::Severe => CrisisLevel::Moderate,
            CrisisLevel::Critical => CrisisLevel::Severe,
        }
    }

    /// Global multiplier applied to any newly proposed position size.
    /// Critical disallows new positions entirely.
    pub fn size_factor(&self) -> Decimal {
        match self {
            CrisisLevel::Normal => Decimal::ONE,
            CrisisLevel::Warning => Decimal::new(75, 2),
            CrisisLevel::Moderate => Decimal::new(50, 2),
            CrisisLevel::Severe => Decimal::new(25, 2),
            CrisisLevel::Critical => Decimal::ZERO,
        }
    }
}

impl fmt::Display for CrisisLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CrisisLevel::Normal => "normal",
            CrisisLevel::Warning => "warning",
            CrisisLevel::Moderate => "moderate",
            CrisisLevel::Severe => "severe",
            CrisisLevel::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_order() {
        assert!(CrisisLevel::Normal < CrisisLevel::Warning);
        assert!(CrisisLevel::Warning < CrisisLevel::Moderate);
        assert!(CrisisLevel::Moderate < CrisisLevel::Severe);
        assert!(CrisisLevel::Severe < CrisisLevel::Critical);
    }

    #[test]
    fn test_step_down_bottoms_out_at_normal() {
        assert_eq!(CrisisLevel::Critical.step_down(), CrisisLevel::Severe);
        assert_eq!(CrisisLevel::Normal.step_down(), CrisisLevel::Normal);
    }

    #[test]
    fn test_size_factor_monotone() {
        let factors: Vec<_> = CrisisLevel::ALL.iter().map(|l| l.size_factor()).collect();
        assert!(factors.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(CrisisLevel::Critical.size_factor(), Decimal::ZERO);
    }

    #[test]
    fn test_above_iterates_ascending() {
        let above: Vec<_> = CrisisLevel::Warning.above().collect();
        assert_eq!(
            above,
            vec![CrisisLevel::Moderate, CrisisLevel::Severe, CrisisLevel::Critical]
        );
    }
}
