//! Open-position view owned by the execution gateway.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short.
    pub fn sign(&self) -> Decimal {
        match self {
            Direction::Long => Decimal::ONE,
            Direction::Short => -Decimal::ONE,
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

/// Read-only snapshot of an open position.
///
/// The execution gateway owns the authoritative state; the risk engine only
/// ever reads these within a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub instrument: String,
    pub direction: Direction,
    pub size: Decimal,
    pub notional_exposure: Decimal,
    pub unrealized_pnl: Decimal,
    pub open_time: DateTime<Utc>,
}

impl Position {
    pub fn new(
        instrument: impl Into<String>,
        direction: Direction,
        size: Decimal,
        notional_exposure: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            instrument: instrument.into(),
            direction,
            size,
            notional_exposure,
            unrealized_pnl: Decimal::ZERO,
            open_time: Utc::now(),
        }
    }

    pub fn with_pnl(mut self, unrealized_pnl: Decimal) -> Self {
        self.unrealized_pnl = unrealized_pnl;
        self
    }

    pub fn is_losing(&self) -> bool {
        self.unrealized_pnl < Decimal::ZERO
    }

    /// Notional exposure signed by direction.
    pub fn signed_exposure(&self) -> Decimal {
        self.direction.sign() * self.notional_exposure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_exposure() {
        let long = Position::new("EURUSD", Direction::Long, Decimal::ONE, Decimal::new(1000, 0));
        let short = Position::new("EURUSD", Direction::Short, Decimal::ONE, Decimal::new(1000, 0));
        assert_eq!(long.signed_exposure(), Decimal::new(1000, 0));
        assert_eq!(short.signed_exposure(), Decimal::new(-1000, 0));
    }

    #[test]
    fn test_is_losing() {
        let p = Position::new("EURUSD", Direction::Long, Decimal::ONE, Decimal::new(1000, 0));
        assert!(!p.is_losing());
        assert!(p.with_pnl(Decimal::new(-5, 0)).is_losing());
    }
}
