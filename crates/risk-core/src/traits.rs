//! External-interface traits: market data, account state, execution gateway,
//! and the pluggable hedge-instrument resolver.
//!
//! The engine owns none of these; implementations are injected and every
//! read happens once per evaluation cycle.

use crate::types::{AccountSnapshot, Direction, Position, PriceBar};
use crate::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Ordered price history per instrument.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Most recent `count` bars, oldest first. Fewer bars than requested is
    /// not an error; the correlation engine reports `InsufficientData` when
    /// the sample floor is unmet.
    async fn get_history(&self, instrument: &str, count: usize) -> Result<Vec<PriceBar>>;
}

/// Equity/balance/margin snapshot provider.
#[async_trait]
pub trait AccountStateProvider: Send + Sync {
    async fn account_snapshot(&self) -> Result<AccountSnapshot>;
}

/// Order-issuing surface of the execution layer. The engine issues close,
/// reduce and open instructions and never tracks fills itself.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    async fn list_open_positions(&self) -> Result<Vec<Position>>;

    async fn close_position(&self, id: Uuid) -> Result<()>;

    /// Reduce a position by `fraction` of its current size (0 < fraction < 1).
    async fn reduce_position(&self, id: Uuid, fraction: Decimal) -> Result<()>;

    async fn open_position(
        &self,
        instrument: &str,
        direction: Direction,
        size: Decimal,
    ) -> Result<Uuid>;
}

/// Concrete hedge order the resolver asks the executor to place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HedgeInstruction {
    pub instrument: String,
    pub direction: Direction,
    pub size: Decimal,
}

/// Maps a concentrated net currency exposure to an offsetting instrument.
///
/// Pluggable so hedge choices stay policy, not code; returning `None` means
/// no hedge vehicle exists for that currency and the exposure is left alone.
pub trait HedgeInstrumentResolver: Send + Sync {
    fn resolve(&self, currency: &str, net_exposure: Decimal) -> Option<HedgeInstruction>;
}
