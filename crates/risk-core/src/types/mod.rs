//! Shared data model for the risk control engine.

pub mod account;
pub mod action;
pub mod crisis;
pub mod market;
pub mod position;

pub use account::{AccountSnapshot, EquitySample};
pub use action::{ActionOutcome, ProtectiveAction, ProtectiveActionRecord};
pub use crisis::CrisisLevel;
pub use market::{PriceBar, PriceSeries};
pub use position::{Direction, Position};
