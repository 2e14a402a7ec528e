//! Price history types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::warn;

/// A single close bar for an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub close: Decimal,
}

impl PriceBar {
    pub fn new(timestamp: DateTime<Utc>, close: Decimal) -> Self {
        Self { timestamp, close }
    }
}

/// Bounded, time-ordered ring buffer of close bars for one instrument.
///
/// Capacity equals the maximum configured lookback window; pushing beyond it
/// evicts the oldest bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSeries {
    instrument: String,
    capacity: usize,
    bars: VecDeque<PriceBar>,
}

impl PriceSeries {
    pub fn new(instrument: impl Into<String>, capacity: usize) -> Self {
        Self {
            instrument: instrument.into(),
            capacity,
            bars: VecDeque::with_capacity(capacity),
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Append a bar, evicting the oldest beyond capacity.
    ///
    /// Bars must arrive in strictly increasing timestamp order; out-of-order
    /// or duplicate bars are dropped and `false` is returned.
    pub fn push(&mut self, bar: PriceBar) -> bool {
        if let Some(last) = self.bars.back() {
            if bar.timestamp <= last.timestamp {
                warn!(
                    instrument = %self.instrument,
                    last = %last.timestamp,
                    incoming = %bar.timestamp,
                    "Dropping out-of-order price bar"
                );
                return false;
            }
        }
        if self.bars.len() == self.capacity {
            self.bars.pop_front();
        }
        self.bars.push_back(bar);
        true
    }

    /// Replace the whole buffer with an already-ordered history slice.
    pub fn replace(&mut self, bars: impl IntoIterator<Item = PriceBar>) {
        self.bars.clear();
        for bar in bars {
            self.push(bar);
        }
    }

    pub fn latest(&self) -> Option<&PriceBar> {
        self.bars.back()
    }

    pub fn bars(&self) -> impl Iterator<Item = &PriceBar> {
        self.bars.iter()
    }

    /// The most recent `n` closes, oldest first.
    pub fn recent_closes(&self, n: usize) -> Vec<Decimal> {
        let skip = self.bars.len().saturating_sub(n);
        self.bars.iter().skip(skip).map(|b| b.close).collect()
    }
}
