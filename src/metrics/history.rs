//! Return history lookup used by the correlation guard.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::calculator::{MetricsCalculator, ReturnSeries};

/// Source of per-instrument return series.
pub trait ReturnHistory: Send + Sync {
    /// The most recent `lookback` returns for `key`, oldest first.
    ///
    /// `None` when no history is available for the key.
    fn returns(&self, key: &str, lookback: usize) -> Option<ReturnSeries>;
}

/// In-memory close-price history keyed by series name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceHistory {
    closes: HashMap<String, Vec<(DateTime<Utc>, f64)>>,
}

impl PriceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the closes stored for `key`.
    pub fn insert(&mut self, key: impl Into<String>, closes: Vec<(DateTime<Utc>, f64)>) {
        self.closes.insert(key.into(), closes);
    }
}

impl ReturnHistory for PriceHistory {
    fn returns(&self, key: &str, lookback: usize) -> Option<ReturnSeries> {
        let closes = self.closes.get(key)?;
        let returns = MetricsCalculator::simple_returns(closes);
        Some(MetricsCalculator::tail(&returns, lookback).to_vec())
    }
}
