//! Open positions and candidate trades as seen by the decision core.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Direction;

/// Read-only snapshot of a position held by the execution layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    /// Instrument symbol (e.g. "EURUSD")
    pub instrument: String,

    /// Side of the position
    pub direction: Direction,

    /// Fraction of balance risked at entry
    #[serde(default)]
    pub entry_risk_pct: Decimal,

    /// Key of the return series to correlate against; defaults to the instrument
    #[serde(default)]
    pub return_series_ref: Option<String>,
}

impl OpenPosition {
    pub fn new(instrument: impl Into<String>, direction: Direction) -> Self {
        Self {
            instrument: instrument.into(),
            direction,
            entry_risk_pct: Decimal::ZERO,
            return_series_ref: None,
        }
    }

    /// Key used to fetch this position's return history.
    pub fn series_key(&self) -> &str {
        self.return_series_ref
            .as_deref()
            .unwrap_or(self.instrument.as_str())
    }
}

/// A trade the core is considering opening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateTrade {
    pub instrument: String,
    pub direction: Direction,
}

impl CandidateTrade {
    pub fn new(instrument: impl Into<String>, direction: Direction) -> Self {
        Self {
            instrument: instrument.into(),
            direction,
        }
    }
}
