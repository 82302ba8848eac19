//! Feature window supplied by the data feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// One bar with price and precomputed indicators.
///
/// Indicator fields are optional: a strategy declares what it needs and
/// abstains when a field is missing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub open: f64,
    #[serde(default)]
    pub high: f64,
    #[serde(default)]
    pub low: f64,
    pub close: f64,

    #[serde(default)]
    pub ema_20: Option<f64>,
    #[serde(default)]
    pub ema_50: Option<f64>,
    #[serde(default)]
    pub ema_200: Option<f64>,
    #[serde(default)]
    pub rsi: Option<f64>,
    #[serde(default)]
    pub macd: Option<f64>,
    #[serde(default)]
    pub macd_signal: Option<f64>,
    #[serde(default)]
    pub atr: Option<f64>,
    #[serde(default)]
    pub adx: Option<f64>,
    #[serde(default)]
    pub bb_upper: Option<f64>,
    #[serde(default)]
    pub bb_lower: Option<f64>,
    #[serde(default)]
    pub z_score: Option<f64>,
    #[serde(default)]
    pub volatility_20: Option<f64>,
}

impl Bar {
    pub fn new(timestamp: DateTime<Utc>, close: f64) -> Self {
        Self {
            timestamp,
            open: close,
            high: close,
            low: close,
            close,
            ..Default::default()
        }
    }
}

/// Read a required indicator, failing with the field name when absent.
pub fn require(value: Option<f64>, field: &'static str) -> EngineResult<f64> {
    match value {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(EngineError::MissingFeature { field }),
    }
}

/// Ordered (oldest first) sequence of bars for one instrument.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Bar>", into = "Vec<Bar>")]
pub struct FeatureWindow {
    bars: Vec<Bar>,
}

impl FeatureWindow {
    /// Build a window, sorting bars by timestamp.
    pub fn new(mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.timestamp);
        Self { bars }
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Most recent bar.
    pub fn latest(&self) -> EngineResult<&Bar> {
        self.bars.last().ok_or_else(|| EngineError::InsufficientData {
            context: "feature window".to_string(),
            needed: 1,
            available: 0,
        })
    }

    /// Fail unless the window holds at least `needed` bars.
    pub fn ensure_len(&self, needed: usize) -> EngineResult<()> {
        if self.bars.len() < needed {
            return Err(EngineError::InsufficientData {
                context: "feature window".to_string(),
                needed,
                available: self.bars.len(),
            });
        }
        Ok(())
    }
}

impl From<Vec<Bar>> for FeatureWindow {
    fn from(bars: Vec<Bar>) -> Self {
        Self::new(bars)
    }
}

impl From<FeatureWindow> for Vec<Bar> {
    fn from(window: FeatureWindow) -> Self {
        window.bars
    }
}
