//! Volatility regime: range trading in calm markets, breakouts in volatile ones.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::models::{require, FeatureWindow, Opinion, StrategyId};

use super::SignalGenerator;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityRegime {
    /// Volatility percentile below which the market is ranging
    pub low_vol_percentile: f64,

    /// Volatility percentile above which breakouts are traded
    pub high_vol_percentile: f64,

    /// Minimum bars needed to rank volatility
    pub min_bars: usize,

    pub range_confidence: f64,
    pub breakout_confidence: f64,
}

impl Default for VolatilityRegime {
    fn default() -> Self {
        Self {
            low_vol_percentile: 0.30,
            high_vol_percentile: 0.70,
            min_bars: 20,
            range_confidence: 0.7,
            breakout_confidence: 0.6,
        }
    }
}

/// Percentile rank of the last value, ties sharing their average rank.
fn percentile_rank(values: &[f64]) -> Option<f64> {
    let last = *values.last()?;
    let below = values.iter().filter(|v| **v < last).count() as f64;
    let equal = values.iter().filter(|v| **v == last).count() as f64;
    let rank = below + (equal + 1.0) / 2.0;
    Some(rank / values.len() as f64)
}

impl SignalGenerator for VolatilityRegime {
    fn id(&self) -> StrategyId {
        StrategyId::VolatilityRegime
    }

    fn generate_signal(&self, window: &FeatureWindow) -> EngineResult<Opinion> {
        let bar = window.latest()?;
        let upper = require(bar.bb_upper, "bb_upper")?;
        let lower = require(bar.bb_lower, "bb_lower")?;
        let rsi = require(bar.rsi, "rsi")?;
        require(bar.volatility_20, "volatility_20")?;

        let vols: Vec<f64> = window
            .bars()
            .iter()
            .filter_map(|b| b.volatility_20.filter(|v| v.is_finite()))
            .collect();
        if vols.len() < self.min_bars {
            return Err(EngineError::InsufficientData {
                context: "volatility ranking".to_string(),
                needed: self.min_bars,
                available: vols.len(),
            });
        }

        let width = upper - lower;
        if width <= 0.0 {
            return Ok(Opinion::abstain(self.id()));
        }

        let percentile = percentile_rank(&vols).unwrap_or(0.5);
        let band_position = (bar.close - lower) / width;

        let opinion = if percentile < self.low_vol_percentile {
            if band_position < 0.1 {
                Opinion::long(self.id(), self.range_confidence)
            } else if band_position > 0.9 {
                Opinion::short(self.id(), self.range_confidence)
            } else {
                Opinion::abstain(self.id())
            }
        } else if percentile > self.high_vol_percentile {
            if bar.close > upper && rsi > 50.0 {
                Opinion::long(self.id(), self.breakout_confidence)
            } else if bar.close < lower && rsi < 50.0 {
                Opinion::short(self.id(), self.breakout_confidence)
            } else {
                Opinion::abstain(self.id())
            }
        } else {
            Opinion::abstain(self.id())
        };

        Ok(opinion)
    }
}
