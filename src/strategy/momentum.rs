//! Trend-following breakout on stacked EMAs, ADX strength and MACD.

use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::models::{require, FeatureWindow, Opinion, StrategyId};

use super::SignalGenerator;

/// Momentum breakout parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumBreakout {
    /// ADX above this counts as a strong trend
    pub min_adx: f64,

    /// ADX at which confidence saturates
    pub full_confidence_adx: f64,
}

impl Default for MomentumBreakout {
    fn default() -> Self {
        Self {
            min_adx: 25.0,
            full_confidence_adx: 60.0,
        }
    }
}

impl SignalGenerator for MomentumBreakout {
    fn id(&self) -> StrategyId {
        StrategyId::MomentumBreakout
    }

    fn generate_signal(&self, window: &FeatureWindow) -> EngineResult<Opinion> {
        let bar = window.latest()?;
        let ema_20 = require(bar.ema_20, "ema_20")?;
        let ema_50 = require(bar.ema_50, "ema_50")?;
        let ema_200 = require(bar.ema_200, "ema_200")?;
        let adx = require(bar.adx, "adx")?;
        let macd = require(bar.macd, "macd")?;
        let macd_signal = require(bar.macd_signal, "macd_signal")?;

        if adx <= self.min_adx {
            return Ok(Opinion::abstain(self.id()));
        }

        let confidence = (adx / self.full_confidence_adx).min(1.0);

        let bullish = ema_20 > ema_50 && ema_50 > ema_200 && macd > macd_signal && macd > 0.0;
        let bearish = ema_20 < ema_50 && ema_50 < ema_200 && macd < macd_signal && macd < 0.0;

        Ok(if bullish {
            Opinion::long(self.id(), confidence)
        } else if bearish {
            Opinion::short(self.id(), confidence)
        } else {
            Opinion::abstain(self.id())
        })
    }
}
