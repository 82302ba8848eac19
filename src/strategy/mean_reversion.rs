//! Statistical arbitrage: fade extreme z-scores confirmed by RSI.

use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::models::{require, FeatureWindow, Opinion, StrategyId};

use super::SignalGenerator;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticalArbitrage {
    /// |z| beyond this is considered extreme
    pub z_entry: f64,

    /// |z| at which confidence saturates
    pub z_full_confidence: f64,

    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
}

impl Default for StatisticalArbitrage {
    fn default() -> Self {
        Self {
            z_entry: 2.5,
            z_full_confidence: 4.0,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
        }
    }
}

impl SignalGenerator for StatisticalArbitrage {
    fn id(&self) -> StrategyId {
        StrategyId::StatisticalArbitrage
    }

    fn generate_signal(&self, window: &FeatureWindow) -> EngineResult<Opinion> {
        let bar = window.latest()?;
        let z = require(bar.z_score, "z_score")?;
        let rsi = require(bar.rsi, "rsi")?;

        let confidence = (z.abs() / self.z_full_confidence).min(1.0);

        Ok(if z < -self.z_entry && rsi < self.rsi_oversold {
            Opinion::long(self.id(), confidence)
        } else if z > self.z_entry && rsi > self.rsi_overbought {
            Opinion::short(self.id(), confidence)
        } else {
            Opinion::abstain(self.id())
        })
    }
}
