//! Engine configuration.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::models::{InstrumentSpec, StrategyId, StrategyWeights};

/// Signal aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Fraction of total weight mass the winning score must exceed
    pub decision_threshold: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            decision_threshold: 0.40,
        }
    }
}

/// Correlation guard settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Returns fetched per instrument
    pub lookback_bars: usize,

    /// Aligned points required before a correlation is trusted
    pub min_overlap: usize,

    /// |r| above this blocks a concentrated bet
    pub max_correlation: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            lookback_bars: 100,
            min_overlap: 50,
            max_correlation: 0.70,
        }
    }
}

/// Position sizing and risk budget settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Base fraction of balance risked per trade
    pub base_risk_per_trade: Decimal,

    /// Maximum fraction of balance risked per accounting period
    pub max_daily_risk: Decimal,

    /// Assumed reward-to-risk ratio for the Kelly formula
    pub reward_to_risk: f64,

    /// Fraction of full Kelly to use (0.5 = half-Kelly)
    pub kelly_fraction: f64,

    /// Win rate assumed when the caller has no estimate
    pub default_win_rate: f64,

    /// Stop distance as a multiple of the latest ATR
    pub stop_atr_multiple: f64,

    /// Trade at minimum size when tick metadata is unusable
    pub min_size_on_invalid_metadata: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            base_risk_per_trade: dec!(0.005), // 0.5% per trade
            max_daily_risk: dec!(0.02),       // 2% per day
            reward_to_risk: 2.0,
            kelly_fraction: 0.5,
            default_win_rate: 0.55,
            stop_atr_multiple: 1.5,
            min_size_on_invalid_metadata: false,
        }
    }
}

impl RiskConfig {
    /// Hard cap on the per-trade fraction: twice the base risk.
    pub fn max_risk_per_trade(&self) -> Decimal {
        self.base_risk_per_trade * dec!(2)
    }
}

/// Weight optimizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Closed trades per strategy considered
    pub lookback: usize,

    /// Win rate assumed for strategies with no history
    pub neutral_win_rate: f64,

    /// Minimum seconds between reoptimizations
    pub interval_secs: i64,

    /// Static allocation every pass is derived from
    pub baseline: StrategyWeights,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            lookback: 50,
            neutral_win_rate: 0.5,
            interval_secs: 3600,
            baseline: StrategyWeights::from_pairs([
                (StrategyId::StatisticalArbitrage, 0.20),
                (StrategyId::MomentumBreakout, 0.20),
                (StrategyId::VolatilityRegime, 0.15),
                (StrategyId::MlEnsemble, 0.20),
                (StrategyId::Fundamental, 0.30),
            ]),
        }
    }
}

/// Full decision engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub aggregator: AggregatorConfig,
    pub correlation: CorrelationConfig,
    pub risk: RiskConfig,
    pub optimizer: OptimizerConfig,

    /// Trading metadata keyed by symbol
    pub instruments: HashMap<String, InstrumentSpec>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let instruments = ["EURUSD", "GBPUSD", "AUDUSD", "NZDUSD", "USDCAD"]
            .into_iter()
            .map(InstrumentSpec::forex_major)
            .chain(std::iter::once(InstrumentSpec::forex_jpy("USDJPY")))
            .map(|spec| (spec.symbol.clone(), spec))
            .collect();

        Self {
            aggregator: AggregatorConfig::default(),
            correlation: CorrelationConfig::default(),
            risk: RiskConfig::default(),
            optimizer: OptimizerConfig::default(),
            instruments,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse config {}", path.display()))?
            }
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check ranges and that the baseline allocation is usable.
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |reason: String| -> EngineResult<()> {
            Err(EngineError::InvalidConfig { reason })
        };

        let threshold = self.aggregator.decision_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return invalid(format!("decision_threshold {threshold} outside [0, 1]"));
        }

        let max_corr = self.correlation.max_correlation;
        if !(0.0..=1.0).contains(&max_corr) {
            return invalid(format!("max_correlation {max_corr} outside [0, 1]"));
        }
        if self.correlation.min_overlap < 2 {
            return invalid("min_overlap must be at least 2".to_string());
        }

        let risk = &self.risk;
        if risk.base_risk_per_trade <= Decimal::ZERO || risk.max_daily_risk <= Decimal::ZERO {
            return invalid("risk fractions must be positive".to_string());
        }
        if !(risk.reward_to_risk.is_finite() && risk.reward_to_risk > 0.0) {
            return invalid(format!("reward_to_risk {} must be positive", risk.reward_to_risk));
        }
        if !(0.0..=1.0).contains(&risk.kelly_fraction) {
            return invalid(format!("kelly_fraction {} outside [0, 1]", risk.kelly_fraction));
        }

        for spec in self.instruments.values() {
            let reason = if spec.volume_step <= Decimal::ZERO {
                Some("volume_step must be positive".to_string())
            } else if spec.volume_min <= Decimal::ZERO || spec.volume_min > spec.volume_max {
                Some(format!(
                    "volume range [{}, {}] is empty",
                    spec.volume_min, spec.volume_max
                ))
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(EngineError::InvalidMarketMetadata {
                    instrument: spec.symbol.clone(),
                    reason,
                });
            }
        }

        self.optimizer.baseline.check_bounds()?;
        self.optimizer.baseline.normalized()?;
        Ok(())
    }

    /// Metadata for a symbol, if registered.
    pub fn instrument(&self, symbol: &str) -> Option<&InstrumentSpec> {
        self.instruments.get(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.optimizer.baseline.normalized().is_ok());
        assert!(config.instrument("USDJPY").is_some());
        assert_eq!(config.risk.max_risk_per_trade(), dec!(0.01));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"risk": {"max_daily_risk": "0.03"}}"#).unwrap();
        assert_eq!(config.risk.max_daily_risk, dec!(0.03));
        assert_eq!(config.risk.base_risk_per_trade, dec!(0.005));
        assert_eq!(config.correlation.lookback_bars, 100);
    }

    #[test]
    fn test_rejects_unbounded_baseline_weights() {
        let parsed: Result<EngineConfig, _> = serde_json::from_str(
            r#"{"optimizer": {"baseline": {"momentum_breakout": 1.5, "statistical_arbitrage": -0.5}}}"#,
        );
        assert!(parsed.is_err());

        let config: EngineConfig = serde_json::from_str(
            r#"{"optimizer": {"baseline": {"momentum_breakout": 0.7, "statistical_arbitrage": 0.3}}}"#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.optimizer.baseline.len(), 2);
    }

    #[test]
    fn test_rejects_inverted_volume_range() {
        let mut config = EngineConfig::default();
        let spec = config.instruments.get_mut("EURUSD").unwrap();
        spec.volume_min = dec!(5);
        spec.volume_max = dec!(1);
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidMarketMetadata { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let mut config = EngineConfig::default();
        config.aggregator.decision_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfig { .. })
        ));
    }
}
