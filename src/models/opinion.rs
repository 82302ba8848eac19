//! Directional opinions produced by strategies each cycle.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Direction of an opinion, consensus or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
    None,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
            Direction::None => "NONE",
        }
    }

    /// The other side of a directional call. `None` stays `None`.
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
            Direction::None => Direction::None,
        }
    }

    pub fn is_directional(&self) -> bool {
        !matches!(self, Direction::None)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a configured strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    StatisticalArbitrage,
    MomentumBreakout,
    VolatilityRegime,
    MlEnsemble,
    Fundamental,
}

impl StrategyId {
    pub const ALL: [StrategyId; 5] = [
        StrategyId::StatisticalArbitrage,
        StrategyId::MomentumBreakout,
        StrategyId::VolatilityRegime,
        StrategyId::MlEnsemble,
        StrategyId::Fundamental,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyId::StatisticalArbitrage => "statistical_arbitrage",
            StrategyId::MomentumBreakout => "momentum_breakout",
            StrategyId::VolatilityRegime => "volatility_regime",
            StrategyId::MlEnsemble => "ml_ensemble",
            StrategyId::Fundamental => "fundamental",
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s.to_lowercase())
            .ok_or_else(|| EngineError::InvalidConfig {
                reason: format!("unknown strategy id `{s}`"),
            })
    }
}

/// One strategy's call for the current cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opinion {
    pub strategy_id: StrategyId,
    pub direction: Direction,
    /// Confidence in [0, 1]; clamped on construction.
    pub confidence: f64,
}

impl Opinion {
    pub fn new(strategy_id: StrategyId, direction: Direction, confidence: f64) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            strategy_id,
            direction,
            confidence,
        }
    }

    /// An abstaining opinion.
    pub fn abstain(strategy_id: StrategyId) -> Self {
        Self::new(strategy_id, Direction::None, 0.0)
    }

    pub fn long(strategy_id: StrategyId, confidence: f64) -> Self {
        Self::new(strategy_id, Direction::Long, confidence)
    }

    pub fn short(strategy_id: StrategyId, confidence: f64) -> Self {
        Self::new(strategy_id, Direction::Short, confidence)
    }

    pub fn is_abstention(&self) -> bool {
        !self.direction.is_directional() || self.confidence <= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_clamped() {
        let op = Opinion::long(StrategyId::MomentumBreakout, 1.7);
        assert_eq!(op.confidence, 1.0);

        let op = Opinion::short(StrategyId::MomentumBreakout, f64::NAN);
        assert_eq!(op.confidence, 0.0);
        assert!(op.is_abstention());
    }

    #[test]
    fn test_strategy_id_parse() {
        assert_eq!(
            "Momentum_Breakout".parse::<StrategyId>().unwrap(),
            StrategyId::MomentumBreakout
        );
        assert!("carry_trade".parse::<StrategyId>().is_err());
    }

    #[test]
    fn test_direction_serde_upper() {
        let json = serde_json::to_string(&Direction::Long).unwrap();
        assert_eq!(json, "\"LONG\"");
        assert_eq!(Direction::Short.opposite(), Direction::Long);
    }
}
