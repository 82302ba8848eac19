//! Weighted voting across strategy opinions.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{Direction, Opinion, StrategyWeights};

use super::config::AggregatorConfig;

/// Weighted consensus of one cycle's opinions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Consensus {
    /// Winning direction, or `None` on a tie or when below threshold
    pub direction: Direction,

    /// Score of the leading direction in [0, 1]
    pub score: f64,

    /// Accumulated long score
    pub long_score: f64,

    /// Accumulated short score
    pub short_score: f64,

    /// Absolute threshold the winning score had to exceed
    pub threshold: f64,
}

impl Consensus {
    pub fn has_direction(&self) -> bool {
        self.direction.is_directional()
    }
}

/// Combines opinions into a single consensus.
pub struct SignalAggregator {
    config: AggregatorConfig,
}

impl SignalAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Aggregate opinions under the given weights.
    ///
    /// Each directional opinion adds `confidence * weight` to its side.
    /// Abstentions contribute nothing and the scores are not renormalized,
    /// so fewer agreeing strategies make the threshold harder to clear.
    /// Only the first opinion per strategy is counted.
    pub fn aggregate(&self, opinions: &[Opinion], weights: &StrategyWeights) -> Consensus {
        let mut seen = HashSet::new();
        let mut long_score = 0.0;
        let mut short_score = 0.0;

        for opinion in opinions {
            if !seen.insert(opinion.strategy_id) {
                warn!(strategy = %opinion.strategy_id, "Duplicate opinion ignored");
                continue;
            }

            let weight = weights.get(opinion.strategy_id);
            let contribution = opinion.confidence.clamp(0.0, 1.0) * weight;

            match opinion.direction {
                Direction::Long => long_score += contribution,
                Direction::Short => short_score += contribution,
                Direction::None => {}
            }
        }

        let threshold = self.config.decision_threshold * weights.total();

        let (direction, score) = if long_score > short_score {
            (Direction::Long, long_score)
        } else if short_score > long_score {
            (Direction::Short, short_score)
        } else {
            (Direction::None, long_score)
        };

        let direction = if score > threshold {
            direction
        } else {
            Direction::None
        };

        debug!(
            long = long_score,
            short = short_score,
            threshold = threshold,
            direction = %direction,
            "Aggregated opinions"
        );

        Consensus {
            direction,
            score,
            long_score,
            short_score,
            threshold,
        }
    }
}

impl Default for SignalAggregator {
    fn default() -> Self {
        Self::new(AggregatorConfig::default())
    }
}
