//! Strategy capability and opinion collection.
//!
//! Every strategy maps a feature window to a directional opinion. The core
//! never looks inside a strategy; a failing strategy abstains for the cycle
//! and the failure is reported alongside the collected opinions.

mod mean_reversion;
mod momentum;
mod volatility;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::models::{FeatureWindow, Opinion, StrategyId};

pub use mean_reversion::StatisticalArbitrage;
pub use momentum::MomentumBreakout;
pub use volatility::VolatilityRegime;

/// A pluggable directional strategy.
pub trait SignalGenerator: Send + Sync {
    /// Identifier the strategy's weight is looked up under.
    fn id(&self) -> StrategyId;

    /// Produce an opinion from the feature window.
    fn generate_signal(&self, window: &FeatureWindow) -> EngineResult<Opinion>;
}

/// A strategy that could not produce an opinion this cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyFailure {
    pub strategy_id: StrategyId,
    pub error: EngineError,
}

/// Opinions from one cycle plus any strategy failures.
#[derive(Debug, Clone, Default)]
pub struct OpinionBatch {
    pub opinions: Vec<Opinion>,
    pub failures: Vec<StrategyFailure>,
}

/// Run every strategy against the window, isolating failures.
pub fn collect_opinions(
    instrument: &str,
    strategies: &[Arc<dyn SignalGenerator>],
    window: &FeatureWindow,
) -> OpinionBatch {
    let mut batch = OpinionBatch::default();

    for strategy in strategies {
        let id = strategy.id();
        match strategy.generate_signal(window) {
            Ok(opinion) => {
                // The id is owned by the strategy, not by whatever it returned.
                let opinion = Opinion::new(id, opinion.direction, opinion.confidence);
                debug!(
                    instrument = %instrument,
                    strategy = %id,
                    direction = %opinion.direction,
                    confidence = opinion.confidence,
                    "Strategy opinion"
                );
                batch.opinions.push(opinion);
            }
            Err(error) => {
                warn!(
                    instrument = %instrument,
                    strategy = %id,
                    error = %error,
                    "Strategy failed, abstaining this cycle"
                );
                batch.opinions.push(Opinion::abstain(id));
                batch.failures.push(StrategyFailure {
                    strategy_id: id,
                    error,
                });
            }
        }
    }

    batch
}

/// The reference strategies with default parameters.
pub fn default_strategies() -> Vec<Arc<dyn SignalGenerator>> {
    vec![
        Arc::new(StatisticalArbitrage::default()),
        Arc::new(MomentumBreakout::default()),
        Arc::new(VolatilityRegime::default()),
    ]
}
