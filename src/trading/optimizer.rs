//! Performance-based strategy reweighting.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::metrics::MetricsCalculator;
use crate::models::{StrategyId, StrategyWeights, TradeOutcome};

use super::config::OptimizerConfig;

/// Realized performance of one strategy over its recent trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyPerformance {
    pub strategy_id: StrategyId,
    pub trades: usize,
    pub wins: usize,
    /// `None` when the strategy has no closed trades
    pub win_rate: Option<f64>,
    pub total_pnl: Decimal,
}

/// Re-derives weights from the static baseline and realized win rates.
pub struct WeightOptimizer {
    config: OptimizerConfig,
}

impl WeightOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Score each baseline strategy as `baseline * (0.5 + win_rate)` and
    /// normalize.
    ///
    /// `current` is only returned, unchanged, when the scores are degenerate.
    /// The result never depends on it otherwise, so repeated passes over the
    /// same history yield the same weights.
    pub fn optimize(
        &self,
        current: &StrategyWeights,
        outcomes_by_strategy: &HashMap<StrategyId, Vec<TradeOutcome>>,
        lookback: usize,
    ) -> StrategyWeights {
        let mut scores = BTreeMap::new();

        for (id, base) in self.config.baseline.iter() {
            let win_rate = outcomes_by_strategy
                .get(&id)
                .and_then(|outcomes| MetricsCalculator::recent_win_rate(outcomes, lookback))
                .unwrap_or(self.config.neutral_win_rate);
            scores.insert(id, base * (0.5 + win_rate));
        }

        let total: f64 = scores.values().sum();
        if total <= 0.0 || !total.is_finite() {
            warn!(total = total, "Degenerate optimizer scores, keeping current weights");
            return current.clone();
        }

        let weights: StrategyWeights = scores
            .into_iter()
            .map(|(id, score)| (id, score / total))
            .collect();

        for (id, weight) in weights.iter() {
            info!(
                strategy = %id,
                previous = current.get(id),
                weight = weight,
                "Strategy weight updated"
            );
        }

        weights
    }

    /// Per-strategy performance over the most recent `lookback` trades.
    pub fn performance(
        &self,
        outcomes_by_strategy: &HashMap<StrategyId, Vec<TradeOutcome>>,
        lookback: usize,
    ) -> Vec<StrategyPerformance> {
        StrategyId::ALL
            .iter()
            .map(|id| {
                let mut recent: Vec<&TradeOutcome> = outcomes_by_strategy
                    .get(id)
                    .map(|outcomes| outcomes.iter().collect())
                    .unwrap_or_default();
                recent.sort_by(|a, b| b.closed_at.cmp(&a.closed_at));
                recent.truncate(lookback);

                let wins = recent.iter().filter(|o| o.is_win()).count();
                StrategyPerformance {
                    strategy_id: *id,
                    trades: recent.len(),
                    wins,
                    win_rate: (!recent.is_empty()).then(|| wins as f64 / recent.len() as f64),
                    total_pnl: recent.iter().map(|o| o.realized_pnl).sum(),
                }
            })
            .collect()
    }
}

impl Default for WeightOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn outcomes(id: StrategyId, pnls: &[i64]) -> Vec<TradeOutcome> {
        let t0 = Utc::now();
        pnls.iter()
            .enumerate()
            .map(|(i, p)| TradeOutcome::new(id, Decimal::from(*p), t0 + Duration::minutes(i as i64)))
            .collect()
    }

    #[test]
    fn test_no_history_returns_baseline() {
        let optimizer = WeightOptimizer::default();
        let weights = optimizer.optimize(&StrategyWeights::new(), &HashMap::new(), 50);

        // Every strategy at 0.5 scales uniformly, so the normalized baseline survives
        let baseline = optimizer.config().baseline.normalized().unwrap();
        for (id, w) in baseline.iter() {
            assert!((weights.get(id) - w).abs() < 1e-12);
        }
        assert!(weights.is_normalized());
    }

    #[test]
    fn test_winning_strategy_gains_weight() {
        let optimizer = WeightOptimizer::default();
        let history = HashMap::from([
            (StrategyId::MomentumBreakout, outcomes(StrategyId::MomentumBreakout, &[10, 5, 3, 8])),
            (
                StrategyId::StatisticalArbitrage,
                outcomes(StrategyId::StatisticalArbitrage, &[-4, -2, -1, -6]),
            ),
        ]);

        let weights = optimizer.optimize(&optimizer.config().baseline, &history, 50);

        assert!(weights.is_normalized());
        // Same baseline (0.20) but 100% vs 0% win rate: scores 0.30 vs 0.10
        let momentum = weights.get(StrategyId::MomentumBreakout);
        let stat_arb = weights.get(StrategyId::StatisticalArbitrage);
        assert!((momentum / stat_arb - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_lookback_uses_most_recent_trades() {
        let optimizer = WeightOptimizer::default();
        // Old losers then two recent winners
        let history = HashMap::from([(
            StrategyId::VolatilityRegime,
            outcomes(StrategyId::VolatilityRegime, &[-1, -1, -1, 4, 2]),
        )]);
        let perf = optimizer.performance(&history, 2);
        let vol = perf
            .iter()
            .find(|p| p.strategy_id == StrategyId::VolatilityRegime)
            .unwrap();
        assert_eq!(vol.trades, 2);
        assert_eq!(vol.win_rate, Some(1.0));
        assert_eq!(vol.total_pnl, dec!(6));

        let fundamental = perf
            .iter()
            .find(|p| p.strategy_id == StrategyId::Fundamental)
            .unwrap();
        assert_eq!(fundamental.win_rate, None);
    }

    #[test]
    fn test_degenerate_baseline_keeps_current() {
        let optimizer = WeightOptimizer::new(OptimizerConfig {
            baseline: StrategyWeights::from_pairs([(StrategyId::MlEnsemble, 0.0)]),
            ..OptimizerConfig::default()
        });
        let current = StrategyWeights::from_pairs([(StrategyId::MlEnsemble, 1.0)]);
        assert_eq!(optimizer.optimize(&current, &HashMap::new(), 50), current);
    }

    proptest! {
        #[test]
        fn prop_optimize_is_idempotent_and_normalized(
            pnls in proptest::collection::vec(proptest::collection::vec(-100i64..100, 0..30), 5),
            lookback in 1usize..60,
        ) {
            let optimizer = WeightOptimizer::default();
            let history: HashMap<_, _> = StrategyId::ALL
                .iter()
                .zip(pnls.iter())
                .map(|(id, p)| (*id, outcomes(*id, p)))
                .collect();

            let first = optimizer.optimize(&optimizer.config().baseline, &history, lookback);
            let second = optimizer.optimize(&first, &history, lookback);

            prop_assert_eq!(&first, &second);
            prop_assert!(first.is_normalized());
        }
    }
}
