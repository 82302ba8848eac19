//! Decision orchestration: consensus, correlation, then sizing.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::metrics::ReturnHistory;
use crate::models::{
    AccountState, CandidateTrade, ConsumptionEvent, Direction, OpenPosition, Opinion,
    StrategyWeights,
};

use super::aggregator::{Consensus, SignalAggregator};
use super::config::EngineConfig;
use super::correlation::{CorrelationConflict, CorrelationGuard, CorrelationVerdict};
use super::risk_budget::{PositionSize, RiskBudgetManager, RiskBudgetState, SizingRejection};

/// A sized order the execution layer may place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOrder {
    /// Also the id of the consumption event charged on fill
    pub decision_id: Uuid,
    pub instrument: String,
    pub direction: Direction,
    pub size: PositionSize,
    pub score: f64,

    /// `stop_distance * reward_to_risk`
    pub take_profit_distance: Decimal,

    /// Price the protective levels are measured from, usually the last close
    #[serde(default)]
    pub reference_price: Option<Decimal>,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
}

impl ExecutionOrder {
    pub fn lots(&self) -> Decimal {
        self.size.lots
    }

    pub fn stop_distance(&self) -> Decimal {
        self.size.stop_distance
    }

    /// Stop-loss and take-profit prices around `reference`, by direction.
    pub fn protective_levels(
        direction: Direction,
        reference: Decimal,
        stop_distance: Decimal,
        take_profit_distance: Decimal,
    ) -> (Decimal, Decimal) {
        match direction {
            Direction::Long => (reference - stop_distance, reference + take_profit_distance),
            _ => (reference + stop_distance, reference - take_profit_distance),
        }
    }

    /// The event that charges this order's risk once it is filled.
    ///
    /// Its id is the decision id, so confirming the same fill twice charges once.
    pub fn consumption_event(&self, filled_at: DateTime<Utc>) -> ConsumptionEvent {
        ConsumptionEvent {
            id: self.decision_id,
            instrument: self.instrument.clone(),
            risk_pct: self.size.risk_pct,
            recorded_at: filled_at,
        }
    }
}

/// Outcome of one instrument's evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Execute(ExecutionOrder),
    RejectedNoConsensus {
        instrument: String,
        consensus: Consensus,
    },
    RejectedCorrelation {
        instrument: String,
        direction: Direction,
        conflict: CorrelationConflict,
    },
    RejectedRiskBudget {
        instrument: String,
        direction: Direction,
        reason: SizingRejection,
    },
}

impl Decision {
    pub fn instrument(&self) -> &str {
        match self {
            Decision::Execute(order) => &order.instrument,
            Decision::RejectedNoConsensus { instrument, .. }
            | Decision::RejectedCorrelation { instrument, .. }
            | Decision::RejectedRiskBudget { instrument, .. } => instrument,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Decision::Execute(_) => "execute",
            Decision::RejectedNoConsensus { .. } => "rejected_no_consensus",
            Decision::RejectedCorrelation { .. } => "rejected_correlation",
            Decision::RejectedRiskBudget { .. } => "rejected_risk_budget",
        }
    }

    pub fn is_execute(&self) -> bool {
        matches!(self, Decision::Execute(_))
    }

    pub fn order(&self) -> Option<&ExecutionOrder> {
        match self {
            Decision::Execute(order) => Some(order),
            _ => None,
        }
    }
}

/// Everything one decision is computed from. All read-only snapshots.
pub struct DecisionInputs<'a> {
    pub instrument: &'a str,
    pub opinions: &'a [Opinion],
    pub weights: &'a StrategyWeights,
    pub open_positions: &'a [OpenPosition],
    pub account: &'a AccountState,
    pub risk_state: &'a RiskBudgetState,
    pub history: &'a dyn ReturnHistory,
    pub stop_distance: Decimal,

    /// Last close, used to place stop-loss and take-profit levels
    pub reference_price: Option<Decimal>,
}

/// Composes aggregation, the correlation guard and sizing into one pure call.
pub struct DecisionOrchestrator {
    aggregator: SignalAggregator,
    guard: CorrelationGuard,
    risk: RiskBudgetManager,
}

impl DecisionOrchestrator {
    pub fn new(aggregator: SignalAggregator, guard: CorrelationGuard, risk: RiskBudgetManager) -> Self {
        Self {
            aggregator,
            guard,
            risk,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            SignalAggregator::new(config.aggregator.clone()),
            CorrelationGuard::new(config.correlation.clone()),
            RiskBudgetManager::new(config.risk.clone(), config.instruments.clone()),
        )
    }

    pub fn aggregator(&self) -> &SignalAggregator {
        &self.aggregator
    }

    pub fn guard(&self) -> &CorrelationGuard {
        &self.guard
    }

    pub fn risk_manager(&self) -> &RiskBudgetManager {
        &self.risk
    }

    /// Decide for one instrument. Never mutates anything.
    pub fn decide(&self, inputs: &DecisionInputs<'_>) -> Decision {
        let instrument = inputs.instrument.to_string();

        let consensus = self.aggregator.aggregate(inputs.opinions, inputs.weights);
        if !consensus.has_direction() {
            info!(
                instrument = %instrument,
                long = consensus.long_score,
                short = consensus.short_score,
                threshold = consensus.threshold,
                "No consensus"
            );
            return Decision::RejectedNoConsensus {
                instrument,
                consensus,
            };
        }
        let direction = consensus.direction;

        let candidate = CandidateTrade::new(instrument.clone(), direction);
        if let CorrelationVerdict::Rejected(conflict) =
            self.guard
                .allow(&candidate, inputs.open_positions, inputs.history)
        {
            return Decision::RejectedCorrelation {
                instrument,
                direction,
                conflict,
            };
        }

        // Execute requires a real stop, whatever the sizing fallback allows
        if inputs.stop_distance <= Decimal::ZERO {
            info!(instrument = %instrument, "Rejected: no stop distance");
            return Decision::RejectedRiskBudget {
                instrument,
                direction,
                reason: SizingRejection::InvalidStopDistance {
                    stop_distance: inputs.stop_distance,
                },
            };
        }

        let sized = self.risk.size_position(
            &instrument,
            inputs.stop_distance,
            consensus.score,
            inputs.account.balance,
            inputs.account.win_rate_estimate,
            inputs.risk_state,
        );

        match sized {
            Ok(size) => {
                let take_profit_distance = self.risk.take_profit_distance(size.stop_distance);
                let levels = inputs
                    .reference_price
                    .filter(|price| *price > Decimal::ZERO)
                    .map(|price| {
                        ExecutionOrder::protective_levels(
                            direction,
                            price,
                            size.stop_distance,
                            take_profit_distance,
                        )
                    });
                let order = ExecutionOrder {
                    decision_id: Uuid::new_v4(),
                    instrument,
                    direction,
                    size,
                    score: consensus.score,
                    take_profit_distance,
                    reference_price: inputs.reference_price,
                    stop_loss: levels.map(|(sl, _)| sl),
                    take_profit: levels.map(|(_, tp)| tp),
                };
                info!(
                    instrument = %order.instrument,
                    direction = %order.direction,
                    lots = %order.size.lots,
                    risk = %order.size.risk_pct,
                    stop = %order.size.stop_distance,
                    take_profit = %order.take_profit_distance,
                    score = order.score,
                    "Execute"
                );
                Decision::Execute(order)
            }
            Err(reason) => {
                info!(
                    instrument = %instrument,
                    direction = %direction,
                    reason = %reason,
                    "Rejected by risk budget"
                );
                Decision::RejectedRiskBudget {
                    instrument,
                    direction,
                    reason,
                }
            }
        }
    }
}
