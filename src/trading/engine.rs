//! Decision engine: owns the shared weights and risk budget.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::metrics::ReturnHistory;
use crate::models::{
    AccountState, ConsumptionEvent, FeatureWindow, OpenPosition, Opinion, StrategyId,
    StrategyWeights, TradeOutcome,
};
use crate::strategy::{collect_opinions, SignalGenerator, StrategyFailure};

use super::config::EngineConfig;
use super::decision::{Decision, DecisionInputs, DecisionOrchestrator, ExecutionOrder};
use super::optimizer::WeightOptimizer;
use super::risk_budget::{RiskBudgetState, SizingRejection};

/// Per-instrument input for one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSnapshot {
    pub instrument: String,
    pub window: FeatureWindow,

    /// Explicit stop distance; derived from ATR when absent
    #[serde(default)]
    pub stop_distance: Option<Decimal>,
}

/// Result of evaluating one instrument.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub instrument: String,
    pub opinions: Vec<Opinion>,
    pub decision: Decision,
    pub strategy_failures: Vec<StrategyFailure>,
}

/// Decision engine state.
pub struct DecisionEngine {
    config: EngineConfig,
    orchestrator: DecisionOrchestrator,
    optimizer: WeightOptimizer,
    strategies: Vec<Arc<dyn SignalGenerator>>,

    // Only ever replaced wholesale by the optimizer
    weights: Arc<RwLock<StrategyWeights>>,

    // Single mutation point for consumed risk
    risk_state: Arc<Mutex<RiskBudgetState>>,

    last_optimized: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl DecisionEngine {
    /// Create an engine starting a fresh period at `period_start`.
    pub fn new(
        config: EngineConfig,
        strategies: Vec<Arc<dyn SignalGenerator>>,
        period_start: DateTime<Utc>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let weights = config.optimizer.baseline.normalized()?;

        Ok(Self {
            orchestrator: DecisionOrchestrator::from_config(&config),
            optimizer: WeightOptimizer::new(config.optimizer.clone()),
            strategies,
            weights: Arc::new(RwLock::new(weights)),
            risk_state: Arc::new(Mutex::new(RiskBudgetState::new(period_start))),
            last_optimized: Arc::new(RwLock::new(None)),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Snapshot of the current weights.
    pub async fn current_weights(&self) -> StrategyWeights {
        self.weights.read().await.clone()
    }

    /// Replace the weights, e.g. with a persisted set. Must be normalized.
    pub async fn set_weights(&self, weights: StrategyWeights) -> EngineResult<()> {
        weights.validate()?;
        *self.weights.write().await = weights;
        Ok(())
    }

    /// Snapshot of the risk budget.
    pub async fn risk_state(&self) -> RiskBudgetState {
        self.risk_state.lock().await.clone()
    }

    /// Evaluate every instrument against the same weight and budget snapshot.
    ///
    /// Instruments are evaluated concurrently. Executions are then admitted
    /// in input order so that together they still fit the remaining budget.
    pub async fn evaluate_cycle(
        &self,
        snapshots: &[InstrumentSnapshot],
        open_positions: &[OpenPosition],
        account: &AccountState,
        history: &dyn ReturnHistory,
    ) -> Vec<CycleReport> {
        let weights = self.current_weights().await;
        let risk_state = self.risk_state().await;

        let evaluations = snapshots.iter().map(|snapshot| {
            let weights = &weights;
            let risk_state = &risk_state;
            async move {
                self.evaluate_instrument(snapshot, weights, open_positions, account, risk_state, history)
            }
        });
        let mut reports = join_all(evaluations).await;

        self.admit_within_budget(&mut reports, &risk_state);

        let executed = reports.iter().filter(|r| r.decision.is_execute()).count();
        info!(
            instruments = reports.len(),
            executed = executed,
            risk_used = %risk_state.risk_used_pct(),
            "Cycle evaluated"
        );
        reports
    }

    fn evaluate_instrument(
        &self,
        snapshot: &InstrumentSnapshot,
        weights: &StrategyWeights,
        open_positions: &[OpenPosition],
        account: &AccountState,
        risk_state: &RiskBudgetState,
        history: &dyn ReturnHistory,
    ) -> CycleReport {
        let batch = collect_opinions(&snapshot.instrument, &self.strategies, &snapshot.window);
        let stop_distance = snapshot
            .stop_distance
            .unwrap_or_else(|| self.stop_from_atr(&snapshot.instrument, &snapshot.window));
        let reference_price = snapshot
            .window
            .latest()
            .ok()
            .and_then(|bar| Decimal::try_from(bar.close).ok());

        let decision = self.orchestrator.decide(&DecisionInputs {
            instrument: &snapshot.instrument,
            opinions: &batch.opinions,
            weights,
            open_positions,
            account,
            risk_state,
            history,
            stop_distance,
            reference_price,
        });

        CycleReport {
            instrument: snapshot.instrument.clone(),
            opinions: batch.opinions,
            decision,
            strategy_failures: batch.failures,
        }
    }

    /// `last ATR * stop_atr_multiple`, or zero when ATR is unavailable.
    pub fn stop_from_atr(&self, instrument: &str, window: &FeatureWindow) -> Decimal {
        let atr = window
            .latest()
            .ok()
            .and_then(|bar| bar.atr)
            .filter(|atr| atr.is_finite() && *atr > 0.0);

        match atr {
            Some(atr) => Decimal::try_from(atr * self.config.risk.stop_atr_multiple)
                .unwrap_or(Decimal::ZERO),
            None => {
                debug!(instrument = %instrument, "No ATR on latest bar, no stop distance");
                Decimal::ZERO
            }
        }
    }

    /// Downgrade executions that would jointly overrun the period cap.
    fn admit_within_budget(&self, reports: &mut [CycleReport], risk_state: &RiskBudgetState) {
        let max = self.config.risk.max_daily_risk;
        let mut committed = risk_state.risk_used_pct();

        for report in reports.iter_mut() {
            let Decision::Execute(order) = &report.decision else {
                continue;
            };

            let requested = order.size.risk_pct;
            if committed + requested <= max {
                committed += requested;
                continue;
            }

            warn!(
                instrument = %order.instrument,
                committed = %committed,
                requested = %requested,
                max = %max,
                "Execution dropped: cycle would exceed risk budget"
            );
            report.decision = Decision::RejectedRiskBudget {
                instrument: order.instrument.clone(),
                direction: order.direction,
                reason: SizingRejection::BudgetExhausted {
                    used: committed,
                    requested,
                    max,
                },
            };
        }
    }

    /// Charge a filled order to the budget.
    ///
    /// Returns the applied event for persistence, or `None` when this fill was
    /// already confirmed.
    pub async fn confirm_fill(
        &self,
        order: &ExecutionOrder,
        filled_at: DateTime<Utc>,
    ) -> EngineResult<Option<ConsumptionEvent>> {
        let event = order.consumption_event(filled_at);
        let mut state = self.risk_state.lock().await;

        match self.orchestrator.risk_manager().consume(&mut state, &event) {
            Ok(()) => Ok(Some(event)),
            Err(EngineError::DuplicateConsumption { event_id }) => {
                debug!(event_id = %event_id, "Fill already confirmed");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Begin a new accounting period.
    pub async fn start_period(&self, now: DateTime<Utc>) {
        self.risk_state.lock().await.reset(now);
    }

    /// Rebuild the budget from persisted consumption events.
    pub async fn restore_risk_state(&self, period_start: DateTime<Utc>, events: &[ConsumptionEvent]) {
        let restored = RiskBudgetState::replay(period_start, events);
        if restored.risk_used_pct() > self.config.risk.max_daily_risk {
            warn!(
                used = %restored.risk_used_pct(),
                max = %self.config.risk.max_daily_risk,
                "Restored risk exceeds the current cap, no new trades this period"
            );
        }
        info!(
            period_start = %period_start,
            events = restored.applied_count(),
            used = %restored.risk_used_pct(),
            "Risk budget restored"
        );
        *self.risk_state.lock().await = restored;
    }

    /// Recompute weights when the optimizer interval has elapsed.
    ///
    /// Returns the new weights if a pass ran.
    pub async fn reoptimize_if_due(
        &self,
        now: DateTime<Utc>,
        outcomes_by_strategy: &HashMap<StrategyId, Vec<TradeOutcome>>,
    ) -> Option<StrategyWeights> {
        let mut last = self.last_optimized.write().await;
        let interval = Duration::seconds(self.config.optimizer.interval_secs);

        if let Some(previous) = *last {
            if now - previous < interval {
                return None;
            }
        }

        let mut weights = self.weights.write().await;
        let updated = self
            .optimizer
            .optimize(&weights, outcomes_by_strategy, self.config.optimizer.lookback);
        *weights = updated.clone();
        *last = Some(now);

        Some(updated)
    }
}
