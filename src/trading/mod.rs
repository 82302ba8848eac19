//! Decision core: aggregation, correlation guard, risk budget, weight optimization.

mod aggregator;
mod config;
mod correlation;
mod decision;
mod engine;
mod optimizer;
mod risk_budget;

pub use aggregator::{Consensus, SignalAggregator};
pub use config::{AggregatorConfig, CorrelationConfig, EngineConfig, OptimizerConfig, RiskConfig};
pub use correlation::{
    CorrelationConflict, CorrelationGuard, CorrelationRule, CorrelationVerdict, PairCheck,
};
pub use decision::{Decision, DecisionInputs, DecisionOrchestrator, ExecutionOrder};
pub use engine::{CycleReport, DecisionEngine, InstrumentSnapshot};
pub use optimizer::{StrategyPerformance, WeightOptimizer};
pub use risk_budget::{PositionSize, RiskBudgetManager, RiskBudgetState, SizingRejection};
