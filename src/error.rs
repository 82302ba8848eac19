//! Error types for the decision core.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::models::StrategyId;

/// Errors raised by the decision core.
///
/// Budget rejections and degenerate optimizer passes are normal outcomes and
/// are reported through `Decision` and logging instead; `BudgetExceeded` only
/// surfaces when a caller tries to consume more risk than the period allows.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Not enough bars or aligned points to compute something.
    #[error("insufficient data for {context}: need {needed}, have {available}")]
    InsufficientData {
        context: String,
        needed: usize,
        available: usize,
    },

    /// A bar is missing an indicator a strategy depends on.
    #[error("missing feature `{field}` on latest bar")]
    MissingFeature { field: &'static str },

    /// Instrument metadata is unusable (inverted volume limits, zero step).
    #[error("invalid market metadata for {instrument}: {reason}")]
    InvalidMarketMetadata { instrument: String, reason: String },

    /// Weights could not be normalized or failed validation.
    #[error("invalid strategy weights: {reason}")]
    InvalidWeights { reason: String },

    /// Applying this consumption would breach the period risk cap.
    #[error("risk budget exceeded: used {used}, requested {requested}, max {max}")]
    BudgetExceeded {
        used: Decimal,
        requested: Decimal,
        max: Decimal,
    },

    /// The consumption event was already applied in this period.
    #[error("consumption event {event_id} already applied")]
    DuplicateConsumption { event_id: Uuid },

    /// The consumption event carries a negative or zero risk fraction.
    #[error("consumption event {event_id} has non-positive risk {risk_pct}")]
    InvalidConsumption { event_id: Uuid, risk_pct: Decimal },

    /// A strategy failed to produce an opinion.
    #[error("strategy {strategy} failed: {reason}")]
    StrategyFailed { strategy: StrategyId, reason: String },

    /// Configuration values out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

pub type EngineResult<T> = Result<T, EngineError>;
