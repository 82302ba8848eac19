//! Realized trade outcomes and risk consumption events.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::StrategyId;

/// A closed trade attributed to one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub strategy_id: StrategyId,

    /// Net realized P&L in account currency
    pub realized_pnl: Decimal,

    pub closed_at: DateTime<Utc>,
}

impl TradeOutcome {
    pub fn new(strategy_id: StrategyId, realized_pnl: Decimal, closed_at: DateTime<Utc>) -> Self {
        Self {
            strategy_id,
            realized_pnl,
            closed_at,
        }
    }

    /// A trade counts as a win only with strictly positive P&L.
    pub fn is_win(&self) -> bool {
        self.realized_pnl > Decimal::ZERO
    }
}

/// Risk charged against the period budget once an order is confirmed filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionEvent {
    /// Unique id; an event is applied at most once
    pub id: Uuid,

    pub instrument: String,

    /// Fraction of balance consumed (e.g. 0.008 = 0.8%)
    pub risk_pct: Decimal,

    pub recorded_at: DateTime<Utc>,
}

impl ConsumptionEvent {
    pub fn new(instrument: impl Into<String>, risk_pct: Decimal, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            instrument: instrument.into(),
            risk_pct,
            recorded_at,
        }
    }
}
