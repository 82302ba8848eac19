//! Risk budget tracking and half-Kelly position sizing.
//!
//! Sizing and consumption are separate steps: `size_position` never mutates
//! the budget, and a size is only charged once the caller confirms the fill
//! through `consume`. Every consumption carries an event id so a replayed
//! confirmation is applied once.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{ConsumptionEvent, InstrumentSpec};

use super::config::RiskConfig;

/// Risk consumed in the current accounting period.
///
/// Only `consume`, `reset` and `replay` change it.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskBudgetState {
    period_start: DateTime<Utc>,
    risk_used_pct: Decimal,
    applied: HashSet<Uuid>,

    /// Ids charged in the previous period, so a late confirmation of an
    /// earlier fill is not charged again after a reset
    carried: HashSet<Uuid>,
}

impl RiskBudgetState {
    /// A fresh period starting at `period_start`.
    pub fn new(period_start: DateTime<Utc>) -> Self {
        Self {
            period_start,
            risk_used_pct: Decimal::ZERO,
            applied: HashSet::new(),
            carried: HashSet::new(),
        }
    }

    /// Start a new accounting period. Driven by the caller, never by a clock.
    ///
    /// Ids from the period being closed stay known for one more period.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        info!(
            previous_start = %self.period_start,
            used = %self.risk_used_pct,
            "Risk budget period reset"
        );
        self.period_start = now;
        self.risk_used_pct = Decimal::ZERO;
        self.carried = std::mem::take(&mut self.applied);
    }

    /// Rebuild a period from persisted consumption events.
    ///
    /// Events recorded before `period_start` belong to an earlier period and
    /// are skipped. Duplicate ids count once.
    pub fn replay<'a>(
        period_start: DateTime<Utc>,
        events: impl IntoIterator<Item = &'a ConsumptionEvent>,
    ) -> Self {
        let mut state = Self::new(period_start);
        for event in events {
            if event.recorded_at < period_start || event.risk_pct <= Decimal::ZERO {
                continue;
            }
            if state.applied.insert(event.id) {
                state.risk_used_pct += event.risk_pct;
            }
        }
        state
    }

    pub fn period_start(&self) -> DateTime<Utc> {
        self.period_start
    }

    /// Fraction of balance consumed so far this period.
    pub fn risk_used_pct(&self) -> Decimal {
        self.risk_used_pct
    }

    pub fn has_applied(&self, event_id: &Uuid) -> bool {
        self.applied.contains(event_id)
    }

    /// Applied this period or in the period before it.
    pub fn is_known(&self, event_id: &Uuid) -> bool {
        self.applied.contains(event_id) || self.carried.contains(event_id)
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    /// Budget left under `max`, never negative.
    pub fn remaining(&self, max: Decimal) -> Decimal {
        (max - self.risk_used_pct).max(Decimal::ZERO)
    }
}

/// An accepted size, not yet charged to the budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSize {
    pub instrument: String,

    /// Lots after rounding to the step and clamping to [min, max]
    pub lots: Decimal,

    /// Half-Kelly fraction after the cap and confidence scaling
    pub target_risk_pct: Decimal,

    /// Fraction charged on fill: the larger of the target and the risk the
    /// final lots actually carry
    pub risk_pct: Decimal,

    /// Money at risk for `lots` at the stop
    pub risk_amount: Decimal,

    pub stop_distance: Decimal,
}

/// Why sizing produced no trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SizingRejection {
    UnknownInstrument { instrument: String },

    /// Kelly fraction is zero or negative
    NoEdge { kelly: f64 },

    /// Confidence scaled the risk fraction to zero
    NoConfidence,

    InsufficientBalance { balance: Decimal },

    /// The trade would push the period past its cap
    BudgetExhausted {
        used: Decimal,
        requested: Decimal,
        max: Decimal,
    },

    InvalidStopDistance { stop_distance: Decimal },

    InvalidMarketMetadata { reason: String },
}

impl std::fmt::Display for SizingRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownInstrument { instrument } => {
                write!(f, "no trading metadata for {instrument}")
            }
            Self::NoEdge { kelly } => write!(f, "no edge (kelly {kelly:.4})"),
            Self::NoConfidence => write!(f, "zero confidence"),
            Self::InsufficientBalance { balance } => write!(f, "balance {balance} not positive"),
            Self::BudgetExhausted {
                used,
                requested,
                max,
            } => write!(f, "budget exhausted: used {used} + {requested} > {max}"),
            Self::InvalidStopDistance { stop_distance } => {
                write!(f, "invalid stop distance {stop_distance}")
            }
            Self::InvalidMarketMetadata { reason } => write!(f, "invalid metadata: {reason}"),
        }
    }
}

/// Sizes positions and guards the period risk cap.
pub struct RiskBudgetManager {
    config: RiskConfig,
    instruments: HashMap<String, InstrumentSpec>,
}

impl RiskBudgetManager {
    pub fn new(config: RiskConfig, instruments: HashMap<String, InstrumentSpec>) -> Self {
        Self {
            config,
            instruments,
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn instrument(&self, symbol: &str) -> Option<&InstrumentSpec> {
        self.instruments.get(symbol)
    }

    /// Half-Kelly fraction before the cap: `(w - (1 - w) / R) * kelly_fraction`.
    pub fn kelly_fraction(&self, win_rate: f64) -> f64 {
        let w = if win_rate.is_finite() {
            win_rate.clamp(0.0, 1.0)
        } else {
            self.config.default_win_rate
        };
        let kelly = w - (1.0 - w) / self.config.reward_to_risk;
        kelly * self.config.kelly_fraction
    }

    /// Take-profit distance implied by the configured reward-to-risk ratio.
    pub fn take_profit_distance(&self, stop_distance: Decimal) -> Decimal {
        // reward_to_risk is validated finite and positive
        let ratio = Decimal::try_from(self.config.reward_to_risk).unwrap_or(Decimal::ONE);
        stop_distance * ratio
    }

    /// Compute a size for one trade against the current budget.
    ///
    /// Does not mutate `state`.
    pub fn size_position(
        &self,
        instrument: &str,
        stop_distance: Decimal,
        confidence: f64,
        balance: Decimal,
        win_rate: f64,
        state: &RiskBudgetState,
    ) -> Result<PositionSize, SizingRejection> {
        let spec = self
            .instruments
            .get(instrument)
            .ok_or_else(|| SizingRejection::UnknownInstrument {
                instrument: instrument.to_string(),
            })?;

        let kelly = self.kelly_fraction(win_rate);
        if kelly <= 0.0 {
            debug!(instrument = %instrument, kelly = kelly, "No edge, not sizing");
            return Err(SizingRejection::NoEdge { kelly });
        }

        let capped = Decimal::try_from(kelly)
            .unwrap_or(Decimal::ZERO)
            .min(self.config.max_risk_per_trade());
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let target = capped * Decimal::try_from(confidence).unwrap_or(Decimal::ZERO);
        if target <= Decimal::ZERO {
            return Err(SizingRejection::NoConfidence);
        }

        if balance <= Decimal::ZERO {
            return Err(SizingRejection::InsufficientBalance { balance });
        }

        self.check_budget(state, target)?;

        if stop_distance <= Decimal::ZERO {
            return self.fallback_size(spec, stop_distance, target, state, || {
                SizingRejection::InvalidStopDistance { stop_distance }
            });
        }

        let Some(risk_per_lot) = spec.risk_amount(Decimal::ONE, stop_distance) else {
            return self.fallback_size(spec, stop_distance, target, state, || {
                SizingRejection::InvalidMarketMetadata {
                    reason: format!(
                        "tick size {} / tick value {}",
                        spec.tick_size, spec.tick_value
                    ),
                }
            });
        };

        let raw_lots = balance * target / risk_per_lot;
        let lots = spec.normalize_volume(raw_lots);
        let risk_amount = risk_per_lot * lots;
        let effective = risk_amount / balance;
        let charged = target.max(effective);

        self.check_budget(state, charged)?;

        debug!(
            instrument = %instrument,
            kelly = kelly,
            target = %target,
            charged = %charged,
            raw_lots = %raw_lots,
            lots = %lots,
            "Position sized"
        );

        Ok(PositionSize {
            instrument: instrument.to_string(),
            lots,
            target_risk_pct: target,
            risk_pct: charged,
            risk_amount,
            stop_distance,
        })
    }

    /// Charge a confirmed fill to the budget.
    ///
    /// Fails with `DuplicateConsumption` when the event was already applied
    /// and `BudgetExceeded` when it would breach the cap; neither mutates
    /// `state`.
    pub fn consume(&self, state: &mut RiskBudgetState, event: &ConsumptionEvent) -> EngineResult<()> {
        if state.is_known(&event.id) {
            return Err(EngineError::DuplicateConsumption { event_id: event.id });
        }
        if event.risk_pct <= Decimal::ZERO {
            return Err(EngineError::InvalidConsumption {
                event_id: event.id,
                risk_pct: event.risk_pct,
            });
        }

        let max = self.config.max_daily_risk;
        if state.risk_used_pct + event.risk_pct > max {
            warn!(
                instrument = %event.instrument,
                used = %state.risk_used_pct,
                requested = %event.risk_pct,
                max = %max,
                "Refusing consumption beyond period cap"
            );
            return Err(EngineError::BudgetExceeded {
                used: state.risk_used_pct,
                requested: event.risk_pct,
                max,
            });
        }

        state.applied.insert(event.id);
        state.risk_used_pct += event.risk_pct;

        info!(
            instrument = %event.instrument,
            event_id = %event.id,
            risk = %event.risk_pct,
            used = %state.risk_used_pct,
            "Risk budget consumed"
        );
        Ok(())
    }

    fn check_budget(&self, state: &RiskBudgetState, requested: Decimal) -> Result<(), SizingRejection> {
        let max = self.config.max_daily_risk;
        if state.risk_used_pct + requested > max {
            debug!(
                used = %state.risk_used_pct,
                requested = %requested,
                max = %max,
                "Risk budget exhausted"
            );
            return Err(SizingRejection::BudgetExhausted {
                used: state.risk_used_pct,
                requested,
                max,
            });
        }
        Ok(())
    }

    /// Minimum size when lots cannot be derived, if configured to trade at all.
    fn fallback_size(
        &self,
        spec: &InstrumentSpec,
        stop_distance: Decimal,
        target: Decimal,
        state: &RiskBudgetState,
        rejection: impl FnOnce() -> SizingRejection,
    ) -> Result<PositionSize, SizingRejection> {
        let rejection = rejection();
        if !self.config.min_size_on_invalid_metadata {
            warn!(instrument = %spec.symbol, reason = %rejection, "Sizing rejected");
            return Err(rejection);
        }

        self.check_budget(state, target)?;
        warn!(
            instrument = %spec.symbol,
            reason = %rejection,
            lots = %spec.volume_min,
            "Falling back to minimum size"
        );

        Ok(PositionSize {
            instrument: spec.symbol.clone(),
            lots: spec.volume_min,
            target_risk_pct: target,
            risk_pct: target,
            risk_amount: Decimal::ZERO,
            stop_distance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn manager() -> RiskBudgetManager {
        let instruments = [
            InstrumentSpec::forex_major("EURUSD"),
            InstrumentSpec::forex_jpy("USDJPY"),
        ]
        .into_iter()
        .map(|s| (s.symbol.clone(), s))
        .collect();
        RiskBudgetManager::new(RiskConfig::default(), instruments)
    }

    fn state_with_used(mgr: &RiskBudgetManager, used: Decimal) -> RiskBudgetState {
        let mut state = RiskBudgetState::new(Utc::now());
        if used > Decimal::ZERO {
            mgr.consume(&mut state, &ConsumptionEvent::new("GBPUSD", used, Utc::now()))
                .unwrap();
        }
        state
    }

    #[test]
    fn test_half_kelly_capped_and_scaled() {
        let mgr = manager();
        assert!((mgr.kelly_fraction(0.55) - 0.1625).abs() < 1e-12);

        let state = RiskBudgetState::new(Utc::now());
        let size = mgr
            .size_position("EURUSD", dec!(0.0020), 0.8, dec!(10000), 0.55, &state)
            .unwrap();

        assert_eq!(size.target_risk_pct, dec!(0.008));
        assert_eq!(size.risk_pct, dec!(0.008));
        // $80 at risk over a 200 point stop at $1/point/lot
        assert_eq!(size.lots, dec!(0.4));
        assert_eq!(size.risk_amount, dec!(80));
    }

    #[test]
    fn test_negative_kelly_does_not_trade() {
        let state = RiskBudgetState::new(Utc::now());
        let result = manager().size_position("EURUSD", dec!(0.0020), 1.0, dec!(10000), 0.2, &state);
        assert!(matches!(result, Err(SizingRejection::NoEdge { kelly }) if kelly < 0.0));
    }

    #[test]
    fn test_budget_exhausted_leaves_state_untouched() {
        let mgr = manager();
        let state = state_with_used(&mgr, dec!(0.015));
        let before = state.clone();

        let result = mgr.size_position("EURUSD", dec!(0.0020), 0.8, dec!(10000), 0.55, &state);
        assert_eq!(
            result,
            Err(SizingRejection::BudgetExhausted {
                used: dec!(0.015),
                requested: dec!(0.008),
                max: dec!(0.02),
            })
        );
        assert_eq!(state, before);
    }

    #[test]
    fn test_budget_exactly_filled_is_allowed() {
        let mgr = manager();
        let state = state_with_used(&mgr, dec!(0.012));
        let size = mgr
            .size_position("EURUSD", dec!(0.0020), 0.8, dec!(10000), 0.55, &state)
            .unwrap();
        assert_eq!(state.risk_used_pct() + size.risk_pct, dec!(0.02));
    }

    #[test]
    fn test_clamp_up_charges_effective_risk() {
        // $1000 balance, 100 pip stop: target $8 buys 0.008 lots, rounded up to 0.01 = $10
        let mgr = manager();
        let state = RiskBudgetState::new(Utc::now());
        let size = mgr
            .size_position("EURUSD", dec!(0.0100), 0.8, dec!(1000), 0.55, &state)
            .unwrap();
        assert_eq!(size.lots, dec!(0.01));
        assert_eq!(size.risk_amount, dec!(10));
        assert_eq!(size.target_risk_pct, dec!(0.008));
        assert_eq!(size.risk_pct, dec!(0.01));

        // 200 pip stop: the minimum lot risks 2% on its own
        let result = mgr.size_position("EURUSD", dec!(0.0200), 0.8, dec!(1000), 0.55, &state);
        let size = result.unwrap();
        assert_eq!(size.risk_pct, dec!(0.02));

        let partly_used = state_with_used(&mgr, dec!(0.005));
        let result =
            mgr.size_position("EURUSD", dec!(0.0200), 0.8, dec!(1000), 0.55, &partly_used);
        assert!(matches!(result, Err(SizingRejection::BudgetExhausted { .. })));
    }

    #[test]
    fn test_zero_stop_and_unknown_instrument() {
        let mgr = manager();
        let state = RiskBudgetState::new(Utc::now());

        let result = mgr.size_position("EURUSD", Decimal::ZERO, 0.8, dec!(10000), 0.55, &state);
        assert!(matches!(result, Err(SizingRejection::InvalidStopDistance { .. })));

        let result = mgr.size_position("XAUUSD", dec!(1), 0.8, dec!(10000), 0.55, &state);
        assert!(matches!(result, Err(SizingRejection::UnknownInstrument { .. })));
    }

    #[test]
    fn test_invalid_ticks_fall_back_to_minimum_when_configured() {
        let broken = InstrumentSpec {
            tick_value: Decimal::ZERO,
            ..InstrumentSpec::forex_major("EURUSD")
        };
        let instruments: HashMap<_, _> = [("EURUSD".to_string(), broken)].into_iter().collect();
        let state = RiskBudgetState::new(Utc::now());

        let strict = RiskBudgetManager::new(RiskConfig::default(), instruments.clone());
        let result = strict.size_position("EURUSD", dec!(0.0020), 0.8, dec!(10000), 0.55, &state);
        assert!(matches!(result, Err(SizingRejection::InvalidMarketMetadata { .. })));

        let lenient = RiskBudgetManager::new(
            RiskConfig {
                min_size_on_invalid_metadata: true,
                ..RiskConfig::default()
            },
            instruments,
        );
        let size = lenient
            .size_position("EURUSD", dec!(0.0020), 0.8, dec!(10000), 0.55, &state)
            .unwrap();
        assert_eq!(size.lots, dec!(0.01));
        assert_eq!(size.risk_pct, dec!(0.008));
    }

    #[test]
    fn test_consume_is_exactly_once() {
        let mgr = manager();
        let mut state = RiskBudgetState::new(Utc::now());
        let event = ConsumptionEvent::new("EURUSD", dec!(0.008), Utc::now());

        mgr.consume(&mut state, &event).unwrap();
        assert!(matches!(
            mgr.consume(&mut state, &event),
            Err(EngineError::DuplicateConsumption { .. })
        ));
        assert_eq!(state.risk_used_pct(), dec!(0.008));
        assert!(state.has_applied(&event.id));
    }

    #[test]
    fn test_consume_refuses_to_breach_cap() {
        let mgr = manager();
        let mut state = state_with_used(&mgr, dec!(0.015));
        let event = ConsumptionEvent::new("EURUSD", dec!(0.006), Utc::now());

        assert!(matches!(
            mgr.consume(&mut state, &event),
            Err(EngineError::BudgetExceeded { .. })
        ));
        assert_eq!(state.risk_used_pct(), dec!(0.015));
        assert_eq!(state.remaining(dec!(0.02)), dec!(0.005));
    }

    #[test]
    fn test_reset_and_replay() {
        let start = Utc::now();
        let earlier = start - chrono::Duration::hours(30);
        let a = ConsumptionEvent::new("EURUSD", dec!(0.004), start);
        let b = ConsumptionEvent::new("GBPUSD", dec!(0.006), start);
        let stale = ConsumptionEvent::new("AUDUSD", dec!(0.01), earlier);

        let state = RiskBudgetState::replay(start, [&a, &b, &a, &stale]);
        assert_eq!(state.risk_used_pct(), dec!(0.010));
        assert_eq!(state.applied_count(), 2);

        let mut state = state;
        state.reset(start + chrono::Duration::days(1));
        assert_eq!(state.risk_used_pct(), Decimal::ZERO);
        assert!(!state.has_applied(&a.id));
        assert!(state.is_known(&a.id));
    }

    #[test]
    fn test_late_confirmation_after_reset_not_recharged() {
        let mgr = manager();
        let start = Utc::now();
        let mut state = RiskBudgetState::new(start);
        let fill = ConsumptionEvent::new("EURUSD", dec!(0.005), start);
        mgr.consume(&mut state, &fill).unwrap();

        state.reset(start + chrono::Duration::days(1));
        assert!(matches!(
            mgr.consume(&mut state, &fill),
            Err(EngineError::DuplicateConsumption { .. })
        ));
        assert_eq!(state.risk_used_pct(), Decimal::ZERO);

        // Two resets later the id is forgotten
        state.reset(start + chrono::Duration::days(2));
        assert!(!state.is_known(&fill.id));
    }

    proptest! {
        #[test]
        fn prop_sized_trade_never_breaches_cap(
            used_bp in 0i64..=200,
            balance in 50i64..500_000,
            stop_points in 1i64..5_000,
            confidence in 0.0f64..=1.0,
            win_rate in 0.0f64..=1.0,
        ) {
            let mgr = manager();
            let used = Decimal::new(used_bp, 4);
            let mut state = state_with_used(&mgr, used);
            let stop = Decimal::new(stop_points, 5);

            if let Ok(size) = mgr.size_position(
                "EURUSD", stop, confidence, Decimal::from(balance), win_rate, &state,
            ) {
                prop_assert!(size.lots >= dec!(0.01) && size.lots <= dec!(100));
                prop_assert!(size.risk_pct >= size.target_risk_pct);

                let event = ConsumptionEvent::new("EURUSD", size.risk_pct, Utc::now());
                prop_assert!(mgr.consume(&mut state, &event).is_ok());
                prop_assert!(state.risk_used_pct() <= mgr.config().max_daily_risk);
            }
        }
    }
}
