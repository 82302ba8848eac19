//! Instrument trading metadata and account snapshot.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Tick economics and tradable size limits of an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    /// Symbol (e.g. "EURUSD")
    pub symbol: String,

    /// Minimum price increment
    pub tick_size: Decimal,

    /// Account-currency value of one tick for one lot
    pub tick_value: Decimal,

    /// Allowed size increment
    pub volume_step: Decimal,

    /// Smallest tradable size
    pub volume_min: Decimal,

    /// Largest tradable size
    pub volume_max: Decimal,
}

impl InstrumentSpec {
    /// Standard FX lot economics: 5-digit pricing, $1 per point per lot.
    pub fn forex_major(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            tick_size: dec!(0.00001),
            tick_value: dec!(1),
            volume_step: dec!(0.01),
            volume_min: dec!(0.01),
            volume_max: dec!(100),
        }
    }

    /// JPY-quoted pairs use 3-digit pricing.
    pub fn forex_jpy(symbol: impl Into<String>) -> Self {
        Self {
            tick_size: dec!(0.001),
            tick_value: dec!(0.67),
            ..Self::forex_major(symbol)
        }
    }

    /// Tick size and value are both strictly positive.
    pub fn has_valid_ticks(&self) -> bool {
        self.tick_size > Decimal::ZERO && self.tick_value > Decimal::ZERO
    }

    /// Round to the nearest allowed increment, then clamp to [min, max].
    pub fn normalize_volume(&self, lots: Decimal) -> Decimal {
        let stepped = if self.volume_step > Decimal::ZERO {
            (lots / self.volume_step).round() * self.volume_step
        } else {
            lots
        };
        stepped.max(self.volume_min).min(self.volume_max)
    }

    /// Money at risk for `lots` with a stop `stop_distance` away.
    pub fn risk_amount(&self, lots: Decimal, stop_distance: Decimal) -> Option<Decimal> {
        if !self.has_valid_ticks() {
            return None;
        }
        Some(lots * (stop_distance / self.tick_size) * self.tick_value)
    }
}

/// Account snapshot supplied by the caller each cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    /// Account balance in account currency
    pub balance: Decimal,

    /// Estimated probability that a new trade wins, for Kelly sizing
    pub win_rate_estimate: f64,
}

impl AccountState {
    pub fn new(balance: Decimal, win_rate_estimate: f64) -> Self {
        Self {
            balance,
            win_rate_estimate,
        }
    }
}
