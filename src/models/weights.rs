//! Strategy weight allocation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

use super::StrategyId;

/// Tolerance used when checking that weights sum to one.
pub const WEIGHT_TOLERANCE: f64 = 1e-9;

/// Fractional influence of each strategy on the consensus.
///
/// Every stored weight is in [0, 1]. A normalized set sums to 1.0.
/// Deserialization rejects out-of-range values instead of clamping them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<StrategyId, f64>",
    into = "BTreeMap<StrategyId, f64>"
)]
pub struct StrategyWeights(BTreeMap<StrategyId, f64>);

impl StrategyWeights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from pairs, clamping every weight into [0, 1].
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (StrategyId, f64)>,
    {
        let mut weights = Self::new();
        for (id, w) in pairs {
            weights.set(id, w);
        }
        weights
    }

    pub fn set(&mut self, id: StrategyId, weight: f64) {
        let weight = if weight.is_finite() {
            weight.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.0.insert(id, weight);
    }

    /// Weight of a strategy; unknown strategies carry no weight.
    pub fn get(&self, id: StrategyId) -> f64 {
        self.0.get(&id).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StrategyId, f64)> + '_ {
        self.0.iter().map(|(id, w)| (*id, *w))
    }

    pub fn strategies(&self) -> impl Iterator<Item = StrategyId> + '_ {
        self.0.keys().copied()
    }

    pub fn is_normalized(&self) -> bool {
        (self.total() - 1.0).abs() <= WEIGHT_TOLERANCE
    }

    /// Scale all weights so they sum to 1.0.
    pub fn normalized(&self) -> EngineResult<Self> {
        let total = self.total();
        if total <= 0.0 || !total.is_finite() {
            return Err(EngineError::InvalidWeights {
                reason: format!("total weight {total} cannot be normalized"),
            });
        }
        Ok(Self(
            self.0.iter().map(|(id, w)| (*id, *w / total)).collect(),
        ))
    }

    /// Fail if any weight is non-finite or outside [0, 1].
    pub fn check_bounds(&self) -> EngineResult<()> {
        match self.0.iter().find(|(_, w)| !(w.is_finite() && (0.0..=1.0).contains(*w))) {
            Some((id, w)) => Err(EngineError::InvalidWeights {
                reason: format!("weight {w} for {id} outside [0, 1]"),
            }),
            None => Ok(()),
        }
    }

    /// Fail unless the weights sum to 1.0 within tolerance.
    pub fn validate(&self) -> EngineResult<()> {
        self.check_bounds()?;
        if self.is_normalized() {
            Ok(())
        } else {
            Err(EngineError::InvalidWeights {
                reason: format!("weights sum to {:.12}, expected 1.0", self.total()),
            })
        }
    }
}

impl FromIterator<(StrategyId, f64)> for StrategyWeights {
    fn from_iter<T: IntoIterator<Item = (StrategyId, f64)>>(iter: T) -> Self {
        Self::from_pairs(iter)
    }
}

impl TryFrom<BTreeMap<StrategyId, f64>> for StrategyWeights {
    type Error = EngineError;

    fn try_from(map: BTreeMap<StrategyId, f64>) -> EngineResult<Self> {
        let weights = Self(map);
        weights.check_bounds()?;
        Ok(weights)
    }
}

impl From<StrategyWeights> for BTreeMap<StrategyId, f64> {
    fn from(weights: StrategyWeights) -> Self {
        weights.0
    }
}
