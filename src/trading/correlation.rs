//! Correlation guard: blocks trades that double up correlated exposure.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::metrics::{MetricsCalculator, ReturnHistory};
use crate::models::{CandidateTrade, OpenPosition};

use super::config::CorrelationConfig;

/// Which concentration rule rejected a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationRule {
    /// Positively correlated pair in the same direction
    SameDirection,
    /// Negatively correlated pair in opposite directions
    InverseOpposite,
}

/// A rejection with the competing position identified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationConflict {
    pub conflicting_instrument: String,
    pub correlation: f64,
    pub threshold: f64,
    pub overlap: usize,
    pub rule: CorrelationRule,
}

/// Outcome of checking a candidate against all open positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CorrelationVerdict {
    Allowed,
    Rejected(CorrelationConflict),
}

impl CorrelationVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, CorrelationVerdict::Allowed)
    }
}

/// Result of comparing the candidate with one position.
#[derive(Debug, Clone, PartialEq)]
pub enum PairCheck {
    /// Not enough aligned history; treated as uncorrelated
    Skipped { overlap: usize },
    Allowed { correlation: f64 },
    Rejected(CorrelationConflict),
}

/// Rejects candidates highly correlated with existing exposure.
pub struct CorrelationGuard {
    config: CorrelationConfig,
}

impl CorrelationGuard {
    pub fn new(config: CorrelationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Check the candidate against every open position on another instrument.
    ///
    /// The first rejecting pair short-circuits. Pairs without enough aligned
    /// history are skipped (fail open).
    pub fn allow(
        &self,
        candidate: &CandidateTrade,
        open_positions: &[OpenPosition],
        history: &dyn ReturnHistory,
    ) -> CorrelationVerdict {
        for position in open_positions {
            if position.instrument == candidate.instrument {
                continue;
            }

            match self.check_pair(candidate, position, history) {
                PairCheck::Rejected(conflict) => {
                    info!(
                        candidate = %candidate.instrument,
                        direction = %candidate.direction,
                        conflicting = %conflict.conflicting_instrument,
                        correlation = conflict.correlation,
                        rule = ?conflict.rule,
                        "Correlation guard rejected candidate"
                    );
                    return CorrelationVerdict::Rejected(conflict);
                }
                PairCheck::Skipped { overlap } => {
                    debug!(
                        candidate = %candidate.instrument,
                        position = %position.instrument,
                        overlap = overlap,
                        min_overlap = self.config.min_overlap,
                        "Insufficient overlap, pair treated as uncorrelated"
                    );
                }
                PairCheck::Allowed { correlation } => {
                    debug!(
                        candidate = %candidate.instrument,
                        position = %position.instrument,
                        correlation = correlation,
                        "Pair allowed"
                    );
                }
            }
        }

        CorrelationVerdict::Allowed
    }

    /// Compare the candidate with a single open position.
    pub fn check_pair(
        &self,
        candidate: &CandidateTrade,
        position: &OpenPosition,
        history: &dyn ReturnHistory,
    ) -> PairCheck {
        let lookback = self.config.lookback_bars;

        let (Some(a), Some(b)) = (
            history.returns(&candidate.instrument, lookback),
            history.returns(position.series_key(), lookback),
        ) else {
            return PairCheck::Skipped { overlap: 0 };
        };

        let a = MetricsCalculator::tail(&a, lookback);
        let b = MetricsCalculator::tail(&b, lookback);
        let (xs, ys) = MetricsCalculator::align(a, b);

        if xs.len() < self.config.min_overlap {
            return PairCheck::Skipped { overlap: xs.len() };
        }

        let Some(correlation) = MetricsCalculator::pearson(&xs, &ys) else {
            return PairCheck::Skipped { overlap: xs.len() };
        };

        let threshold = self.config.max_correlation;
        let same = candidate.direction == position.direction;

        let rule = if correlation > threshold && same {
            Some(CorrelationRule::SameDirection)
        } else if correlation < -threshold && !same {
            Some(CorrelationRule::InverseOpposite)
        } else {
            None
        };

        match rule {
            Some(rule) => PairCheck::Rejected(CorrelationConflict {
                conflicting_instrument: position.instrument.clone(),
                correlation,
                threshold,
                overlap: xs.len(),
                rule,
            }),
            None => PairCheck::Allowed { correlation },
        }
    }
}

impl Default for CorrelationGuard {
    fn default() -> Self {
        Self::new(CorrelationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::PriceHistory;
    use crate::models::Direction;
    use chrono::{DateTime, Duration, Utc};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    /// Deterministic wiggly returns.
    fn base_returns(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| ((i as f64) * 0.7).sin() * 0.004 + ((i as f64) * 1.3).cos() * 0.002)
            .collect()
    }

    fn closes_from(returns: &[f64], offset_hours: i64) -> Vec<(DateTime<Utc>, f64)> {
        let mut price = 1.0;
        let mut closes = vec![(t0() + Duration::hours(offset_hours), price)];
        for (i, r) in returns.iter().enumerate() {
            price *= 1.0 + r;
            closes.push((t0() + Duration::hours(offset_hours + i as i64 + 1), price));
        }
        closes
    }

    /// EURUSD and a second series built as `a * base + b * noise`.
    fn history_with(second: &str, mix: impl Fn(f64, f64) -> f64, n: usize) -> PriceHistory {
        let base = base_returns(n);
        let noise: Vec<f64> = (0..n).map(|i| ((i as f64) * 2.9).sin() * 0.003).collect();
        let other: Vec<f64> = base.iter().zip(&noise).map(|(b, e)| mix(*b, *e)).collect();

        let mut history = PriceHistory::new();
        history.insert("EURUSD", closes_from(&base, 0));
        history.insert(second, closes_from(&other, 0));
        history
    }

    #[test]
    fn test_identical_series_same_direction_rejected() {
        let history = history_with("GBPUSD", |b, _| b, 120);
        let guard = CorrelationGuard::default();

        let verdict = guard.allow(
            &CandidateTrade::new("EURUSD", Direction::Long),
            &[OpenPosition::new("GBPUSD", Direction::Long)],
            &history,
        );

        match verdict {
            CorrelationVerdict::Rejected(conflict) => {
                assert_eq!(conflict.conflicting_instrument, "GBPUSD");
                assert_eq!(conflict.rule, CorrelationRule::SameDirection);
                assert!(conflict.correlation > 0.99);
                assert_eq!(conflict.overlap, 100);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_correlated_opposite_direction_allowed() {
        let history = history_with("GBPUSD", |b, _| b, 120);
        let verdict = CorrelationGuard::default().allow(
            &CandidateTrade::new("EURUSD", Direction::Short),
            &[OpenPosition::new("GBPUSD", Direction::Long)],
            &history,
        );
        assert!(verdict.is_allowed());
    }

    #[test]
    fn test_inverse_pair_opposite_direction_rejected() {
        let history = history_with("USDCHF", |b, _| -b, 120);
        let verdict = CorrelationGuard::default().allow(
            &CandidateTrade::new("EURUSD", Direction::Long),
            &[OpenPosition::new("USDCHF", Direction::Short)],
            &history,
        );
        assert!(matches!(
            verdict,
            CorrelationVerdict::Rejected(CorrelationConflict {
                rule: CorrelationRule::InverseOpposite,
                ..
            })
        ));
    }

    #[test]
    fn test_strong_but_imperfect_correlation_rejected() {
        // Base plus some noise: r around 0.85
        let history = history_with("GBPUSD", |b, e| b + 0.9 * e, 120);
        let verdict = CorrelationGuard::default().allow(
            &CandidateTrade::new("EURUSD", Direction::Long),
            &[
                OpenPosition::new("USDJPY", Direction::Long),
                OpenPosition::new("GBPUSD", Direction::Long),
            ],
            &history,
        );

        match verdict {
            CorrelationVerdict::Rejected(conflict) => {
                assert_eq!(conflict.conflicting_instrument, "GBPUSD");
                assert_eq!(conflict.rule, CorrelationRule::SameDirection);
                assert!(conflict.correlation > 0.80 && conflict.correlation < 0.90);
                assert!(conflict.correlation > conflict.threshold);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_correlation_at_threshold_allowed() {
        let history = history_with("GBPUSD", |b, e| b + 0.9 * e, 120);
        let candidate = CandidateTrade::new("EURUSD", Direction::Long);
        let position = OpenPosition::new("GBPUSD", Direction::Long);

        let correlation = match CorrelationGuard::default().check_pair(&candidate, &position, &history) {
            PairCheck::Rejected(conflict) => conflict.correlation,
            other => panic!("expected rejection, got {other:?}"),
        };

        // The rule is strict: |r| equal to the limit passes
        let guard = CorrelationGuard::new(CorrelationConfig {
            max_correlation: correlation,
            ..CorrelationConfig::default()
        });
        assert!(matches!(
            guard.check_pair(&candidate, &position, &history),
            PairCheck::Allowed { .. }
        ));
    }

    #[test]
    fn test_moderate_correlation_allowed() {
        // Mostly noise: correlation well below 0.7
        let history = history_with("AUDUSD", |b, e| 0.2 * b + e, 120);
        let guard = CorrelationGuard::default();
        let check = guard.check_pair(
            &CandidateTrade::new("EURUSD", Direction::Long),
            &OpenPosition::new("AUDUSD", Direction::Long),
            &history,
        );
        match check {
            PairCheck::Allowed { correlation } => assert!(correlation.abs() < 0.7),
            other => panic!("expected allowed pair, got {other:?}"),
        }
    }

    #[test]
    fn test_insufficient_overlap_fails_open() {
        // Only 30 returns: below the 50 point minimum
        let history = history_with("GBPUSD", |b, _| b, 30);
        let verdict = CorrelationGuard::default().allow(
            &CandidateTrade::new("EURUSD", Direction::Long),
            &[OpenPosition::new("GBPUSD", Direction::Long)],
            &history,
        );
        assert!(verdict.is_allowed());
    }

    #[test]
    fn test_misaligned_timestamps_fail_open() {
        let base = base_returns(120);
        let mut history = PriceHistory::new();
        history.insert("EURUSD", closes_from(&base, 0));
        // Same shape, shifted 500 hours: no common timestamps
        history.insert("GBPUSD", closes_from(&base, 500));

        let verdict = CorrelationGuard::default().allow(
            &CandidateTrade::new("EURUSD", Direction::Long),
            &[OpenPosition::new("GBPUSD", Direction::Long)],
            &history,
        );
        assert!(verdict.is_allowed());
    }

    #[test]
    fn test_same_instrument_and_missing_history_skipped() {
        let history = history_with("GBPUSD", |b, _| b, 120);
        let verdict = CorrelationGuard::default().allow(
            &CandidateTrade::new("EURUSD", Direction::Long),
            &[
                OpenPosition::new("EURUSD", Direction::Long),
                OpenPosition::new("XAUUSD", Direction::Long),
            ],
            &history,
        );
        assert!(verdict.is_allowed());
    }

    #[test]
    fn test_series_ref_used_for_lookup() {
        let history = history_with("GBPUSD.H1", |b, _| b, 120);
        let mut position = OpenPosition::new("GBPUSD", Direction::Long);
        position.return_series_ref = Some("GBPUSD.H1".to_string());

        let verdict = CorrelationGuard::default().allow(
            &CandidateTrade::new("EURUSD", Direction::Long),
            &[position],
            &history,
        );
        assert!(!verdict.is_allowed());
    }
}
