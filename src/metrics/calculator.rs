//! Statistics used by the decision core: returns, alignment, correlation, win rate.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use statrs::statistics::Statistics;

use crate::models::TradeOutcome;

/// Time-stamped simple returns, oldest first.
pub type ReturnSeries = Vec<(DateTime<Utc>, f64)>;

/// Calculator for the statistics the core needs.
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Close-to-close simple returns from time-stamped closes.
    ///
    /// Each return is stamped with the later bar's timestamp. Non-positive
    /// previous closes produce no return.
    pub fn simple_returns(closes: &[(DateTime<Utc>, f64)]) -> ReturnSeries {
        let mut sorted: Vec<_> = closes.to_vec();
        sorted.sort_by_key(|(ts, _)| *ts);

        sorted
            .windows(2)
            .filter_map(|w| {
                let (_, prev) = w[0];
                let (ts, close) = w[1];
                if prev > 0.0 && prev.is_finite() && close.is_finite() {
                    Some((ts, close / prev - 1.0))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Keep only the most recent `lookback` points.
    pub fn tail(series: &[(DateTime<Utc>, f64)], lookback: usize) -> &[(DateTime<Utc>, f64)] {
        let start = series.len().saturating_sub(lookback);
        &series[start..]
    }

    /// Restrict two series to their common timestamps.
    ///
    /// Returns paired values in timestamp order.
    pub fn align(
        a: &[(DateTime<Utc>, f64)],
        b: &[(DateTime<Utc>, f64)],
    ) -> (Vec<f64>, Vec<f64>) {
        let lookup: HashMap<DateTime<Utc>, f64> = b.iter().copied().collect();

        let mut pairs: Vec<(DateTime<Utc>, f64, f64)> = a
            .iter()
            .filter_map(|(ts, x)| lookup.get(ts).map(|y| (*ts, *x, *y)))
            .collect();
        pairs.sort_by_key(|(ts, _, _)| *ts);
        pairs.dedup_by_key(|(ts, _, _)| *ts);

        pairs.into_iter().map(|(_, x, y)| (x, y)).unzip()
    }

    /// Pearson correlation of two equal-length samples.
    ///
    /// `None` when fewer than two points or either side has zero variance.
    pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
        if xs.len() != ys.len() || xs.len() < 2 {
            return None;
        }

        let sd_x = xs.iter().std_dev();
        let sd_y = ys.iter().std_dev();
        if !(sd_x.is_finite() && sd_y.is_finite()) || sd_x == 0.0 || sd_y == 0.0 {
            return None;
        }

        let cov = xs.iter().covariance(ys.iter());
        let r = cov / (sd_x * sd_y);
        r.is_finite().then(|| r.clamp(-1.0, 1.0))
    }

    /// Win rate over the most recent `lookback` outcomes.
    ///
    /// `None` when there are no outcomes to judge.
    pub fn recent_win_rate(outcomes: &[TradeOutcome], lookback: usize) -> Option<f64> {
        if outcomes.is_empty() || lookback == 0 {
            return None;
        }

        let mut recent: Vec<&TradeOutcome> = outcomes.iter().collect();
        recent.sort_by(|a, b| b.closed_at.cmp(&a.closed_at));
        recent.truncate(lookback);

        let wins = recent.iter().filter(|o| o.is_win()).count();
        Some(wins as f64 / recent.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StrategyId;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn stamped(values: &[f64]) -> Vec<(DateTime<Utc>, f64)> {
        let t0 = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (t0 + Duration::hours(i as i64), *v))
            .collect()
    }

    #[test]
    fn test_simple_returns() {
        let returns = MetricsCalculator::simple_returns(&stamped(&[100.0, 110.0, 99.0]));
        assert_eq!(returns.len(), 2);
        assert!((returns[0].1 - 0.10).abs() < 1e-12);
        assert!((returns[1].1 + 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_align_intersection() {
        let a = stamped(&[1.0, 2.0, 3.0, 4.0]);
        let b: Vec<_> = stamped(&[10.0, 20.0, 30.0, 40.0])
            .into_iter()
            .skip(2)
            .collect();

        let (xs, ys) = MetricsCalculator::align(&a, &b);
        assert_eq!(xs, vec![3.0, 4.0]);
        assert_eq!(ys, vec![30.0, 40.0]);
    }

    #[test]
    fn test_pearson_perfect_and_inverse() {
        let xs = [0.01, -0.02, 0.03, 0.005, -0.01];
        let ys: Vec<f64> = xs.iter().map(|x| 2.0 * x + 0.001).collect();
        let inv: Vec<f64> = xs.iter().map(|x| -x).collect();

        assert!((MetricsCalculator::pearson(&xs, &ys).unwrap() - 1.0).abs() < 1e-9);
        assert!((MetricsCalculator::pearson(&xs, &inv).unwrap() + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pearson_zero_variance() {
        let flat = [0.0; 10];
        let xs = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0];
        assert!(MetricsCalculator::pearson(&flat, &xs).is_none());
        assert!(MetricsCalculator::pearson(&[0.1], &[0.2]).is_none());
    }

    #[test]
    fn test_recent_win_rate_uses_latest() {
        let t0 = Utc::now();
        let outcomes = vec![
            // Old losses fall outside the lookback
            TradeOutcome::new(StrategyId::MomentumBreakout, dec!(-10), t0 - Duration::days(3)),
            TradeOutcome::new(StrategyId::MomentumBreakout, dec!(-10), t0 - Duration::days(2)),
            TradeOutcome::new(StrategyId::MomentumBreakout, dec!(25), t0 - Duration::hours(2)),
            TradeOutcome::new(StrategyId::MomentumBreakout, dec!(5), t0 - Duration::hours(1)),
        ];

        assert_eq!(MetricsCalculator::recent_win_rate(&outcomes, 2), Some(1.0));
        assert_eq!(MetricsCalculator::recent_win_rate(&outcomes, 50), Some(0.5));
        assert_eq!(MetricsCalculator::recent_win_rate(&[], 50), None);
    }
}
