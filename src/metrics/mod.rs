//! Statistics and return history for correlation and win-rate tracking.

mod calculator;
mod history;

pub use calculator::{MetricsCalculator, ReturnSeries};
pub use history::{PriceHistory, ReturnHistory};
