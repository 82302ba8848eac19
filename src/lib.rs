//! Multi-strategy trading decision core.
//!
//! Strategies vote on a direction, the votes are weighted by realized
//! performance, candidates correlated with open exposure are blocked, and
//! accepted trades are sized by capped half-Kelly against a per-period risk
//! budget. The core returns decisions; execution and market data live outside.

pub mod db;
pub mod error;
pub mod metrics;
pub mod models;
pub mod strategy;
pub mod trading;

pub use error::{EngineError, EngineResult};
