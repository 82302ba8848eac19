//! Data models for opinions, weights, positions, outcomes and market data.

mod features;
mod instrument;
mod opinion;
mod outcome;
mod position;
mod weights;

pub use features::{require, Bar, FeatureWindow};
pub use instrument::{AccountState, InstrumentSpec};
pub use opinion::{Direction, Opinion, StrategyId};
pub use outcome::{ConsumptionEvent, TradeOutcome};
pub use position::{CandidateTrade, OpenPosition};
pub use weights::{StrategyWeights, WEIGHT_TOLERANCE};
