//! Prediction engine (component 4.F): closed-form and streaming estimators
//! over retained trace durations, plus the whole-trace projection built on
//! top of them.

mod accumulator;
mod engine;
mod stats;

pub use accumulator::{Accumulator, PERCENTILE_BUFFER_CAP};
pub use engine::{PredictorEngine, DEFAULT_MIN_RECOMPUTE_INTERVAL_SECONDS};
pub use stats::{arithmetic_mean, geometric_mean, harmonic_mean, ols, percentile};
