//! Adaptive parameter tuning.
//!
//! The tuner watches recall hit rate, reward ratio and forget rate, and
//! periodically nudges the shared parameter set by a small bounded step.

mod state;
mod tuner;

pub use state::{TuningMetrics, TuningReport, TuningState};
pub use tuner::{AdaptiveTuner, TuningBounds};
