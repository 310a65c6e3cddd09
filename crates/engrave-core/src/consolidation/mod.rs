//! Consolidation: moving records between retention tiers and applying decay.
//!
//! Working records that stay active are promoted to core, core records that
//! fade are demoted to archive, stability and link strengths decay with time,
//! and records whose retrievability drops below the threshold are forgotten.

mod engine;
mod scheduler;

pub use engine::{ConsolidationEngine, ConsolidationReport, ForgetReport};
pub use scheduler::{ConsolidationScheduler, SchedulerConfig};
