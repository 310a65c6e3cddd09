//! Engine module - the public memory API.

mod main;
mod types;

pub use main::MemoryEngine;
pub use types::{
    AddRequest, ConfidenceLabel, EngineStats, RecallOptions, RecallResult, RewardReport,
};
