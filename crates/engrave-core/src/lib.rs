//! engrave-core - memory dynamics for autonomous agents.
//!
//! This crate decides which stored facts resurface for a query, how their
//! relevance evolves with time and use, how associations between facts form,
//! and which facts are eventually discarded.
//!
//! # Example
//!
//! ```ignore
//! use engrave_core::{Category, EngineConfig, MemoryEngine, RecallOptions, RewardSignal};
//!
//! let engine = MemoryEngine::in_memory(EngineConfig::default())?;
//!
//! // Add a memory
//! let id = engine.add("likes tea", Category::Preference, 0.8).await?;
//!
//! // Recall, then tell the engine the answer was useful
//! let results = engine.recall("tea", RecallOptions::default()).await?;
//! engine.reward(RewardSignal::Positive).await?;
//!
//! // Periodic maintenance
//! let report = engine.consolidate().await?;
//! ```

pub mod activation;
pub mod config;
pub mod consolidation;
pub mod engine;
pub mod error;
pub mod forgetting;
pub mod hebbian;
pub mod retrieval;
pub mod reward;
pub mod semantic;
pub mod storage;
pub mod tuning;
pub mod types;

// Re-export commonly used types
pub use activation::{ActivationModel, SpreadingContext};
pub use config::{EngineConfig, EngineConfigBuilder, Parameters};
pub use consolidation::{
    ConsolidationEngine, ConsolidationReport, ConsolidationScheduler, ForgetReport,
    SchedulerConfig,
};
pub use engine::{
    AddRequest, ConfidenceLabel, EngineStats, MemoryEngine, RecallOptions, RecallResult,
    RewardReport,
};
pub use error::{EngraveError, EngraveResult, ErrorCode};
pub use forgetting::ForgettingModel;
pub use hebbian::HebbianGraph;
pub use retrieval::{CandidateSource, RetrievalFusion};
pub use reward::{RewardSignal, RewardTracker};
pub use semantic::{
    Embedder, EmbedderConfig, EmbedderProvider, InMemoryVectorIndex, SemanticProvider,
    VectorIndex,
};
pub use storage::{RecordStore, SqliteStore};
pub use tuning::{AdaptiveTuner, TuningBounds, TuningMetrics, TuningReport};
pub use types::{AccessEvent, AccessHistory, Category, HebbianLink, Record, RecordId, Tier};
