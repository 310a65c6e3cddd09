//! Request and response types for the engine facade.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::config::Parameters;
use crate::retrieval::CandidateSource;
use crate::reward::RewardSignal;
use crate::tuning::TuningReport;
use crate::types::{Category, RecordId, Tier};

/// A record to add.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddRequest {
    pub content: String,
    pub category: Category,
    /// Caller-assigned importance in [0, 1].
    pub importance: f64,
    /// An existing record this one supersedes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contradicts: Option<RecordId>,
    /// Pin the record on creation.
    #[serde(default)]
    pub pinned: bool,
}

impl AddRequest {
    pub fn new(content: impl Into<String>, category: Category, importance: f64) -> Self {
        Self {
            content: content.into(),
            category,
            importance,
            contradicts: None,
            pinned: false,
        }
    }

    pub fn contradicting(mut self, id: RecordId) -> Self {
        self.contradicts = Some(id);
        self
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }
}

/// Options for a recall. Unset fields use the engine's current defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallOptions {
    pub limit: usize,
    pub min_confidence: Option<f64>,
    pub graph_expand: Option<bool>,
    /// Tag stored on the access events this recall logs.
    pub context: Option<String>,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            min_confidence: None,
            graph_expand: None,
            context: None,
        }
    }
}

impl RecallOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = Some(min_confidence);
        self
    }

    pub fn with_graph_expand(mut self, graph_expand: bool) -> Self {
        self.graph_expand = Some(graph_expand);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Coarse reading of a confidence value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLabel {
    Certain,
    Likely,
    Uncertain,
    Vague,
}

impl ConfidenceLabel {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.8 {
            ConfidenceLabel::Certain
        } else if confidence >= 0.5 {
            ConfidenceLabel::Likely
        } else if confidence >= 0.25 {
            ConfidenceLabel::Uncertain
        } else {
            ConfidenceLabel::Vague
        }
    }
}

/// One recalled record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallResult {
    pub id: RecordId,
    pub content: String,
    pub category: Category,
    pub tier: Tier,
    pub importance: f64,
    pub confidence: f64,
    pub confidence_label: ConfidenceLabel,
    pub activation: f64,
    pub pinned: bool,
    pub contradicted: bool,
    pub source: CandidateSource,
}

/// Outcome of a reward call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardReport {
    pub signal: RewardSignal,
    /// Records adjusted, with their new importance.
    pub adjusted: Vec<(RecordId, f64)>,
}

/// Engine-wide statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub total_records: usize,
    pub by_tier: BTreeMap<String, usize>,
    pub pinned: usize,
    pub hebbian_links: usize,
    pub hebbian_enabled: bool,
    /// Recalls currently eligible for reward.
    pub reward_window: usize,
    pub parameters: Parameters,
    pub tuning: TuningReport,
}
