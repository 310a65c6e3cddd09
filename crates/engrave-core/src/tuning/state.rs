//! Tuning state: effective parameters plus rolling outcome counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Parameters;

/// Rolling outcome counters observed since start or the last reset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TuningMetrics {
    pub total_recalls: u64,
    /// Recalls that returned at least one record.
    pub successful_recalls: u64,
    pub positive_rewards: u64,
    pub negative_rewards: u64,
    pub memories_forgotten: u64,
    pub consolidation_cycles: u64,
    /// Cumulative recall latency in milliseconds.
    pub total_retrieval_ms: f64,
}

impl TuningMetrics {
    /// Fraction of recalls that returned something. 1.0 before any recall.
    pub fn hit_rate(&self) -> f64 {
        if self.total_recalls == 0 {
            return 1.0;
        }
        self.successful_recalls as f64 / self.total_recalls as f64
    }

    /// Positive share of all feedback. 0.5 before any feedback.
    pub fn reward_ratio(&self) -> f64 {
        let total = self.feedback_count();
        if total == 0 {
            return 0.5;
        }
        self.positive_rewards as f64 / total as f64
    }

    /// Records forgotten per consolidation cycle.
    pub fn forget_rate(&self) -> f64 {
        if self.consolidation_cycles == 0 {
            return 0.0;
        }
        self.memories_forgotten as f64 / self.consolidation_cycles as f64
    }

    pub fn avg_retrieval_ms(&self) -> f64 {
        if self.total_recalls == 0 {
            return 0.0;
        }
        self.total_retrieval_ms / self.total_recalls as f64
    }

    pub fn feedback_count(&self) -> u64 {
        self.positive_rewards + self.negative_rewards
    }
}

/// The effective parameter set and the counters that drive its adaptation.
///
/// Lives for the process lifetime; nothing here is persisted.
#[derive(Debug, Clone)]
pub struct TuningState {
    pub params: Parameters,
    pub metrics: TuningMetrics,
    pub last_adaptation: DateTime<Utc>,
}

impl TuningState {
    pub fn new(params: Parameters, now: DateTime<Utc>) -> Self {
        Self {
            params,
            metrics: TuningMetrics::default(),
            last_adaptation: now,
        }
    }
}

/// Serializable view of the tuning metrics, with derived rates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningReport {
    pub hit_rate: f64,
    pub reward_ratio: f64,
    pub forget_rate: f64,
    pub avg_retrieval_ms: f64,
    #[serde(flatten)]
    pub metrics: TuningMetrics,
    pub last_adaptation: DateTime<Utc>,
}

impl From<&TuningState> for TuningReport {
    fn from(state: &TuningState) -> Self {
        Self {
            hit_rate: state.metrics.hit_rate(),
            reward_ratio: state.metrics.reward_ratio(),
            forget_rate: state.metrics.forget_rate(),
            avg_retrieval_ms: state.metrics.avg_retrieval_ms(),
            metrics: state.metrics.clone(),
            last_adaptation: state.last_adaptation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_rates_without_data() {
        let metrics = TuningMetrics::default();
        assert_eq!(metrics.hit_rate(), 1.0);
        assert_eq!(metrics.reward_ratio(), 0.5);
        assert_eq!(metrics.forget_rate(), 0.0);
        assert_eq!(metrics.avg_retrieval_ms(), 0.0);
    }

    #[test]
    fn test_rates() {
        let metrics = TuningMetrics {
            total_recalls: 10,
            successful_recalls: 8,
            positive_rewards: 7,
            negative_rewards: 3,
            memories_forgotten: 25,
            consolidation_cycles: 5,
            total_retrieval_ms: 50.0,
        };
        assert_eq!(metrics.hit_rate(), 0.8);
        assert_eq!(metrics.reward_ratio(), 0.7);
        assert_eq!(metrics.forget_rate(), 5.0);
        assert_eq!(metrics.avg_retrieval_ms(), 5.0);
    }
}
