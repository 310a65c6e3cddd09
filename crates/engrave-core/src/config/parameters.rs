//! Tunable numeric parameters consumed by every dynamics component.

use serde::{Deserialize, Serialize};

use crate::error::{EngraveError, EngraveResult};

/// The effective numeric parameter set.
///
/// One value of this struct is the single source of truth for tunable
/// constants. It lives inside the engine's tuning state; components receive
/// a snapshot per operation. Ranges are enforced by [`Parameters::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters {
    // Activation
    /// Base-level decay exponent `d`. Range: (0, 1].
    pub decay: f64,
    /// Floor for time-since-access, in seconds. Range: > 0.
    pub min_time_seconds: f64,
    /// Access timestamps kept per record for the base-level sum. Range: >= 1.
    pub history_limit: usize,
    /// Multiplier on importance. Range: >= 0.
    pub importance_weight: f64,
    /// Multiplier on the spreading term. Range: [0, 3].
    pub context_weight: f64,
    /// Offset keeping `S_max + ln(strength)` positive. Range: > 0.
    pub max_associative_strength: f64,

    // Hebbian graph
    /// Co-activations needed before a link forms. Range: >= 1.
    pub formation_threshold: u32,
    /// Link decay rate per day (`λ`). Range: [0, 1].
    pub link_decay_rate: f64,
    /// Strength added on reinforcement. Range: [0, 1].
    pub reinforcement_boost: f64,
    /// Links weaker than this are pruned. Range: [0, 1).
    pub prune_threshold: f64,
    /// Largest id set tracked per co-activation call. Range: >= 2.
    pub max_coactivation_set: usize,

    // Stability and forgetting
    /// Stability of a new record, in days. Range: > 0.
    pub initial_stability: f64,
    /// Multiplicative growth on each successful access. Range: [1, 3].
    pub stability_growth: f64,
    /// Stability floor reached by the consolidation decay pass, in days. Range: > 0.
    pub min_stability: f64,
    /// Stability ceiling, in days. Range: >= initial_stability.
    pub max_stability: f64,
    /// Blanket stability decay per day applied during consolidation. Range: [0, 1].
    pub stability_decay_rate: f64,
    /// Default retrievability threshold for forgetting. Range: [0, 1].
    pub forget_threshold: f64,

    // Consolidation
    /// Working records above this activation move to core.
    pub promote_threshold: f64,
    /// Core records below this activation move to archive. Must be < promote_threshold.
    pub demote_threshold: f64,

    // Retrieval
    /// Weight of the normalized vector score. Range: >= 0.
    pub vector_weight: f64,
    /// Weight of the normalized keyword score. Range: >= 0.
    pub fts_weight: f64,
    /// Default minimum confidence for recall. Range: [0, 1].
    pub min_confidence: f64,
    /// Records scoring below this activation are not returned.
    pub min_activation: f64,
    /// Top fused candidates whose neighbors join the pool. Range: >= 1.
    pub expansion_seeds: usize,
    /// Confidence multiplier for contradicted records. Range: [0, 1].
    pub contradiction_penalty: f64,

    // Reward
    /// Recalls kept in the eligibility window. Range: >= 1.
    pub reward_window: usize,
    /// Recalls older than this are no longer eligible, in seconds. Range: > 0.
    pub reward_max_age_secs: u64,
    /// Importance change for the most recent recall. Range: (0, 1].
    pub reward_step: f64,
    /// Per-position discount for older recalls. Range: (0, 1].
    pub reward_discount: f64,

    // Adaptive tuning
    /// Relative size of each nudge. Range: [0.05, 0.10].
    pub adaptation_rate: f64,
    /// Recalls required before adapting. Range: >= 1.
    pub min_samples: u64,
    /// Minimum seconds between adaptations.
    pub adaptation_interval_secs: u64,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            decay: 0.5,
            min_time_seconds: 0.05,
            history_limit: 20,
            importance_weight: 1.0,
            context_weight: 1.0,
            max_associative_strength: 1.5,

            formation_threshold: 3,
            link_decay_rate: 0.05,
            reinforcement_boost: 0.1,
            prune_threshold: 0.1,
            max_coactivation_set: 10,

            initial_stability: 1.0,
            stability_growth: 1.5,
            min_stability: 0.1,
            max_stability: 3650.0,
            stability_decay_rate: 0.05,
            forget_threshold: 0.01,

            promote_threshold: -3.0,
            demote_threshold: -7.0,

            vector_weight: 0.7,
            fts_weight: 0.3,
            min_confidence: 0.1,
            min_activation: -10.0,
            expansion_seeds: 5,
            contradiction_penalty: 0.5,

            reward_window: 20,
            reward_max_age_secs: 30 * 60,
            reward_step: 0.1,
            reward_discount: 0.7,

            adaptation_rate: 0.05,
            min_samples: 20,
            adaptation_interval_secs: 3600,
        }
    }
}

/// Longest interval, in seconds, a millisecond-precision duration can hold.
pub const MAX_INTERVAL_SECS: u64 = (i64::MAX / 1000) as u64;

fn require(ok: bool, parameter: &str, message: &str) -> EngraveResult<()> {
    if ok {
        Ok(())
    } else {
        Err(EngraveError::out_of_range(
            parameter,
            format!("{} {}", parameter, message),
        ))
    }
}

fn finite(values: &[(&str, f64)]) -> EngraveResult<()> {
    for (name, value) in values {
        require(value.is_finite(), name, "must be finite")?;
    }
    Ok(())
}

impl Parameters {
    /// Validate every parameter against its documented range.
    pub fn validate(&self) -> EngraveResult<()> {
        finite(&[
            ("decay", self.decay),
            ("min_time_seconds", self.min_time_seconds),
            ("importance_weight", self.importance_weight),
            ("context_weight", self.context_weight),
            ("max_associative_strength", self.max_associative_strength),
            ("link_decay_rate", self.link_decay_rate),
            ("reinforcement_boost", self.reinforcement_boost),
            ("prune_threshold", self.prune_threshold),
            ("initial_stability", self.initial_stability),
            ("stability_growth", self.stability_growth),
            ("min_stability", self.min_stability),
            ("max_stability", self.max_stability),
            ("stability_decay_rate", self.stability_decay_rate),
            ("forget_threshold", self.forget_threshold),
            ("promote_threshold", self.promote_threshold),
            ("demote_threshold", self.demote_threshold),
            ("vector_weight", self.vector_weight),
            ("fts_weight", self.fts_weight),
            ("min_confidence", self.min_confidence),
            ("min_activation", self.min_activation),
            ("contradiction_penalty", self.contradiction_penalty),
            ("reward_step", self.reward_step),
            ("reward_discount", self.reward_discount),
            ("adaptation_rate", self.adaptation_rate),
        ])?;

        require(self.decay > 0.0 && self.decay <= 1.0, "decay", "must be in (0, 1]")?;
        require(self.min_time_seconds > 0.0, "min_time_seconds", "must be positive")?;
        require(self.history_limit >= 1, "history_limit", "must be at least 1")?;
        require(self.importance_weight >= 0.0, "importance_weight", "must be non-negative")?;
        require(
            (0.0..=3.0).contains(&self.context_weight),
            "context_weight",
            "must be in [0, 3]",
        )?;
        require(
            self.max_associative_strength > 0.0,
            "max_associative_strength",
            "must be positive",
        )?;

        require(self.formation_threshold >= 1, "formation_threshold", "must be at least 1")?;
        require(
            (0.0..=1.0).contains(&self.link_decay_rate),
            "link_decay_rate",
            "must be in [0, 1]",
        )?;
        require(
            (0.0..=1.0).contains(&self.reinforcement_boost),
            "reinforcement_boost",
            "must be in [0, 1]",
        )?;
        require(
            (0.0..1.0).contains(&self.prune_threshold),
            "prune_threshold",
            "must be in [0, 1)",
        )?;
        require(self.max_coactivation_set >= 2, "max_coactivation_set", "must be at least 2")?;

        require(self.initial_stability > 0.0, "initial_stability", "must be positive")?;
        require(
            (1.0..=3.0).contains(&self.stability_growth),
            "stability_growth",
            "must be in [1, 3]",
        )?;
        require(
            self.min_stability > 0.0 && self.min_stability <= self.initial_stability,
            "min_stability",
            "must be positive and no larger than initial_stability",
        )?;
        require(
            self.max_stability >= self.initial_stability,
            "max_stability",
            "must be at least initial_stability",
        )?;
        require(
            (0.0..=1.0).contains(&self.stability_decay_rate),
            "stability_decay_rate",
            "must be in [0, 1]",
        )?;
        require(
            (0.0..=1.0).contains(&self.forget_threshold),
            "forget_threshold",
            "must be in [0, 1]",
        )?;

        require(
            self.demote_threshold < self.promote_threshold,
            "demote_threshold",
            "must be below promote_threshold",
        )?;

        require(self.vector_weight >= 0.0, "vector_weight", "must be non-negative")?;
        require(self.fts_weight >= 0.0, "fts_weight", "must be non-negative")?;
        require(
            self.vector_weight + self.fts_weight > 0.0,
            "fts_weight",
            "and vector_weight must not both be zero",
        )?;
        require(
            (0.0..=1.0).contains(&self.min_confidence),
            "min_confidence",
            "must be in [0, 1]",
        )?;
        require(self.expansion_seeds >= 1, "expansion_seeds", "must be at least 1")?;
        require(
            (0.0..=1.0).contains(&self.contradiction_penalty),
            "contradiction_penalty",
            "must be in [0, 1]",
        )?;

        require(self.reward_window >= 1, "reward_window", "must be at least 1")?;
        require(
            self.reward_max_age_secs > 0 && self.reward_max_age_secs <= MAX_INTERVAL_SECS,
            "reward_max_age_secs",
            "must be positive and fit in a duration",
        )?;
        require(
            self.reward_step > 0.0 && self.reward_step <= 1.0,
            "reward_step",
            "must be in (0, 1]",
        )?;
        require(
            self.reward_discount > 0.0 && self.reward_discount <= 1.0,
            "reward_discount",
            "must be in (0, 1]",
        )?;

        require(
            (0.05..=0.10).contains(&self.adaptation_rate),
            "adaptation_rate",
            "must be in [0.05, 0.10]",
        )?;
        require(self.min_samples >= 1, "min_samples", "must be at least 1")?;
        require(
            self.adaptation_interval_secs <= MAX_INTERVAL_SECS,
            "adaptation_interval_secs",
            "must fit in a duration",
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let params = Parameters::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.decay, 0.5);
        assert_eq!(params.formation_threshold, 3);
        assert_eq!(params.vector_weight, 0.7);
        assert_eq!(params.fts_weight, 0.3);
    }

    #[test]
    fn test_validation_errors() {
        let bad_decay = Parameters {
            decay: 0.0,
            ..Default::default()
        };
        assert!(bad_decay.validate().is_err());

        let inverted_tiers = Parameters {
            demote_threshold: -2.0,
            promote_threshold: -3.0,
            ..Default::default()
        };
        assert!(inverted_tiers.validate().is_err());

        let fast_tuning = Parameters {
            adaptation_rate: 0.5,
            ..Default::default()
        };
        assert!(fast_tuning.validate().is_err());

        let no_weights = Parameters {
            vector_weight: 0.0,
            fts_weight: 0.0,
            ..Default::default()
        };
        assert!(no_weights.validate().is_err());

        let nan = Parameters {
            importance_weight: f64::NAN,
            ..Default::default()
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_error_names_parameter() {
        let params = Parameters {
            prune_threshold: 1.0,
            ..Default::default()
        };
        match params.validate().unwrap_err() {
            EngraveError::InvalidParameter { parameter, .. } => {
                assert_eq!(parameter.as_deref(), Some("prune_threshold"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_oversized_intervals_rejected() {
        for age in [u64::MAX, MAX_INTERVAL_SECS + 1] {
            let params = Parameters {
                reward_max_age_secs: age,
                ..Default::default()
            };
            assert!(params.validate().unwrap_err().is_invalid_parameter());
        }
        let params = Parameters {
            adaptation_interval_secs: u64::MAX,
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let widest = Parameters {
            reward_max_age_secs: MAX_INTERVAL_SECS,
            adaptation_interval_secs: MAX_INTERVAL_SECS,
            ..Default::default()
        };
        assert!(widest.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let params: Parameters = serde_json::from_str(r#"{"decay": 0.4}"#).unwrap();
        assert_eq!(params.decay, 0.4);
        assert_eq!(params.formation_threshold, 3);
    }
}
