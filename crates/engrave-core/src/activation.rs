//! ACT-R style activation scoring.
//!
//! A record's activation combines three terms:
//!
//! ```text
//! A_i = B_i + w_c * C_i + w_imp * importance_i
//! B_i = ln(sum_k t_k^(-d))
//! C_i = sum_j (1 / fan_j) * max(0, S_max + ln(S_ij))
//! ```
//!
//! Where:
//! - `t_k` is the time in seconds since the k-th access, floored at `min_time_seconds`
//! - `d` is the decay exponent
//! - `j` ranges over context records linked to `i`, `fan_j` is j's link count
//!   and `S_ij` the link strength
//!
//! Only the last `history_limit` accesses are kept per record. Older accesses
//! are approximated as if they had all happened at the oldest retained time,
//! which slightly overestimates their contribution.
//!
//! Scores have no fixed range and are only ever compared against each other
//! or against thresholds.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::config::Parameters;
use crate::types::{AccessHistory, Record, RecordId};

/// Seconds elapsed between `then` and `now`, floored at `min_seconds`.
pub(crate) fn elapsed_seconds(then: DateTime<Utc>, now: DateTime<Utc>, min_seconds: f64) -> f64 {
    let t = now.signed_duration_since(then).num_milliseconds() as f64 / 1000.0;
    if t.is_finite() && t > min_seconds {
        t
    } else {
        min_seconds
    }
}

/// One context record's links, as seen by the spreading term.
#[derive(Debug, Clone, Default)]
pub struct ContextNode {
    /// Total number of links the context record has.
    pub fan: usize,
    /// Link strength to each neighbor.
    pub links: HashMap<RecordId, f64>,
}

/// Snapshot of the associative links around a candidate pool.
///
/// Built under a single graph read lock, so every link it contains had both
/// endpoints present at the same instant.
#[derive(Debug, Clone, Default)]
pub struct SpreadingContext {
    nodes: HashMap<RecordId, ContextNode>,
}

impl SpreadingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a context record with its links.
    pub fn insert(&mut self, id: RecordId, node: ContextNode) {
        self.nodes.insert(id, node);
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Iterate over `(context id, fan, strength to target)` for context records
    /// linked to `target`. The target never counts as its own context.
    fn sources_for(&self, target: RecordId) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.nodes.iter().filter_map(move |(id, node)| {
            if *id == target {
                return None;
            }
            node.links.get(&target).map(|s| (node.fan, *s))
        })
    }
}

/// Computes activation scores from a parameter snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ActivationModel<'a> {
    params: &'a Parameters,
}

impl<'a> ActivationModel<'a> {
    pub fn new(params: &'a Parameters) -> Self {
        Self { params }
    }

    /// Base-level term from access history.
    ///
    /// Falls back to `-d * ln(t_since_creation)` when the record has never
    /// been accessed, which is the value a single access at creation would
    /// produce.
    pub fn base_level(
        &self,
        history: &AccessHistory,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> f64 {
        let d = self.params.decay;
        let min_t = self.params.min_time_seconds;

        if history.is_empty() {
            return -d * elapsed_seconds(created_at, now, min_t).ln();
        }

        let mut sum: f64 = history
            .recent
            .iter()
            .map(|ts| elapsed_seconds(*ts, now, min_t).powf(-d))
            .sum();

        let retained = history.recent.len() as u32;
        if history.total_count > retained {
            if let Some(oldest) = history.recent.iter().min() {
                let older = (history.total_count - retained) as f64;
                sum += older * elapsed_seconds(*oldest, now, min_t).powf(-d);
            }
        }

        if sum > 0.0 && sum.is_finite() {
            sum.ln()
        } else {
            -d * elapsed_seconds(created_at, now, min_t).ln()
        }
    }

    /// Spreading term from context records linked to `id`.
    ///
    /// `ln(S)` is never positive for strengths in (0, 1], so each link
    /// contributes `S_max + ln(S)`, clamped at zero for very weak links.
    pub fn spreading(&self, id: RecordId, context: &SpreadingContext) -> f64 {
        let s_max = self.params.max_associative_strength;
        context
            .sources_for(id)
            .filter(|(fan, strength)| *fan > 0 && *strength > 0.0)
            .map(|(fan, strength)| (s_max + strength.ln()).max(0.0) / fan as f64)
            .sum()
    }

    /// Importance term.
    pub fn importance(&self, importance: f64) -> f64 {
        importance * self.params.importance_weight
    }

    /// Full activation score.
    pub fn score(
        &self,
        record: &Record,
        history: &AccessHistory,
        context: Option<&SpreadingContext>,
        now: DateTime<Utc>,
    ) -> f64 {
        let base = self.base_level(history, record.created_at, now);
        let spreading = context
            .map(|ctx| self.spreading(record.id, ctx))
            .unwrap_or(0.0);
        base + self.params.context_weight * spreading + self.importance(record.importance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Category;
    use chrono::Duration;
    use uuid::Uuid;

    fn history(now: DateTime<Utc>, seconds_ago: &[i64]) -> AccessHistory {
        AccessHistory {
            recent: seconds_ago
                .iter()
                .map(|s| now - Duration::seconds(*s))
                .collect(),
            total_count: seconds_ago.len() as u32,
        }
    }

    #[test]
    fn test_recent_access_scores_higher() {
        let params = Parameters::default();
        let model = ActivationModel::new(&params);
        let now = Utc::now();
        let created = now - Duration::days(1);

        let old = model.base_level(&history(now, &[3600]), created, now);
        let recent = model.base_level(&history(now, &[10]), created, now);
        assert!(recent > old);
    }

    #[test]
    fn test_frequency_increases_base_level() {
        let params = Parameters::default();
        let model = ActivationModel::new(&params);
        let now = Utc::now();
        let created = now - Duration::days(1);

        let once = model.base_level(&history(now, &[100]), created, now);
        let thrice = model.base_level(&history(now, &[100, 200, 300]), created, now);
        assert!(thrice > once);
    }

    #[test]
    fn test_zero_elapsed_is_finite() {
        let params = Parameters::default();
        let model = ActivationModel::new(&params);
        let now = Utc::now();

        let b = model.base_level(&history(now, &[0, 0]), now, now);
        assert!(b.is_finite());
        // 2 * 0.05^-0.5
        let expected = (2.0 * 0.05f64.powf(-0.5)).ln();
        assert!((b - expected).abs() < 1e-9);

        let fresh = model.base_level(&AccessHistory::default(), now, now);
        assert!(fresh.is_finite());
    }

    #[test]
    fn test_fallback_matches_single_access_at_creation() {
        let params = Parameters::default();
        let model = ActivationModel::new(&params);
        let now = Utc::now();
        let created = now - Duration::seconds(400);

        let fallback = model.base_level(&AccessHistory::default(), created, now);
        let single = model.base_level(&history(now, &[400]), created, now);
        assert!((fallback - single).abs() < 1e-9);
    }

    #[test]
    fn test_truncated_history_counts_older_accesses() {
        let params = Parameters::default();
        let model = ActivationModel::new(&params);
        let now = Utc::now();
        let created = now - Duration::days(2);

        let mut truncated = history(now, &[100, 200]);
        let full = model.base_level(&truncated, created, now);
        truncated.total_count = 5;
        let with_older = model.base_level(&truncated, created, now);
        assert!(with_older > full);
    }

    #[test]
    fn test_spreading_zero_without_context() {
        let params = Parameters::default();
        let model = ActivationModel::new(&params);
        let now = Utc::now();
        let record = Record::new("x", Category::Factual, 0.0, 1.0, now);

        let without = model.score(&record, &AccessHistory::default(), None, now);
        let empty = model.score(
            &record,
            &AccessHistory::default(),
            Some(&SpreadingContext::new()),
            now,
        );
        assert_eq!(without, empty);
        assert!(without.is_finite());
    }

    #[test]
    fn test_spreading_dilutes_with_fan() {
        let params = Parameters::default();
        let model = ActivationModel::new(&params);
        let target = Uuid::new_v4();
        let j = Uuid::new_v4();

        let mut narrow = SpreadingContext::new();
        narrow.insert(
            j,
            ContextNode {
                fan: 1,
                links: HashMap::from([(target, 1.0)]),
            },
        );
        let mut wide = SpreadingContext::new();
        wide.insert(
            j,
            ContextNode {
                fan: 4,
                links: HashMap::from([(target, 1.0)]),
            },
        );

        let narrow_c = model.spreading(target, &narrow);
        let wide_c = model.spreading(target, &wide);
        assert!((narrow_c - 1.5).abs() < 1e-9);
        assert!((wide_c - 1.5 / 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_spreading_ignores_self_and_weak_links() {
        let params = Parameters::default();
        let model = ActivationModel::new(&params);
        let target = Uuid::new_v4();
        let weak = Uuid::new_v4();

        let mut ctx = SpreadingContext::new();
        ctx.insert(
            target,
            ContextNode {
                fan: 1,
                links: HashMap::from([(target, 1.0)]),
            },
        );
        ctx.insert(
            weak,
            ContextNode {
                fan: 1,
                links: HashMap::from([(target, 0.01)]),
            },
        );
        assert_eq!(model.spreading(target, &ctx), 0.0);
    }

    #[test]
    fn test_importance_term() {
        let params = Parameters {
            importance_weight: 2.0,
            ..Default::default()
        };
        let model = ActivationModel::new(&params);
        assert_eq!(model.importance(0.25), 0.5);
    }
}
