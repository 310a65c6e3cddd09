//! Record, access log and link types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::category::{Category, Tier};

/// Stable identifier of a record. Assigned at creation, never reused.
pub type RecordId = Uuid;

/// A stored memory unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub content: String,
    pub category: Category,
    /// Caller-assigned importance in [0, 1]; nudged by rewards.
    pub importance: f64,
    pub tier: Tier,
    /// Cached activation from the last time the record was scored.
    pub activation: f64,
    /// Stability in days. Larger means slower forgetting.
    pub stability: f64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u32,
    /// Pinned records are never forgotten.
    #[serde(default, skip_serializing_if = "is_false")]
    pub pinned: bool,
    /// Newer record that contradicts this one, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contradicted_by: Option<RecordId>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Record {
    /// Create a new working-tier record.
    pub fn new(
        content: impl Into<String>,
        category: Category,
        importance: f64,
        initial_stability: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            category,
            importance,
            tier: Tier::Working,
            activation: 1.0,
            stability: initial_stability,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            pinned: false,
            contradicted_by: None,
        }
    }

    /// Whether a newer record has contradicted this one.
    pub fn is_contradicted(&self) -> bool {
        self.contradicted_by.is_some()
    }
}

/// An immutable access log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessEvent {
    pub record_id: RecordId,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl AccessEvent {
    pub fn new(record_id: RecordId, timestamp: DateTime<Utc>, context: Option<String>) -> Self {
        Self {
            record_id,
            timestamp,
            context,
        }
    }
}

/// Summarised access history: the most recent timestamps plus the total count.
///
/// `recent` is ordered newest first and holds at most the configured history
/// limit; `total_count` counts every access ever logged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessHistory {
    pub recent: Vec<DateTime<Utc>>,
    pub total_count: u32,
}

impl AccessHistory {
    pub fn is_empty(&self) -> bool {
        self.total_count == 0 || self.recent.is_empty()
    }
}

/// An undirected weighted association between two records.
///
/// Stored canonically with `source < target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HebbianLink {
    pub source: RecordId,
    pub target: RecordId,
    /// Strength in [0, 1].
    pub strength: f64,
    pub coactivation_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_reinforced: DateTime<Utc>,
}

impl HebbianLink {
    /// Create a freshly formed link at full strength.
    pub fn formed(a: RecordId, b: RecordId, coactivation_count: u32, now: DateTime<Utc>) -> Self {
        let (source, target) = canonical_pair(a, b);
        Self {
            source,
            target,
            strength: 1.0,
            coactivation_count,
            created_at: now,
            last_reinforced: now,
        }
    }

    /// The endpoint opposite `id`, if `id` is an endpoint.
    pub fn other(&self, id: RecordId) -> Option<RecordId> {
        if self.source == id {
            Some(self.target)
        } else if self.target == id {
            Some(self.source)
        } else {
            None
        }
    }
}

/// Order an unordered id pair so the smaller id comes first.
pub fn canonical_pair(a: RecordId, b: RecordId) -> (RecordId, RecordId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_defaults() {
        let now = Utc::now();
        let record = Record::new("likes tea", Category::Preference, 0.8, 1.0, now);
        assert_eq!(record.tier, Tier::Working);
        assert_eq!(record.activation, 1.0);
        assert_eq!(record.stability, 1.0);
        assert_eq!(record.importance, 0.8);
        assert_eq!(record.last_accessed, now);
        assert_eq!(record.access_count, 0);
        assert!(!record.pinned);
    }

    #[test]
    fn test_canonical_pair_orders() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(canonical_pair(a, b), canonical_pair(b, a));
        let (lo, hi) = canonical_pair(a, b);
        assert!(lo <= hi);
    }

    #[test]
    fn test_link_other_endpoint() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let link = HebbianLink::formed(a, b, 3, Utc::now());
        assert_eq!(link.other(a), Some(b));
        assert_eq!(link.other(b), Some(a));
        assert_eq!(link.other(Uuid::new_v4()), None);
        assert_eq!(link.strength, 1.0);
    }
}
