//! Stability-based forgetting curve.
//!
//! Retrievability follows an exponential curve in days since last access:
//!
//! ```text
//! R = exp(-Δt / S)
//! ```
//!
//! Stability `S` grows with each successful retrieval, scaled by category,
//! so frequently used records fade more slowly.
//!
//! Everything here is a pure function of its inputs. Deleting a record is the
//! caller's job.

use chrono::{DateTime, Utc};

use crate::config::Parameters;
use crate::types::Record;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Days elapsed between two instants. Negative spans count as zero.
pub fn elapsed_days(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let seconds = now.signed_duration_since(then).num_milliseconds() as f64 / 1000.0;
    (seconds / SECONDS_PER_DAY).max(0.0)
}

/// Forgetting model over a parameter snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ForgettingModel<'a> {
    params: &'a Parameters,
}

impl<'a> ForgettingModel<'a> {
    pub fn new(params: &'a Parameters) -> Self {
        Self { params }
    }

    /// Retrievability in (0, 1].
    pub fn retrievability(&self, record: &Record, now: DateTime<Utc>) -> f64 {
        let stability = record.stability.max(f64::MIN_POSITIVE);
        let r = (-elapsed_days(record.last_accessed, now) / stability).exp();
        r.clamp(f64::MIN_POSITIVE, 1.0)
    }

    /// True iff the record is unpinned and its retrievability is below `threshold`.
    pub fn should_forget(&self, record: &Record, threshold: f64, now: DateTime<Utc>) -> bool {
        !record.pinned && self.retrievability(record, now) < threshold
    }

    /// Stability after one more successful retrieval.
    pub fn grow_stability(&self, record: &Record) -> f64 {
        let bonus = (self.params.stability_growth - 1.0) * record.category.stability_factor();
        (record.stability * (1.0 + bonus)).clamp(self.params.min_stability, self.params.max_stability)
    }

    /// Stability after the consolidation decay pass over `elapsed_days`.
    ///
    /// Pinned records keep their stability.
    pub fn decayed_stability(&self, record: &Record, elapsed_days: f64) -> f64 {
        if record.pinned {
            return record.stability;
        }
        let factor = (-self.params.stability_decay_rate * elapsed_days.max(0.0)).exp();
        (record.stability * factor).max(self.params.min_stability)
    }
}
