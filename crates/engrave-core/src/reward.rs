//! Eligibility window for feedback on recent recalls.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::config::Parameters;
use crate::error::{EngraveError, EngraveResult, ErrorCode};
use crate::types::RecordId;

/// Feedback polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RewardSignal {
    Positive,
    Negative,
}

impl RewardSignal {
    /// Parse a signal name, rejecting anything but `positive` or `negative`.
    pub fn parse(name: &str) -> EngraveResult<Self> {
        name.trim().to_lowercase().parse().map_err(|_| {
            EngraveError::invalid_with_suggestion(
                ErrorCode::ParamUnknownValue,
                "signal",
                format!("unknown reward signal '{}'", name),
                "Use 'positive' or 'negative'",
            )
        })
    }

    fn sign(&self) -> f64 {
        match self {
            RewardSignal::Positive => 1.0,
            RewardSignal::Negative => -1.0,
        }
    }
}

#[derive(Debug, Clone)]
struct WindowEntry {
    ids: Vec<RecordId>,
    at: DateTime<Utc>,
}

/// An importance change to apply to one record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewardAdjustment {
    pub record_id: RecordId,
    /// Signed importance delta before clamping.
    pub delta: f64,
}

impl RewardAdjustment {
    /// Apply to an importance value, keeping it in [0, 1].
    pub fn apply(&self, importance: f64) -> f64 {
        (importance + self.delta).clamp(0.0, 1.0)
    }
}

/// Tracks the last recalls so feedback can be credited to them.
///
/// The window is bounded by count and by age and is never persisted.
#[derive(Debug, Default)]
pub struct RewardTracker {
    window: Mutex<VecDeque<WindowEntry>>,
}

impl RewardTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a recall's result set to the window.
    pub fn record_recall(&self, ids: &[RecordId], params: &Parameters, now: DateTime<Utc>) -> EngraveResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut window = self.window.lock().map_err(|_| EngraveError::poisoned("reward window"))?;
        window.push_back(WindowEntry {
            ids: ids.to_vec(),
            at: now,
        });
        while window.len() > params.reward_window {
            window.pop_front();
        }
        Ok(())
    }

    /// Compute discounted adjustments for every record in the window.
    ///
    /// The most recent recall gets weight 1, the one before it
    /// `reward_discount`, then `reward_discount^2` and so on. A record present
    /// in several recalls is credited once, at its largest weight. Entries
    /// older than `reward_max_age_secs` are dropped first.
    pub fn reward(
        &self,
        signal: RewardSignal,
        params: &Parameters,
        now: DateTime<Utc>,
    ) -> EngraveResult<Vec<RewardAdjustment>> {
        let max_age = max_age(params)?;
        let mut window = self.window.lock().map_err(|_| EngraveError::poisoned("reward window"))?;
        window.retain(|entry| now.signed_duration_since(entry.at) <= max_age);

        let mut weights: HashMap<RecordId, f64> = HashMap::new();
        let mut order: Vec<RecordId> = Vec::new();
        for (position, entry) in window.iter().rev().enumerate() {
            let weight = params.reward_discount.powi(position as i32);
            for id in &entry.ids {
                let slot = weights.entry(*id).or_insert_with(|| {
                    order.push(*id);
                    0.0
                });
                if weight > *slot {
                    *slot = weight;
                }
            }
        }

        Ok(order
            .into_iter()
            .filter_map(|id| {
                weights.get(&id).map(|weight| RewardAdjustment {
                    record_id: id,
                    delta: signal.sign() * params.reward_step * weight,
                })
            })
            .collect())
    }

    /// Drop a deleted record from every window entry.
    pub fn forget_record(&self, id: RecordId) -> EngraveResult<()> {
        let mut window = self.window.lock().map_err(|_| EngraveError::poisoned("reward window"))?;
        for entry in window.iter_mut() {
            entry.ids.retain(|x| *x != id);
        }
        window.retain(|entry| !entry.ids.is_empty());
        Ok(())
    }

    /// Number of recalls currently eligible.
    pub fn len(&self) -> usize {
        self.window.lock().map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn max_age(params: &Parameters) -> EngraveResult<Duration> {
    i64::try_from(params.reward_max_age_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| {
            EngraveError::out_of_range("reward_max_age_secs", "reward_max_age_secs does not fit in a duration")
        })
}
