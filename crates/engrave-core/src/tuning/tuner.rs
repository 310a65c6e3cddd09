//! Rule-based adaptation of the effective parameters.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::state::{TuningMetrics, TuningReport, TuningState};
use crate::config::Parameters;
use crate::error::{EngraveError, EngraveResult};
use crate::reward::RewardSignal;

/// Hit rate below which the activation threshold is relaxed.
const LOW_HIT_RATE: f64 = 0.6;
/// Hit rate above which the activation threshold is tightened.
const HIGH_HIT_RATE: f64 = 0.9;
const LOW_REWARD_RATIO: f64 = 0.4;
const HIGH_REWARD_RATIO: f64 = 0.7;
/// Feedback events required before a low reward ratio counts.
const MIN_FEEDBACK: u64 = 5;
/// Positive rewards required before a high reward ratio counts.
const MIN_POSITIVE: u64 = 5;
/// Records forgotten per cycle above which decay slows down.
const HIGH_FORGET_RATE: f64 = 10.0;
/// Records forgotten per cycle below which decay speeds up.
const LOW_FORGET_RATE: f64 = 2.0;
/// Cycles required before a low forget rate counts.
const MIN_CYCLES_FOR_LOW_FORGET: u64 = 5;
/// Cycles that substitute for recall samples in `should_adapt`.
const MIN_CYCLES_FOR_ADAPT: u64 = 3;
/// Gap kept between the promotion and demotion thresholds.
const TIER_GAP: f64 = 0.5;

/// Clamp bounds for every parameter the tuner may change, as (min, max).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningBounds {
    pub min_activation: (f64, f64),
    pub context_weight: (f64, f64),
    pub stability_decay_rate: (f64, f64),
    pub link_decay_rate: (f64, f64),
    pub stability_growth: (f64, f64),
    pub promote_threshold: (f64, f64),
}

impl Default for TuningBounds {
    fn default() -> Self {
        Self {
            min_activation: (-15.0, -5.0),
            context_weight: (0.1, 3.0),
            stability_decay_rate: (0.01, 0.5),
            link_decay_rate: (0.005, 0.5),
            stability_growth: (1.1, 3.0),
            promote_threshold: (-6.0, 0.0),
        }
    }
}

/// Move `current` down by `delta`, stopping at `floor`.
///
/// A value already at or below the floor is left alone, so a nudge never
/// moves a parameter in the opposite direction.
fn nudge_down(current: f64, delta: f64, floor: f64) -> f64 {
    if current <= floor {
        current
    } else {
        (current - delta.abs()).max(floor)
    }
}

/// Add `step` to `current` and clamp into `(lo, hi)`.
///
/// A value already past the bound it is moving toward stays where it is.
fn shift_within(current: f64, step: f64, (lo, hi): (f64, f64)) -> f64 {
    if (step < 0.0 && current <= lo) || (step > 0.0 && current >= hi) {
        current
    } else {
        (current + step).clamp(lo, hi)
    }
}

/// Move `current` up by `delta`, stopping at `cap`.
fn nudge_up(current: f64, delta: f64, cap: f64) -> f64 {
    if current >= cap {
        current
    } else {
        (current + delta.abs()).min(cap)
    }
}

fn set(changes: &mut BTreeMap<String, f64>, name: &str, slot: &mut f64, value: f64) {
    if value != *slot {
        *slot = value;
        changes.insert(name.to_string(), value);
    }
}

/// Observes outcomes and nudges parameters toward better behaviour.
///
/// Owns the engine's [`TuningState`]. Every other component reads parameters
/// through [`AdaptiveTuner::params`], so there is exactly one effective
/// parameter set per engine instance.
#[derive(Debug)]
pub struct AdaptiveTuner {
    state: RwLock<TuningState>,
    bounds: TuningBounds,
}

impl AdaptiveTuner {
    pub fn new(params: Parameters, now: DateTime<Utc>) -> Self {
        Self {
            state: RwLock::new(TuningState::new(params, now)),
            bounds: TuningBounds::default(),
        }
    }

    /// Replace the clamp bounds.
    pub fn with_bounds(mut self, bounds: TuningBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn bounds(&self) -> &TuningBounds {
        &self.bounds
    }

    fn read(&self) -> EngraveResult<RwLockReadGuard<'_, TuningState>> {
        self.state.read().map_err(|_| EngraveError::poisoned("tuning state"))
    }

    fn write(&self) -> EngraveResult<RwLockWriteGuard<'_, TuningState>> {
        self.state.write().map_err(|_| EngraveError::poisoned("tuning state"))
    }

    /// Snapshot of the effective parameters.
    pub fn params(&self) -> EngraveResult<Parameters> {
        Ok(self.read()?.params.clone())
    }

    /// Snapshot of the raw counters.
    pub fn metrics(&self) -> EngraveResult<TuningMetrics> {
        Ok(self.read()?.metrics.clone())
    }

    /// Counters with derived rates, for reporting.
    pub fn report(&self) -> EngraveResult<TuningReport> {
        Ok(TuningReport::from(&*self.read()?))
    }

    /// Clear the counters, keeping the parameters.
    pub fn reset_metrics(&self) -> EngraveResult<()> {
        self.write()?.metrics = TuningMetrics::default();
        Ok(())
    }

    pub fn record_recall(&self, returned_any: bool, latency: Duration) -> EngraveResult<()> {
        let mut state = self.write()?;
        state.metrics.total_recalls += 1;
        if returned_any {
            state.metrics.successful_recalls += 1;
        }
        state.metrics.total_retrieval_ms += latency.as_secs_f64() * 1000.0;
        Ok(())
    }

    pub fn record_reward(&self, signal: RewardSignal) -> EngraveResult<()> {
        let mut state = self.write()?;
        match signal {
            RewardSignal::Positive => state.metrics.positive_rewards += 1,
            RewardSignal::Negative => state.metrics.negative_rewards += 1,
        }
        Ok(())
    }

    pub fn record_consolidation(&self, forgotten: usize) -> EngraveResult<()> {
        let mut state = self.write()?;
        state.metrics.consolidation_cycles += 1;
        state.metrics.memories_forgotten += forgotten as u64;
        Ok(())
    }

    /// Whether enough samples exist and enough time has passed to adapt.
    pub fn should_adapt(&self, now: DateTime<Utc>) -> EngraveResult<bool> {
        Ok(Self::ready(&*self.read()?, now))
    }

    fn ready(state: &TuningState, now: DateTime<Utc>) -> bool {
        let enough_samples = state.metrics.total_recalls >= state.params.min_samples
            || state.metrics.consolidation_cycles >= MIN_CYCLES_FOR_ADAPT;
        let elapsed = now.signed_duration_since(state.last_adaptation).num_seconds();
        let interval = i64::try_from(state.params.adaptation_interval_secs).unwrap_or(i64::MAX);
        enough_samples && elapsed >= interval
    }

    /// Apply every rule whose condition holds. Returns the changed parameters.
    ///
    /// Returns an empty map without touching anything when
    /// [`should_adapt`](Self::should_adapt) is false.
    pub fn adapt(&self, now: DateTime<Utc>) -> EngraveResult<BTreeMap<String, f64>> {
        let mut guard = self.write()?;
        if !Self::ready(&guard, now) {
            return Ok(BTreeMap::new());
        }

        let state = &mut *guard;
        let metrics = &state.metrics;
        let params = &mut state.params;
        let bounds = &self.bounds;
        let rate = params.adaptation_rate;
        let mut changes = BTreeMap::new();

        // A log-scale threshold moves by a share of its range, so zero still moves.
        let activation_step = rate * (bounds.min_activation.1 - bounds.min_activation.0);
        let hit_rate = metrics.hit_rate();
        if hit_rate < LOW_HIT_RATE {
            let value = shift_within(params.min_activation, -activation_step, bounds.min_activation);
            set(&mut changes, "min_activation", &mut params.min_activation, value);
        } else if hit_rate > HIGH_HIT_RATE {
            let value = shift_within(params.min_activation, activation_step / 2.0, bounds.min_activation);
            set(&mut changes, "min_activation", &mut params.min_activation, value);
        }

        let reward_ratio = metrics.reward_ratio();
        if reward_ratio < LOW_REWARD_RATIO && metrics.feedback_count() > MIN_FEEDBACK {
            let value = nudge_up(
                params.context_weight,
                params.context_weight * rate,
                bounds.context_weight.1,
            );
            set(&mut changes, "context_weight", &mut params.context_weight, value);
        }

        let forget_rate = metrics.forget_rate();
        if forget_rate > HIGH_FORGET_RATE {
            let value = nudge_down(
                params.stability_decay_rate,
                params.stability_decay_rate * rate,
                bounds.stability_decay_rate.0,
            );
            set(&mut changes, "stability_decay_rate", &mut params.stability_decay_rate, value);
            let value = nudge_down(
                params.link_decay_rate,
                params.link_decay_rate * rate,
                bounds.link_decay_rate.0,
            );
            set(&mut changes, "link_decay_rate", &mut params.link_decay_rate, value);
            let value = nudge_up(
                params.stability_growth,
                params.stability_growth * rate,
                bounds.stability_growth.1,
            );
            set(&mut changes, "stability_growth", &mut params.stability_growth, value);
        } else if forget_rate < LOW_FORGET_RATE
            && metrics.consolidation_cycles >= MIN_CYCLES_FOR_LOW_FORGET
        {
            let value = nudge_up(
                params.stability_decay_rate,
                params.stability_decay_rate * rate,
                bounds.stability_decay_rate.1,
            );
            set(&mut changes, "stability_decay_rate", &mut params.stability_decay_rate, value);
            let value = nudge_up(
                params.link_decay_rate,
                params.link_decay_rate * rate,
                bounds.link_decay_rate.1,
            );
            set(&mut changes, "link_decay_rate", &mut params.link_decay_rate, value);
            let value = nudge_down(
                params.stability_growth,
                params.stability_growth * rate,
                bounds.stability_growth.0,
            );
            set(&mut changes, "stability_growth", &mut params.stability_growth, value);
        }

        if reward_ratio > HIGH_REWARD_RATIO && metrics.positive_rewards >= MIN_POSITIVE {
            let floor = bounds
                .promote_threshold
                .0
                .max(params.demote_threshold + TIER_GAP);
            let value = nudge_down(
                params.promote_threshold,
                params.promote_threshold * rate / 2.0,
                floor,
            );
            set(&mut changes, "promote_threshold", &mut params.promote_threshold, value);
        }

        state.last_adaptation = now;

        if changes.is_empty() {
            debug!(hit_rate, reward_ratio, forget_rate, "Adaptation found nothing to change");
        } else {
            info!(
                hit_rate,
                reward_ratio,
                forget_rate,
                changes = ?changes,
                "Adapted parameters"
            );
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn tuner(interval_secs: u64, min_samples: u64) -> (AdaptiveTuner, DateTime<Utc>) {
        let now = Utc::now();
        let params = Parameters {
            adaptation_interval_secs: interval_secs,
            min_samples,
            adaptation_rate: 0.1,
            ..Default::default()
        };
        (AdaptiveTuner::new(params, now), now)
    }

    fn recalls(tuner: &AdaptiveTuner, hits: usize, misses: usize) {
        for _ in 0..hits {
            tuner.record_recall(true, Duration::from_millis(2)).unwrap();
        }
        for _ in 0..misses {
            tuner.record_recall(false, Duration::from_millis(2)).unwrap();
        }
    }

    #[test]
    fn test_should_adapt_needs_samples_and_interval() {
        let (tuner, start) = tuner(3600, 20);
        recalls(&tuner, 10, 0);
        assert!(!tuner.should_adapt(start + ChronoDuration::hours(2)).unwrap());

        recalls(&tuner, 10, 0);
        assert!(!tuner.should_adapt(start + ChronoDuration::minutes(30)).unwrap());
        assert!(tuner.should_adapt(start + ChronoDuration::hours(1)).unwrap());
    }

    #[test]
    fn test_cycles_substitute_for_recalls() {
        let (tuner, start) = tuner(0, 20);
        for _ in 0..3 {
            tuner.record_consolidation(0).unwrap();
        }
        assert!(tuner.should_adapt(start).unwrap());
    }

    #[test]
    fn test_adapt_noop_when_not_ready() {
        let (tuner, start) = tuner(3600, 20);
        recalls(&tuner, 0, 30);
        let before = tuner.params().unwrap();
        assert!(tuner.adapt(start).unwrap().is_empty());
        assert_eq!(tuner.params().unwrap(), before);
    }

    #[test]
    fn test_low_hit_rate_lowers_min_activation() {
        let (tuner, start) = tuner(0, 10);
        recalls(&tuner, 5, 5);
        let before = tuner.params().unwrap().min_activation;

        let changes = tuner.adapt(start).unwrap();
        let after = tuner.params().unwrap().min_activation;
        assert!(after < before);
        assert!(after >= tuner.bounds().min_activation.0);
        assert_eq!(changes.get("min_activation"), Some(&after));
    }

    #[test]
    fn test_min_activation_moves_by_fixed_step_even_from_zero() {
        let (tuner, start) = tuner(0, 10);
        recalls(&tuner, 5, 5);
        tuner.adapt(start).unwrap();
        assert!((tuner.params().unwrap().min_activation - -11.0).abs() < 1e-12);
        tuner.adapt(start + ChronoDuration::seconds(1)).unwrap();
        assert!((tuner.params().unwrap().min_activation - -12.0).abs() < 1e-12);

        let now = Utc::now();
        let zero = AdaptiveTuner::new(
            Parameters {
                min_activation: 0.0,
                adaptation_interval_secs: 0,
                min_samples: 10,
                adaptation_rate: 0.1,
                ..Default::default()
            },
            now,
        );
        recalls(&zero, 5, 5);
        let changes = zero.adapt(now).unwrap();
        assert_eq!(changes.get("min_activation"), Some(&-5.0));
        assert_eq!(zero.params().unwrap().min_activation, -5.0);
    }

    #[test]
    fn test_shift_within_clamps_and_never_reverses() {
        assert_eq!(shift_within(0.0, -0.5, (-15.0, -5.0)), -5.0);
        assert_eq!(shift_within(-20.0, -0.5, (-15.0, -5.0)), -20.0);
        assert_eq!(shift_within(0.0, 0.25, (-15.0, -5.0)), 0.0);
        assert_eq!(shift_within(-20.0, 0.25, (-15.0, -5.0)), -15.0);
        assert_eq!(shift_within(-5.1, 0.25, (-15.0, -5.0)), -5.0);
    }

    #[test]
    fn test_huge_interval_never_ready() {
        let (tuner, start) = tuner(u64::MAX, 1);
        recalls(&tuner, 3, 0);
        assert!(!tuner.should_adapt(start + ChronoDuration::days(365_000)).unwrap());
        assert!(tuner.adapt(start + ChronoDuration::days(365_000)).unwrap().is_empty());
    }

    #[test]
    fn test_high_hit_rate_raises_min_activation_up_to_cap() {
        let (tuner, start) = tuner(0, 10);
        recalls(&tuner, 10, 0);
        for i in 0..200 {
            tuner.adapt(start + ChronoDuration::seconds(i)).unwrap();
        }
        let value = tuner.params().unwrap().min_activation;
        assert_eq!(value, tuner.bounds().min_activation.1);
    }

    #[test]
    fn test_low_reward_ratio_raises_context_weight() {
        let (tuner, start) = tuner(0, 1);
        recalls(&tuner, 1, 0);
        tuner.record_reward(RewardSignal::Positive).unwrap();
        for _ in 0..5 {
            tuner.record_reward(RewardSignal::Negative).unwrap();
        }
        let changes = tuner.adapt(start).unwrap();
        assert!((changes["context_weight"] - 1.1).abs() < 1e-12);
    }

    #[test]
    fn test_high_forget_rate_slows_decay() {
        let (tuner, start) = tuner(0, 100);
        for _ in 0..3 {
            tuner.record_consolidation(15).unwrap();
        }
        let before = tuner.params().unwrap();
        tuner.adapt(start).unwrap();
        let after = tuner.params().unwrap();
        assert!(after.stability_decay_rate < before.stability_decay_rate);
        assert!(after.link_decay_rate < before.link_decay_rate);
        assert!(after.stability_growth > before.stability_growth);
        assert!(after.validate().is_ok());
    }

    #[test]
    fn test_low_forget_rate_speeds_decay() {
        let (tuner, start) = tuner(0, 100);
        for _ in 0..5 {
            tuner.record_consolidation(1).unwrap();
        }
        let before = tuner.params().unwrap();
        tuner.adapt(start).unwrap();
        let after = tuner.params().unwrap();
        assert!(after.stability_decay_rate > before.stability_decay_rate);
        assert!(after.link_decay_rate > before.link_decay_rate);
        assert!(after.stability_growth < before.stability_growth);
    }

    #[test]
    fn test_high_reward_ratio_lowers_promote_threshold() {
        let (tuner, start) = tuner(0, 1);
        recalls(&tuner, 1, 0);
        for _ in 0..5 {
            tuner.record_reward(RewardSignal::Positive).unwrap();
        }
        for i in 0..500 {
            tuner.adapt(start + ChronoDuration::seconds(i)).unwrap();
        }
        let params = tuner.params().unwrap();
        assert!(params.promote_threshold < -3.0);
        assert!(params.promote_threshold >= params.demote_threshold + TIER_GAP);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_nudge_never_reverses_direction() {
        assert_eq!(nudge_down(-20.0, 1.0, -15.0), -20.0);
        assert_eq!(nudge_up(5.0, 1.0, 3.0), 5.0);
        assert_eq!(nudge_down(-14.5, 1.0, -15.0), -15.0);
    }

    #[test]
    fn test_reset_metrics_keeps_params() {
        let (tuner, start) = tuner(0, 10);
        recalls(&tuner, 0, 10);
        tuner.adapt(start).unwrap();
        let params = tuner.params().unwrap();

        tuner.reset_metrics().unwrap();
        assert_eq!(tuner.metrics().unwrap(), TuningMetrics::default());
        assert_eq!(tuner.params().unwrap(), params);
    }
}
