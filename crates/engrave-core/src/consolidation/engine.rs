//! Consolidation cycle: tier transfers, decay and forgetting.
//!
//! A cycle runs, in order:
//!
//! 1. promotion of working records whose activation exceeds `promote_threshold`
//! 2. demotion of core records whose activation falls below `demote_threshold`
//! 3. the blanket stability decay over every unpinned record
//! 4. the forgetting pass, evaluated on the decayed stability
//! 5. Hebbian link decay and pruning
//! 6. tuner bookkeeping and, when due, adaptation
//!
//! Each record is handled independently. A failed storage write is logged,
//! collected into the report and the cycle moves on.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::activation::ActivationModel;
use crate::config::Parameters;
use crate::error::{EngraveError, EngraveResult};
use crate::forgetting::{elapsed_days, ForgettingModel};
use crate::hebbian::HebbianGraph;
use crate::reward::RewardTracker;
use crate::semantic::SemanticProvider;
use crate::storage::RecordStore;
use crate::tuning::AdaptiveTuner;
use crate::types::{AccessHistory, Record, RecordId, Tier};

/// Summary of one consolidation cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub promoted: Vec<RecordId>,
    pub demoted: Vec<RecordId>,
    /// Records whose stability was reduced by the blanket decay pass.
    pub decayed: usize,
    pub forgotten: Vec<RecordId>,
    pub links_decayed: usize,
    pub links_pruned: usize,
    /// Parameters changed by the tuner at the end of the cycle.
    pub parameter_changes: BTreeMap<String, f64>,
    /// Non-fatal failures; processing continued past each one.
    pub errors: Vec<String>,
    /// True when another cycle was already running and nothing was done.
    pub skipped: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl ConsolidationReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }

    /// Records moved between tiers.
    pub fn moved(&self) -> usize {
        self.promoted.len() + self.demoted.len()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Summary of an explicit forgetting pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForgetReport {
    pub examined: usize,
    pub forgotten: Vec<RecordId>,
    pub errors: Vec<String>,
    pub skipped: bool,
}

struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs consolidation cycles and forgetting passes over shared components.
///
/// Only one cycle or pass runs at a time; a trigger that arrives while one
/// is in progress returns a report flagged `skipped`.
pub struct ConsolidationEngine {
    store: Arc<dyn RecordStore>,
    graph: Arc<HebbianGraph>,
    semantic: SemanticProvider,
    rewards: Arc<RewardTracker>,
    tuner: Arc<AdaptiveTuner>,
    running: AtomicBool,
    last_cycle: Mutex<DateTime<Utc>>,
}

impl ConsolidationEngine {
    /// Create an engine. Link and stability decay of the first cycle is
    /// measured from `now`.
    pub fn new(
        store: Arc<dyn RecordStore>,
        graph: Arc<HebbianGraph>,
        semantic: SemanticProvider,
        rewards: Arc<RewardTracker>,
        tuner: Arc<AdaptiveTuner>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            graph,
            semantic,
            rewards,
            tuner,
            running: AtomicBool::new(false),
            last_cycle: Mutex::new(now),
        }
    }

    /// Whether a cycle or forgetting pass is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Time the last completed cycle ran at.
    pub fn last_cycle(&self) -> EngraveResult<DateTime<Utc>> {
        self.last_cycle
            .lock()
            .map(|t| *t)
            .map_err(|_| EngraveError::poisoned("last cycle"))
    }

    fn try_begin(&self) -> Option<CycleGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard(&self.running))
    }

    /// Run one consolidation cycle as of `now`.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> EngraveResult<ConsolidationReport> {
        let Some(_guard) = self.try_begin() else {
            debug!("Consolidation already running, skipping trigger");
            return Ok(ConsolidationReport::skipped());
        };

        let timer = Instant::now();
        let params = self.tuner.params()?;
        let elapsed = elapsed_days(self.last_cycle()?, now);
        let mut report = ConsolidationReport {
            started_at: Some(now),
            ..Default::default()
        };

        self.promote(&params, now, &mut report);
        self.demote(&params, now, &mut report);

        let records = self.scan_all(&mut report.errors);
        let records = self.decay_stability(records, elapsed, &params, &mut report);
        report.forgotten = self
            .forget_records(&records, params.forget_threshold, &params, now, &mut report.errors)
            .await;

        self.decay_links(elapsed, &params, &mut report);

        {
            let mut last = self
                .last_cycle
                .lock()
                .map_err(|_| EngraveError::poisoned("last cycle"))?;
            *last = now;
        }

        self.tuner.record_consolidation(report.forgotten.len())?;
        report.parameter_changes = self.tuner.adapt(now)?;
        report.duration_ms = timer.elapsed().as_millis() as u64;

        info!(
            promoted = report.promoted.len(),
            demoted = report.demoted.len(),
            decayed = report.decayed,
            forgotten = report.forgotten.len(),
            links_decayed = report.links_decayed,
            links_pruned = report.links_pruned,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "Consolidation cycle complete"
        );
        Ok(report)
    }

    /// Delete every unpinned record whose retrievability is below `threshold`.
    pub async fn forget(&self, threshold: f64, now: DateTime<Utc>) -> EngraveResult<ForgetReport> {
        let Some(_guard) = self.try_begin() else {
            debug!("Consolidation already running, skipping forget");
            return Ok(ForgetReport {
                skipped: true,
                ..Default::default()
            });
        };

        let params = self.tuner.params()?;
        let mut report = ForgetReport::default();
        let records = self.scan_all(&mut report.errors);
        report.examined = records.len();
        report.forgotten = self
            .forget_records(&records, threshold, &params, now, &mut report.errors)
            .await;

        info!(
            threshold,
            examined = report.examined,
            forgotten = report.forgotten.len(),
            errors = report.errors.len(),
            "Forgetting pass complete"
        );
        Ok(report)
    }

    fn histories(
        &self,
        records: &[Record],
        params: &Parameters,
    ) -> EngraveResult<HashMap<RecordId, AccessHistory>> {
        let ids: Vec<RecordId> = records.iter().map(|r| r.id).collect();
        self.store.access_histories(&ids, params.history_limit)
    }

    /// Score every record of `tier` and move those for which `moves` holds.
    fn transfer(
        &self,
        from: Tier,
        to: Tier,
        params: &Parameters,
        now: DateTime<Utc>,
        moves: impl Fn(f64) -> bool,
        errors: &mut Vec<String>,
    ) -> Vec<RecordId> {
        let records = match self.store.scan_tier(from) {
            Ok(records) => records,
            Err(e) => {
                warn!(tier = %from, error = %e, "Failed to scan tier");
                errors.push(format!("scan {}: {}", from, e));
                return Vec::new();
            }
        };
        let histories = match self.histories(&records, params) {
            Ok(histories) => histories,
            Err(e) => {
                warn!(tier = %from, error = %e, "Failed to load access histories");
                errors.push(format!("histories {}: {}", from, e));
                return Vec::new();
            }
        };

        let model = ActivationModel::new(params);
        let empty = AccessHistory::default();
        let mut moved = Vec::new();
        for record in records {
            let history = histories.get(&record.id).unwrap_or(&empty);
            let activation = model.score(&record, history, None, now);
            let target = if moves(activation) { to } else { from };

            let result = self.store.update_with(record.id, &mut |r| {
                r.activation = activation;
                // Only move records that are still where the scan found them.
                if r.tier == from {
                    r.tier = target;
                }
            });
            match result {
                Ok(Some(updated)) if updated.tier == to && target == to => {
                    debug!(record_id = %record.id, activation, from = %from, to = %to, "Moved record");
                    moved.push(record.id);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(record_id = %record.id, error = %e, "Failed to update record tier");
                    errors.push(format!("tier {}: {}", record.id, e));
                }
            }
        }
        moved
    }

    fn promote(&self, params: &Parameters, now: DateTime<Utc>, report: &mut ConsolidationReport) {
        let threshold = params.promote_threshold;
        report.promoted = self.transfer(
            Tier::Working,
            Tier::Core,
            params,
            now,
            |activation| activation > threshold,
            &mut report.errors,
        );
    }

    fn demote(&self, params: &Parameters, now: DateTime<Utc>, report: &mut ConsolidationReport) {
        let threshold = params.demote_threshold;
        report.demoted = self.transfer(
            Tier::Core,
            Tier::Archive,
            params,
            now,
            |activation| activation < threshold,
            &mut report.errors,
        );
    }

    fn scan_all(&self, errors: &mut Vec<String>) -> Vec<Record> {
        let mut records = Vec::new();
        for tier in Tier::all() {
            match self.store.scan_tier(tier) {
                Ok(mut batch) => records.append(&mut batch),
                Err(e) => {
                    warn!(tier = %tier, error = %e, "Failed to scan tier");
                    errors.push(format!("scan {}: {}", tier, e));
                }
            }
        }
        records
    }

    /// Apply the blanket decay and return the records with their new stability.
    fn decay_stability(
        &self,
        records: Vec<Record>,
        elapsed_days: f64,
        params: &Parameters,
        report: &mut ConsolidationReport,
    ) -> Vec<Record> {
        if elapsed_days <= 0.0 {
            return records;
        }

        let model = ForgettingModel::new(params);
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            if record.pinned || record.stability <= params.min_stability {
                out.push(record);
                continue;
            }
            let result = self.store.update_with(record.id, &mut |r| {
                r.stability = model.decayed_stability(r, elapsed_days);
            });
            match result {
                Ok(Some(updated)) => {
                    if updated.stability < record.stability {
                        report.decayed += 1;
                    }
                    out.push(updated);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(record_id = %record.id, error = %e, "Failed to decay stability");
                    report.errors.push(format!("decay {}: {}", record.id, e));
                    out.push(record);
                }
            }
        }
        out
    }

    async fn forget_records(
        &self,
        records: &[Record],
        threshold: f64,
        params: &Parameters,
        now: DateTime<Utc>,
        errors: &mut Vec<String>,
    ) -> Vec<RecordId> {
        let model = ForgettingModel::new(params);
        let mut forgotten = Vec::new();

        for record in records.iter().filter(|r| model.should_forget(r, threshold, now)) {
            // Re-check against the stored row: it may have been pinned or
            // accessed since the scan.
            let deleted = self
                .store
                .delete_where(record.id, &|current| model.should_forget(current, threshold, now));
            match deleted {
                Ok(true) => {
                    debug!(
                        record_id = %record.id,
                        retrievability = model.retrievability(record, now),
                        "Forgot record"
                    );
                    self.release(record.id, errors).await;
                    forgotten.push(record.id);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(record_id = %record.id, error = %e, "Failed to forget record");
                    errors.push(format!("forget {}: {}", record.id, e));
                }
            }
        }
        forgotten
    }

    /// Drop in-memory state held for a deleted record.
    async fn release(&self, id: RecordId, errors: &mut Vec<String>) {
        if let Err(e) = self.graph.remove_record(id) {
            errors.push(format!("graph {}: {}", id, e));
        }
        if let Err(e) = self.semantic.remove(id).await {
            warn!(record_id = %id, error = %e, "Failed to remove record from semantic index");
        }
        if let Err(e) = self.rewards.forget_record(id) {
            errors.push(format!("rewards {}: {}", id, e));
        }
    }

    fn decay_links(&self, elapsed_days: f64, params: &Parameters, report: &mut ConsolidationReport) {
        let outcome = match self.graph.decay_all(elapsed_days, params) {
            Ok(outcome) => outcome,
            Err(e) => {
                report.errors.push(format!("link decay: {}", e));
                return;
            }
        };
        report.links_decayed = outcome.decayed.len();
        report.links_pruned = outcome.pruned.len();

        for link in &outcome.decayed {
            if let Err(e) = self.store.upsert_link(link) {
                warn!(source = %link.source, target = %link.target, error = %e, "Failed to persist link");
                report.errors.push(format!("link {}-{}: {}", link.source, link.target, e));
            }
        }
        for pair in outcome.pruned {
            if let Err(e) = self.store.delete_link(pair) {
                warn!(source = %pair.0, target = %pair.1, error = %e, "Failed to delete pruned link");
                report.errors.push(format!("prune {}-{}: {}", pair.0, pair.1, e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use crate::types::Category;
    use chrono::Duration;

    struct Fixture {
        store: Arc<SqliteStore>,
        graph: Arc<HebbianGraph>,
        engine: ConsolidationEngine,
    }

    fn fixture(now: DateTime<Utc>) -> Fixture {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let graph = Arc::new(HebbianGraph::new());
        let engine = ConsolidationEngine::new(
            store.clone(),
            graph.clone(),
            SemanticProvider::Absent,
            Arc::new(RewardTracker::new()),
            Arc::new(AdaptiveTuner::new(Parameters::default(), now)),
            now,
        );
        Fixture { store, graph, engine }
    }

    fn insert(store: &SqliteStore, content: &str, importance: f64, at: DateTime<Utc>) -> Record {
        let record = Record::new(content, Category::Factual, importance, 1.0, at);
        store.insert(&record).unwrap();
        record
    }

    #[tokio::test]
    async fn test_fresh_record_promoted() {
        let now = Utc::now();
        let f = fixture(now);
        let record = insert(&f.store, "fresh", 0.5, now);

        let report = f.engine.run_cycle(now + Duration::seconds(10)).await.unwrap();
        assert_eq!(report.promoted, vec![record.id]);
        assert_eq!(f.store.get(record.id).unwrap().unwrap().tier, Tier::Core);
    }

    #[tokio::test]
    async fn test_stale_core_record_demoted() {
        let now = Utc::now();
        let f = fixture(now);
        let mut record = Record::new("stale", Category::Factual, 0.0, 1000.0, now - Duration::days(365 * 30));
        record.tier = Tier::Core;
        record.last_accessed = now;
        f.store.insert(&record).unwrap();

        let report = f.engine.run_cycle(now).await.unwrap();
        assert_eq!(report.demoted, vec![record.id]);
        assert_eq!(f.store.get(record.id).unwrap().unwrap().tier, Tier::Archive);
        assert!(report.forgotten.is_empty());
    }

    #[tokio::test]
    async fn test_pinned_record_survives_and_keeps_stability() {
        let now = Utc::now();
        let f = fixture(now);
        let mut record = Record::new("pinned", Category::Factual, 0.5, 1.0, now);
        record.pinned = true;
        f.store.insert(&record).unwrap();
        let doomed = insert(&f.store, "doomed", 0.5, now);

        let later = now + Duration::days(30);
        let report = f.engine.run_cycle(later).await.unwrap();
        assert_eq!(report.forgotten, vec![doomed.id]);
        let kept = f.store.get(record.id).unwrap().unwrap();
        assert_eq!(kept.stability, 1.0);
        assert!(f.store.get(doomed.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_link_decay_persisted_and_pruned() {
        let now = Utc::now();
        let f = fixture(now);
        let mut ids = Vec::new();
        for content in ["a", "b"] {
            let mut record = Record::new(content, Category::Factual, 0.5, 1.0, now);
            record.pinned = true;
            f.store.insert(&record).unwrap();
            ids.push(record.id);
        }
        let params = Parameters::default();
        for _ in 0..params.formation_threshold {
            let outcome = f.graph.record_co_activation(&ids, &params, now).unwrap();
            for link in outcome.formed {
                f.store.upsert_link(&link).unwrap();
            }
        }
        assert_eq!(f.graph.link_count().unwrap(), 1);

        let report = f.engine.run_cycle(now + Duration::days(1)).await.unwrap();
        assert_eq!(report.links_decayed, 1);
        let stored = f.store.load_links().unwrap();
        assert_eq!(stored.len(), 1);
        assert!((stored[0].strength - (-0.05f64).exp()).abs() < 1e-9);

        // Strength 1.0 crosses the 0.1 prune threshold after ln(10) / 0.05 days.
        let report = f.engine.run_cycle(now + Duration::days(60)).await.unwrap();
        assert_eq!(report.links_pruned, 1);
        assert_eq!(f.graph.link_count().unwrap(), 0);
        assert!(f.store.load_links().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_forget_uses_threshold() {
        let now = Utc::now();
        let f = fixture(now);
        let record = insert(&f.store, "old", 0.5, now);

        // R = exp(-2) ~= 0.135 after two days at stability 1.
        let later = now + Duration::days(2);
        let report = f.engine.forget(0.1, later).await.unwrap();
        assert_eq!(report.examined, 1);
        assert!(report.forgotten.is_empty());

        let report = f.engine.forget(0.2, later).await.unwrap();
        assert_eq!(report.forgotten, vec![record.id]);
    }

    #[tokio::test]
    async fn test_concurrent_trigger_is_skipped() {
        let now = Utc::now();
        let f = fixture(now);
        let guard = f.engine.try_begin().unwrap();
        assert!(f.engine.is_running());

        assert!(f.engine.run_cycle(now).await.unwrap().skipped);
        assert!(f.engine.forget(0.5, now).await.unwrap().skipped);

        drop(guard);
        assert!(!f.engine.run_cycle(now).await.unwrap().skipped);
    }

    #[tokio::test]
    async fn test_cycle_counted_by_tuner() {
        let now = Utc::now();
        let f = fixture(now);
        f.engine.run_cycle(now).await.unwrap();
        f.engine.run_cycle(now).await.unwrap();
        assert_eq!(f.engine.tuner.metrics().unwrap().consolidation_cycles, 2);
        assert_eq!(f.engine.last_cycle().unwrap(), now);
    }
}
