//! The memory engine facade.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::types::{
    AddRequest, ConfidenceLabel, EngineStats, RecallOptions, RecallResult, RewardReport,
};
use crate::config::{EngineConfig, Parameters};
use crate::consolidation::{ConsolidationEngine, ConsolidationReport, ForgetReport};
use crate::error::{EngraveError, EngraveResult, ErrorCode};
use crate::forgetting::ForgettingModel;
use crate::hebbian::HebbianGraph;
use crate::retrieval::{RetrievalFusion, SearchQuery};
use crate::reward::{RewardSignal, RewardTracker};
use crate::semantic::SemanticProvider;
use crate::storage::{RecordStore, SqliteStore};
use crate::tuning::{AdaptiveTuner, TuningMetrics};
use crate::types::{AccessEvent, HebbianLink, Record, RecordId, Tier};

fn check_unit_interval(parameter: &str, value: f64) -> EngraveResult<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(EngraveError::out_of_range(
            parameter,
            format!("{} must be in [0, 1], got {}", parameter, value),
        ))
    }
}

/// Main engine - owns every dynamics component and the storage handle.
///
/// Each engine instance has its own tuning state and Hebbian graph;
/// instances never share state unless built over the same store.
pub struct MemoryEngine {
    config: EngineConfig,
    store: Arc<dyn RecordStore>,
    graph: Arc<HebbianGraph>,
    semantic: SemanticProvider,
    rewards: Arc<RewardTracker>,
    tuner: Arc<AdaptiveTuner>,
    retrieval: RetrievalFusion,
    consolidation: Arc<ConsolidationEngine>,
}

impl MemoryEngine {
    /// Build an engine over an existing store.
    ///
    /// Links and pending co-activation counters are loaded from the store.
    pub fn open(
        config: EngineConfig,
        store: Arc<dyn RecordStore>,
        semantic: SemanticProvider,
    ) -> EngraveResult<Self> {
        config.validate()?;
        let now = Utc::now();

        let graph = Arc::new(HebbianGraph::from_parts(
            store.load_links()?,
            store.load_coactivations()?,
        ));
        let rewards = Arc::new(RewardTracker::new());
        let tuner = Arc::new(AdaptiveTuner::new(config.parameters.clone(), now));
        let retrieval = RetrievalFusion::new(store.clone(), graph.clone(), semantic.clone());
        let consolidation = Arc::new(ConsolidationEngine::new(
            store.clone(),
            graph.clone(),
            semantic.clone(),
            rewards.clone(),
            tuner.clone(),
            now,
        ));

        info!(
            links = graph.link_count()?,
            hebbian_enabled = config.hebbian_enabled,
            semantic = !semantic.is_absent(),
            "Memory engine opened"
        );

        Ok(Self {
            config,
            store,
            graph,
            semantic,
            rewards,
            tuner,
            retrieval,
            consolidation,
        })
    }

    /// Engine over an in-memory SQLite store with no semantic provider.
    pub fn in_memory(config: EngineConfig) -> EngraveResult<Self> {
        Self::open(config, Arc::new(SqliteStore::in_memory()?), SemanticProvider::Absent)
    }

    /// Engine over the SQLite database at `config.database_path`.
    pub fn from_config(config: EngineConfig) -> EngraveResult<Self> {
        let store = SqliteStore::new(&config.database_path)?;
        Self::open(config, Arc::new(store), SemanticProvider::Absent)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The consolidation engine, for scheduling.
    pub fn consolidation(&self) -> Arc<ConsolidationEngine> {
        self.consolidation.clone()
    }

    /// Snapshot of the current effective parameters.
    pub fn parameters(&self) -> EngraveResult<Parameters> {
        self.tuner.params()
    }

    pub fn tuning_metrics(&self) -> EngraveResult<TuningMetrics> {
        self.tuner.metrics()
    }

    /// Add a record and return its id.
    pub async fn add(
        &self,
        content: impl Into<String>,
        category: crate::types::Category,
        importance: f64,
    ) -> EngraveResult<RecordId> {
        self.add_with(AddRequest::new(content, category, importance)).await
    }

    pub async fn add_with(&self, request: AddRequest) -> EngraveResult<RecordId> {
        self.add_at(request, Utc::now()).await
    }

    /// Add a record as of `now`.
    ///
    /// Everything is validated before the store is touched.
    pub async fn add_at(&self, request: AddRequest, now: DateTime<Utc>) -> EngraveResult<RecordId> {
        if request.content.trim().is_empty() {
            return Err(EngraveError::invalid_with_suggestion(
                ErrorCode::ParamEmpty,
                "content",
                "content must not be empty",
                "Provide the text of the memory",
            ));
        }
        check_unit_interval("importance", request.importance)?;
        if let Some(old) = request.contradicts {
            if self.store.get(old)?.is_none() {
                return Err(EngraveError::not_found(old));
            }
        }

        let params = self.tuner.params()?;
        let mut record = Record::new(
            request.content,
            request.category,
            request.importance,
            params.initial_stability,
            now,
        );
        record.pinned = request.pinned;
        self.store.insert(&record)?;

        if let Some(old) = request.contradicts {
            let marked = self
                .store
                .update_with(old, &mut |r| r.contradicted_by = Some(record.id))?;
            if marked.is_none() {
                warn!(record_id = %old, "Contradicted record vanished before it could be marked");
            }
        }

        if let Err(e) = self.semantic.index(record.id, &record.content).await {
            warn!(record_id = %record.id, error = %e, "Failed to index record semantically");
        }

        debug!(
            record_id = %record.id,
            category = %record.category,
            importance = record.importance,
            "Added record"
        );
        Ok(record.id)
    }

    /// Recall records matching `query`.
    pub async fn recall(&self, query: &str, options: RecallOptions) -> EngraveResult<Vec<RecallResult>> {
        self.recall_at(query, options, Utc::now()).await
    }

    /// Recall as of `now`.
    ///
    /// Every returned record is marked accessed, gains stability and gets an
    /// access event. The result set enters the reward window and, when
    /// Hebbian learning is on, counts as one co-activation.
    pub async fn recall_at(
        &self,
        query: &str,
        options: RecallOptions,
        now: DateTime<Utc>,
    ) -> EngraveResult<Vec<RecallResult>> {
        let timer = Instant::now();
        let params = self.tuner.params()?;

        if options.limit == 0 {
            return Err(EngraveError::out_of_range("limit", "limit must be at least 1"));
        }
        let min_confidence = options.min_confidence.unwrap_or(params.min_confidence);
        check_unit_interval("min_confidence", min_confidence)?;

        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let search = SearchQuery {
            text: query,
            limit: options.limit,
            min_confidence,
            graph_expand: options.graph_expand.unwrap_or(self.config.graph_expand_default),
        };
        let hits = self.retrieval.search(&search, &params, now).await?;

        let forgetting = ForgettingModel::new(&params);
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let activation = hit.activation;
            let updated = self.store.update_with(hit.record.id, &mut |r| {
                r.stability = forgetting.grow_stability(r);
                r.last_accessed = now;
                r.access_count = r.access_count.saturating_add(1);
                r.activation = activation;
            })?;
            // Deleted between search and access.
            let Some(record) = updated else {
                continue;
            };
            let event = AccessEvent::new(record.id, now, options.context.clone());
            if let Err(e) = self.store.append_access(&event) {
                if self.store.get(record.id)?.is_some() {
                    return Err(e);
                }
                debug!(record_id = %record.id, "Record forgotten before its access was logged");
                continue;
            }

            results.push(RecallResult {
                id: record.id,
                content: record.content,
                category: record.category,
                tier: record.tier,
                importance: record.importance,
                confidence: hit.confidence,
                confidence_label: ConfidenceLabel::from_confidence(hit.confidence),
                activation,
                pinned: record.pinned,
                contradicted: record.contradicted_by.is_some(),
                source: hit.source,
            });
        }

        let ids: Vec<RecordId> = results.iter().map(|r| r.id).collect();
        self.rewards.record_recall(&ids, &params, now)?;
        if self.config.hebbian_enabled {
            self.record_co_activation(&ids, &params, now)?;
        }

        self.tuner.record_recall(!results.is_empty(), timer.elapsed())?;
        let changes = self.tuner.adapt(now)?;
        if !changes.is_empty() {
            info!(?changes, "Adapted parameters after recall");
        }

        debug!(query, returned = results.len(), "Recall complete");
        Ok(results)
    }

    /// Track co-activation of the records a recall returned.
    ///
    /// A record forgotten while the recall was running is left out. If one
    /// disappears after the graph was updated, the store rejects the row and
    /// the graph change for that record is undone.
    fn record_co_activation(&self, ids: &[RecordId], params: &Parameters, now: DateTime<Utc>) -> EngraveResult<()> {
        let live = self.live_ids(ids)?;
        if live.len() < 2 {
            return Ok(());
        }
        let outcome = self.graph.record_co_activation(&live, params, now)?;
        if outcome.is_empty() {
            return Ok(());
        }

        let mut vanished: HashSet<RecordId> = HashSet::new();
        let links = outcome.formed.iter().chain(outcome.reinforced.iter());
        for link in links {
            let pair = (link.source, link.target);
            if let Err(e) = self.store.upsert_link(link) {
                self.note_vanished(pair, e, &mut vanished)?;
            }
        }
        for (pair, count) in &outcome.counters {
            if vanished.contains(&pair.0) || vanished.contains(&pair.1) {
                continue;
            }
            if let Err(e) = self.store.save_coactivation(*pair, *count) {
                self.note_vanished(*pair, e, &mut vanished)?;
            }
        }

        if !vanished.is_empty() {
            for id in &vanished {
                self.graph.remove_record(*id)?;
            }
            warn!(vanished = vanished.len(), "Records forgotten during recall, dropped their co-activation");
        }
        if !outcome.formed.is_empty() {
            info!(formed = outcome.formed.len(), "Formed hebbian links");
        }
        Ok(())
    }

    /// Explain a failed Hebbian write by a vanished endpoint, or return the error.
    fn note_vanished(
        &self,
        pair: (RecordId, RecordId),
        error: EngraveError,
        vanished: &mut HashSet<RecordId>,
    ) -> EngraveResult<()> {
        let missing: Vec<RecordId> = [pair.0, pair.1]
            .into_iter()
            .filter(|id| !vanished.contains(id))
            .filter(|id| matches!(self.store.get(*id), Ok(None)))
            .collect();
        if missing.is_empty() && !vanished.contains(&pair.0) && !vanished.contains(&pair.1) {
            return Err(error);
        }
        vanished.extend(missing);
        Ok(())
    }

    /// The subset of `ids` still present in the store, in the given order.
    fn live_ids(&self, ids: &[RecordId]) -> EngraveResult<Vec<RecordId>> {
        let present: HashSet<RecordId> = self.store.get_many(ids)?.into_iter().map(|r| r.id).collect();
        Ok(ids.iter().copied().filter(|id| present.contains(id)).collect())
    }

    /// Run one consolidation cycle now.
    pub async fn consolidate(&self) -> EngraveResult<ConsolidationReport> {
        self.consolidate_at(Utc::now()).await
    }

    pub async fn consolidate_at(&self, now: DateTime<Utc>) -> EngraveResult<ConsolidationReport> {
        self.consolidation.run_cycle(now).await
    }

    /// Delete unpinned records whose retrievability is below `threshold`.
    pub async fn forget(&self, threshold: f64) -> EngraveResult<ForgetReport> {
        self.forget_at(threshold, Utc::now()).await
    }

    pub async fn forget_at(&self, threshold: f64, now: DateTime<Utc>) -> EngraveResult<ForgetReport> {
        check_unit_interval("threshold", threshold)?;
        self.consolidation.forget(threshold, now).await
    }

    /// Credit or blame the records of recent recalls.
    pub async fn reward(&self, signal: RewardSignal) -> EngraveResult<RewardReport> {
        self.reward_at(signal, Utc::now()).await
    }

    pub async fn reward_at(&self, signal: RewardSignal, now: DateTime<Utc>) -> EngraveResult<RewardReport> {
        let params = self.tuner.params()?;
        let adjustments = self.rewards.reward(signal, &params, now)?;

        let mut adjusted = Vec::with_capacity(adjustments.len());
        for adjustment in adjustments {
            let updated = self
                .store
                .update_with(adjustment.record_id, &mut |r| r.importance = adjustment.apply(r.importance))?;
            if let Some(record) = updated {
                adjusted.push((record.id, record.importance));
            }
        }
        self.tuner.record_reward(signal)?;

        debug!(signal = %signal, adjusted = adjusted.len(), "Applied reward");
        Ok(RewardReport { signal, adjusted })
    }

    /// Exempt a record from forgetting. Pinning twice is a no-op.
    pub async fn pin(&self, id: RecordId) -> EngraveResult<()> {
        self.set_pinned(id, true)
    }

    /// Make a record forgettable again. Unpinning twice is a no-op.
    pub async fn unpin(&self, id: RecordId) -> EngraveResult<()> {
        self.set_pinned(id, false)
    }

    fn set_pinned(&self, id: RecordId, pinned: bool) -> EngraveResult<()> {
        match self.store.update_with(id, &mut |r| r.pinned = pinned)? {
            Some(_) => {
                debug!(record_id = %id, pinned, "Set pinned");
                Ok(())
            }
            None => Err(EngraveError::not_found(id)),
        }
    }

    pub async fn get(&self, id: RecordId) -> EngraveResult<Option<Record>> {
        self.store.get(id)
    }

    /// Current retrievability of a record.
    pub async fn retrievability(&self, id: RecordId) -> EngraveResult<f64> {
        self.retrievability_at(id, Utc::now()).await
    }

    pub async fn retrievability_at(&self, id: RecordId, now: DateTime<Utc>) -> EngraveResult<f64> {
        let record = self.store.get(id)?.ok_or_else(|| EngraveError::not_found(id))?;
        let params = self.tuner.params()?;
        Ok(ForgettingModel::new(&params).retrievability(&record, now))
    }

    /// Hebbian links, all of them or those touching `id`.
    ///
    /// A link whose endpoint was just deleted, and whose cleanup has not yet
    /// reached the graph, is left out.
    pub fn hebbian_links(&self, id: Option<RecordId>) -> EngraveResult<Vec<HebbianLink>> {
        let links = self.graph.links(id)?;
        let mut endpoints: Vec<RecordId> = links.iter().flat_map(|l| [l.source, l.target]).collect();
        endpoints.sort_unstable();
        endpoints.dedup();
        let live: HashSet<RecordId> = self.live_ids(&endpoints)?.into_iter().collect();
        Ok(links
            .into_iter()
            .filter(|l| live.contains(&l.source) && live.contains(&l.target))
            .collect())
    }

    /// How often two records have been recalled together.
    pub fn coactivation_count(&self, a: RecordId, b: RecordId) -> EngraveResult<u32> {
        self.graph.coactivation_count(a, b)
    }

    pub async fn stats(&self) -> EngraveResult<EngineStats> {
        let counts = self.store.count_by_tier()?;
        let by_tier: BTreeMap<String, usize> = Tier::all()
            .into_iter()
            .map(|tier| (tier.to_string(), counts.get(&tier).copied().unwrap_or(0)))
            .collect();

        Ok(EngineStats {
            total_records: by_tier.values().sum(),
            by_tier,
            pinned: self.store.pinned_count()?,
            hebbian_links: self.graph.link_count()?,
            hebbian_enabled: self.config.hebbian_enabled,
            reward_window: self.rewards.len(),
            parameters: self.tuner.params()?,
            tuning: self.tuner.report()?,
        })
    }

    /// Re-embed every stored record into the semantic index.
    ///
    /// The vector index is not persisted, so a provider attached to an
    /// existing database starts empty. Returns how many records were indexed.
    pub async fn rebuild_semantic_index(&self) -> EngraveResult<usize> {
        if self.semantic.is_absent() {
            return Ok(0);
        }
        let mut indexed = 0;
        for tier in Tier::all() {
            for record in self.store.scan_tier(tier)? {
                self.semantic.index(record.id, &record.content).await?;
                indexed += 1;
            }
        }
        info!(indexed, "Rebuilt semantic index");
        Ok(indexed)
    }
}
