//! Candidate gathering and activation ranking.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use tracing::{debug, warn};

use super::fusion::{expand, CandidateSource, LinearFusion};
use crate::activation::ActivationModel;
use crate::config::Parameters;
use crate::error::EngraveResult;
use crate::hebbian::HebbianGraph;
use crate::semantic::SemanticProvider;
use crate::storage::RecordStore;
use crate::types::{AccessHistory, Record, RecordId};

/// Candidates fetched per signal for each requested result.
const POOL_FACTOR: usize = 3;

/// One search request.
#[derive(Debug, Clone)]
pub struct SearchQuery<'a> {
    pub text: &'a str,
    pub limit: usize,
    pub min_confidence: f64,
    pub graph_expand: bool,
}

/// A ranked search hit.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: Record,
    /// Fused retrieval score in [0, 1], penalized when contradicted.
    pub confidence: f64,
    /// Activation at query time; the ranking key.
    pub activation: f64,
    pub source: CandidateSource,
}

fn rank(a: &ScoredRecord, b: &ScoredRecord) -> Ordering {
    OrderedFloat(b.activation)
        .cmp(&OrderedFloat(a.activation))
        .then_with(|| b.record.last_accessed.cmp(&a.record.last_accessed))
        .then_with(|| a.record.id.cmp(&b.record.id))
}

/// Merges keyword, semantic and graph candidates and ranks them by activation.
///
/// Searching has no side effects; access logging and co-activation
/// bookkeeping belong to the caller.
pub struct RetrievalFusion {
    store: Arc<dyn RecordStore>,
    graph: Arc<HebbianGraph>,
    semantic: SemanticProvider,
}

impl RetrievalFusion {
    pub fn new(store: Arc<dyn RecordStore>, graph: Arc<HebbianGraph>, semantic: SemanticProvider) -> Self {
        Self {
            store,
            graph,
            semantic,
        }
    }

    /// Run a search as of `now`. Zero matches is an empty result, not an error.
    pub async fn search(
        &self,
        query: &SearchQuery<'_>,
        params: &Parameters,
        now: DateTime<Utc>,
    ) -> EngraveResult<Vec<ScoredRecord>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }
        let pool_size = query.limit.saturating_mul(POOL_FACTOR).max(query.limit);

        let keyword_hits = self.store.keyword_search(query.text, pool_size)?;
        let vector_hits = match self.semantic.search(query.text, pool_size).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "Semantic provider failed, falling back to keyword search");
                Vec::new()
            }
        };

        let mut pool = LinearFusion::from_params(params).fuse_sets(&vector_hits, &keyword_hits);
        if query.graph_expand && !pool.is_empty() {
            let expanded = expand(&pool, params.expansion_seeds, &self.graph)?;
            pool.extend(expanded);
        }
        if pool.is_empty() {
            debug!(query = query.text, "No candidates");
            return Ok(Vec::new());
        }

        let ids: Vec<RecordId> = pool.iter().map(|c| c.id).collect();
        let records: HashMap<RecordId, Record> = self
            .store
            .get_many(&ids)?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();
        let histories = self.store.access_histories(&ids, params.history_limit)?;
        let context = self.graph.spreading_context(&ids)?;

        let model = ActivationModel::new(params);
        let empty = AccessHistory::default();
        let mut hits: Vec<ScoredRecord> = Vec::with_capacity(pool.len());
        for candidate in pool {
            // The keyword or vector index may still list a record deleted
            // since; skip it.
            let Some(record) = records.get(&candidate.id) else {
                continue;
            };
            let history = histories.get(&candidate.id).unwrap_or(&empty);
            let activation = model.score(record, history, Some(&context), now);
            let confidence = if record.is_contradicted() {
                candidate.fused * params.contradiction_penalty
            } else {
                candidate.fused
            };

            if confidence < query.min_confidence || activation < params.min_activation {
                continue;
            }
            hits.push(ScoredRecord {
                record: record.clone(),
                confidence,
                activation,
                source: candidate.source,
            });
        }

        hits.sort_by(rank);
        hits.truncate(query.limit);

        debug!(
            query = query.text,
            keyword = keyword_hits.len(),
            semantic = vector_hits.len(),
            returned = hits.len(),
            "Search complete"
        );
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use crate::types::{Category, HebbianLink};
    use chrono::Duration;

    struct Fixture {
        store: Arc<SqliteStore>,
        graph: Arc<HebbianGraph>,
        fusion: RetrievalFusion,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let graph = Arc::new(HebbianGraph::new());
        let fusion = RetrievalFusion::new(store.clone(), graph.clone(), SemanticProvider::Absent);
        Fixture { store, graph, fusion }
    }

    fn query(text: &str) -> SearchQuery<'_> {
        SearchQuery {
            text,
            limit: 10,
            min_confidence: 0.1,
            graph_expand: true,
        }
    }

    fn insert(store: &SqliteStore, content: &str, importance: f64, now: DateTime<Utc>) -> Record {
        let record = Record::new(content, Category::Preference, importance, 1.0, now);
        store.insert(&record).unwrap();
        record
    }

    #[tokio::test]
    async fn test_ranks_by_activation() {
        let f = fixture();
        let now = Utc::now();
        let tea = insert(&f.store, "likes tea", 0.8, now);
        let coffee = insert(&f.store, "likes coffee", 0.2, now);

        let hits = f
            .fusion
            .search(&query("likes"), &Parameters::default(), now + Duration::seconds(1))
            .await
            .unwrap();
        let ids: Vec<RecordId> = hits.iter().map(|h| h.record.id).collect();
        assert_eq!(ids, vec![tea.id, coffee.id]);
        assert!(hits.iter().all(|h| h.confidence == 1.0));
    }

    #[tokio::test]
    async fn test_no_match_is_empty() {
        let f = fixture();
        insert(&f.store, "likes tea", 0.8, Utc::now());
        let hits = f
            .fusion
            .search(&query("volcano"), &Parameters::default(), Utc::now())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_contradicted_confidence_penalized() {
        let f = fixture();
        let now = Utc::now();
        let mut old = Record::new("sky is green", Category::Factual, 0.5, 1.0, now);
        old.contradicted_by = Some(uuid::Uuid::new_v4());
        f.store.insert(&old).unwrap();

        let hits = f
            .fusion
            .search(&query("sky"), &Parameters::default(), now)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].confidence, 0.5);

        let strict = SearchQuery {
            min_confidence: 0.6,
            ..query("sky")
        };
        let hits = f.fusion.search(&strict, &Parameters::default(), now).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_graph_expansion_adds_linked_records() {
        let f = fixture();
        let now = Utc::now();
        let tea = insert(&f.store, "likes tea", 0.5, now);
        let cups = insert(&f.store, "owns blue cups", 0.5, now);
        let link = HebbianLink::formed(tea.id, cups.id, 3, now);
        f.store.upsert_link(&link).unwrap();
        let graph = HebbianGraph::from_parts(vec![link], Vec::new());
        let fusion = RetrievalFusion::new(f.store.clone(), Arc::new(graph), SemanticProvider::Absent);

        let hits = fusion.search(&query("tea"), &Parameters::default(), now).await.unwrap();
        assert_eq!(hits.len(), 2);
        let expanded = hits.iter().find(|h| h.record.id == cups.id).unwrap();
        assert_eq!(expanded.source, CandidateSource::Graph);
        assert!((expanded.confidence - 1.0).abs() < 1e-12);

        let no_expand = SearchQuery {
            graph_expand: false,
            ..query("tea")
        };
        let hits = fusion.search(&no_expand, &Parameters::default(), now).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(f.graph.link_count().unwrap() == 0);
    }

    #[tokio::test]
    async fn test_limit_and_min_activation() {
        let f = fixture();
        let now = Utc::now();
        for i in 0..5 {
            insert(&f.store, &format!("note number {}", i), 0.5, now);
        }
        let limited = SearchQuery {
            limit: 2,
            ..query("note")
        };
        let hits = f.fusion.search(&limited, &Parameters::default(), now).await.unwrap();
        assert_eq!(hits.len(), 2);

        let params = Parameters {
            min_activation: 100.0,
            ..Default::default()
        };
        assert!(f.fusion.search(&query("note"), &params, now).await.unwrap().is_empty());
    }
}
