//! Score fusion for hybrid retrieval.
//!
//! Keyword and vector hits arrive on unrelated scales, so each set is first
//! max-normalized to [0, 1]. A candidate found by both signals gets the
//! weighted sum; a candidate found by one signal keeps that signal's
//! normalized score. Hebbian neighbors of the best candidates can then join
//! the pool with a score spread from their seeds.

use std::collections::HashMap;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::config::Parameters;
use crate::error::EngraveResult;
use crate::hebbian::HebbianGraph;
use crate::types::RecordId;

/// Which signal put a candidate in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    Keyword,
    Semantic,
    /// Found by both keyword and semantic search.
    Hybrid,
    /// Added through Hebbian expansion.
    Graph,
}

/// A pooled candidate with its fused score in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub id: RecordId,
    pub fused: f64,
    pub source: CandidateSource,
}

/// Max-normalize raw scores to [0, 1].
///
/// When no score is positive every hit is treated as an equally good match.
pub fn normalize(hits: &[(RecordId, f64)]) -> HashMap<RecordId, f64> {
    let max = hits
        .iter()
        .map(|(_, s)| *s)
        .filter(|s| s.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);

    hits.iter()
        .map(|(id, score)| {
            let normalized = if max > 0.0 && score.is_finite() {
                (score / max).clamp(0.0, 1.0)
            } else {
                1.0
            };
            (*id, normalized)
        })
        .collect()
}

fn by_score_then_id(a: &Candidate, b: &Candidate) -> std::cmp::Ordering {
    OrderedFloat(b.fused)
        .cmp(&OrderedFloat(a.fused))
        .then_with(|| a.id.cmp(&b.id))
}

/// Linear weighted fusion of normalized vector and keyword scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearFusion {
    pub vector_weight: f64,
    pub fts_weight: f64,
}

impl Default for LinearFusion {
    fn default() -> Self {
        Self {
            vector_weight: 0.7,
            fts_weight: 0.3,
        }
    }
}

impl LinearFusion {
    pub fn from_params(params: &Parameters) -> Self {
        Self {
            vector_weight: params.vector_weight,
            fts_weight: params.fts_weight,
        }
    }

    /// Fuse one candidate's normalized scores. `None` means the signal did
    /// not return the candidate.
    pub fn fuse(&self, vector: Option<f64>, keyword: Option<f64>) -> f64 {
        let score = match (vector, keyword) {
            (Some(v), Some(k)) => self.vector_weight * v + self.fts_weight * k,
            (Some(v), None) => v,
            (None, Some(k)) => k,
            (None, None) => 0.0,
        };
        score.clamp(0.0, 1.0)
    }

    /// Fuse two raw hit sets into one pool, best first, ties by id.
    pub fn fuse_sets(
        &self,
        vector_hits: &[(RecordId, f64)],
        keyword_hits: &[(RecordId, f64)],
    ) -> Vec<Candidate> {
        let vector = normalize(vector_hits);
        let keyword = normalize(keyword_hits);

        let mut ids: Vec<RecordId> = vector.keys().chain(keyword.keys()).copied().collect();
        ids.sort();
        ids.dedup();

        let mut pool: Vec<Candidate> = ids
            .into_iter()
            .map(|id| {
                let v = vector.get(&id).copied();
                let k = keyword.get(&id).copied();
                let source = match (v, k) {
                    (Some(_), Some(_)) => CandidateSource::Hybrid,
                    (Some(_), None) => CandidateSource::Semantic,
                    _ => CandidateSource::Keyword,
                };
                Candidate {
                    id,
                    fused: self.fuse(v, k),
                    source,
                }
            })
            .collect();
        pool.sort_by(by_score_then_id);
        pool
    }
}

/// Hebbian neighbors of the top `seeds` candidates that are not already in
/// the pool.
///
/// A neighbor `n` scores `Σ (1 / fan(seed)) · S(seed, n) · fused(seed)` over
/// the seeds it is linked to, clamped to [0, 1].
pub fn expand(pool: &[Candidate], seeds: usize, graph: &HebbianGraph) -> EngraveResult<Vec<Candidate>> {
    let mut scores: HashMap<RecordId, f64> = HashMap::new();

    for seed in pool.iter().take(seeds) {
        let neighbors = graph.neighbors(seed.id)?;
        if neighbors.is_empty() {
            continue;
        }
        let fan = neighbors.len() as f64;
        for (neighbor, strength) in neighbors {
            if pool.iter().any(|c| c.id == neighbor) {
                continue;
            }
            *scores.entry(neighbor).or_insert(0.0) += strength * seed.fused / fan;
        }
    }

    let mut expanded: Vec<Candidate> = scores
        .into_iter()
        .map(|(id, score)| Candidate {
            id,
            fused: score.clamp(0.0, 1.0),
            source: CandidateSource::Graph,
        })
        .collect();
    expanded.sort_by(by_score_then_id);
    Ok(expanded)
}
