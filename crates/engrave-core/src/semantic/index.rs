//! Vector index capability and an in-memory implementation.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{EngraveError, EngraveResult};
use crate::types::RecordId;

/// Nearest-neighbour lookup over record vectors.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, id: RecordId, vector: Vec<f32>) -> EngraveResult<()>;

    async fn remove(&self, id: RecordId) -> EngraveResult<()>;

    /// Up to `limit` records ordered by similarity to `query`, best first.
    /// Similarities are in [0, 1].
    async fn nearest(&self, query: &[f32], limit: usize) -> EngraveResult<Vec<(RecordId, f64)>>;

    async fn len(&self) -> usize;
}

/// Cosine similarity. Zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Brute-force cosine index held in memory.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    vectors: RwLock<HashMap<RecordId, Vec<f32>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, id: RecordId, vector: Vec<f32>) -> EngraveResult<()> {
        let mut vectors = self.vectors.write().await;
        if let Some(existing) = vectors.values().next() {
            if existing.len() != vector.len() {
                return Err(EngraveError::provider(format!(
                    "vector has {} dimensions, index holds {}",
                    vector.len(),
                    existing.len()
                )));
            }
        }
        vectors.insert(id, vector);
        Ok(())
    }

    async fn remove(&self, id: RecordId) -> EngraveResult<()> {
        self.vectors.write().await.remove(&id);
        Ok(())
    }

    async fn nearest(&self, query: &[f32], limit: usize) -> EngraveResult<Vec<(RecordId, f64)>> {
        let vectors = self.vectors.read().await;
        let mut scored: Vec<(RecordId, f64)> = vectors
            .iter()
            .map(|(id, v)| (*id, cosine_similarity(query, v).max(0.0)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn len(&self) -> usize {
        self.vectors.read().await.len()
    }
}
