//! Hybrid retrieval: keyword and semantic candidates, fused, optionally
//! expanded through Hebbian links, and ranked by activation.

mod fusion;
mod search;

pub use fusion::{expand, normalize, Candidate, CandidateSource, LinearFusion};
pub use search::{RetrievalFusion, ScoredRecord, SearchQuery};
