//! Hebbian co-activation links between records.
//!
//! Records retrieved together repeatedly become associated. Associations
//! start as plain counters, turn into links at a formation threshold, are
//! reinforced on further co-retrieval and fade during consolidation.

mod graph;

pub use graph::{CoActivationOutcome, DecayOutcome, HebbianGraph, Pair};
