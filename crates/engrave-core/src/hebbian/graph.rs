//! Weighted symmetric association graph over record ids.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use petgraph::graphmap::UnGraphMap;
use tracing::debug;

use crate::activation::{ContextNode, SpreadingContext};
use crate::config::Parameters;
use crate::error::{EngraveError, EngraveResult};
use crate::types::{canonical_pair, HebbianLink, RecordId};

/// Canonically ordered id pair.
pub type Pair = (RecordId, RecordId);

/// Graph mutations produced by one co-activation call, for persistence.
#[derive(Debug, Clone, Default)]
pub struct CoActivationOutcome {
    /// Links created because their pair reached the formation threshold.
    pub formed: Vec<HebbianLink>,
    /// Existing links strengthened by this co-activation.
    pub reinforced: Vec<HebbianLink>,
    /// Updated counters for pairs that still have no link.
    pub counters: Vec<(Pair, u32)>,
}

impl CoActivationOutcome {
    pub fn is_empty(&self) -> bool {
        self.formed.is_empty() && self.reinforced.is_empty() && self.counters.is_empty()
    }
}

/// Result of a decay pass.
#[derive(Debug, Clone, Default)]
pub struct DecayOutcome {
    /// Links that survived with reduced strength.
    pub decayed: Vec<HebbianLink>,
    /// Pairs whose link fell below the prune threshold and was removed.
    pub pruned: Vec<Pair>,
}

#[derive(Debug, Default)]
struct GraphState {
    graph: UnGraphMap<RecordId, HebbianLink>,
    counters: HashMap<Pair, u32>,
}

impl GraphState {
    fn insert_link(&mut self, link: HebbianLink) {
        self.counters.remove(&(link.source, link.target));
        self.graph.add_edge(link.source, link.target, link);
    }

    fn remove_link(&mut self, a: RecordId, b: RecordId) -> Option<HebbianLink> {
        let removed = self.graph.remove_edge(a, b);
        for node in [a, b] {
            if self.graph.contains_node(node) && self.graph.neighbors(node).next().is_none() {
                self.graph.remove_node(node);
            }
        }
        removed
    }

    fn reinforce(&mut self, a: RecordId, b: RecordId, boost: f64, now: DateTime<Utc>) -> Option<HebbianLink> {
        let link = self.graph.edge_weight_mut(a, b)?;
        link.strength = (link.strength + boost).min(1.0);
        link.coactivation_count = link.coactivation_count.saturating_add(1);
        link.last_reinforced = now;
        Some(link.clone())
    }

    fn form_ready_links(&mut self, threshold: u32, now: DateTime<Utc>) -> Vec<HebbianLink> {
        let ready: Vec<(Pair, u32)> = self
            .counters
            .iter()
            .filter(|(pair, count)| **count >= threshold && !self.graph.contains_edge(pair.0, pair.1))
            .map(|(pair, count)| (*pair, *count))
            .collect();

        let mut formed = Vec::with_capacity(ready.len());
        for ((a, b), count) in ready {
            let link = HebbianLink::formed(a, b, count, now);
            self.insert_link(link.clone());
            formed.push(link);
        }
        formed.sort_by(|x, y| (x.source, x.target).cmp(&(y.source, y.target)));
        formed
    }

    fn neighbors(&self, id: RecordId) -> Vec<(RecordId, f64)> {
        if !self.graph.contains_node(id) {
            return Vec::new();
        }
        let mut out: Vec<(RecordId, f64)> = self
            .graph
            .neighbors(id)
            .filter_map(|n| self.graph.edge_weight(id, n).map(|l| (n, l.strength)))
            .collect();
        out.sort_by(|a, b| {
            OrderedFloat(b.1)
                .cmp(&OrderedFloat(a.1))
                .then_with(|| a.0.cmp(&b.0))
        });
        out
    }
}

/// Hebbian association graph.
///
/// Links are undirected and stored once per unordered pair, so a lookup from
/// either endpoint returns the same strength. Co-activation counters are kept
/// for pairs without a link; once a pair's counter reaches the formation
/// threshold the counter is replaced by a link at full strength.
///
/// Every mutation runs under one exclusive lock; readers take the shared lock
/// and never observe a half-applied mutation.
#[derive(Debug, Default)]
pub struct HebbianGraph {
    state: RwLock<GraphState>,
}

impl HebbianGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a graph from persisted links and counters.
    pub fn from_parts(links: Vec<HebbianLink>, counters: Vec<(Pair, u32)>) -> Self {
        let mut state = GraphState::default();
        for ((a, b), count) in counters {
            if a != b {
                state.counters.insert(canonical_pair(a, b), count);
            }
        }
        for mut link in links {
            if link.source == link.target {
                continue;
            }
            let (source, target) = canonical_pair(link.source, link.target);
            link.source = source;
            link.target = target;
            link.strength = link.strength.clamp(0.0, 1.0);
            state.insert_link(link);
        }
        Self {
            state: RwLock::new(state),
        }
    }

    fn read(&self) -> EngraveResult<RwLockReadGuard<'_, GraphState>> {
        self.state.read().map_err(|_| EngraveError::poisoned("hebbian graph"))
    }

    fn write(&self) -> EngraveResult<RwLockWriteGuard<'_, GraphState>> {
        self.state.write().map_err(|_| EngraveError::poisoned("hebbian graph"))
    }

    /// Record that `ids` were retrieved together.
    ///
    /// Every unordered pair within the first `max_coactivation_set` distinct
    /// ids is counted once. Pairs that already have a link are reinforced;
    /// other pairs have their counter incremented and form a link when the
    /// counter reaches `formation_threshold`.
    pub fn record_co_activation(
        &self,
        ids: &[RecordId],
        params: &Parameters,
        now: DateTime<Utc>,
    ) -> EngraveResult<CoActivationOutcome> {
        let mut distinct: Vec<RecordId> = Vec::with_capacity(ids.len());
        for id in ids {
            if !distinct.contains(id) {
                distinct.push(*id);
            }
        }
        distinct.truncate(params.max_coactivation_set);

        let mut outcome = CoActivationOutcome::default();
        if distinct.len() < 2 {
            return Ok(outcome);
        }

        let mut state = self.write()?;
        for i in 0..distinct.len() {
            for j in (i + 1)..distinct.len() {
                let pair = canonical_pair(distinct[i], distinct[j]);
                if let Some(link) = state.reinforce(pair.0, pair.1, params.reinforcement_boost, now) {
                    outcome.reinforced.push(link);
                } else {
                    let count = state.counters.entry(pair).or_insert(0);
                    *count = count.saturating_add(1);
                    if *count < params.formation_threshold {
                        outcome.counters.push((pair, *count));
                    }
                }
            }
        }
        outcome.formed = state.form_ready_links(params.formation_threshold, now);

        debug!(
            pairs = distinct.len() * (distinct.len() - 1) / 2,
            formed = outcome.formed.len(),
            reinforced = outcome.reinforced.len(),
            "Recorded co-activation"
        );
        Ok(outcome)
    }

    /// Form links for every pair whose counter has reached the threshold.
    pub fn maybe_form_links(&self, params: &Parameters, now: DateTime<Utc>) -> EngraveResult<Vec<HebbianLink>> {
        let mut state = self.write()?;
        Ok(state.form_ready_links(params.formation_threshold, now))
    }

    /// Strengthen an existing link. Returns `None` when no link exists.
    pub fn reinforce(
        &self,
        a: RecordId,
        b: RecordId,
        params: &Parameters,
        now: DateTime<Utc>,
    ) -> EngraveResult<Option<HebbianLink>> {
        let mut state = self.write()?;
        Ok(state.reinforce(a, b, params.reinforcement_boost, now))
    }

    /// Decay every link by `exp(-λ * elapsed_days)` and prune weak links.
    pub fn decay_all(&self, elapsed_days: f64, params: &Parameters) -> EngraveResult<DecayOutcome> {
        let factor = (-params.link_decay_rate * elapsed_days.max(0.0)).exp();
        let mut state = self.write()?;

        let mut outcome = DecayOutcome::default();
        let pairs: Vec<Pair> = state.graph.all_edges().map(|(a, b, _)| canonical_pair(a, b)).collect();
        for (a, b) in pairs {
            let strength = match state.graph.edge_weight_mut(a, b) {
                Some(link) => {
                    link.strength *= factor;
                    link.strength
                }
                None => continue,
            };
            if strength < params.prune_threshold {
                state.remove_link(a, b);
                outcome.pruned.push((a, b));
            } else if let Some(link) = state.graph.edge_weight(a, b) {
                outcome.decayed.push(link.clone());
            }
        }

        debug!(
            elapsed_days,
            decayed = outcome.decayed.len(),
            pruned = outcome.pruned.len(),
            "Decayed hebbian links"
        );
        Ok(outcome)
    }

    /// Neighbors of `id`, strongest first, ties broken by id.
    pub fn neighbors(&self, id: RecordId) -> EngraveResult<Vec<(RecordId, f64)>> {
        Ok(self.read()?.neighbors(id))
    }

    /// Link strength between two records, if linked.
    pub fn strength(&self, a: RecordId, b: RecordId) -> EngraveResult<Option<f64>> {
        Ok(self.read()?.graph.edge_weight(a, b).map(|l| l.strength))
    }

    /// The link between two records, if any.
    pub fn link(&self, a: RecordId, b: RecordId) -> EngraveResult<Option<HebbianLink>> {
        Ok(self.read()?.graph.edge_weight(a, b).cloned())
    }

    /// How many times a pair has been retrieved together.
    pub fn coactivation_count(&self, a: RecordId, b: RecordId) -> EngraveResult<u32> {
        let state = self.read()?;
        if let Some(link) = state.graph.edge_weight(a, b) {
            return Ok(link.coactivation_count);
        }
        Ok(state.counters.get(&canonical_pair(a, b)).copied().unwrap_or(0))
    }

    /// All links, or only those touching `id`, ordered by pair.
    pub fn links(&self, id: Option<RecordId>) -> EngraveResult<Vec<HebbianLink>> {
        let state = self.read()?;
        let mut links: Vec<HebbianLink> = state
            .graph
            .all_edges()
            .map(|(_, _, link)| link)
            .filter(|link| id.map_or(true, |id| link.other(id).is_some()))
            .cloned()
            .collect();
        links.sort_by(|x, y| (x.source, x.target).cmp(&(y.source, y.target)));
        Ok(links)
    }

    pub fn link_count(&self) -> EngraveResult<usize> {
        Ok(self.read()?.graph.edge_count())
    }

    /// Remove every link and counter touching `id`. Returns the removed link count.
    pub fn remove_record(&self, id: RecordId) -> EngraveResult<usize> {
        let mut state = self.write()?;
        state.counters.retain(|(a, b), _| *a != id && *b != id);
        if !state.graph.contains_node(id) {
            return Ok(0);
        }
        let removed = state.graph.neighbors(id).count();
        state.graph.remove_node(id);
        let orphans: Vec<RecordId> = state
            .graph
            .nodes()
            .filter(|n| state.graph.neighbors(*n).next().is_none())
            .collect();
        for node in orphans {
            state.graph.remove_node(node);
        }
        Ok(removed)
    }

    /// Snapshot the links of `ids` for spreading activation.
    pub fn spreading_context(&self, ids: &[RecordId]) -> EngraveResult<SpreadingContext> {
        let state = self.read()?;
        let mut context = SpreadingContext::new();
        for id in ids {
            let neighbors = state.neighbors(*id);
            context.insert(
                *id,
                ContextNode {
                    fan: neighbors.len(),
                    links: neighbors.into_iter().collect(),
                },
            );
        }
        Ok(context)
    }
}
