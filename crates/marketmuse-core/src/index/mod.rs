//! Approximate nearest-neighbour index over passage embeddings.
//!
//! [`VectorIndex`] maps passage ids onto an HNSW graph and adds the
//! guarantees retrieval relies on:
//!
//! - **Fixed dimensionality and metric.** The first vector (or
//!   [`VectorIndex::with_dims`]) fixes the dimensionality; any other length
//!   is a [`Error::DimensionMismatch`].
//! - **Deletion is immediate.** A deleted id is unmapped at once and can
//!   never appear in a result, even while its graph node is still routing
//!   traffic as a tombstone.
//! - **Monotonic prefix.** For unchanged state, `search(q, k)` is always a
//!   prefix of `search(q, k + 1)`. The beam width is `ef_search`, never a
//!   function of `k`, so one deterministic ranked list backs every `k`;
//!   when `k` exceeds it the remaining live entries follow in exact
//!   distance order.
//! - **Exact small indexes.** At or below `exact_search_threshold` live
//!   entries the graph is bypassed for a brute-force scan.

mod distance;
mod hnsw;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

pub use distance::Metric;

use crate::error::{Error, Result};
use distance::magnitude;
use hnsw::Hnsw;

/// Tombstones are compacted away once they outnumber live entries and
/// exceed this floor.
const COMPACT_MIN_TOMBSTONES: usize = 64;

/// Tuning parameters, fixed when the index is created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexSettings {
    pub metric: Metric,
    /// Max neighbours per node per layer (`2 * m` on layer 0).
    pub m: usize,
    pub ef_construction: usize,
    /// Beam width at query time. Independent of `k`.
    pub ef_search: usize,
    /// Live-entry count at or below which searches are exact.
    pub exact_search_threshold: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            metric: Metric::Cosine,
            m: 16,
            ef_construction: 200,
            ef_search: 64,
            exact_search_threshold: 256,
        }
    }
}

/// Passage-id keyed vector index.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    settings: IndexSettings,
    dims: Option<usize>,
    graph: Hnsw,
    slots: HashMap<String, u32>,
    ids: Vec<Option<String>>,
}

impl VectorIndex {
    pub fn new(settings: IndexSettings) -> Self {
        Self {
            settings,
            dims: None,
            graph: Hnsw::new(settings.m, settings.ef_construction, settings.metric),
            slots: HashMap::new(),
            ids: Vec::new(),
        }
    }

    /// An empty index that only accepts `dims`-length vectors.
    pub fn with_dims(settings: IndexSettings, dims: usize) -> Self {
        let mut index = Self::new(settings);
        index.dims = Some(dims);
        index
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub fn metric(&self) -> Metric {
        self.settings.metric
    }

    pub fn dims(&self) -> Option<usize> {
        self.dims
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, passage_id: &str) -> bool {
        self.slots.contains_key(passage_id)
    }

    /// Check a vector against the index dimensionality without inserting.
    pub fn check(&self, vector: &[f32]) -> Result<()> {
        let expected = self.dims.unwrap_or(vector.len());
        if vector.is_empty() || vector.len() != expected {
            return Err(Error::DimensionMismatch {
                expected: expected.max(1),
                got: vector.len(),
            });
        }
        Ok(())
    }

    /// Insert a vector. Re-inserting an existing id replaces its entry.
    pub fn insert(&mut self, passage_id: &str, vector: Vec<f32>) -> Result<()> {
        self.check(&vector)?;
        self.dims = Some(vector.len());
        if self.slots.contains_key(passage_id) {
            self.delete(passage_id);
        }

        let slot = self.graph.insert(vector);
        debug_assert_eq!(slot as usize, self.ids.len());
        self.ids.push(Some(passage_id.to_string()));
        self.slots.insert(passage_id.to_string(), slot);
        Ok(())
    }

    /// Remove an entry. Returns whether it was present.
    pub fn delete(&mut self, passage_id: &str) -> bool {
        let Some(slot) = self.slots.remove(passage_id) else {
            return false;
        };
        self.graph.mark_deleted(slot);
        self.ids[slot as usize] = None;

        let tombstones = self.graph.len() - self.slots.len();
        if self.slots.is_empty() {
            self.clear_entries();
        } else if tombstones > self.slots.len().max(COMPACT_MIN_TOMBSTONES) {
            self.compact();
        }
        true
    }

    /// Drop every entry. The dimensionality constraint is kept.
    pub fn clear(&mut self) {
        self.clear_entries();
    }

    /// The `k` nearest live entries as `(passage_id, distance)`, closest
    /// first. Always a prefix of the same call with a larger `k`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        self.check(query)?;

        let ranked = if self.len() <= self.settings.exact_search_threshold {
            self.exact_ranked(query, |_| true)
        } else {
            let mut ranked = self.graph.search(query, self.settings.ef_search);
            if ranked.len() < k {
                let seen: HashSet<u32> = ranked.iter().map(|(s, _)| *s).collect();
                ranked.extend(self.exact_ranked(query, |slot| !seen.contains(&slot)));
            }
            ranked
        };

        Ok(ranked
            .into_iter()
            .take(k)
            .filter_map(|(slot, d)| self.ids[slot as usize].clone().map(|id| (id, d)))
            .collect())
    }

    /// Exact search restricted to `allowed` passage ids.
    pub fn search_filtered(
        &self,
        query: &[f32],
        k: usize,
        allowed: &HashSet<String>,
    ) -> Result<Vec<(String, f32)>> {
        if k == 0 || self.is_empty() || allowed.is_empty() {
            return Ok(Vec::new());
        }
        self.check(query)?;

        let mag = magnitude(query);
        let mut ranked: Vec<(u32, f32)> = allowed
            .iter()
            .filter_map(|id| self.slots.get(id).copied())
            .map(|slot| (slot, self.graph.distance_to(slot, query, mag)))
            .collect();
        sort_ranked(&mut ranked);

        Ok(ranked
            .into_iter()
            .take(k)
            .filter_map(|(slot, d)| self.ids[slot as usize].clone().map(|id| (id, d)))
            .collect())
    }

    fn exact_ranked(&self, query: &[f32], keep: impl Fn(u32) -> bool) -> Vec<(u32, f32)> {
        let mag = magnitude(query);
        let mut ranked: Vec<(u32, f32)> = self
            .slots
            .values()
            .copied()
            .filter(|&slot| keep(slot) && !self.graph.is_deleted(slot))
            .map(|slot| (slot, self.graph.distance_to(slot, query, mag)))
            .collect();
        sort_ranked(&mut ranked);
        ranked
    }

    /// Rebuild the graph from live entries in slot order.
    fn compact(&mut self) {
        let live: Vec<(String, Vec<f32>)> = self
            .ids
            .iter()
            .enumerate()
            .filter_map(|(slot, id)| {
                id.as_ref()
                    .map(|id| (id.clone(), self.graph.vector(slot as u32).to_vec()))
            })
            .collect();
        tracing::debug!(
            live = live.len(),
            tombstones = self.graph.len() - live.len(),
            "compacting vector index"
        );

        self.clear_entries();
        for (id, vector) in live {
            let slot = self.graph.insert(vector);
            self.ids.push(Some(id.clone()));
            self.slots.insert(id, slot);
        }
    }

    fn clear_entries(&mut self) {
        self.graph = Hnsw::new(
            self.settings.m,
            self.settings.ef_construction,
            self.settings.metric,
        );
        self.slots.clear();
        self.ids.clear();
    }
}

fn sort_ranked(ranked: &mut [(u32, f32)]) {
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
}
