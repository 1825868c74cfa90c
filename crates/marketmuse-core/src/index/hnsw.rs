//! HNSW (Hierarchical Navigable Small World) graph.
//!
//! Nodes are addressed by dense `u32` slots assigned in insertion order;
//! [`VectorIndex`](super::VectorIndex) maps passage ids onto slots and
//! owns dimensionality checks.
//!
//! # Algorithm Overview
//! - Each node draws a level from an exponential distribution
//!   (`level = floor(-ln(u) / ln(M))`) using a fixed-seed LCG, so the same
//!   insertion sequence always builds the same graph.
//! - Inserts descend greedily from the top layer, then link the node to
//!   its nearest neighbours on every layer it belongs to, pruning
//!   neighbour lists back to `M` (`2M` on layer 0).
//! - Deletes only set a tombstone; tombstoned nodes still route searches
//!   but are never returned.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use super::distance::{magnitude, Metric};

const MAX_LEVEL: u8 = 16;

#[derive(Debug, Clone)]
struct Node {
    vector: Vec<f32>,
    magnitude: f32,
    neighbors: Vec<Vec<u32>>,
    deleted: bool,
}

/// A `(distance, slot)` pair ordered by distance, then slot.
#[derive(Debug, Clone, Copy)]
struct Scored {
    distance: f32,
    slot: u32,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.slot.cmp(&other.slot))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Hnsw {
    m: usize,
    m_max0: usize,
    ef_construction: usize,
    level_mult: f32,
    metric: Metric,
    nodes: Vec<Node>,
    entry_point: Option<u32>,
    level_max: u8,
    rng_state: u64,
}

impl Hnsw {
    pub(crate) fn new(m: usize, ef_construction: usize, metric: Metric) -> Self {
        let m = m.max(2);
        Hnsw {
            m,
            m_max0: m * 2,
            ef_construction: ef_construction.max(1),
            level_mult: 1.0 / (m as f32).ln(),
            metric,
            nodes: Vec::new(),
            entry_point: None,
            level_max: 0,
            rng_state: 42,
        }
    }

    /// Total nodes, tombstones included.
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn vector(&self, slot: u32) -> &[f32] {
        &self.nodes[slot as usize].vector
    }

    /// Insert a vector and return its slot. The caller guarantees a
    /// consistent, non-zero dimensionality.
    pub(crate) fn insert(&mut self, vector: Vec<f32>) -> u32 {
        let slot = self.nodes.len() as u32;
        let level = self.select_level();
        let mag = magnitude(&vector);
        self.nodes.push(Node {
            vector,
            magnitude: mag,
            neighbors: vec![Vec::new(); level as usize + 1],
            deleted: false,
        });

        let Some(mut ep) = self.entry_point else {
            self.entry_point = Some(slot);
            self.level_max = level;
            return slot;
        };

        let query = self.nodes[slot as usize].vector.clone();

        // Phase 1: greedy descent through layers above the node's level.
        let mut lc = self.level_max;
        while lc > level {
            if let Some(best) = self.search_layer(ep, &query, mag, 1, lc).first() {
                ep = best.0;
            }
            lc -= 1;
        }

        // Phase 2: link on every shared layer, top down.
        for lc in (0..=level.min(self.level_max)).rev() {
            let found = self.search_layer(ep, &query, mag, self.ef_construction, lc);
            let limit = if lc == 0 { self.m_max0 } else { self.m };
            let selected: Vec<u32> = found
                .iter()
                .map(|(s, _)| *s)
                .filter(|&s| s != slot)
                .take(limit)
                .collect();

            for &neighbor in &selected {
                self.link(neighbor, slot, lc);
                self.link(slot, neighbor, lc);
            }
            for &neighbor in &selected {
                self.prune(neighbor, lc, limit);
            }
            if let Some(best) = found.first() {
                ep = best.0;
            }
        }

        if level > self.level_max {
            self.entry_point = Some(slot);
            self.level_max = level;
        }
        slot
    }

    pub(crate) fn mark_deleted(&mut self, slot: u32) {
        if let Some(node) = self.nodes.get_mut(slot as usize) {
            node.deleted = true;
        }
    }

    pub(crate) fn is_deleted(&self, slot: u32) -> bool {
        self.nodes
            .get(slot as usize)
            .map(|n| n.deleted)
            .unwrap_or(true)
    }

    /// Beam search with width `ef`. Returns live nodes sorted by
    /// ascending `(distance, slot)`; the result depends only on the graph
    /// state, the query and `ef`.
    pub(crate) fn search(&self, query: &[f32], ef: usize) -> Vec<(u32, f32)> {
        let Some(mut ep) = self.entry_point else {
            return Vec::new();
        };
        let mag = magnitude(query);

        let mut lc = self.level_max;
        while lc > 0 {
            if let Some(best) = self.search_layer(ep, query, mag, 1, lc).first() {
                ep = best.0;
            }
            lc -= 1;
        }

        self.search_layer(ep, query, mag, ef.max(1), 0)
            .into_iter()
            .filter(|(slot, _)| !self.nodes[*slot as usize].deleted)
            .collect()
    }

    /// Distance from `query` to a node.
    pub(crate) fn distance_to(&self, slot: u32, query: &[f32], query_mag: f32) -> f32 {
        let node = &self.nodes[slot as usize];
        self.metric
            .distance_with(&node.vector, node.magnitude, query, query_mag)
    }

    fn select_level(&mut self) -> u8 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        let r = ((self.rng_state >> 33) as f32 / (u32::MAX >> 1) as f32).clamp(1e-7, 1.0);
        let level = (-r.ln() * self.level_mult).floor() as u8;
        level.min(MAX_LEVEL)
    }

    fn search_layer(
        &self,
        entry: u32,
        query: &[f32],
        query_mag: f32,
        ef: usize,
        level: u8,
    ) -> Vec<(u32, f32)> {
        let mut visited: HashSet<u32> = HashSet::new();
        // Closest-first frontier.
        let mut candidates: BinaryHeap<Reverse<Scored>> = BinaryHeap::new();
        // Farthest-first so the worst result is at the top.
        let mut results: BinaryHeap<Scored> = BinaryHeap::new();

        let first = Scored {
            distance: self.distance_to(entry, query, query_mag),
            slot: entry,
        };
        visited.insert(entry);
        candidates.push(Reverse(first));
        results.push(first);

        while let Some(Reverse(current)) = candidates.pop() {
            let worst = results.peek().map(|r| r.distance).unwrap_or(f32::INFINITY);
            if current.distance > worst && results.len() >= ef {
                break;
            }

            let node = &self.nodes[current.slot as usize];
            let Some(neighbors) = node.neighbors.get(level as usize) else {
                continue;
            };
            for &nid in neighbors {
                if !visited.insert(nid) {
                    continue;
                }
                let scored = Scored {
                    distance: self.distance_to(nid, query, query_mag),
                    slot: nid,
                };
                let worst = results.peek().map(|r| r.distance).unwrap_or(f32::INFINITY);
                if results.len() < ef || scored.distance < worst {
                    candidates.push(Reverse(scored));
                    results.push(scored);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        results
            .into_sorted_vec()
            .into_iter()
            .map(|s| (s.slot, s.distance))
            .collect()
    }

    fn link(&mut self, from: u32, to: u32, level: u8) {
        let node = &mut self.nodes[from as usize];
        while node.neighbors.len() <= level as usize {
            node.neighbors.push(Vec::new());
        }
        let list = &mut node.neighbors[level as usize];
        if !list.contains(&to) {
            list.push(to);
        }
    }

    /// Keep only the `max` closest neighbours of `slot` on `level`.
    fn prune(&mut self, slot: u32, level: u8, max: usize) {
        let node = &self.nodes[slot as usize];
        let Some(list) = node.neighbors.get(level as usize) else {
            return;
        };
        if list.len() <= max {
            return;
        }

        let mut scored: Vec<Scored> = list
            .iter()
            .map(|&nid| Scored {
                distance: self.distance_to(nid, &node.vector, node.magnitude),
                slot: nid,
            })
            .collect();
        scored.sort();
        let kept: Vec<u32> = scored.into_iter().take(max).map(|s| s.slot).collect();
        self.nodes[slot as usize].neighbors[level as usize] = kept;
    }
}
