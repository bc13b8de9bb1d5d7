//! A single entity's position in the HNSW graph: its level, its per-level
//! neighbor sets, and (when quantization is enabled) its SQ8 representation.
//!
//! Neighbors are held as an arena-of-nodes indexed by ID: a node never owns
//! its neighbors, only their IDs, so the graph has no reference cycles
//! regardless of how tangled it gets.

use crate::quantization::QuantizedVector;
use graphdb_core::EntityId;
use std::collections::HashMap;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct HnswNode {
    pub id: EntityId,
    pub level: usize,
    /// `connections[l]` is the neighbor set at level `l`, for `l` in
    /// `0..=level`. `level[node] = max(level ∈ node.connections)` holds by
    /// construction since this always spans `0..=level`.
    pub connections: Vec<HashSet<EntityId>>,
    pub quantized: Option<QuantizedVector>,
}

impl HnswNode {
    pub fn new(id: EntityId, level: usize) -> Self {
        Self {
            id,
            level,
            connections: (0..=level).map(|_| HashSet::new()).collect(),
            quantized: None,
        }
    }

    pub fn neighbors_at(&self, level: usize) -> Option<&HashSet<EntityId>> {
        self.connections.get(level)
    }

    /// Serializes `connections` into the string-keyed-by-level shape the
    /// storage crate's `NounVectorRecord` persists.
    pub fn connections_by_level_key(&self) -> HashMap<String, Vec<EntityId>> {
        self.connections
            .iter()
            .enumerate()
            .map(|(level, set)| (level.to_string(), set.iter().copied().collect()))
            .collect()
    }

    /// Inverse of [`Self::connections_by_level_key`], used when
    /// reconstructing a node from a persisted record during `rebuild`.
    pub fn connections_from_level_key(
        raw: &HashMap<String, Vec<EntityId>>,
        level: usize,
    ) -> Vec<HashSet<EntityId>> {
        (0..=level)
            .map(|l| {
                raw.get(&l.to_string())
                    .map(|ids| ids.iter().copied().collect())
                    .unwrap_or_default()
            })
            .collect()
    }
}
