//! HNSW (Hierarchical Navigable Small World) index: layered proximity graph
//! construction, layered search, pruning, COW forking, and rebuild over
//! the database's `EntityId` (UUID) keyspace, with scalar quantization,
//! lazy vector eviction, and an O(1) entry-point recovery index.
//!
//! Neighbors are held as an arena-of-nodes indexed by ID: a
//! node never owns its neighbors, only their IDs, avoiding ownership
//! cycles. Nodes are wrapped in `Arc` so [`HnswIndex::fork`] can
//! shallow-copy the node map in O(n) pointer copies and rely on
//! `Arc::make_mut`'s own strong-count check to deep-copy a node on its
//! first post-fork write, giving copy-on-write semantics without an
//! explicit modified-node tracking set.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use graphdb_core::{EntityId, HnswSettings, VectorStorageMode};
use graphdb_storage::NounVectorRecord;

use crate::distance::DistanceMetric;
use crate::error::{IndexError, Result};
use crate::filter::NodeFilter;
use crate::node::HnswNode;
use crate::quantization::{QuantizedVector, approximate_distance};
use crate::types::SearchResult;

/// Tunables derived from [`HnswSettings`], plus the values left implicit
/// by the caller (`level_multiplier`).
#[derive(Debug, Clone)]
pub struct HnswConfig {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub level_multiplier: f64,
    pub ml_max: usize,
    pub quantization_enabled: bool,
    pub rerank_multiplier: usize,
    pub vector_storage: VectorStorageMode,
}

impl From<&HnswSettings> for HnswConfig {
    fn from(settings: &HnswSettings) -> Self {
        let m = settings.m.max(1);
        Self {
            m,
            ef_construction: settings.ef_construction,
            ef_search: settings.ef_search,
            level_multiplier: 1.0 / (m.max(2) as f64).ln(),
            ml_max: settings.ml_max,
            quantization_enabled: settings.quantization.enabled,
            rerank_multiplier: settings.quantization.rerank_multiplier,
            vector_storage: settings.vector_storage,
        }
    }
}

/// Node ids touched by a write, returned so the caller (the persistence
/// coordinator, via `graphdb-db`'s facade) knows what to flush or mark
/// dirty without the index reaching into storage itself.
#[derive(Debug, Default, Clone)]
pub struct InsertOutcome {
    pub touched: Vec<EntityId>,
    pub entry_point_changed: bool,
}

/// Levels at or above this are tracked in the high-level index for O(1)
/// entry-point recovery"); the cap is `HnswConfig::ml_max`.
const HIGH_LEVEL_INDEX_MIN: usize = 2;

pub struct HnswIndex {
    config: HnswConfig,
    metric: DistanceMetric,
    nodes: HashMap<EntityId, Arc<HnswNode>>,
    vectors: HashMap<EntityId, Arc<Vec<f32>>>,
    entry_point: Option<EntityId>,
    max_layer: usize,
    dimension: Option<usize>,
    high_level_index: BTreeMap<usize, HashSet<EntityId>>,
}

impl HnswIndex {
    pub fn new(config: HnswConfig, metric: DistanceMetric) -> Self {
        Self {
            config,
            metric,
            nodes: HashMap::new(),
            vectors: HashMap::new(),
            entry_point: None,
            max_layer: 0,
            dimension: None,
            high_level_index: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn entry_point(&self) -> Option<EntityId> {
        self.entry_point
    }

    pub fn max_layer(&self) -> usize {
        self.max_layer
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_level(&self, id: &EntityId) -> Option<usize> {
        self.nodes.get(id).map(|n| n.level)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.nodes.keys().copied()
    }

    /// Number of layer-0 neighbors `id` currently holds, or 0 if unknown.
    pub fn layer0_degree(&self, id: &EntityId) -> usize {
        self.nodes.get(id).and_then(|n| n.connections.first()).map(|s| s.len()).unwrap_or(0)
    }

    /// Resident vector for `id`, or `None` in lazy mode once evicted.
    pub fn resident_vector(&self, id: &EntityId) -> Option<Vec<f32>> {
        self.vectors.get(id).map(|v| (**v).clone())
    }

    // -- Insert -----------------------------------------------------------

    /// `addItem(id, vector)`. On the very first insert the
    /// dimension is fixed for the lifetime of the index; every later call
    /// with a mismatched length is rejected without mutating state.
    pub fn insert(&mut self, id: EntityId, vector: Vec<f32>) -> Result<InsertOutcome> {
        if vector.is_empty() {
            return Err(IndexError::InvalidVector("vector must not be empty".into()));
        }
        match self.dimension {
            Some(expected) if expected != vector.len() => {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            None => self.dimension = Some(vector.len()),
            _ => {}
        }

        let level = self.select_layer();
        let mut node = HnswNode::new(id, level);
        if self.config.quantization_enabled {
            node.quantized = Some(QuantizedVector::quantize(&vector));
        }

        if self.entry_point.is_none() {
            self.entry_point = Some(id);
            self.max_layer = level;
            self.track_high_level(id, level);
            self.nodes.insert(id, Arc::new(node));
            self.store_vector(id, vector);
            return Ok(InsertOutcome {
                touched: vec![id],
                entry_point_changed: true,
            });
        }

        let entry_id = self.entry_point.ok_or(IndexError::MissingEntryPoint)?;
        let mut current_nearest = vec![entry_id];
        let mut touched = vec![id];

        for layer in (level + 1..=self.max_layer).rev() {
            let found = self.search_layer(&vector, &current_nearest, 1, layer, None, None, None)?;
            current_nearest = if found.is_empty() { vec![entry_id] } else { found };
        }

        for layer in (0..=level.min(self.max_layer)).rev() {
            let candidates = self.search_layer(
                &vector,
                &current_nearest,
                self.config.ef_construction,
                layer,
                None,
                None,
                None,
            )?;
            let m = self.config.m;
            let neighbors = self.select_neighbors(&candidates, m, &vector)?;

            for &neighbor_id in &neighbors {
                node.connections[layer].insert(neighbor_id);
            }

            for &neighbor_id in &neighbors {
                let has_layer = self
                    .nodes
                    .get(&neighbor_id)
                    .is_some_and(|n| layer < n.connections.len());
                if !has_layer {
                    continue;
                }
                touched.push(neighbor_id);
                if let Some(slot) = self.nodes.get_mut(&neighbor_id) {
                    let neighbor_mut = Arc::make_mut(slot);
                    neighbor_mut.connections[layer].insert(id);
                }
                self.reprune_if_over_capacity(neighbor_id, layer, m)?;
            }

            current_nearest = candidates;
        }

        let mut entry_point_changed = false;
        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(id);
            entry_point_changed = true;
        }

        self.track_high_level(id, level);
        self.nodes.insert(id, Arc::new(node));
        self.store_vector(id, vector);

        Ok(InsertOutcome {
            touched,
            entry_point_changed,
        })
    }

    /// Every insert populates the resident vector map regardless of storage
    /// mode, so a search issued immediately after always finds it; lazy
    /// eviction is the caller's explicit decision via `evict_vector`, taken
    /// only once the vector is durably cached or persisted elsewhere.
    fn store_vector(&mut self, id: EntityId, vector: Vec<f32>) {
        self.vectors.insert(id, Arc::new(vector));
    }

    /// Drops `id`'s resident vector in `Lazy` storage mode. A no-op under
    /// `Memory` mode, where the vector always stays resident.
    pub fn evict_vector(&mut self, id: &EntityId) {
        if matches!(self.config.vector_storage, VectorStorageMode::Lazy) {
            self.vectors.remove(id);
        }
    }

    /// If `neighbor_id`'s connection set at `layer` now exceeds `m`, keep
    /// only the `m` closest to the neighbor's own vector.
    fn reprune_if_over_capacity(&mut self, neighbor_id: EntityId, layer: usize, m: usize) -> Result<()> {
        let over_capacity = self
            .nodes
            .get(&neighbor_id)
            .is_some_and(|n| n.connections[layer].len() > m);
        if !over_capacity {
            return Ok(());
        }
        let conn_ids: Vec<EntityId> = self.nodes[&neighbor_id].connections[layer]
            .iter()
            .copied()
            .collect();
        let Some(neighbor_vec) = self.resident_vector(&neighbor_id) else {
            // Lazy mode evicted the vector already; leave the transient
            // over-capacity set as-is rather than guess at a distance.
            return Ok(());
        };
        let keep = self.select_neighbors(&conn_ids, m, &neighbor_vec)?;
        let slot = self.nodes.get_mut(&neighbor_id).expect("checked above");
        Arc::make_mut(slot).connections[layer] = keep.into_iter().collect();
        Ok(())
    }

    // -- Search -------------------------------------------------------------

    /// `search(query, k, filter?, rerank?)`. `exact_vector`
    /// is consulted for rerank scoring when a candidate's vector isn't
    /// resident (lazy mode); pass the unified cache's synchronous getter
    /// here to avoid a synchronous index having to await anything.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&NodeFilter>,
        candidate_ids: Option<&HashSet<EntityId>>,
        exact_vector: Option<&dyn Fn(&EntityId) -> Option<Vec<f32>>>,
    ) -> Result<Vec<SearchResult>> {
        let Some(entry_id) = self.entry_point else {
            return Ok(Vec::new());
        };
        if let Some(expected) = self.dimension
            && expected != query.len()
        {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: query.len(),
            });
        }

        let quantized_query = self
            .config
            .quantization_enabled
            .then(|| QuantizedVector::quantize(query));

        let effective_filter: Option<NodeFilter> = match candidate_ids {
            Some(ids) => {
                let ids = ids.clone();
                Some(Arc::new(move |id: &EntityId| ids.contains(id)))
            }
            None => filter.cloned(),
        };

        let mut current_nearest = vec![entry_id];
        for layer in (1..=self.max_layer).rev() {
            let found = self.search_layer(
                query,
                &current_nearest,
                1,
                layer,
                quantized_query.as_ref(),
                None,
                exact_vector,
            )?;
            current_nearest = if found.is_empty() { vec![entry_id] } else { found };
        }

        let rerank_active = self.config.quantization_enabled && self.config.rerank_multiplier > 1;
        let rerank_k = if rerank_active {
            k.saturating_mul(self.config.rerank_multiplier).max(k)
        } else {
            k
        };
        let mut ef = self.config.ef_search.max(rerank_k);
        if effective_filter.is_some() {
            ef = ef.saturating_mul(3);
        }

        let layer0 = self.search_layer(
            query,
            &current_nearest,
            ef,
            0,
            quantized_query.as_ref(),
            effective_filter.as_ref(),
            exact_vector,
        )?;

        let mut results: Vec<SearchResult> = if rerank_active {
            layer0
                .iter()
                .take(rerank_k)
                .filter_map(|&id| {
                    self.resolve_exact_vector(&id, exact_vector)
                        .map(|vector| SearchResult::new(id, self.raw_distance(query, &vector)))
                })
                .collect()
        } else {
            layer0
                .iter()
                .take(k)
                .filter_map(|&id| {
                    self.distance_to(query, &id, quantized_query.as_ref(), exact_vector)
                        .ok()
                        .map(|d| SearchResult::new(id, d))
                })
                .collect()
        };

        results.sort();
        results.truncate(k);
        Ok(results)
    }

    fn resolve_exact_vector(
        &self,
        id: &EntityId,
        exact_vector: Option<&dyn Fn(&EntityId) -> Option<Vec<f32>>>,
    ) -> Option<Vec<f32>> {
        self.vectors
            .get(id)
            .map(|v| (**v).clone())
            .or_else(|| exact_vector.and_then(|f| f(id)))
    }

    /// Classic HNSW greedy best-first layer search with a visited set, a
    /// min-candidate frontier, and a bounded nearest-result set. A filter gates admission into the result set
    /// only — the frontier always expands through rejected nodes so the
    /// traversal shortcuts they provide aren't bypassed.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[EntityId],
        num_to_return: usize,
        layer: usize,
        quantized_query: Option<&QuantizedVector>,
        filter: Option<&NodeFilter>,
        loader: Option<&dyn Fn(&EntityId) -> Option<Vec<f32>>>,
    ) -> Result<Vec<EntityId>> {
        let mut visited: HashSet<EntityId> = HashSet::new();
        let mut candidates: BinaryHeap<Reverse<(OrderedFloat, EntityId)>> = BinaryHeap::new();
        let mut nearest: BinaryHeap<(OrderedFloat, EntityId)> = BinaryHeap::new();

        let passes = |id: &EntityId| filter.map(|f| f(id)).unwrap_or(true);

        for &ep in entry_points {
            if visited.insert(ep) {
                let Ok(dist) = self.distance_to(query, &ep, quantized_query, loader) else {
                    continue;
                };
                candidates.push(Reverse((OrderedFloat(dist), ep)));
                if passes(&ep) {
                    nearest.push((OrderedFloat(dist), ep));
                    if nearest.len() > num_to_return {
                        nearest.pop();
                    }
                }
            }
        }

        while let Some(Reverse((OrderedFloat(current_dist), current_id))) = candidates.pop() {
            if nearest.len() >= num_to_return
                && let Some(&(OrderedFloat(farthest), _)) = nearest.peek()
                && current_dist > farthest
            {
                break;
            }

            let Some(node) = self.nodes.get(&current_id) else {
                continue;
            };
            let Some(neighbor_set) = node.neighbors_at(layer) else {
                continue;
            };
            for &neighbor_id in neighbor_set {
                if !visited.insert(neighbor_id) {
                    continue;
                }
                // Missing neighbors during rapid add/delete interleaving
                // are expected: skip.
                let Ok(dist) = self.distance_to(query, &neighbor_id, quantized_query, loader) else {
                    continue;
                };
                candidates.push(Reverse((OrderedFloat(dist), neighbor_id)));
                if passes(&neighbor_id) {
                    let worse_than_farthest = nearest
                        .peek()
                        .map(|(OrderedFloat(d), _)| dist < *d)
                        .unwrap_or(true);
                    if nearest.len() < num_to_return || worse_than_farthest {
                        nearest.push((OrderedFloat(dist), neighbor_id));
                        if nearest.len() > num_to_return {
                            nearest.pop();
                        }
                    }
                }
            }
        }

        let mut result: Vec<_> = nearest.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(result.into_iter().map(|(_, id)| id).collect())
    }

    fn select_neighbors(&self, candidates: &[EntityId], m: usize, query: &[f32]) -> Result<Vec<EntityId>> {
        if candidates.len() <= m {
            return Ok(candidates.to_vec());
        }
        let mut scored: Vec<_> = candidates
            .iter()
            .map(|&id| {
                let dist = self.distance_to(query, &id, None, None).unwrap_or(f32::MAX);
                (OrderedFloat(dist), id)
            })
            .collect();
        scored.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(scored.into_iter().take(m).map(|(_, id)| id).collect())
    }

    /// Falls back to `loader` (the caller's unified-cache/storage getter)
    /// when the vector isn't resident, so `Lazy` mode can serve a query
    /// against a node whose vector was evicted after being durably cached.
    fn distance_to(
        &self,
        query: &[f32],
        id: &EntityId,
        quantized_query: Option<&QuantizedVector>,
        loader: Option<&dyn Fn(&EntityId) -> Option<Vec<f32>>>,
    ) -> Result<f32> {
        if let Some(qq) = quantized_query
            && let Some(node) = self.nodes.get(id)
            && let Some(qn) = &node.quantized
        {
            return Ok(approximate_distance(qq, qn));
        }
        if let Some(vector) = self.vectors.get(id) {
            return Ok(self.raw_distance(query, vector));
        }
        if let Some(loader) = loader
            && let Some(vector) = loader(id)
        {
            return Ok(self.raw_distance(query, &vector));
        }
        Err(IndexError::NotFound(*id))
    }

    fn raw_distance(&self, query: &[f32], vector: &[f32]) -> f32 {
        let score = self.metric.calculate(query, vector);
        if self.metric.higher_is_better() { 1.0 - score } else { score }
    }

    fn select_layer(&self) -> usize {
        let uniform: f64 = rand::random();
        let level = (-uniform.ln() * self.config.level_multiplier).floor().max(0.0) as usize;
        level.min(self.config.ml_max)
    }

    fn track_high_level(&mut self, id: EntityId, level: usize) {
        if level >= HIGH_LEVEL_INDEX_MIN {
            self.high_level_index.entry(level).or_default().insert(id);
        }
    }

    fn untrack_high_level(&mut self, id: EntityId, level: usize) {
        if let Some(set) = self.high_level_index.get_mut(&level) {
            set.remove(&id);
            if set.is_empty() {
                self.high_level_index.remove(&level);
            }
        }
    }

    // -- Delete -------------------------------------------------------------

    /// Removes incident edges from each neighbor at each level, then
    /// reassigns the entry point if the deleted node held it. Returns the neighbor ids whose connections changed,
    /// for the caller to persist or mark dirty.
    pub fn delete(&mut self, id: EntityId) -> Result<Vec<EntityId>> {
        let node = self.nodes.remove(&id).ok_or(IndexError::NotFound(id))?;
        let mut touched = Vec::new();

        for (layer, neighbor_set) in node.connections.iter().enumerate() {
            for &neighbor_id in neighbor_set {
                if let Some(slot) = self.nodes.get_mut(&neighbor_id) {
                    let neighbor_mut = Arc::make_mut(slot);
                    if layer < neighbor_mut.connections.len() {
                        neighbor_mut.connections[layer].remove(&id);
                        touched.push(neighbor_id);
                    }
                }
            }
        }

        self.vectors.remove(&id);
        self.untrack_high_level(id, node.level);

        if self.entry_point == Some(id) {
            self.reassign_entry_point();
        }

        Ok(touched)
    }

    /// O(1) entry-point recovery via the high-level index when possible;
    /// falls back to an arbitrary surviving node, or `None` if the graph
    /// is now empty.
    fn reassign_entry_point(&mut self) {
        if let Some((_, ids)) = self.high_level_index.iter().rev().find(|(_, ids)| !ids.is_empty())
            && let Some(&id) = ids.iter().next()
        {
            self.entry_point = Some(id);
            self.max_layer = self.nodes.get(&id).map(|n| n.level).unwrap_or(0);
            return;
        }
        if let Some((&id, node)) = self.nodes.iter().next() {
            self.entry_point = Some(id);
            self.max_layer = node.level;
        } else {
            self.entry_point = None;
            self.max_layer = 0;
        }
    }

    // -- Fork (COW) -----------------------------------------------------------

    /// `enableCOW(parent)`: shallow-copies the node map and high-level
    /// index (cheap `Arc` clones), sharing configuration, distance
    /// function semantics, and vector storage until the fork's first
    /// write to a given node triggers `Arc::make_mut`'s own deep copy.
    pub fn fork(&self) -> Self {
        Self {
            config: self.config.clone(),
            metric: self.metric,
            nodes: self.nodes.clone(),
            vectors: self.vectors.clone(),
            entry_point: self.entry_point,
            max_layer: self.max_layer,
            dimension: self.dimension,
            high_level_index: self.high_level_index.clone(),
        }
    }

    // -- Rebuild --------------------------------------------------------------

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.vectors.clear();
        self.entry_point = None;
        self.max_layer = 0;
        self.dimension = None;
        self.high_level_index.clear();
    }

    /// Reconstructs a node directly from a persisted record during
    /// `rebuild`, bypassing the insert algorithm since the connections are
    /// already known.
    pub fn restore_node(&mut self, record: &NounVectorRecord, preload_vector: bool) {
        if self.dimension.is_none() && !record.vector.is_empty() {
            self.dimension = Some(record.vector.len());
        }
        let connections = HnswNode::connections_from_level_key(&record.connections, record.level);
        let mut node = HnswNode {
            id: record.id,
            level: record.level,
            connections,
            quantized: None,
        };
        if self.config.quantization_enabled && !record.vector.is_empty() {
            node.quantized = Some(QuantizedVector::quantize(&record.vector));
        }
        self.track_high_level(record.id, record.level);
        if record.level > self.max_layer {
            self.max_layer = record.level;
        }
        self.nodes.insert(record.id, Arc::new(node));
        if preload_vector && matches!(self.config.vector_storage, VectorStorageMode::Memory) {
            self.vectors.insert(record.id, Arc::new(record.vector.clone()));
        }
    }

    pub fn set_entry_point(&mut self, id: Option<EntityId>, max_level: usize) {
        self.entry_point = id;
        self.max_layer = max_level;
    }

    /// Re-derives the entry point via the high-level index if it is
    /// missing or no longer present, returning whether a change was made
    /// (the caller re-persists the system record when it has).
    pub fn recover_entry_point_if_missing(&mut self) -> bool {
        let stale = match self.entry_point {
            Some(id) => !self.nodes.contains_key(&id),
            None => !self.nodes.is_empty(),
        };
        if !stale {
            return false;
        }
        self.reassign_entry_point();
        true
    }

    /// Snapshots `id`'s current node as a [`NounVectorRecord`] for
    /// persistence, when its vector is resident. In lazy mode a dirty
    /// node whose vector was already evicted must have its vector
    /// re-supplied by the caller (via cache or storage) before flush.
    pub fn snapshot_record(&self, id: &EntityId) -> Option<NounVectorRecord> {
        let node = self.nodes.get(id)?;
        let vector = self.vectors.get(id)?;
        Some(NounVectorRecord {
            id: *id,
            vector: (**vector).clone(),
            connections: node.connections_by_level_key(),
            level: node.level,
        })
    }
}

/// Wrapper for f32 to make it orderable in a `BinaryHeap`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedFloat(f32);

impl Eq for OrderedFloat {}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphdb_core::QuantizationSettings;
    use uuid::Uuid;

    fn default_config() -> HnswConfig {
        HnswConfig::from(&HnswSettings::default())
    }

    #[test]
    fn first_insert_sets_entry_point_and_max_level() {
        let mut index = HnswIndex::new(default_config(), DistanceMetric::Euclidean);
        let id = Uuid::new_v4();
        let outcome = index.insert(id, vec![1.0, 2.0, 3.0]).unwrap();
        assert!(outcome.entry_point_changed);
        assert_eq!(index.entry_point(), Some(id));
    }

    #[test]
    fn search_on_empty_index_returns_empty() {
        let index = HnswIndex::new(default_config(), DistanceMetric::Euclidean);
        let results = index.search(&[1.0, 2.0], 5, None, None, None).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn inserted_vector_is_its_own_nearest_neighbor() {
        let mut index = HnswIndex::new(default_config(), DistanceMetric::Euclidean);
        let mut ids = Vec::new();
        for i in 0..50 {
            let id = Uuid::new_v4();
            let v = vec![i as f32, (i * 2) as f32, (i % 7) as f32];
            index.insert(id, v).unwrap();
            ids.push(id);
        }
        for (i, &id) in ids.iter().enumerate() {
            let v = vec![i as f32, (i * 2) as f32, (i % 7) as f32];
            let results = index.search(&v, 1, None, None, None).unwrap();
            assert_eq!(results[0].id, id);
            assert!(results[0].distance < 1e-3);
        }
    }

    #[test]
    fn dimension_mismatch_on_second_insert_fails_without_mutating_state() {
        let mut index = HnswIndex::new(default_config(), DistanceMetric::Euclidean);
        index.insert(Uuid::new_v4(), vec![1.0, 2.0]).unwrap();
        let before = index.len();
        let err = index.insert(Uuid::new_v4(), vec![1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
        assert_eq!(index.len(), before);
    }

    #[test]
    fn delete_of_sole_node_resets_entry_point_and_max_level() {
        let mut index = HnswIndex::new(default_config(), DistanceMetric::Euclidean);
        let id = Uuid::new_v4();
        index.insert(id, vec![1.0, 2.0]).unwrap();
        index.delete(id).unwrap();
        assert_eq!(index.entry_point(), None);
        assert_eq!(index.max_layer(), 0);
    }

    #[test]
    fn deleted_node_is_not_found_by_search() {
        let mut index = HnswIndex::new(default_config(), DistanceMetric::Euclidean);
        let target = Uuid::new_v4();
        index.insert(target, vec![1.0, 0.0]).unwrap();
        for _ in 0..10 {
            index.insert(Uuid::new_v4(), vec![rand::random(), rand::random()]).unwrap();
        }
        index.delete(target).unwrap();
        let results = index.search(&[1.0, 0.0], 10, None, None, None).unwrap();
        assert!(!results.iter().any(|r| r.id == target));
    }

    #[test]
    fn fork_is_isolated_from_parent_writes() {
        let mut parent = HnswIndex::new(default_config(), DistanceMetric::Euclidean);
        for i in 0..20 {
            parent.insert(Uuid::new_v4(), vec![i as f32, 0.0]).unwrap();
        }
        let mut fork = parent.fork();
        let fork_only = Uuid::new_v4();
        fork.insert(fork_only, vec![99.0, 99.0]).unwrap();

        assert_eq!(parent.len(), 20);
        assert_eq!(fork.len(), 21);
        assert!(!parent.contains(&fork_only));
        assert!(fork.contains(&fork_only));
    }

    #[test]
    fn candidate_ids_restrict_search_to_the_set() {
        let mut index = HnswIndex::new(default_config(), DistanceMetric::Euclidean);
        let mut ids = Vec::new();
        for i in 0..30 {
            let id = Uuid::new_v4();
            index.insert(id, vec![i as f32, 0.0]).unwrap();
            ids.push(id);
        }
        let mut allowed = HashSet::new();
        allowed.insert(ids[0]);
        allowed.insert(ids[1]);
        let results = index.search(&[0.0, 0.0], 5, None, Some(&allowed), None).unwrap();
        assert!(results.iter().all(|r| allowed.contains(&r.id)));
    }

    #[test]
    fn quantization_rerank_keeps_recall_on_separated_clusters() {
        let mut settings = HnswSettings::default();
        settings.quantization = QuantizationSettings {
            enabled: true,
            rerank_multiplier: 3,
        };
        let mut index = HnswIndex::new(HnswConfig::from(&settings), DistanceMetric::Euclidean);
        for cluster in 0..5 {
            for i in 0..20 {
                let base = cluster as f32 * 100.0;
                index
                    .insert(Uuid::new_v4(), vec![base + i as f32 * 0.01, base, base])
                    .unwrap();
            }
        }
        let query = vec![400.0, 400.0, 400.0];
        let results = index.search(&query, 5, None, None, None).unwrap();
        assert!(!results.is_empty());
        assert!(results[0].distance < 50.0);
    }

    #[test]
    fn layer0_connections_stay_bounded_by_m() {
        let mut settings = HnswSettings::default();
        settings.m = 4;
        let mut index = HnswIndex::new(HnswConfig::from(&settings), DistanceMetric::Euclidean);
        for i in 0..80 {
            index.insert(Uuid::new_v4(), vec![i as f32, (i % 5) as f32]).unwrap();
        }
        for node in index.nodes.values() {
            assert!(node.connections[0].len() <= 4, "layer 0 must never exceed M");
        }
    }

    #[test]
    fn lazy_storage_mode_finds_item_immediately_after_insert() {
        let mut settings = HnswSettings::default();
        settings.vector_storage = graphdb_core::VectorStorageMode::Lazy;
        let mut index = HnswIndex::new(HnswConfig::from(&settings), DistanceMetric::Euclidean);
        let id = Uuid::new_v4();
        index.insert(id, vec![1.0, 2.0, 3.0]).unwrap();
        let results = index.search(&[1.0, 2.0, 3.0], 1, None, None, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);
    }

    #[test]
    fn lazy_storage_mode_falls_back_to_loader_after_eviction() {
        let mut settings = HnswSettings::default();
        settings.vector_storage = graphdb_core::VectorStorageMode::Lazy;
        let mut index = HnswIndex::new(HnswConfig::from(&settings), DistanceMetric::Euclidean);
        let id = Uuid::new_v4();
        let vector = vec![1.0, 2.0, 3.0];
        index.insert(id, vector.clone()).unwrap();
        index.evict_vector(&id);
        assert_eq!(index.resident_vector(&id), None);

        let loader = |lookup_id: &EntityId| if *lookup_id == id { Some(vector.clone()) } else { None };
        let results = index.search(&[1.0, 2.0, 3.0], 1, None, None, Some(&loader)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);
    }
}
