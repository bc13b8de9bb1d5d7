//! Shared value types threaded between the HNSW graph, the cache, and the
//! top-level facade.

use graphdb_core::EntityId;
use std::cmp::Ordering;

/// One scored match from `search`. Ordering is ascending by distance
/// (closest first); ties keep insertion order since the sort is stable
///.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub id: EntityId,
    pub distance: f32,
}

impl SearchResult {
    pub fn new(id: EntityId, distance: f32) -> Self {
        Self { id, distance }
    }
}

impl Eq for SearchResult {}

impl PartialOrd for SearchResult {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SearchResult {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
    }
}

/// Progress reported partway through a bulk operation: counts so far, not
/// a running percentage, since the total is already known to the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct BulkProgress {
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

/// Options for `add_many`, mirroring the bulk-relate knobs: continue past
/// per-item failures by default, reporting each one rather than aborting
/// the whole batch.
#[derive(Debug, Clone, Copy)]
pub struct AddManyOptions {
    pub continue_on_error: bool,
}

impl Default for AddManyOptions {
    fn default() -> Self {
        Self { continue_on_error: true }
    }
}

/// Per-item outcome of `add_many`: every request that succeeded, in order,
/// plus the index and error message of every one that didn't.
#[derive(Debug, Default)]
pub struct AddManyOutcome {
    pub successful: Vec<EntityId>,
    pub failed: Vec<(usize, String)>,
}
