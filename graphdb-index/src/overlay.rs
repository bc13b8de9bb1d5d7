//! Graph relationship overlay: typed directional edges
//! ("verbs") independent of the HNSW neighbor graph. A relationship has its
//! own vector — the caller's, or the mean of its endpoints' vectors — so it
//! can itself be indexed and searched like any noun.

use std::collections::HashMap;

use graphdb_core::{EntityId, Verb, VerbType, mean_vector, now_ms};
use uuid::Uuid;

use crate::error::{IndexError, Result};
use crate::types::BulkProgress;

/// Progress reported during `relate_many`, identical in shape to
/// [`BulkProgress`] — the facade drives both bulk operations the same way.
pub type RelateProgress = BulkProgress;

#[derive(Debug, Clone)]
pub struct RelateRequest {
    /// Fixed upfront by the caller (rather than generated inside `relate`)
    /// so a write-ahead-log replay of this request reconstructs the exact
    /// same verb id instead of minting a new one.
    pub id: Option<EntityId>,
    pub source_id: EntityId,
    pub target_id: EntityId,
    pub verb_type: VerbType,
    pub weight: Option<f32>,
    pub vector: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy)]
pub struct RelateManyOptions {
    /// Run up to this many relate operations concurrently.
    pub parallel: usize,
    /// Batch size handed to each concurrent slot (informational here; the
    /// overlay itself has no batching boundary beyond the concurrency cap).
    pub chunk_size: usize,
    /// If `false`, the first failure aborts the remaining batch.
    pub continue_on_error: bool,
}

impl Default for RelateManyOptions {
    fn default() -> Self {
        Self { parallel: 8, chunk_size: 100, continue_on_error: true }
    }
}

#[derive(Debug)]
pub struct RelateManyOutcome {
    pub created: Vec<Verb>,
    pub failures: Vec<(EntityId, EntityId, String)>,
}

/// Resolves relationship vectors and builds [`Verb`] records; the overlay
/// does not own storage or the HNSW graph itself — it hands finished
/// `Verb`s plus their resolved vectors back to the facade to persist and
/// index, matching how `graphdb-storage` treats verbs as first-class noun-
/// like records.
pub struct RelationshipOverlay;

impl RelationshipOverlay {
    /// `relate(source, target, verbType, weight?, vector?)`. When no vector
    /// is supplied, the relationship is indexed at the mean of its two
    /// endpoint vectors.
    pub fn relate(
        &self,
        request: RelateRequest,
        endpoint_vectors: impl FnOnce() -> Result<(Vec<f32>, Vec<f32>)>,
    ) -> Result<(Verb, Vec<f32>)> {
        let vector = match request.vector {
            Some(v) => v,
            None => {
                let (source_vec, target_vec) = endpoint_vectors()?;
                if source_vec.len() != target_vec.len() {
                    return Err(IndexError::DimensionMismatch {
                        expected: source_vec.len(),
                        actual: target_vec.len(),
                    });
                }
                mean_vector(&source_vec, &target_vec)
            }
        };

        let id = request.id.unwrap_or_else(Uuid::new_v4);
        let mut verb = Verb::new(id, request.source_id, request.target_id, request.verb_type, now_ms());
        if let Some(weight) = request.weight {
            verb.weight = weight;
        }
        Ok((verb, vector))
    }
}

/// Groups verbs by their type, used by `stats.rs` to maintain per-verb-type
/// counters without re-scanning storage.
pub fn group_by_verb_type(verbs: &[Verb]) -> HashMap<VerbType, usize> {
    let mut counts = HashMap::new();
    for verb in verbs {
        *counts.entry(verb.verb_type).or_insert(0) += 1;
    }
    counts
}
