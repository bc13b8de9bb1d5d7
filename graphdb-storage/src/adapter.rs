//! The polymorphic storage boundary: three variants —
//! in-memory, local filesystem, cloud object store — that must be
//! behaviorally interchangeable.

use async_trait::async_trait;
use graphdb_core::{CoreError, EntityId, Result};
use std::sync::Arc;

use crate::pagination::{Page, PageRequest};
use crate::records::{
    CountsRecord, HnswSystemRecord, NounMetadataRecord, NounVectorRecord, StatisticsRecord,
    VerbMetadataRecord, VerbVectorRecord,
};

/// Predicate over a noun metadata record, used by `getNounsWithPagination`'s
/// optional filter.
pub type NounFilter = Arc<dyn Fn(&NounMetadataRecord) -> bool + Send + Sync>;
/// Predicate over a verb metadata record, used by `getVerbsWithPagination`.
pub type VerbFilter = Arc<dyn Fn(&VerbMetadataRecord) -> bool + Send + Sync>;

/// A lifecycle policy on a cloud backend: age-based tier transition or
/// deletion.
#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    pub prefix: String,
    pub transition_after_days: Option<u32>,
    pub transition_storage_class: Option<String>,
    pub expire_after_days: Option<u32>,
}

/// The storage adapter contract. Every method that can race with a
/// concurrent writer (graph/system records) documents its concurrency
/// behavior inline; adapters that don't need CAS (memory, filesystem) treat
/// `expected_generation` as advisory and always succeed on a present key.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    // -- Noun vectors --------------------------------------------------
    async fn save_noun_vector(&self, record: &NounVectorRecord) -> Result<()>;
    async fn get_noun_vector(&self, id: &EntityId) -> Result<Option<NounVectorRecord>>;
    async fn delete_noun(&self, id: &EntityId) -> Result<()>;

    // -- Noun metadata ---------------------------------------------------
    async fn save_noun_metadata(&self, id: &EntityId, record: &NounMetadataRecord) -> Result<()>;
    async fn get_noun_metadata(&self, id: &EntityId) -> Result<Option<NounMetadataRecord>>;
    /// Batch read with per-variant controlled concurrency (filesystem:
    /// chunks of 10; cloud: chunks of 10 with scheduler yields).
    async fn get_noun_metadata_batch(
        &self,
        ids: &[EntityId],
    ) -> Result<Vec<(EntityId, Option<NounMetadataRecord>)>>;

    // -- Verb vectors / metadata -----------------------------------------
    async fn save_verb_vector(&self, record: &VerbVectorRecord) -> Result<()>;
    async fn get_verb_vector(&self, id: &EntityId) -> Result<Option<VerbVectorRecord>>;
    async fn delete_verb(&self, id: &EntityId) -> Result<()>;
    async fn save_verb_metadata(&self, id: &EntityId, record: &VerbMetadataRecord) -> Result<()>;
    async fn get_verb_metadata(&self, id: &EntityId) -> Result<Option<VerbMetadataRecord>>;

    // -- HNSW decoupled data / system record -----------------------------
    /// `entities/nouns/hnsw/<shard>/<id>.json` — level + connections only,
    /// used when the graph topology is persisted separately from the raw
    /// vector (decoupled layout).
    async fn save_hnsw_data(
        &self,
        id: &EntityId,
        record: &NounVectorRecord,
        expected_generation: Option<u64>,
    ) -> Result<u64>;
    async fn get_hnsw_data(&self, id: &EntityId) -> Result<Option<NounVectorRecord>>;
    async fn save_hnsw_system(
        &self,
        record: &HnswSystemRecord,
        expected_generation: Option<u64>,
    ) -> Result<u64>;
    async fn get_hnsw_system(&self) -> Result<Option<HnswSystemRecord>>;

    // -- Statistics / counts ----------------------------------------------
    async fn save_statistics(&self, record: &StatisticsRecord) -> Result<()>;
    async fn get_statistics(&self) -> Result<Option<StatisticsRecord>>;
    async fn save_counts(&self, record: &CountsRecord) -> Result<()>;
    async fn get_counts(&self) -> Result<Option<CountsRecord>>;

    // -- Pagination --------------------------------------------------------
    async fn get_nouns_with_pagination(
        &self,
        request: PageRequest,
        filter: Option<NounFilter>,
    ) -> Result<Page<(EntityId, NounMetadataRecord)>>;
    async fn get_verbs_with_pagination(
        &self,
        request: PageRequest,
        filter: Option<VerbFilter>,
    ) -> Result<Page<(EntityId, VerbMetadataRecord)>>;

    // -- Lifecycle (cloud-only; default no-op for other variants) ---------
    async fn set_lifecycle_policy(&self, _policy: LifecyclePolicy) -> Result<()> {
        Err(CoreError::ConfigurationError(
            "lifecycle policies are only supported by the cloud adapter".into(),
        ))
    }
    async fn get_lifecycle_policy(&self, _prefix: &str) -> Result<Option<LifecyclePolicy>> {
        Ok(None)
    }
    async fn remove_lifecycle_policy(&self, _prefix: &str) -> Result<()> {
        Ok(())
    }
    async fn set_tier_optimization(&self, _enabled: bool, _terminal_class: &str) -> Result<()> {
        Ok(())
    }

    /// Deprecated in the source system; retained here only so call sites
    /// that probe for it get a clear, intentional "not supported" error
    /// rather than silently returning wrong data. Consumers must use
    /// pagination-with-filter instead.
    async fn get_edges_by_source(&self, _source: &EntityId) -> Result<Vec<EntityId>> {
        Ok(Vec::new())
    }
    async fn get_edges_by_target(&self, _target: &EntityId) -> Result<Vec<EntityId>> {
        Ok(Vec::new())
    }
    async fn get_edges_by_type(&self, _verb: &str) -> Result<Vec<EntityId>> {
        Ok(Vec::new())
    }
}
