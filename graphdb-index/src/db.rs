//! `GraphVectorDb`: the top-level facade wiring the core types, the
//! storage adapter, and the HNSW index/cache/overlay/stats together into
//! one set of operations (add, get, update, delete, search, relate, flush,
//! close, rebuild, statistics), durable across a crash via a shared
//! write-ahead log.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use graphdb_core::{CoreError, EntityId, Metadata, Noun, NounType, PersistMode, Settings, VerbType, now_ms};
use graphdb_storage::{
    AdaptiveBatcher, HnswSystemRecord, NounMetadataRecord, NounVectorRecord, PendingWrite, PersistenceCoordinator,
    Priority, RedactedVector, StorageAdapter, SubmitOutcome, VerbMetadataRecord, VerbVectorRecord, WalOperation,
    WriteAheadLog, WriteBuffer, spawn_background_flusher,
};

use crate::cache::{CacheKey, UnifiedCache};
use crate::distance::DistanceMetric;
use crate::error::{IndexError, Result};
use crate::filter::{MetadataFilter, NodeFilter};
use crate::hnsw::{HnswConfig, HnswIndex};
use crate::overlay::{RelateManyOptions, RelateManyOutcome, RelateProgress, RelateRequest, RelationshipOverlay};
use crate::stats::Statistics;
use crate::types::{AddManyOptions, AddManyOutcome, BulkProgress, SearchResult};

/// Rough in-memory footprint of a noun, used only to size cache entries and
/// feed the byte-total statistic — not an exact accounting.
fn approx_noun_bytes(vector_len: usize, metadata: &Metadata) -> u64 {
    (vector_len * std::mem::size_of::<f32>()) as u64 + (metadata.len() as u64 * 64)
}

pub struct AddNounRequest {
    pub id: Option<EntityId>,
    pub noun_type: NounType,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
    pub confidence: Option<f32>,
    pub weight: Option<f32>,
}

/// One entry in the shared cache: vectors, noun metadata, and relationship
/// metadata all live in the same [`UnifiedCache`] and compete for the same
/// byte budget, disambiguated by [`CacheKey::category`].
#[derive(Debug, Clone)]
enum CachedValue {
    Vector(Vec<f32>),
    Noun(NounMetadataRecord),
    Relationship(VerbMetadataRecord),
}

impl CachedValue {
    fn into_vector(self) -> Option<Vec<f32>> {
        match self {
            CachedValue::Vector(v) => Some(v),
            _ => None,
        }
    }

    fn into_noun(self) -> Option<NounMetadataRecord> {
        match self {
            CachedValue::Noun(r) => Some(r),
            _ => None,
        }
    }
}

pub struct GraphVectorDb<A: StorageAdapter> {
    settings: Settings,
    adapter: Arc<A>,
    persistence: Arc<PersistenceCoordinator<A>>,
    index: Arc<RwLock<HnswIndex>>,
    cache: Arc<UnifiedCache<CachedValue>>,
    stats: Arc<Statistics>,
    noun_types: Arc<RwLock<HashMap<EntityId, NounType>>>,
    overlay: RelationshipOverlay,
    wal: Option<Arc<WriteAheadLog>>,
    /// Decides whether a dirty-node batch under deferred persistence has
    /// grown large enough to trigger a flush on its own, instead of relying
    /// solely on an external caller to call `flush()`.
    batcher: Arc<AdaptiveBatcher>,
    /// Coalesces repeated `update_metadata` calls to the same id; drained
    /// periodically by `metadata_flusher` and on `close`.
    metadata_buffer: Arc<WriteBuffer<NounMetadataRecord>>,
    metadata_flusher: Option<Arc<JoinHandle<()>>>,
}

impl<A: StorageAdapter + 'static> GraphVectorDb<A> {
    pub fn new(settings: Settings, adapter: Arc<A>) -> Self {
        let config = HnswConfig::from(&settings.hnsw);
        let persistence = Arc::new(PersistenceCoordinator::new(adapter.clone(), settings.hnsw.persist_mode));
        let batcher = Arc::new(AdaptiveBatcher::new(&settings));
        Self {
            cache: Arc::new(UnifiedCache::new(settings.cache.max_size_bytes)),
            index: Arc::new(RwLock::new(HnswIndex::new(config, DistanceMetric::Cosine))),
            persistence,
            adapter,
            stats: Arc::new(Statistics::new()),
            noun_types: Arc::new(RwLock::new(HashMap::new())),
            overlay: RelationshipOverlay,
            wal: None,
            batcher,
            metadata_buffer: Arc::new(WriteBuffer::new()),
            metadata_flusher: None,
            settings,
        }
    }

    /// Opens the database, standing up its write-ahead log (if
    /// `settings.wal.enabled`) and replaying any operations left unfinished
    /// by an unclean shutdown, then starts the background metadata flusher
    /// (if `settings.batching.enabled`) before returning.
    pub async fn open(settings: Settings, adapter: Arc<A>) -> Result<Self> {
        let mut db = Self::new(settings, adapter);
        if db.settings.wal.enabled {
            let dir = db.wal_dir();
            let wal = WriteAheadLog::open(dir, db.settings.wal.max_size_bytes, db.settings.wal.immediate_writes)
                .await
                .map_err(IndexError::Storage)?;
            db.wal = Some(Arc::new(wal));
        }
        if db.settings.wal.auto_recover {
            db.recover().await?;
        }
        if db.settings.batching.enabled {
            let buffer = db.metadata_buffer.clone();
            let adapter = db.adapter.clone();
            let interval = db.settings.batching.max_wait_time.max(Duration::from_millis(50));
            let handle = spawn_background_flusher(buffer, interval, move |batch| {
                let adapter = adapter.clone();
                async move {
                    for (id, record) in batch {
                        if let Err(error) = adapter.save_noun_metadata(&id, &record).await {
                            tracing::warn!(noun_id = %id, %error, "background metadata flush failed");
                        }
                    }
                }
            });
            db.metadata_flusher = Some(Arc::new(handle));
        }
        Ok(db)
    }

    fn wal_dir(&self) -> PathBuf {
        let root = if self.settings.storage.location.is_empty() {
            ".graphdb-data".to_string()
        } else {
            self.settings.storage.location.clone()
        };
        PathBuf::from(root).join("wal")
    }

    /// Replays any operation the log still shows as unfinished. A no-op
    /// when the log is disabled.
    pub async fn recover(&self) -> Result<usize> {
        let Some(wal) = self.wal.clone() else {
            return Ok(0);
        };
        wal.recover(|operation| self.apply_recovered(operation))
            .await
            .map_err(IndexError::Storage)
    }

    async fn apply_recovered(&self, operation: WalOperation) -> graphdb_core::Result<()> {
        self.apply_operation(operation).await.map_err(|e| match e {
            IndexError::Storage(core) => core,
            other => CoreError::Internal(other.to_string()),
        })
    }

    async fn apply_operation(&self, operation: WalOperation) -> Result<()> {
        match operation {
            WalOperation::InsertNoun { id, vector, noun_type, metadata } => {
                let vector = vector
                    .into_vector()
                    .ok_or_else(|| IndexError::InvalidVector("vector was redacted, cannot replay".into()))?;
                self.add_inner(AddNounRequest {
                    id: Some(id),
                    noun_type,
                    vector,
                    metadata,
                    confidence: None,
                    weight: None,
                })
                .await?;
                Ok(())
            }
            WalOperation::DeleteNoun { id } => match self.delete_inner(id).await {
                Ok(()) => Ok(()),
                Err(IndexError::NotFound(_)) => Ok(()),
                Err(e) => Err(e),
            },
            WalOperation::Relate { id, source_id, target_id, vector, verb, weight } => {
                let vector = vector.and_then(RedactedVector::into_vector);
                let request =
                    RelateRequest { id: Some(id), source_id, target_id, verb_type: verb, weight: Some(weight), vector };
                self.create_relationship(request).await?;
                Ok(())
            }
            WalOperation::UpdateNoun { .. } | WalOperation::Unrelate { .. } => Ok(()),
        }
    }

    async fn wal_begin(&self, operation: WalOperation) -> Result<u64> {
        match &self.wal {
            Some(wal) => wal.begin(operation).await.map_err(IndexError::Storage),
            None => Ok(0),
        }
    }

    async fn wal_complete(&self, operation_id: u64) -> Result<()> {
        match &self.wal {
            Some(wal) => wal.complete(operation_id).await.map_err(IndexError::Storage),
            None => Ok(()),
        }
    }

    async fn wal_fail(&self, operation_id: u64, error: impl Into<String>) -> Result<()> {
        match &self.wal {
            Some(wal) => wal.fail(operation_id, error).await.map_err(IndexError::Storage),
            None => Ok(()),
        }
    }

    /// `enableCOW`: shares storage, persistence,
    /// cache, write-ahead log, and statistics with the parent; only the
    /// HNSW node map is shallow-copied, with per-node deep copy deferred to
    /// first write.
    pub async fn fork(&self) -> Self {
        let forked_index = self.index.read().await.fork();
        let noun_types = self.noun_types.read().await.clone();
        Self {
            settings: self.settings.clone(),
            adapter: self.adapter.clone(),
            persistence: self.persistence.clone(),
            index: Arc::new(RwLock::new(forked_index)),
            cache: self.cache.clone(),
            stats: self.stats.clone(),
            noun_types: Arc::new(RwLock::new(noun_types)),
            overlay: RelationshipOverlay,
            wal: self.wal.clone(),
            batcher: self.batcher.clone(),
            metadata_buffer: self.metadata_buffer.clone(),
            metadata_flusher: self.metadata_flusher.clone(),
        }
    }

    // -- Add / get / update / delete -----------------------------------------

    pub async fn add(&self, request: AddNounRequest) -> Result<EntityId> {
        let op_id = self
            .wal_begin(WalOperation::InsertNoun {
                id: request.id.unwrap_or_else(uuid::Uuid::new_v4),
                vector: RedactedVector::new(&request.vector),
                noun_type: request.noun_type,
                metadata: request.metadata.clone(),
            })
            .await?;
        let result = self.add_inner(request).await;
        match &result {
            Ok(_) => self.wal_complete(op_id).await?,
            Err(e) => self.wal_fail(op_id, e.to_string()).await?,
        }
        result
    }

    async fn add_inner(&self, request: AddNounRequest) -> Result<EntityId> {
        let id = request.id.unwrap_or_else(uuid::Uuid::new_v4);
        let mut noun = Noun::new(id, request.noun_type, now_ms());
        if let Some(confidence) = request.confidence {
            noun.confidence = Some(confidence);
        }
        if let Some(weight) = request.weight {
            noun.weight = Some(weight);
        }
        noun.metadata = request.metadata.clone();

        let outcome = {
            let mut index = self.index.write().await;
            index.insert(id, request.vector.clone())?
        };

        self.persist_touched(&outcome.touched, outcome.entry_point_changed).await?;

        let metadata_record = NounMetadataRecord {
            noun_type: request.noun_type,
            created_at: noun.timestamps.created_at,
            updated_at: noun.timestamps.updated_at,
            confidence: noun.confidence,
            weight: noun.weight,
            service: None,
            data: request.metadata.clone(),
        };
        self.persist_noun_metadata(id, &metadata_record).await?;
        self.cache_vector(id, request.vector.clone());

        self.noun_types.write().await.insert(id, request.noun_type);
        self.stats
            .record_noun_added(request.noun_type, approx_noun_bytes(request.vector.len(), &request.metadata));

        Ok(id)
    }

    /// Adds every request, continuing past per-item failures by default
    /// (`options.continue_on_error`); reports progress after each attempt
    /// and returns the split of what succeeded and what didn't.
    pub async fn add_many(
        &self,
        requests: Vec<AddNounRequest>,
        options: AddManyOptions,
        mut on_progress: impl FnMut(BulkProgress) + Send,
    ) -> AddManyOutcome {
        let total = requests.len();
        let mut outcome = AddManyOutcome::default();
        let mut completed = 0usize;
        let mut failed = 0usize;

        for (index, request) in requests.into_iter().enumerate() {
            match self.add(request).await {
                Ok(id) => {
                    completed += 1;
                    outcome.successful.push(id);
                }
                Err(e) => {
                    failed += 1;
                    outcome.failed.push((index, e.to_string()));
                    if !options.continue_on_error {
                        on_progress(BulkProgress { completed, failed, total });
                        break;
                    }
                }
            }
            on_progress(BulkProgress { completed, failed, total });
        }

        outcome
    }

    pub async fn get(&self, id: EntityId) -> Result<Option<(NounMetadataRecord, Vec<f32>)>> {
        let metadata = match self.load_noun_metadata(id).await? {
            Some(m) => m,
            None => return Ok(None),
        };
        let vector = self.resolve_vector(id).await?;
        Ok(vector.map(|v| (metadata, v)))
    }

    /// Updates a noun's metadata. Not write-ahead-logged (a stale metadata
    /// value left by a crash is recoverable by calling this again, unlike a
    /// dropped noun or relationship), so the durable write is coalesced
    /// through `metadata_buffer` rather than applied inline: the cache is
    /// updated immediately for read-your-own-write, and the background
    /// flusher (or `close`) carries it to storage.
    pub async fn update_metadata(&self, id: EntityId, metadata: Metadata) -> Result<()> {
        let mut record = self
            .load_noun_metadata(id)
            .await?
            .ok_or(IndexError::NotFound(id))?;
        record.data = metadata;
        record.updated_at = now_ms();
        self.cache.set(
            CacheKey::graph(id),
            CachedValue::Noun(record.clone()),
            approx_noun_bytes(0, &record.data),
            4,
        );
        self.metadata_buffer.upsert(id, record);
        Ok(())
    }

    pub async fn delete(&self, id: EntityId) -> Result<()> {
        let op_id = self.wal_begin(WalOperation::DeleteNoun { id }).await?;
        let result = self.delete_inner(id).await;
        match &result {
            Ok(()) => self.wal_complete(op_id).await?,
            Err(e) => self.wal_fail(op_id, e.to_string()).await?,
        }
        result
    }

    async fn delete_inner(&self, id: EntityId) -> Result<()> {
        let noun_type = self.noun_types.write().await.remove(&id);
        let touched = {
            let mut index = self.index.write().await;
            index.delete(id)?
        };
        self.persist_touched(&touched, true).await?;
        self.adapter.delete_noun(&id).await.map_err(IndexError::Storage)?;
        self.cache.invalidate(&CacheKey::graph(id));
        self.cache.invalidate(&CacheKey::vector(id));

        if let Some(noun_type) = noun_type {
            self.stats.record_noun_removed(noun_type, 0);
        }
        Ok(())
    }

    // -- Search ---------------------------------------------------------------

    pub async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<MetadataFilter>,
        candidate_ids: Option<HashSet<EntityId>>,
    ) -> Result<Vec<SearchResult>> {
        let resolved_filter: Option<NodeFilter> = filter.map(|f| {
            let cache = self.cache.clone();
            f.into_node_filter(move |id| cache.get_sync(&CacheKey::graph(*id)).and_then(CachedValue::into_noun).map(|r| r.data))
        });

        let cache = self.cache.clone();
        let exact_vector_lookup = move |id: &EntityId| cache.get_sync(&CacheKey::vector(*id)).and_then(CachedValue::into_vector);

        let index = self.index.read().await;
        index.search(query, k, resolved_filter.as_ref(), candidate_ids.as_ref(), Some(&exact_vector_lookup))
    }

    // -- Relationships ----------------------------------------------------------

    pub async fn relate(
        &self,
        source_id: EntityId,
        target_id: EntityId,
        verb_type: VerbType,
        weight: Option<f32>,
        vector: Option<Vec<f32>>,
    ) -> Result<EntityId> {
        let verb_id = uuid::Uuid::new_v4();
        let request = RelateRequest { id: Some(verb_id), source_id, target_id, verb_type, weight, vector: vector.clone() };
        let op_id = self
            .wal_begin(WalOperation::Relate {
                id: verb_id,
                source_id,
                target_id,
                vector: vector.map(|v| RedactedVector::new(&v)),
                verb: verb_type,
                weight: weight.unwrap_or(1.0),
            })
            .await?;
        let result = self.create_relationship(request).await;
        match &result {
            Ok(_) => self.wal_complete(op_id).await?,
            Err(e) => self.wal_fail(op_id, e.to_string()).await?,
        }
        result.map(|verb| verb.id)
    }

    /// Resolves, indexes, and persists a single relationship: the shared
    /// worker behind `relate`, `relate_many`, and WAL replay, so every
    /// created verb is always reachable by search, not just the vector
    /// built by `RelationshipOverlay::relate`.
    async fn create_relationship(&self, request: RelateRequest) -> Result<graphdb_core::Verb> {
        let endpoints = if request.vector.is_none() {
            Some(self.endpoint_vectors(request.source_id, request.target_id).await?)
        } else {
            None
        };
        let (verb, vector) = self.overlay.relate(request, || {
            endpoints.ok_or_else(|| IndexError::InvalidVector("endpoint vectors unavailable".into()))
        })?;

        let outcome = {
            let mut index = self.index.write().await;
            index.insert(verb.id, vector.clone())?
        };
        self.persist_touched(&outcome.touched, outcome.entry_point_changed).await?;

        self.adapter
            .save_verb_vector(&VerbVectorRecord {
                id: verb.id,
                vector: vector.clone(),
                connections: Default::default(),
                verb: verb.verb_type,
                source_id: verb.source_id,
                target_id: verb.target_id,
            })
            .await
            .map_err(IndexError::Storage)?;
        let metadata_record = VerbMetadataRecord {
            weight: verb.weight,
            created_at: verb.timestamps.created_at,
            updated_at: verb.timestamps.updated_at,
            data: verb.metadata.clone(),
        };
        self.adapter
            .save_verb_metadata(&verb.id, &metadata_record)
            .await
            .map_err(IndexError::Storage)?;
        self.cache.set(
            CacheKey::relationship(verb.id),
            CachedValue::Relationship(metadata_record),
            approx_noun_bytes(0, &verb.metadata),
            4,
        );
        self.cache_vector(verb.id, vector);

        self.stats.record_verb_added(verb.verb_type);
        Ok(verb)
    }

    /// Bulk relate with bounded concurrency and an optional progress
    /// callback; every created verb goes through the same persist+index
    /// path as `relate`, not just an in-memory `Verb` build.
    pub async fn relate_many(
        &self,
        requests: Vec<RelateRequest>,
        options: RelateManyOptions,
        mut on_progress: impl FnMut(RelateProgress) + Send,
    ) -> RelateManyOutcome {
        let total = requests.len();
        let parallel = options.parallel.max(1);
        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut created = Vec::with_capacity(total);
        let mut failures = Vec::new();

        let mut results = stream::iter(requests.into_iter().map(|request| {
            let source_id = request.source_id;
            let target_id = request.target_id;
            async move {
                let outcome = self.create_relationship(request).await;
                (source_id, target_id, outcome)
            }
        }))
        .buffer_unordered(parallel);

        while let Some((source_id, target_id, outcome)) = results.next().await {
            match outcome {
                Ok(verb) => {
                    completed += 1;
                    created.push(verb);
                }
                Err(e) => {
                    failed += 1;
                    failures.push((source_id, target_id, e.to_string()));
                    if !options.continue_on_error {
                        on_progress(RelateProgress { completed, failed, total });
                        break;
                    }
                }
            }
            on_progress(RelateProgress { completed, failed, total });
        }

        RelateManyOutcome { created, failures }
    }

    async fn endpoint_vectors(&self, source_id: EntityId, target_id: EntityId) -> Result<(Vec<f32>, Vec<f32>)> {
        let source = self.resolve_vector(source_id).await?.ok_or(IndexError::NotFound(source_id))?;
        let target = self.resolve_vector(target_id).await?.ok_or(IndexError::NotFound(target_id))?;
        Ok((source, target))
    }

    // -- Flush / close / rebuild -----------------------------------------------

    pub async fn flush(&self) -> Result<graphdb_storage::FlushReport> {
        let index = self.index.read().await;
        let system_snapshot = Some(HnswSystemRecord {
            entry_point_id: index.entry_point(),
            max_level: index.max_layer(),
        });
        let cache = self.cache.clone();
        let report = self
            .persistence
            .flush(
                |id| {
                    let record = index.snapshot_record(&id).or_else(|| {
                        cache
                            .get_sync(&CacheKey::vector(id))
                            .and_then(CachedValue::into_vector)
                            .map(|vector| NounVectorRecord {
                                id,
                                vector,
                                connections: Default::default(),
                                level: index.node_level(&id).unwrap_or(0),
                            })
                    });
                    async move { record }
                },
                system_snapshot,
            )
            .await
            .map_err(IndexError::Storage)?;
        if let Some(wal) = &self.wal {
            wal.checkpoint(report.nodes_flushed as u64).await.map_err(IndexError::Storage)?;
        }
        Ok(report)
    }

    pub async fn close(&self) -> Result<()> {
        self.flush().await?;
        for (id, record) in self.metadata_buffer.drain() {
            self.adapter.save_noun_metadata(&id, &record).await.map_err(IndexError::Storage)?;
        }
        if let Some(handle) = &self.metadata_flusher {
            handle.abort();
        }
        self.adapter.save_counts(&self.stats.to_counts_record()).await.map_err(IndexError::Storage)?;
        self.adapter
            .save_statistics(&self.stats.to_statistics_record())
            .await
            .map_err(IndexError::Storage)?;
        Ok(())
    }

    /// Rebuilds the in-memory HNSW graph from persisted HNSW data records,
    /// paging through every noun. Entry point is
    /// restored from the system record, or re-derived if stale/missing.
    pub async fn rebuild(&self) -> Result<()> {
        let config = HnswConfig::from(&self.settings.hnsw);
        let mut fresh = HnswIndex::new(config, DistanceMetric::Cosine);

        let mut request = graphdb_storage::PageRequest::first(500);
        loop {
            let page = self
                .adapter
                .get_nouns_with_pagination(request.clone(), None)
                .await
                .map_err(IndexError::Storage)?;
            for (id, _metadata) in &page.items {
                if let Some(record) = self.adapter.get_hnsw_data(id).await.map_err(IndexError::Storage)? {
                    fresh.restore_node(&record, true);
                }
            }
            if !page.has_more {
                break;
            }
            request = graphdb_storage::PageRequest {
                limit: request.limit,
                cursor: page.next_cursor,
                offset: None,
            };
        }

        if let Some(system) = self.adapter.get_hnsw_system().await.map_err(IndexError::Storage)? {
            fresh.set_entry_point(system.entry_point_id, system.max_level);
        }
        fresh.recover_entry_point_if_missing();

        *self.index.write().await = fresh;
        Ok(())
    }

    pub async fn get_statistics(&self) -> graphdb_storage::StatisticsRecord {
        self.stats.to_statistics_record()
    }

    // -- Internal helpers -------------------------------------------------------

    async fn persist_touched(&self, touched: &[EntityId], system_changed: bool) -> Result<()> {
        if system_changed {
            self.persistence.mark_system_dirty();
        }
        match self.persistence.mode() {
            PersistMode::Deferred => {
                let mut should_flush = false;
                for &id in touched {
                    self.persistence.mark_node_dirty(id);
                    let write = PendingWrite {
                        entity_id: id,
                        priority: Priority::Save,
                        payload: serde_json::Value::Null,
                        size_bytes: 256,
                        queued_at: Instant::now(),
                    };
                    if matches!(self.batcher.submit(write), SubmitOutcome::FlushLane(_)) {
                        should_flush = true;
                    }
                }
                if should_flush {
                    self.flush().await?;
                }
                Ok(())
            }
            PersistMode::Immediate => {
                let index = self.index.read().await;
                for &id in touched {
                    if let Some(record) = index.snapshot_record(&id) {
                        self.adapter
                            .save_hnsw_data(&id, &record, None)
                            .await
                            .map_err(IndexError::Storage)?;
                    }
                }
                if system_changed {
                    let system = HnswSystemRecord {
                        entry_point_id: index.entry_point(),
                        max_level: index.max_layer(),
                    };
                    self.adapter
                        .save_hnsw_system(&system, None)
                        .await
                        .map_err(IndexError::Storage)?;
                }
                Ok(())
            }
        }
    }

    async fn persist_noun_metadata(&self, id: EntityId, record: &NounMetadataRecord) -> Result<()> {
        self.adapter.save_noun_metadata(&id, record).await.map_err(IndexError::Storage)?;
        self.cache.set(
            CacheKey::graph(id),
            CachedValue::Noun(record.clone()),
            approx_noun_bytes(0, &record.data),
            4,
        );
        Ok(())
    }

    async fn load_noun_metadata(&self, id: EntityId) -> Result<Option<NounMetadataRecord>> {
        if let Some(cached) = self.cache.get_sync(&CacheKey::graph(id)).and_then(CachedValue::into_noun) {
            return Ok(Some(cached));
        }
        let adapter = self.adapter.clone();
        let loaded = self
            .cache
            .get(CacheKey::graph(id), 256, 4, || async move {
                adapter.get_noun_metadata(&id).await.ok().flatten().map(CachedValue::Noun)
            })
            .await;
        Ok(loaded.and_then(CachedValue::into_noun))
    }

    async fn resolve_vector(&self, id: EntityId) -> Result<Option<Vec<f32>>> {
        {
            let index = self.index.read().await;
            if let Some(v) = index.resident_vector(&id) {
                return Ok(Some(v));
            }
        }
        if let Some(cached) = self.cache.get_sync(&CacheKey::vector(id)).and_then(CachedValue::into_vector) {
            return Ok(Some(cached));
        }
        let adapter = self.adapter.clone();
        let loaded = self
            .cache
            .get(CacheKey::vector(id), 4096, 8, || async move {
                adapter
                    .get_hnsw_data(&id)
                    .await
                    .ok()
                    .flatten()
                    .map(|record| CachedValue::Vector(record.vector))
            })
            .await;
        Ok(loaded.and_then(CachedValue::into_vector))
    }

    /// Caches `id`'s vector and, under `Lazy` storage mode, evicts it from
    /// the HNSW index's own resident map — the cache now holds the only
    /// in-memory copy, and `search`'s loader fallback reaches it from there.
    fn cache_vector(&self, id: EntityId, vector: Vec<f32>) {
        let size = (vector.len() * std::mem::size_of::<f32>()) as u64;
        self.cache.set(CacheKey::vector(id), CachedValue::Vector(vector), size, 8);
        if matches!(self.settings.hnsw.vector_storage, graphdb_core::VectorStorageMode::Lazy) {
            let index = self.index.clone();
            tokio::spawn(async move {
                index.write().await.evict_vector(&id);
            });
        }
    }
}
