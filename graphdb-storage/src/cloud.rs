//! Cloud object store `StorageAdapter`, built on the `object_store` crate so
//! the same adapter code runs against S3, GCS or Azure without a
//! vendor-specific SDK. Generation-based CAS is implemented with the
//! store's native conditional-put support (`PutMode::Update`); the
//! generation counter itself travels inside a small envelope so callers get
//! the same `u64` contract regardless of backend. `with_backpressure` admits
//! every write through a [`BackpressureController`] sized by payload bytes
//! before it ever reaches the store.

use async_trait::async_trait;
use graphdb_core::{CoreError, EntityId, Result};
use object_store::path::Path as ObjPath;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, UpdateVersion};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::adapter::{LifecyclePolicy, NounFilter, StorageAdapter, VerbFilter};
use crate::backpressure::BackpressureController;
use crate::pagination::{CLOUD_MAX_PAGE_SIZE, CloudCursor, Page, PageRequest};
use crate::records::{
    CountsRecord, HnswSystemRecord, NounMetadataRecord, NounVectorRecord, StatisticsRecord,
    VerbMetadataRecord, VerbVectorRecord, all_shards, prefix, sharded_key,
};

/// Backoff schedule for transient (throttled / timed-out) object store
/// errors: five attempts, doubling from 50ms.
const BACKOFF_SCHEDULE_MS: [u64; 5] = [50, 100, 200, 400, 800];

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    generation: u64,
    payload: T,
}

fn is_transient(err: &object_store::Error) -> bool {
    let msg = err.to_string();
    msg.contains("429")
        || msg.contains("503")
        || msg.contains("SlowDown")
        || msg.contains("slow down")
        || msg.contains("Throttl")
        || msg.contains("RequestTimeout")
}

/// Cloud-backed `StorageAdapter`. `store` is any `object_store`
/// implementation (`AmazonS3`, `GoogleCloudStorage`, `MicrosoftAzure`, or an
/// in-process one for tests); `prefix` roots every key under a bucket
/// sub-path so multiple databases can share a bucket.
pub struct CloudAdapter {
    store: Arc<dyn ObjectStore>,
    backpressure: Option<Arc<BackpressureController>>,
}

impl CloudAdapter {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store, backpressure: None }
    }

    /// Same as [`Self::new`] but admits every write through a
    /// [`BackpressureController`] sized by payload bytes, so a burst of
    /// large writes is throttled before it ever reaches `object_store`.
    pub fn with_backpressure(store: Arc<dyn ObjectStore>, capacity: u64) -> Self {
        Self { store, backpressure: Some(Arc::new(BackpressureController::new(capacity))) }
    }

    fn admit(&self, weight: u64) -> Result<Option<EntityId>> {
        let Some(controller) = &self.backpressure else {
            return Ok(None);
        };
        let id = EntityId::new_v4();
        controller.request_permission(id, weight)?;
        Ok(Some(id))
    }

    fn release(&self, permit: Option<EntityId>, success: bool) {
        if let (Some(controller), Some(id)) = (&self.backpressure, permit) {
            controller.release_permission(&id, success);
        }
    }

    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, object_store::Error>>,
    {
        let mut attempt = 0usize;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) && attempt < BACKOFF_SCHEDULE_MS.len() => {
                    let delay = BACKOFF_SCHEDULE_MS[attempt];
                    warn!(attempt, delay_ms = delay, error = %e, "retrying transient object store error");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) if is_transient(&e) => {
                    return Err(CoreError::Throttled(format!(
                        "exhausted {} retries: {e}",
                        BACKOFF_SCHEDULE_MS.len()
                    )));
                }
                Err(object_store::Error::NotFound { .. }) => {
                    return Err(CoreError::NotFound("object not found".into()));
                }
                Err(e) => return Err(CoreError::Internal(e.to_string())),
            }
        }
    }

    async fn get_bytes(&self, path: &ObjPath) -> Result<Option<(bytes::Bytes, Option<String>)>> {
        let store = Arc::clone(&self.store);
        let path = path.clone();
        let result = self
            .with_retry(|| {
                let store = Arc::clone(&store);
                let path = path.clone();
                async move { store.get(&path).await }
            })
            .await;
        match result {
            Ok(get_result) => {
                let etag = get_result.meta.e_tag.clone();
                let bytes = get_result
                    .bytes()
                    .await
                    .map_err(|e| CoreError::Internal(e.to_string()))?;
                Ok(Some((bytes, etag)))
            }
            Err(CoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn put_bytes(&self, path: &ObjPath, bytes: Vec<u8>) -> Result<()> {
        let permit = self.admit(bytes.len() as u64)?;
        let store = Arc::clone(&self.store);
        let path = path.clone();
        let result = self
            .with_retry(|| {
                let store = Arc::clone(&store);
                let path = path.clone();
                let payload = PutPayload::from(bytes.clone());
                async move { store.put(&path, payload).await.map(|_| ()) }
            })
            .await;
        self.release(permit, result.is_ok());
        result
    }

    async fn put_json<T: Serialize + Sync>(&self, path: &ObjPath, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put_bytes(path, bytes).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &ObjPath) -> Result<Option<T>> {
        match self.get_bytes(path).await? {
            Some((bytes, _)) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| CoreError::Corrupt(format!("{path}: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, path: &ObjPath) -> Result<()> {
        let store = Arc::clone(&self.store);
        let path = path.clone();
        match self
            .with_retry(|| {
                let store = Arc::clone(&store);
                let path = path.clone();
                async move { store.delete(&path).await }
            })
            .await
        {
            Ok(()) | Err(CoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// CAS write via an envelope holding our own generation counter, backed
    /// by the store's native conditional put so two concurrent writers
    /// never both succeed.
    async fn cas_put<T: Serialize + Sync>(
        &self,
        path: &ObjPath,
        value: &T,
        expected_generation: Option<u64>,
    ) -> Result<u64> {
        let existing = self.get_bytes(path).await?;
        let (current_generation, etag) = match &existing {
            Some((bytes, etag)) => {
                let envelope: Envelope<serde_json::Value> = serde_json::from_slice(bytes)
                    .map_err(|e| CoreError::Corrupt(format!("{path}: {e}")))?;
                (envelope.generation, etag.clone())
            }
            None => (0, None),
        };
        if let Some(expected) = expected_generation
            && expected != current_generation
        {
            return Err(CoreError::Conflict(format!(
                "generation mismatch at {path}: expected {expected}, current {current_generation}"
            )));
        }

        let next = current_generation + 1;
        let envelope = Envelope {
            generation: next,
            payload: value,
        };
        let bytes = serde_json::to_vec(&envelope)?;
        let mode = match etag {
            Some(e_tag) => PutMode::Update(UpdateVersion {
                e_tag: Some(e_tag),
                version: None,
            }),
            None => PutMode::Create,
        };

        let permit = self.admit(bytes.len() as u64)?;
        let store = Arc::clone(&self.store);
        let path_owned = path.clone();
        let result = store
            .put_opts(
                &path_owned,
                PutPayload::from(bytes),
                PutOptions {
                    mode,
                    ..Default::default()
                },
            )
            .await;

        let outcome = match result {
            Ok(_) => Ok(next),
            Err(object_store::Error::AlreadyExists { .. }) => Err(CoreError::Conflict(format!(
                "concurrent writer created {path} first"
            ))),
            Err(object_store::Error::Precondition { .. }) | Err(object_store::Error::NotModified { .. }) => {
                Err(CoreError::Conflict(format!(
                    "concurrent writer modified {path} first"
                )))
            }
            Err(e) if is_transient(&e) => Err(CoreError::Throttled(e.to_string())),
            Err(e) => Err(CoreError::Internal(e.to_string())),
        };
        self.release(permit, outcome.is_ok());
        outcome
    }

    async fn cas_get<T: serde::de::DeserializeOwned>(&self, path: &ObjPath) -> Result<Option<T>> {
        match self.get_bytes(path).await? {
            Some((bytes, _)) => {
                let envelope: Envelope<T> = serde_json::from_slice(&bytes)
                    .map_err(|e| CoreError::Corrupt(format!("{path}: {e}")))?;
                Ok(Some(envelope.payload))
            }
            None => Ok(None),
        }
    }

    fn obj_path(prefix_path: &str, id: &EntityId) -> ObjPath {
        ObjPath::from(sharded_key(prefix_path, id))
    }

    /// Shard-ordered pagination: resumes within a shard via
    /// `list_with_offset` (listing strictly after the last-seen key) and
    /// advances to the next shard once the current one is exhausted. Cloud
    /// object stores don't cheaply expose a total count, so `total_count`
    /// is left at 0 here; callers drive iteration off `has_more`.
    async fn paginate<T, F>(
        &self,
        metadata_prefix: &str,
        request: PageRequest,
        predicate: F,
    ) -> Result<Page<(EntityId, T)>>
    where
        T: serde::de::DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let limit = request.limit.min(CLOUD_MAX_PAGE_SIZE).max(1);
        let mut cursor = request
            .cursor
            .as_deref()
            .and_then(CloudCursor::decode)
            .unwrap_or_else(CloudCursor::start);

        let shards: Vec<String> = all_shards().collect();
        let mut items = Vec::new();
        let mut last_key_in_shard: Option<String> = cursor.native_token.clone();

        while cursor.shard_index < shards.len() && items.len() < limit {
            let shard = &shards[cursor.shard_index];
            let shard_prefix = ObjPath::from(format!("{metadata_prefix}/{shard}"));

            let mut stream = match &last_key_in_shard {
                Some(token) => self
                    .store
                    .list_with_offset(Some(&shard_prefix), &ObjPath::from(token.as_str())),
                None => self.store.list(Some(&shard_prefix)),
            };

            use futures::StreamExt;
            let mut exhausted_shard = true;
            while let Some(meta) = stream.next().await {
                let meta = meta.map_err(|e| CoreError::Internal(e.to_string()))?;
                if !meta.location.as_ref().ends_with(".json") {
                    continue;
                }
                let id: Option<EntityId> = meta
                    .location
                    .filename()
                    .and_then(|f| f.strip_suffix(".json"))
                    .and_then(|f| f.parse().ok());
                let Some(id) = id else { continue };

                let Some(value) = self.get_json::<T>(&meta.location).await? else {
                    continue;
                };
                last_key_in_shard = Some(meta.location.to_string());

                if predicate(&value) {
                    items.push((id, value));
                }
                if items.len() >= limit {
                    exhausted_shard = false;
                    break;
                }
            }

            if exhausted_shard {
                cursor.shard_index += 1;
                last_key_in_shard = None;
            }
        }

        let has_more = cursor.shard_index < shards.len();
        cursor.native_token = last_key_in_shard;
        Ok(Page {
            total_count: 0,
            has_more,
            next_cursor: if has_more { Some(cursor.encode()) } else { None },
            items,
        })
    }
}

#[async_trait]
impl StorageAdapter for CloudAdapter {
    async fn save_noun_vector(&self, record: &NounVectorRecord) -> Result<()> {
        self.put_json(&Self::obj_path(prefix::NOUN_VECTORS, &record.id), record)
            .await
    }

    async fn get_noun_vector(&self, id: &EntityId) -> Result<Option<NounVectorRecord>> {
        self.get_json(&Self::obj_path(prefix::NOUN_VECTORS, id)).await
    }

    async fn delete_noun(&self, id: &EntityId) -> Result<()> {
        self.delete(&Self::obj_path(prefix::NOUN_VECTORS, id)).await?;
        self.delete(&Self::obj_path(prefix::NOUN_METADATA, id)).await?;
        self.delete(&Self::obj_path(prefix::NOUN_HNSW, id)).await?;
        Ok(())
    }

    async fn save_noun_metadata(&self, id: &EntityId, record: &NounMetadataRecord) -> Result<()> {
        self.put_json(&Self::obj_path(prefix::NOUN_METADATA, id), record).await
    }

    async fn get_noun_metadata(&self, id: &EntityId) -> Result<Option<NounMetadataRecord>> {
        self.get_json(&Self::obj_path(prefix::NOUN_METADATA, id)).await
    }

    async fn get_noun_metadata_batch(
        &self,
        ids: &[EntityId],
    ) -> Result<Vec<(EntityId, Option<NounMetadataRecord>)>> {
        let mut out = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(10) {
            let mut futures = Vec::with_capacity(chunk.len());
            for id in chunk {
                futures.push(async move { (*id, self.get_noun_metadata(id).await) });
            }
            for (id, result) in futures::future::join_all(futures).await {
                out.push((id, result?));
            }
            // Yield between chunks so a large batch doesn't monopolize the
            // executor ahead of other pending requests to the same bucket.
            tokio::task::yield_now().await;
        }
        Ok(out)
    }

    async fn save_verb_vector(&self, record: &VerbVectorRecord) -> Result<()> {
        self.put_json(&Self::obj_path(prefix::VERB_VECTORS, &record.id), record)
            .await
    }

    async fn get_verb_vector(&self, id: &EntityId) -> Result<Option<VerbVectorRecord>> {
        self.get_json(&Self::obj_path(prefix::VERB_VECTORS, id)).await
    }

    async fn delete_verb(&self, id: &EntityId) -> Result<()> {
        self.delete(&Self::obj_path(prefix::VERB_VECTORS, id)).await?;
        self.delete(&Self::obj_path(prefix::VERB_METADATA, id)).await?;
        Ok(())
    }

    async fn save_verb_metadata(&self, id: &EntityId, record: &VerbMetadataRecord) -> Result<()> {
        self.put_json(&Self::obj_path(prefix::VERB_METADATA, id), record).await
    }

    async fn get_verb_metadata(&self, id: &EntityId) -> Result<Option<VerbMetadataRecord>> {
        self.get_json(&Self::obj_path(prefix::VERB_METADATA, id)).await
    }

    async fn save_hnsw_data(
        &self,
        id: &EntityId,
        record: &NounVectorRecord,
        expected_generation: Option<u64>,
    ) -> Result<u64> {
        self.cas_put(&Self::obj_path(prefix::NOUN_HNSW, id), record, expected_generation)
            .await
    }

    async fn get_hnsw_data(&self, id: &EntityId) -> Result<Option<NounVectorRecord>> {
        self.cas_get(&Self::obj_path(prefix::NOUN_HNSW, id)).await
    }

    async fn save_hnsw_system(
        &self,
        record: &HnswSystemRecord,
        expected_generation: Option<u64>,
    ) -> Result<u64> {
        self.cas_put(&ObjPath::from(prefix::SYSTEM_HNSW), record, expected_generation)
            .await
    }

    async fn get_hnsw_system(&self) -> Result<Option<HnswSystemRecord>> {
        self.cas_get(&ObjPath::from(prefix::SYSTEM_HNSW)).await
    }

    async fn save_statistics(&self, record: &StatisticsRecord) -> Result<()> {
        self.put_json(&ObjPath::from(prefix::SYSTEM_STATISTICS), record).await
    }

    async fn get_statistics(&self) -> Result<Option<StatisticsRecord>> {
        self.get_json(&ObjPath::from(prefix::SYSTEM_STATISTICS)).await
    }

    async fn save_counts(&self, record: &CountsRecord) -> Result<()> {
        self.put_json(&ObjPath::from(prefix::SYSTEM_COUNTS), record).await
    }

    async fn get_counts(&self) -> Result<Option<CountsRecord>> {
        self.get_json(&ObjPath::from(prefix::SYSTEM_COUNTS)).await
    }

    async fn get_nouns_with_pagination(
        &self,
        request: PageRequest,
        filter: Option<NounFilter>,
    ) -> Result<Page<(EntityId, NounMetadataRecord)>> {
        let predicate = filter.unwrap_or_else(|| std::sync::Arc::new(|_: &NounMetadataRecord| true));
        self.paginate(prefix::NOUN_METADATA, request, |v| predicate(v)).await
    }

    async fn get_verbs_with_pagination(
        &self,
        request: PageRequest,
        filter: Option<VerbFilter>,
    ) -> Result<Page<(EntityId, VerbMetadataRecord)>> {
        let predicate = filter.unwrap_or_else(|| std::sync::Arc::new(|_: &VerbMetadataRecord| true));
        self.paginate(prefix::VERB_METADATA, request, |v| predicate(v)).await
    }

    async fn set_lifecycle_policy(&self, policy: LifecyclePolicy) -> Result<()> {
        // Bucket-level lifecycle rules are configured through the provider
        // console/Terraform in production; here we persist the intent so
        // `get_lifecycle_policy` can report it, and log for operators who
        // expect the call to actually reach the provider.
        warn!(
            prefix = %policy.prefix,
            "lifecycle policy recorded locally; apply provider-side bucket lifecycle rules to enforce it"
        );
        let key = ObjPath::from(format!("system/lifecycle/{}.json", policy.prefix.replace('/', "_")));
        self.put_json(&key, &policy_to_json(&policy)).await
    }

    async fn get_lifecycle_policy(&self, prefix: &str) -> Result<Option<LifecyclePolicy>> {
        let key = ObjPath::from(format!("system/lifecycle/{}.json", prefix.replace('/', "_")));
        let value: Option<serde_json::Value> = self.get_json(&key).await?;
        Ok(value.map(|v| json_to_policy(prefix, v)))
    }

    async fn remove_lifecycle_policy(&self, prefix: &str) -> Result<()> {
        let key = ObjPath::from(format!("system/lifecycle/{}.json", prefix.replace('/', "_")));
        self.delete(&key).await
    }
}

fn policy_to_json(policy: &LifecyclePolicy) -> serde_json::Value {
    serde_json::json!({
        "prefix": policy.prefix,
        "transitionAfterDays": policy.transition_after_days,
        "transitionStorageClass": policy.transition_storage_class,
        "expireAfterDays": policy.expire_after_days,
    })
}

fn json_to_policy(prefix: &str, value: serde_json::Value) -> LifecyclePolicy {
    LifecyclePolicy {
        prefix: prefix.to_string(),
        transition_after_days: value
            .get("transitionAfterDays")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32),
        transition_storage_class: value
            .get("transitionStorageClass")
            .and_then(|v| v.as_str())
            .map(String::from),
        expire_after_days: value
            .get("expireAfterDays")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32),
    }
}
