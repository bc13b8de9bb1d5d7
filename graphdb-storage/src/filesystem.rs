//! Local filesystem `StorageAdapter`. Lays files out exactly as
//! [`crate::records::sharded_key`] describes and migrates any pre-sharding
//! ("legacy") layout it finds on startup.

use async_trait::async_trait;
use fs2::FileExt;
use graphdb_core::{CoreError, EntityId, Result, now_ms};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapter::{LifecyclePolicy, NounFilter, StorageAdapter, VerbFilter};
use crate::lock::FileLock;
use crate::pagination::{Page, PageRequest};
use crate::records::{
    CountsRecord, HnswSystemRecord, NounMetadataRecord, NounVectorRecord, StatisticsRecord,
    VerbMetadataRecord, VerbVectorRecord, all_shards, prefix, sharded_key,
};

/// Filesystem-backed `StorageAdapter`. Generation counters for the
/// HNSW/system records live in a sidecar `.gen` file next to the JSON body
/// so CAS works across process restarts without a separate index.
pub struct FilesystemAdapter {
    root: PathBuf,
}

impl FilesystemAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, prefix_path: &str, id: &EntityId) -> PathBuf {
        self.root.join(sharded_key(prefix_path, id))
    }

    async fn write_json<T: serde::Serialize + Sync>(path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(value)?;
        // Write to a temp file in the same directory, then rename: the
        // rename is atomic on POSIX filesystems, so readers never observe
        // a partially-written record.
        let tmp_path = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes).map_err(|e| {
                    CoreError::Corrupt(format!("{}: {e}", path.display()))
                })?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoreError::Io(e)),
        }
    }

    async fn remove_if_exists(path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::Io(e)),
        }
    }

    async fn read_generation(path: &Path) -> u64 {
        let gen_path = path.with_extension("json.gen");
        match tokio::fs::read_to_string(&gen_path).await {
            Ok(s) => s.trim().parse().unwrap_or(0),
            Err(_) => 0,
        }
    }

    async fn write_generation(path: &Path, generation: u64) -> Result<()> {
        let gen_path = path.with_extension("json.gen");
        tokio::fs::write(&gen_path, generation.to_string()).await?;
        Ok(())
    }

    async fn cas_write<T: serde::Serialize + Sync>(
        path: &Path,
        value: &T,
        expected_generation: Option<u64>,
    ) -> Result<u64> {
        let current = Self::read_generation(path).await;
        if let Some(expected) = expected_generation
            && expected != current
        {
            return Err(CoreError::Conflict(format!(
                "generation mismatch at {}: expected {expected}, current {current}",
                path.display()
            )));
        }
        let next = current + 1;
        Self::write_json(path, value).await?;
        Self::write_generation(path, next).await?;
        Ok(next)
    }

    /// Scans `<shard>/<id>.json` files under `metadata_prefix`, applying
    /// `filter` and skipping `offset` matches, collecting up to `limit`.
    /// Shard order is `00..=ff`, matching the cloud adapter's iteration
    /// order so cursors behave the same way across backends.
    async fn paginate_metadata<T, F>(
        &self,
        metadata_prefix: &str,
        request: &PageRequest,
        predicate: F,
    ) -> Result<Page<(EntityId, T)>>
    where
        T: serde::de::DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let offset = request.offset.unwrap_or(0);
        let mut matched_count = 0usize;
        let mut total = 0u64;
        let mut items = Vec::new();
        let mut saturated = false;

        for shard in all_shards() {
            let dir = self.root.join(metadata_prefix).join(&shard);
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(CoreError::Io(e)),
            };
            let mut names = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                    names.push(entry.path());
                }
            }
            names.sort();

            for path in names {
                let id: EntityId = match path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse().ok())
                {
                    Some(id) => id,
                    None => continue,
                };
                let Some(value) = Self::read_json::<T>(&path).await? else {
                    continue;
                };
                if !predicate(&value) {
                    continue;
                }
                total += 1;
                if matched_count < offset {
                    matched_count += 1;
                    continue;
                }
                if items.len() < request.limit {
                    items.push((id, value));
                } else {
                    saturated = true;
                }
                matched_count += 1;
            }
        }

        let has_more = saturated;
        Ok(Page {
            total_count: total,
            has_more,
            next_cursor: if has_more {
                Some((offset + items.len()).to_string())
            } else {
                None
            },
            items,
        })
    }

    /// Migrates a pre-sharding layout (flat `<prefix>/<id>.json`, with no
    /// shard directory) into the sharded layout, under an exclusive lock so
    /// two processes never race on the same files. Safe to call on an
    /// already-migrated tree: it's a no-op if no legacy files are found.
    pub async fn migrate_legacy_layout(&self) -> Result<usize> {
        tokio::fs::create_dir_all(&self.root).await?;
        let lock = FileLock::acquire(
            &self.root,
            "legacy-migration",
            std::time::Duration::from_secs(300),
            std::time::Duration::from_secs(30),
        )
        .await?;

        // Belt-and-suspenders OS-level advisory lock for same-host
        // processes that don't go through `FileLock`.
        let marker_path = self.root.join("locks").join("legacy-migration.flock");
        if let Some(parent) = marker_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let marker = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&marker_path)?;
        marker.lock_exclusive()?;

        let mut migrated = 0usize;
        for legacy_prefix in [
            prefix::NOUN_VECTORS,
            prefix::NOUN_METADATA,
            prefix::VERB_VECTORS,
            prefix::VERB_METADATA,
        ] {
            let dir = self.root.join(legacy_prefix);
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(CoreError::Io(e)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    continue; // already sharded: a shard dir, not a loose file
                }
                let Some(id) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse::<EntityId>().ok())
                else {
                    continue;
                };
                let target = self.root.join(sharded_key(legacy_prefix, &id));
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::rename(&path, &target).await?;
                migrated += 1;
            }
        }

        fs2::FileExt::unlock(&marker)?;
        lock.release().await?;
        if migrated > 0 {
            info!(migrated, "migrated legacy filesystem layout to sharded layout");
        }
        Ok(migrated)
    }
}

#[async_trait]
impl StorageAdapter for FilesystemAdapter {
    async fn save_noun_vector(&self, record: &NounVectorRecord) -> Result<()> {
        let path = self.path_for(prefix::NOUN_VECTORS, &record.id);
        Self::write_json(&path, record).await
    }

    async fn get_noun_vector(&self, id: &EntityId) -> Result<Option<NounVectorRecord>> {
        Self::read_json(&self.path_for(prefix::NOUN_VECTORS, id)).await
    }

    async fn delete_noun(&self, id: &EntityId) -> Result<()> {
        Self::remove_if_exists(&self.path_for(prefix::NOUN_VECTORS, id)).await?;
        Self::remove_if_exists(&self.path_for(prefix::NOUN_METADATA, id)).await?;
        let hnsw_path = self.path_for(prefix::NOUN_HNSW, id);
        Self::remove_if_exists(&hnsw_path).await?;
        Self::remove_if_exists(&hnsw_path.with_extension("json.gen")).await?;
        Ok(())
    }

    async fn save_noun_metadata(&self, id: &EntityId, record: &NounMetadataRecord) -> Result<()> {
        Self::write_json(&self.path_for(prefix::NOUN_METADATA, id), record).await
    }

    async fn get_noun_metadata(&self, id: &EntityId) -> Result<Option<NounMetadataRecord>> {
        Self::read_json(&self.path_for(prefix::NOUN_METADATA, id)).await
    }

    async fn get_noun_metadata_batch(
        &self,
        ids: &[EntityId],
    ) -> Result<Vec<(EntityId, Option<NounMetadataRecord>)>> {
        // Bounded concurrency: 10 concurrent reads per chunk.
        let mut out = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(10) {
            let mut futures = Vec::with_capacity(chunk.len());
            for id in chunk {
                futures.push(async move { (*id, self.get_noun_metadata(id).await) });
            }
            for (id, result) in futures::future::join_all(futures).await {
                out.push((id, result?));
            }
        }
        Ok(out)
    }

    async fn save_verb_vector(&self, record: &VerbVectorRecord) -> Result<()> {
        Self::write_json(&self.path_for(prefix::VERB_VECTORS, &record.id), record).await
    }

    async fn get_verb_vector(&self, id: &EntityId) -> Result<Option<VerbVectorRecord>> {
        Self::read_json(&self.path_for(prefix::VERB_VECTORS, id)).await
    }

    async fn delete_verb(&self, id: &EntityId) -> Result<()> {
        Self::remove_if_exists(&self.path_for(prefix::VERB_VECTORS, id)).await?;
        Self::remove_if_exists(&self.path_for(prefix::VERB_METADATA, id)).await?;
        Ok(())
    }

    async fn save_verb_metadata(&self, id: &EntityId, record: &VerbMetadataRecord) -> Result<()> {
        Self::write_json(&self.path_for(prefix::VERB_METADATA, id), record).await
    }

    async fn get_verb_metadata(&self, id: &EntityId) -> Result<Option<VerbMetadataRecord>> {
        Self::read_json(&self.path_for(prefix::VERB_METADATA, id)).await
    }

    async fn save_hnsw_data(
        &self,
        id: &EntityId,
        record: &NounVectorRecord,
        expected_generation: Option<u64>,
    ) -> Result<u64> {
        let path = self.path_for(prefix::NOUN_HNSW, id);
        Self::cas_write(&path, record, expected_generation).await
    }

    async fn get_hnsw_data(&self, id: &EntityId) -> Result<Option<NounVectorRecord>> {
        Self::read_json(&self.path_for(prefix::NOUN_HNSW, id)).await
    }

    async fn save_hnsw_system(
        &self,
        record: &HnswSystemRecord,
        expected_generation: Option<u64>,
    ) -> Result<u64> {
        let path = self.root.join(prefix::SYSTEM_HNSW);
        Self::cas_write(&path, record, expected_generation).await
    }

    async fn get_hnsw_system(&self) -> Result<Option<HnswSystemRecord>> {
        Self::read_json(&self.root.join(prefix::SYSTEM_HNSW)).await
    }

    async fn save_statistics(&self, record: &StatisticsRecord) -> Result<()> {
        Self::write_json(&self.root.join(prefix::SYSTEM_STATISTICS), record).await
    }

    async fn get_statistics(&self) -> Result<Option<StatisticsRecord>> {
        Self::read_json(&self.root.join(prefix::SYSTEM_STATISTICS)).await
    }

    async fn save_counts(&self, record: &CountsRecord) -> Result<()> {
        Self::write_json(&self.root.join(prefix::SYSTEM_COUNTS), record).await
    }

    async fn get_counts(&self) -> Result<Option<CountsRecord>> {
        Self::read_json(&self.root.join(prefix::SYSTEM_COUNTS)).await
    }

    async fn get_nouns_with_pagination(
        &self,
        request: PageRequest,
        filter: Option<NounFilter>,
    ) -> Result<Page<(EntityId, NounMetadataRecord)>> {
        let predicate = filter.unwrap_or_else(|| std::sync::Arc::new(|_: &NounMetadataRecord| true));
        self.paginate_metadata(prefix::NOUN_METADATA, &request, |v| predicate(v))
            .await
    }

    async fn get_verbs_with_pagination(
        &self,
        request: PageRequest,
        filter: Option<VerbFilter>,
    ) -> Result<Page<(EntityId, VerbMetadataRecord)>> {
        let predicate = filter.unwrap_or_else(|| std::sync::Arc::new(|_: &VerbMetadataRecord| true));
        self.paginate_metadata(prefix::VERB_METADATA, &request, |v| predicate(v))
            .await
    }

    async fn set_lifecycle_policy(&self, _policy: LifecyclePolicy) -> Result<()> {
        warn!("lifecycle policies are a cloud-only feature; ignoring on filesystem backend");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphdb_core::NounType;

    fn sample_metadata() -> NounMetadataRecord {
        NounMetadataRecord {
            noun_type: NounType::Person,
            created_at: now_ms(),
            updated_at: now_ms(),
            confidence: None,
            weight: None,
            service: None,
            data: Default::default(),
        }
    }

    #[tokio::test]
    async fn save_then_get_noun_vector_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FilesystemAdapter::new(dir.path());
        let id = Uuid::new_v4();
        let record = NounVectorRecord {
            id,
            vector: vec![1.0, 2.0],
            connections: Default::default(),
            level: 1,
        };
        adapter.save_noun_vector(&record).await.unwrap();
        let fetched = adapter.get_noun_vector(&id).await.unwrap().unwrap();
        assert_eq!(fetched.vector, record.vector);
    }

    #[tokio::test]
    async fn hnsw_system_cas_rejects_stale_generation() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FilesystemAdapter::new(dir.path());
        let record = HnswSystemRecord {
            entry_point_id: Some(Uuid::new_v4()),
            max_level: 3,
        };
        let gen1 = adapter.save_hnsw_system(&record, Some(0)).await.unwrap();
        assert_eq!(gen1, 1);
        assert!(adapter.save_hnsw_system(&record, Some(0)).await.is_err());
        assert!(adapter.save_hnsw_system(&record, Some(gen1)).await.is_ok());
    }

    #[tokio::test]
    async fn corrupt_record_surfaces_as_corrupt_error() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FilesystemAdapter::new(dir.path());
        let id = Uuid::new_v4();
        let path = adapter.path_for(prefix::NOUN_METADATA, &id);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"not json").await.unwrap();
        let err = adapter.get_noun_metadata(&id).await.unwrap_err();
        assert!(matches!(err, CoreError::Corrupt(_)));
    }

    #[tokio::test]
    async fn legacy_flat_layout_is_migrated_into_shards() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FilesystemAdapter::new(dir.path());
        let id = Uuid::new_v4();
        let legacy_dir = dir.path().join(prefix::NOUN_METADATA);
        tokio::fs::create_dir_all(&legacy_dir).await.unwrap();
        let legacy_path = legacy_dir.join(format!("{id}.json"));
        let record = sample_metadata();
        tokio::fs::write(&legacy_path, serde_json::to_vec(&record).unwrap())
            .await
            .unwrap();

        let migrated = adapter.migrate_legacy_layout().await.unwrap();
        assert_eq!(migrated, 1);
        assert!(!legacy_path.exists());
        let fetched = adapter.get_noun_metadata(&id).await.unwrap();
        assert!(fetched.is_some());
    }
}
