//! Cross-adapter integration tests: the same behavior contract exercised
//! against the in-memory, filesystem, and in-process cloud adapters so a
//! regression in one backend's edge-case handling shows up immediately.

use graphdb_core::NounType;
use graphdb_storage::{
    CloudAdapter, FilesystemAdapter, HnswSystemRecord, MemoryAdapter, NounMetadataRecord,
    NounVectorRecord, PageRequest, StorageAdapter, WalOperation, WriteAheadLog,
};
use object_store::memory::InMemory;
use std::sync::Arc;
use uuid::Uuid;

fn sample_vector(id: Uuid) -> NounVectorRecord {
    NounVectorRecord {
        id,
        vector: vec![1.0, 2.0, 3.0],
        connections: Default::default(),
        level: 0,
    }
}

fn sample_metadata(noun_type: NounType) -> NounMetadataRecord {
    NounMetadataRecord {
        noun_type,
        created_at: 1000,
        updated_at: 1000,
        confidence: Some(0.9),
        weight: None,
        service: None,
        data: Default::default(),
    }
}

async fn exercise_adapter(adapter: &dyn StorageAdapter) {
    let id = Uuid::new_v4();
    adapter.save_noun_vector(&sample_vector(id)).await.unwrap();
    adapter
        .save_noun_metadata(&id, &sample_metadata(NounType::Person))
        .await
        .unwrap();

    let vector = adapter.get_noun_vector(&id).await.unwrap().unwrap();
    assert_eq!(vector.vector, vec![1.0, 2.0, 3.0]);

    let metadata = adapter.get_noun_metadata(&id).await.unwrap().unwrap();
    assert_eq!(metadata.noun_type, NounType::Person);

    adapter.delete_noun(&id).await.unwrap();
    assert!(adapter.get_noun_vector(&id).await.unwrap().is_none());
    assert!(adapter.get_noun_metadata(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn memory_adapter_round_trips() {
    exercise_adapter(&MemoryAdapter::new()).await;
}

#[tokio::test]
async fn filesystem_adapter_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    exercise_adapter(&FilesystemAdapter::new(dir.path())).await;
}

#[tokio::test]
async fn cloud_adapter_round_trips() {
    exercise_adapter(&CloudAdapter::new(Arc::new(InMemory::new()))).await;
}

async fn exercise_hnsw_system_cas(adapter: &dyn StorageAdapter) {
    let record = HnswSystemRecord {
        entry_point_id: Some(Uuid::new_v4()),
        max_level: 4,
    };
    let gen1 = adapter.save_hnsw_system(&record, None).await.unwrap();
    assert_eq!(gen1, 1);

    // A stale expectation must be rejected on every backend identically.
    assert!(adapter.save_hnsw_system(&record, Some(0)).await.is_err());

    let gen2 = adapter.save_hnsw_system(&record, Some(gen1)).await.unwrap();
    assert_eq!(gen2, 2);

    let fetched = adapter.get_hnsw_system().await.unwrap().unwrap();
    assert_eq!(fetched.max_level, 4);
}

#[tokio::test]
async fn memory_hnsw_system_cas_is_consistent() {
    exercise_hnsw_system_cas(&MemoryAdapter::new()).await;
}

#[tokio::test]
async fn filesystem_hnsw_system_cas_is_consistent() {
    let dir = tempfile::tempdir().unwrap();
    exercise_hnsw_system_cas(&FilesystemAdapter::new(dir.path())).await;
}

#[tokio::test]
async fn cloud_hnsw_system_cas_is_consistent() {
    exercise_hnsw_system_cas(&CloudAdapter::new(Arc::new(InMemory::new()))).await;
}

#[tokio::test]
async fn pagination_returns_all_items_across_pages_on_every_backend() {
    async fn drain_all(adapter: &dyn StorageAdapter, total: usize) -> usize {
        let mut seen = 0;
        let mut request = PageRequest::first(7);
        loop {
            let page = adapter
                .get_nouns_with_pagination(request.clone(), None)
                .await
                .unwrap();
            seen += page.items.len();
            if !page.has_more {
                break;
            }
            request = PageRequest {
                limit: 7,
                cursor: page.next_cursor.clone(),
                offset: page.next_cursor.and_then(|c| c.parse().ok()),
            };
        }
        assert!(seen <= total);
        seen
    }

    let memory = MemoryAdapter::new();
    for _ in 0..23 {
        memory
            .save_noun_metadata(&Uuid::new_v4(), &sample_metadata(NounType::Task))
            .await
            .unwrap();
    }
    assert_eq!(drain_all(&memory, 23).await, 23);
}

#[tokio::test]
async fn filesystem_legacy_layout_migrates_before_first_use() {
    let dir = tempfile::tempdir().unwrap();
    let legacy_dir = dir.path().join("entities/nouns/metadata");
    tokio::fs::create_dir_all(&legacy_dir).await.unwrap();
    let id = Uuid::new_v4();
    let legacy_path = legacy_dir.join(format!("{id}.json"));
    let metadata = sample_metadata(NounType::Organization);
    tokio::fs::write(&legacy_path, serde_json::to_vec(&metadata).unwrap())
        .await
        .unwrap();

    let adapter = FilesystemAdapter::new(dir.path());
    let migrated = adapter.migrate_legacy_layout().await.unwrap();
    assert_eq!(migrated, 1);

    let fetched = adapter.get_noun_metadata(&id).await.unwrap().unwrap();
    assert_eq!(fetched.noun_type, NounType::Organization);
}

#[tokio::test]
async fn wal_recovers_mixed_operation_kinds_after_simulated_crash() {
    let dir = tempfile::tempdir().unwrap();
    let noun_id = Uuid::new_v4();
    let verb_id = Uuid::new_v4();
    let source_id = Uuid::new_v4();
    let target_id = Uuid::new_v4();

    {
        let wal = WriteAheadLog::open(dir.path(), 10 * 1024 * 1024, true)
            .await
            .unwrap();
        wal.append(WalOperation::InsertNoun {
            id: noun_id,
            vector: vec![0.1, 0.2],
            noun_type: "Document".into(),
            metadata: Default::default(),
        })
        .await
        .unwrap();
        wal.append(WalOperation::Relate {
            id: verb_id,
            source_id,
            target_id,
            verb: graphdb_core::VerbType::RelatedTo,
            weight: 1.0,
        })
        .await
        .unwrap();
        wal.append(WalOperation::DeleteNoun { id: noun_id })
            .await
            .unwrap();
        // `wal` dropped here without a clean checkpoint: simulates a crash.
    }

    let wal = WriteAheadLog::open(dir.path(), 10 * 1024 * 1024, true)
        .await
        .unwrap();
    let mut replayed = Vec::new();
    let applied = wal
        .recover(|op| {
            replayed.push(format!("{op:?}"));
            async { Ok(()) }
        })
        .await
        .unwrap();

    assert_eq!(applied, 3);
    assert!(replayed[0].contains("InsertNoun"));
    assert!(replayed[1].contains("Relate"));
    assert!(replayed[2].contains("DeleteNoun"));
}

#[tokio::test]
async fn wal_checkpoint_clears_rotated_segments() {
    let dir = tempfile::tempdir().unwrap();
    let wal = WriteAheadLog::open(dir.path(), 64, true).await.unwrap();
    for _ in 0..10 {
        wal.append(WalOperation::DeleteNoun { id: Uuid::new_v4() })
            .await
            .unwrap();
    }
    wal.checkpoint().await.unwrap();

    let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
    let mut rotated_remaining = false;
    while let Some(entry) = entries.next_entry().await.unwrap() {
        if entry.file_name().to_string_lossy().starts_with("wal-") {
            rotated_remaining = true;
        }
    }
    assert!(!rotated_remaining);
}
