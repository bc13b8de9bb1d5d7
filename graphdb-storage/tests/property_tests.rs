//! Property-based tests for the storage layer: random vectors and metadata
//! round-trip through the in-memory adapter, and the counts-merge and
//! cursor codecs hold for arbitrary inputs.

use graphdb_storage::{CountsRecord, MemoryAdapter, NounVectorRecord, StorageAdapter};
use proptest::prelude::*;
use std::collections::HashMap;
use uuid::Uuid;

fn vector_strategy() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(any::<u16>().prop_map(|v| v as f32 / 100.0), 1..64)
}

proptest! {
    #[test]
    fn noun_vector_round_trips_through_memory_adapter(vector in vector_strategy()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let adapter = MemoryAdapter::new();
            let id = Uuid::new_v4();
            let record = NounVectorRecord {
                id,
                vector: vector.clone(),
                connections: Default::default(),
                level: 0,
            };
            adapter.save_noun_vector(&record).await.unwrap();
            let fetched = adapter.get_noun_vector(&id).await.unwrap().unwrap();
            prop_assert_eq!(fetched.vector, vector);
            Ok(()) as Result<(), proptest::test_runner::TestCaseError>
        }).unwrap();
    }

    #[test]
    fn counts_merge_is_commutative_for_totals(
        a_total in 0u64..10_000,
        b_total in 0u64..10_000,
        a_ts in 0i64..2_000_000_000,
        b_ts in 0i64..2_000_000_000,
    ) {
        let a = CountsRecord {
            total_noun_count: a_total,
            last_updated: a_ts.to_string(),
            entity_counts: HashMap::new(),
            verb_counts: HashMap::new(),
            total_verb_count: 0,
        };
        let b = CountsRecord {
            total_noun_count: b_total,
            last_updated: b_ts.to_string(),
            entity_counts: HashMap::new(),
            verb_counts: HashMap::new(),
            total_verb_count: 0,
        };
        let merged_ab = a.merge(&b);
        let merged_ba = b.merge(&a);
        prop_assert_eq!(merged_ab.total_noun_count, merged_ba.total_noun_count);
        prop_assert_eq!(merged_ab.total_noun_count, a_total.max(b_total));
    }

    #[test]
    fn cloud_cursor_decode_of_encode_is_identity(shard_index in 0usize..256, has_token in any::<bool>(), token in "[a-zA-Z0-9]{0,20}") {
        use graphdb_storage::CloudCursor;
        let cursor = CloudCursor {
            shard_index,
            native_token: if has_token && !token.is_empty() { Some(token) } else { None },
        };
        let encoded = cursor.encode();
        prop_assert_eq!(CloudCursor::decode(&encoded), Some(cursor));
    }
}

#[tokio::test]
async fn deleting_a_noun_is_idempotent() {
    let adapter = MemoryAdapter::new();
    let id = Uuid::new_v4();
    adapter.delete_noun(&id).await.unwrap();
    adapter.delete_noun(&id).await.unwrap();
}
