//! Property-based tests for the HNSW index: randomized
//! inserts/deletes/searches must uphold the invariants that matter for
//! correctness regardless of how the graph happens to be shaped.

use graphdb_index::{DistanceMetric, HnswConfig, HnswIndex};
use graphdb_core::HnswSettings;
use proptest::prelude::*;
use std::collections::HashSet;
use uuid::Uuid;

fn vector_strategy(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-1.0f32..1.0f32, dim..=dim)
}

fn default_config() -> HnswConfig {
    HnswConfig::from(&HnswSettings::default())
}

proptest! {
    /// After inserting a batch of vectors, searching for each should return
    /// one of the inserted ids.
    #[test]
    fn insert_and_search_consistency(
        vectors in prop::collection::vec(vector_strategy(32), 1..50)
    ) {
        let mut index = HnswIndex::new(default_config(), DistanceMetric::Cosine);
        let mut ids = Vec::new();
        for vector in &vectors {
            let id = Uuid::new_v4();
            index.insert(id, vector.clone()).unwrap();
            ids.push(id);
        }
        let id_set: HashSet<_> = ids.iter().copied().collect();

        for vector in &vectors {
            let results = index.search(vector, 1, None, None, None).unwrap();
            prop_assert!(!results.is_empty());
            prop_assert!(id_set.contains(&results[0].id));
        }
    }

    /// Deleting a vector removes it from every later search result.
    #[test]
    fn delete_removes_from_search(
        vector in vector_strategy(16),
        other_vectors in prop::collection::vec(vector_strategy(16), 5..20)
    ) {
        let mut index = HnswIndex::new(default_config(), DistanceMetric::Euclidean);
        let id = Uuid::new_v4();
        index.insert(id, vector.clone()).unwrap();
        for other in &other_vectors {
            index.insert(Uuid::new_v4(), other.clone()).unwrap();
        }

        let before = index.search(&vector, 10, None, None, None).unwrap();
        prop_assert!(before.iter().any(|r| r.id == id));

        index.delete(id).unwrap();

        let after = index.search(&vector, 10, None, None, None).unwrap();
        prop_assert!(!after.iter().any(|r| r.id == id));
    }

    /// `search(k)` never returns more than `k` results.
    #[test]
    fn search_returns_at_most_k(
        query in vector_strategy(24),
        vectors in prop::collection::vec(vector_strategy(24), 10..100),
        k in 1usize..20usize
    ) {
        let mut index = HnswIndex::new(default_config(), DistanceMetric::Cosine);
        for vector in vectors {
            index.insert(Uuid::new_v4(), vector).unwrap();
        }
        let results = index.search(&query, k, None, None, None).unwrap();
        prop_assert!(results.len() <= k);
    }

    /// Results are strictly ascending by distance.
    #[test]
    fn search_results_sorted_ascending(
        query in vector_strategy(24),
        vectors in prop::collection::vec(vector_strategy(24), 10..50)
    ) {
        let mut index = HnswIndex::new(default_config(), DistanceMetric::Euclidean);
        for vector in vectors {
            index.insert(Uuid::new_v4(), vector).unwrap();
        }
        let results = index.search(&query, 10, None, None, None).unwrap();
        for pair in results.windows(2) {
            prop_assert!(pair[0].distance <= pair[1].distance);
        }
    }

    /// An inserted vector is always its own closest match.
    #[test]
    fn self_similarity_is_near_zero(vector in vector_strategy(32)) {
        let mut index = HnswIndex::new(default_config(), DistanceMetric::Euclidean);
        let id = Uuid::new_v4();
        index.insert(id, vector.clone()).unwrap();
        let results = index.search(&vector, 1, None, None, None).unwrap();
        prop_assert!(!results.is_empty());
        prop_assert!(results[0].distance < 0.01);
    }

    /// Regardless of how many vectors land on layer 0, pruning keeps every
    /// node's layer-0 connection count at or below `m` — there is no
    /// separate, looser cap for that layer.
    #[test]
    fn layer0_degree_never_exceeds_m(
        vectors in prop::collection::vec(vector_strategy(8), 20..120)
    ) {
        let mut settings = HnswSettings::default();
        settings.m = 6;
        let mut index = HnswIndex::new(HnswConfig::from(&settings), DistanceMetric::Euclidean);
        for vector in vectors {
            index.insert(Uuid::new_v4(), vector).unwrap();
        }
        for id in index.node_ids() {
            prop_assert!(index.layer0_degree(&id) <= 6);
        }
    }
}

#[cfg(test)]
mod deterministic {
    use super::*;

    #[test]
    fn single_vector_is_found() {
        let mut index = HnswIndex::new(default_config(), DistanceMetric::Euclidean);
        let id = Uuid::new_v4();
        index.insert(id, vec![1.0, 2.0, 3.0]).unwrap();
        let results = index.search(&[1.0, 2.0, 3.0], 1, None, None, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);
    }

    #[test]
    fn empty_index_search_returns_nothing() {
        let index = HnswIndex::new(default_config(), DistanceMetric::Cosine);
        let results = index.search(&[1.0, 2.0, 3.0], 10, None, None, None).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn zero_vector_is_found() {
        let mut index = HnswIndex::new(default_config(), DistanceMetric::Euclidean);
        let id = Uuid::new_v4();
        index.insert(id, vec![0.0; 32]).unwrap();
        let results = index.search(&vec![0.0; 32], 1, None, None, None).unwrap();
        assert_eq!(results[0].id, id);
    }

    #[test]
    fn different_metrics_produce_different_distances() {
        let v1 = vec![1.0, 0.0];
        let v2 = vec![0.0, 1.0];
        let query = vec![1.0, 1.0];

        let mut cosine = HnswIndex::new(default_config(), DistanceMetric::Cosine);
        cosine.insert(Uuid::new_v4(), v1.clone()).unwrap();
        cosine.insert(Uuid::new_v4(), v2.clone()).unwrap();
        let cosine_results = cosine.search(&query, 2, None, None, None).unwrap();

        let mut euclidean = HnswIndex::new(default_config(), DistanceMetric::Euclidean);
        euclidean.insert(Uuid::new_v4(), v1).unwrap();
        euclidean.insert(Uuid::new_v4(), v2).unwrap();
        let euclidean_results = euclidean.search(&query, 2, None, None, None).unwrap();

        assert!(cosine_results[0].distance != euclidean_results[0].distance);
    }

    #[test]
    fn reinserting_an_existing_id_overwrites_its_vector() {
        let mut index = HnswIndex::new(default_config(), DistanceMetric::Euclidean);
        let id = Uuid::new_v4();
        index.insert(id, vec![0.0, 0.0]).unwrap();
        index.insert(id, vec![10.0, 10.0]).unwrap();
        assert_eq!(index.resident_vector(&id), Some(vec![10.0, 10.0]));
    }
}
