//! In-memory storage adapter. Used by tests and by callers who don't need
//! durability; generation counters are still tracked so CAS semantics are
//! exercised identically to the cloud adapter.

use async_trait::async_trait;
use graphdb_core::{EntityId, Result};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::adapter::{NounFilter, StorageAdapter, VerbFilter};
use crate::pagination::{Page, PageRequest};
use crate::records::{
    CountsRecord, HnswSystemRecord, NounMetadataRecord, NounVectorRecord, StatisticsRecord,
    VerbMetadataRecord, VerbVectorRecord,
};

#[derive(Default)]
struct Generationed<T> {
    value: T,
    generation: u64,
}

#[derive(Default)]
struct State {
    noun_vectors: HashMap<EntityId, NounVectorRecord>,
    noun_metadata: HashMap<EntityId, NounMetadataRecord>,
    verb_vectors: HashMap<EntityId, VerbVectorRecord>,
    verb_metadata: HashMap<EntityId, VerbMetadataRecord>,
    hnsw_data: HashMap<EntityId, Generationed<NounVectorRecord>>,
    hnsw_system: Option<Generationed<HnswSystemRecord>>,
    statistics: Option<StatisticsRecord>,
    counts: Option<CountsRecord>,
    /// Insertion order of noun ids, so pagination is stable and mirrors the
    /// shard-ordered iteration of the cloud adapter closely enough for
    /// tests that don't depend on shard boundaries.
    noun_order: Vec<EntityId>,
    verb_order: Vec<EntityId>,
}

/// In-memory `StorageAdapter`. Everything lives behind a single `RwLock`
/// since there is no I/O to overlap; readers and writers never block on
/// anything but each other.
pub struct MemoryAdapter {
    state: RwLock<State>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn check_generation(current: u64, expected: Option<u64>) -> Result<()> {
    if let Some(expected) = expected
        && expected != current
    {
        return Err(graphdb_core::CoreError::Conflict(format!(
            "generation mismatch: expected {expected}, current {current}"
        )));
    }
    Ok(())
}

fn paginate<T: Clone>(
    ordered_ids: &[EntityId],
    lookup: impl Fn(&EntityId) -> Option<T>,
    request: &PageRequest,
    filter: &impl Fn(&T) -> bool,
) -> Page<(EntityId, T)> {
    let offset = request.offset.unwrap_or(0);
    let mut items = Vec::new();
    let mut idx = offset;
    while idx < ordered_ids.len() && items.len() < request.limit {
        let id = ordered_ids[idx];
        if let Some(value) = lookup(&id)
            && filter(&value)
        {
            items.push((id, value));
        }
        idx += 1;
    }
    let has_more = idx < ordered_ids.len() && !items.is_empty();
    Page {
        total_count: ordered_ids.len() as u64,
        has_more,
        next_cursor: if has_more {
            Some(idx.to_string())
        } else {
            None
        },
        items,
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn save_noun_vector(&self, record: &NounVectorRecord) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if !state.noun_vectors.contains_key(&record.id) {
            state.noun_order.push(record.id);
        }
        state.noun_vectors.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_noun_vector(&self, id: &EntityId) -> Result<Option<NounVectorRecord>> {
        Ok(self.state.read().unwrap().noun_vectors.get(id).cloned())
    }

    async fn delete_noun(&self, id: &EntityId) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.noun_vectors.remove(id);
        state.noun_metadata.remove(id);
        state.hnsw_data.remove(id);
        state.noun_order.retain(|x| x != id);
        Ok(())
    }

    async fn save_noun_metadata(&self, id: &EntityId, record: &NounMetadataRecord) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if !state.noun_metadata.contains_key(id) && !state.noun_order.contains(id) {
            state.noun_order.push(*id);
        }
        state.noun_metadata.insert(*id, record.clone());
        Ok(())
    }

    async fn get_noun_metadata(&self, id: &EntityId) -> Result<Option<NounMetadataRecord>> {
        Ok(self.state.read().unwrap().noun_metadata.get(id).cloned())
    }

    async fn get_noun_metadata_batch(
        &self,
        ids: &[EntityId],
    ) -> Result<Vec<(EntityId, Option<NounMetadataRecord>)>> {
        let state = self.state.read().unwrap();
        Ok(ids
            .iter()
            .map(|id| (*id, state.noun_metadata.get(id).cloned()))
            .collect())
    }

    async fn save_verb_vector(&self, record: &VerbVectorRecord) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if !state.verb_vectors.contains_key(&record.id) {
            state.verb_order.push(record.id);
        }
        state.verb_vectors.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_verb_vector(&self, id: &EntityId) -> Result<Option<VerbVectorRecord>> {
        Ok(self.state.read().unwrap().verb_vectors.get(id).cloned())
    }

    async fn delete_verb(&self, id: &EntityId) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.verb_vectors.remove(id);
        state.verb_metadata.remove(id);
        state.verb_order.retain(|x| x != id);
        Ok(())
    }

    async fn save_verb_metadata(&self, id: &EntityId, record: &VerbMetadataRecord) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if !state.verb_metadata.contains_key(id) && !state.verb_order.contains(id) {
            state.verb_order.push(*id);
        }
        state.verb_metadata.insert(*id, record.clone());
        Ok(())
    }

    async fn get_verb_metadata(&self, id: &EntityId) -> Result<Option<VerbMetadataRecord>> {
        Ok(self.state.read().unwrap().verb_metadata.get(id).cloned())
    }

    async fn save_hnsw_data(
        &self,
        id: &EntityId,
        record: &NounVectorRecord,
        expected_generation: Option<u64>,
    ) -> Result<u64> {
        let mut state = self.state.write().unwrap();
        let current = state.hnsw_data.get(id).map(|g| g.generation).unwrap_or(0);
        check_generation(current, expected_generation)?;
        let next = current + 1;
        state.hnsw_data.insert(
            *id,
            Generationed {
                value: record.clone(),
                generation: next,
            },
        );
        Ok(next)
    }

    async fn get_hnsw_data(&self, id: &EntityId) -> Result<Option<NounVectorRecord>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .hnsw_data
            .get(id)
            .map(|g| g.value.clone()))
    }

    async fn save_hnsw_system(
        &self,
        record: &HnswSystemRecord,
        expected_generation: Option<u64>,
    ) -> Result<u64> {
        let mut state = self.state.write().unwrap();
        let current = state.hnsw_system.as_ref().map(|g| g.generation).unwrap_or(0);
        check_generation(current, expected_generation)?;
        let next = current + 1;
        state.hnsw_system = Some(Generationed {
            value: record.clone(),
            generation: next,
        });
        Ok(next)
    }

    async fn get_hnsw_system(&self) -> Result<Option<HnswSystemRecord>> {
        Ok(self
            .state
            .read()
            .unwrap()
            .hnsw_system
            .as_ref()
            .map(|g| g.value.clone()))
    }

    async fn save_statistics(&self, record: &StatisticsRecord) -> Result<()> {
        self.state.write().unwrap().statistics = Some(record.clone());
        Ok(())
    }

    async fn get_statistics(&self) -> Result<Option<StatisticsRecord>> {
        Ok(self.state.read().unwrap().statistics.clone())
    }

    async fn save_counts(&self, record: &CountsRecord) -> Result<()> {
        self.state.write().unwrap().counts = Some(record.clone());
        Ok(())
    }

    async fn get_counts(&self) -> Result<Option<CountsRecord>> {
        Ok(self.state.read().unwrap().counts.clone())
    }

    async fn get_nouns_with_pagination(
        &self,
        request: PageRequest,
        filter: Option<NounFilter>,
    ) -> Result<Page<(EntityId, NounMetadataRecord)>> {
        let state = self.state.read().unwrap();
        let predicate = filter.unwrap_or_else(|| std::sync::Arc::new(|_: &NounMetadataRecord| true));
        Ok(paginate(
            &state.noun_order,
            |id| state.noun_metadata.get(id).cloned(),
            &request,
            &|v: &NounMetadataRecord| predicate(v),
        ))
    }

    async fn get_verbs_with_pagination(
        &self,
        request: PageRequest,
        filter: Option<VerbFilter>,
    ) -> Result<Page<(EntityId, VerbMetadataRecord)>> {
        let state = self.state.read().unwrap();
        let predicate = filter.unwrap_or_else(|| std::sync::Arc::new(|_: &VerbMetadataRecord| true));
        Ok(paginate(
            &state.verb_order,
            |id| state.verb_metadata.get(id).cloned(),
            &request,
            &|v: &VerbMetadataRecord| predicate(v),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphdb_core::{NounType, now_ms};
    use uuid::Uuid;

    fn sample_metadata() -> NounMetadataRecord {
        NounMetadataRecord {
            noun_type: NounType::Document,
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
        let adapter = MemoryAdapter::new();
        let id = Uuid::new_v4();
        let record = NounVectorRecord {
            id,
            vector: vec![1.0, 2.0, 3.0],
            connections: Default::default(),
            level: 0,
        };
        adapter.save_noun_vector(&record).await.unwrap();
        let fetched = adapter.get_noun_vector(&id).await.unwrap().unwrap();
        assert_eq!(fetched.vector, record.vector);
    }

    #[tokio::test]
    async fn delete_noun_removes_all_noun_state() {
        let adapter = MemoryAdapter::new();
        let id = Uuid::new_v4();
        adapter
            .save_noun_vector(&NounVectorRecord {
                id,
                vector: vec![0.0],
                connections: Default::default(),
                level: 0,
            })
            .await
            .unwrap();
        adapter.save_noun_metadata(&id, &sample_metadata()).await.unwrap();
        adapter.delete_noun(&id).await.unwrap();
        assert!(adapter.get_noun_vector(&id).await.unwrap().is_none());
        assert!(adapter.get_noun_metadata(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn hnsw_system_cas_rejects_stale_generation() {
        let adapter = MemoryAdapter::new();
        let record = HnswSystemRecord {
            entry_point_id: Some(Uuid::new_v4()),
            max_level: 2,
        };
        let gen1 = adapter.save_hnsw_system(&record, Some(0)).await.unwrap();
        assert_eq!(gen1, 1);
        // Stale expected generation must fail.
        let err = adapter.save_hnsw_system(&record, Some(0)).await;
        assert!(err.is_err());
        // Correct current generation succeeds.
        let gen2 = adapter.save_hnsw_system(&record, Some(gen1)).await.unwrap();
        assert_eq!(gen2, 2);
    }

    #[tokio::test]
    async fn pagination_reports_has_more_and_cursor() {
        let adapter = MemoryAdapter::new();
        for _ in 0..5 {
            let id = Uuid::new_v4();
            adapter.save_noun_metadata(&id, &sample_metadata()).await.unwrap();
        }
        let page = adapter
            .get_nouns_with_pagination(PageRequest::first(3), None)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(page.has_more);
        assert!(page.next_cursor.is_some());
    }
}
