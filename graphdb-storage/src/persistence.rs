//! Persistence coordinator: decides whether a write reaches the storage
//! adapter immediately or is tracked as dirty and flushed later, and drives
//! the flush itself with bounded concurrency.

use futures::stream::{self, StreamExt};
use graphdb_core::{EntityId, PersistMode, Result};
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::adapter::StorageAdapter;
use crate::records::{HnswSystemRecord, NounVectorRecord};

const DEFAULT_FLUSH_CONCURRENCY: usize = 50;

#[derive(Debug, Default, Clone, Copy)]
pub struct FlushReport {
    pub nodes_flushed: usize,
    pub nodes_failed: usize,
    pub system_flushed: bool,
}

/// Tracks which HNSW nodes and which system record are dirty, and flushes
/// them to a [`StorageAdapter`]. In `Immediate` mode every write should
/// bypass the dirty set entirely and call the adapter directly — this type
/// only exists to serve `Deferred` mode, but callers still consult
/// [`Self::mode`] so a single call site works under either policy.
pub struct PersistenceCoordinator<A: StorageAdapter> {
    adapter: std::sync::Arc<A>,
    mode: PersistMode,
    dirty_nodes: Mutex<HashSet<EntityId>>,
    dirty_system: AtomicBool,
    flush_concurrency: usize,
}

impl<A: StorageAdapter> PersistenceCoordinator<A> {
    pub fn new(adapter: std::sync::Arc<A>, mode: PersistMode) -> Self {
        Self {
            adapter,
            mode,
            dirty_nodes: Mutex::new(HashSet::new()),
            dirty_system: AtomicBool::new(false),
            flush_concurrency: DEFAULT_FLUSH_CONCURRENCY,
        }
    }

    pub fn mode(&self) -> PersistMode {
        self.mode
    }

    pub fn mark_node_dirty(&self, id: EntityId) {
        self.dirty_nodes.lock().unwrap().insert(id);
    }

    pub fn mark_system_dirty(&self) {
        self.dirty_system.store(true, Ordering::Release);
    }

    pub fn dirty_node_count(&self) -> usize {
        self.dirty_nodes.lock().unwrap().len()
    }

    pub fn is_system_dirty(&self) -> bool {
        self.dirty_system.load(Ordering::Acquire)
    }

    /// Flushes every dirty node (via `snapshot`, which the index layer
    /// supplies since this crate doesn't know the in-memory node shape)
    /// plus the system record if dirty, with bounded concurrency.
    pub async fn flush<F, Fut>(
        &self,
        mut snapshot: F,
        system_snapshot: Option<HnswSystemRecord>,
    ) -> Result<FlushReport>
    where
        F: FnMut(EntityId) -> Fut,
        Fut: std::future::Future<Output = Option<NounVectorRecord>>,
    {
        let dirty: Vec<EntityId> = {
            let mut guard = self.dirty_nodes.lock().unwrap();
            guard.drain().collect()
        };

        let mut records = Vec::with_capacity(dirty.len());
        for id in dirty {
            if let Some(record) = snapshot(id).await {
                records.push(record);
            }
        }

        let adapter = &self.adapter;
        let results = stream::iter(records)
            .map(|record| async move { adapter.save_hnsw_data(&record.id, &record, None).await })
            .buffer_unordered(self.flush_concurrency)
            .collect::<Vec<_>>()
            .await;

        let nodes_flushed = results.iter().filter(|r| r.is_ok()).count();
        let nodes_failed = results.len() - nodes_flushed;
        if nodes_failed > 0 {
            debug!(nodes_failed, "some dirty nodes failed to persist this flush");
        }

        let mut system_flushed = false;
        if self.dirty_system.swap(false, Ordering::AcqRel)
            && let Some(record) = system_snapshot
        {
            self.adapter.save_hnsw_system(&record, None).await?;
            system_flushed = true;
        }

        if nodes_flushed > 0 || system_flushed {
            info!(nodes_flushed, system_flushed, "persistence flush complete");
        }

        Ok(FlushReport {
            nodes_flushed,
            nodes_failed,
            system_flushed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAdapter;
    use uuid::Uuid;

    #[tokio::test]
    async fn flush_drains_dirty_set_and_persists_snapshots() {
        let adapter = std::sync::Arc::new(MemoryAdapter::new());
        let coordinator = PersistenceCoordinator::new(adapter.clone(), PersistMode::Deferred);
        let id = Uuid::new_v4();
        coordinator.mark_node_dirty(id);
        assert_eq!(coordinator.dirty_node_count(), 1);

        let report = coordinator
            .flush(
                move |snap_id| async move {
                    Some(NounVectorRecord {
                        id: snap_id,
                        vector: vec![1.0],
                        connections: Default::default(),
                        level: 0,
                    })
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(report.nodes_flushed, 1);
        assert_eq!(coordinator.dirty_node_count(), 0);
        assert!(adapter.get_hnsw_data(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn system_flush_only_happens_when_marked_dirty() {
        let adapter = std::sync::Arc::new(MemoryAdapter::new());
        let coordinator = PersistenceCoordinator::new(adapter.clone(), PersistMode::Deferred);
        let report = coordinator
            .flush(
                |_id| async { None },
                Some(HnswSystemRecord {
                    entry_point_id: None,
                    max_level: 0,
                }),
            )
            .await
            .unwrap();
        assert!(!report.system_flushed);

        coordinator.mark_system_dirty();
        let report = coordinator
            .flush(
                |_id| async { None },
                Some(HnswSystemRecord {
                    entry_point_id: None,
                    max_level: 0,
                }),
            )
            .await
            .unwrap();
        assert!(report.system_flushed);
    }
}
