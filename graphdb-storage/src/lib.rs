//! Object-addressed persistence for the graph-augmented vector database:
//! the `StorageAdapter` boundary and its three backends, the write-ahead
//! log, adaptive batching, and the persistence coordinator that ties dirty
//! in-memory state to durable storage.

pub mod adapter;
pub mod backpressure;
pub mod batching;
pub mod cloud;
pub mod filesystem;
pub mod lock;
pub mod memory;
pub mod pagination;
pub mod persistence;
pub mod records;
pub mod wal;
pub mod write_buffer;

pub use adapter::{LifecyclePolicy, NounFilter, StorageAdapter, VerbFilter};
pub use backpressure::BackpressureController;
pub use batching::{AdaptiveBatcher, PendingWrite, Priority, RefusedBatchingRegistry, SubmitOutcome};
pub use cloud::CloudAdapter;
pub use filesystem::FilesystemAdapter;
pub use lock::FileLock;
pub use memory::MemoryAdapter;
pub use pagination::{CloudCursor, Page, PageRequest, CLOUD_MAX_PAGE_SIZE};
pub use persistence::{FlushReport, PersistenceCoordinator};
pub use records::{
    CountsRecord, HnswSystemRecord, NounMetadataRecord, NounVectorRecord, StatisticsRecord,
    VerbMetadataRecord, VerbVectorRecord,
};
pub use wal::{RedactedVector, WalEntry, WalOperation, WalStatus, WriteAheadLog};
pub use write_buffer::{spawn_background_flusher, WriteBuffer};

use graphdb_core::{CoreError, Settings};
use std::sync::Arc;

/// Builds the concrete [`StorageAdapter`] named by `settings.storage.backend`.
/// Cloud construction is the caller's responsibility beyond this point
/// (credentials, bucket resolution) since `object_store`'s builders are
/// backend-specific; this just picks memory vs. filesystem, which are
/// fully self-contained.
pub async fn build_adapter(settings: &Settings) -> graphdb_core::Result<Arc<dyn StorageAdapter>> {
    use graphdb_core::config::StorageBackendKind;
    match settings.storage.backend {
        StorageBackendKind::Memory => Ok(Arc::new(MemoryAdapter::new())),
        StorageBackendKind::Filesystem => {
            let adapter = FilesystemAdapter::new(settings.storage.location.clone());
            adapter.migrate_legacy_layout().await?;
            Ok(Arc::new(adapter))
        }
        StorageBackendKind::Cloud => Err(CoreError::ConfigurationError(
            "cloud backend requires an explicit object_store instance; construct CloudAdapter directly".into(),
        )),
    }
}
