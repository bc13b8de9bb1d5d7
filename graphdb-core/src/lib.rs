//! Core types, error taxonomy and configuration for the graph-augmented
//! vector database.
//!
//! This crate has no storage or index logic of its own; it's the shared
//! vocabulary `graphdb-storage` and `graphdb-index` build on.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    BatchingSettings, CacheSettings, HnswSettings, PersistMode, QuantizationSettings, Settings,
    StorageBackendKind, StorageSettings, WalSettings,
};
pub use error::{CoreError, Result};
pub use types::{
    EntityId, Metadata, Noun, NounType, TimestampMs, Timestamps, VectorStorageMode, Verb,
    VerbType, mean_vector, shard_of,
};

/// Protocol version recorded in persisted system records, for forward
/// compatibility checks on rebuild.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> TimestampMs {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
