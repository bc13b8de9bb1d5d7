//! Configuration structures for every recognized tunable (HNSW, storage,
//! cache, WAL, batching), assembled through the `config` crate from
//! defaults plus environment overrides.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CoreError, Result};
use crate::types::VectorStorageMode;

/// `hnsw` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswSettings {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub ml_max: usize,
    pub quantization: QuantizationSettings,
    pub vector_storage: VectorStorageMode,
    pub persist_mode: PersistMode,
    pub max_concurrent_neighbor_writes: usize,
}

impl Default for HnswSettings {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            ml_max: 16,
            quantization: QuantizationSettings::default(),
            vector_storage: VectorStorageMode::default(),
            persist_mode: PersistMode::default(),
            max_concurrent_neighbor_writes: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizationSettings {
    pub enabled: bool,
    pub rerank_multiplier: usize,
}

impl Default for QuantizationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            rerank_multiplier: 3,
        }
    }
}

/// Whether persistence happens per-write or is deferred until `flush()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PersistMode {
    Immediate,
    #[default]
    Deferred,
}

/// `storage` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackendKind,
    /// Root path for the filesystem backend, or bucket/container name for
    /// cloud backends.
    pub location: String,
    pub operation_timeout: Duration,
    pub bucket_scan_timeout: Duration,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Memory,
            location: String::new(),
            operation_timeout: Duration::from_secs(30),
            bucket_scan_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    Memory,
    Filesystem,
    Cloud,
}

/// `cache` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub max_size_bytes: u64,
    pub hot_cache_max_size_bytes: Option<u64>,
    pub warm_cache_ttl: Option<Duration>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size_bytes: 512 * 1024 * 1024,
            hot_cache_max_size_bytes: None,
            warm_cache_ttl: None,
        }
    }
}

/// `wal` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalSettings {
    pub enabled: bool,
    pub immediate_writes: bool,
    pub max_size_bytes: u64,
    pub checkpoint_interval: Duration,
    pub auto_recover: bool,
    pub max_retries: u32,
}

impl Default for WalSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            immediate_writes: true,
            max_size_bytes: 10 * 1024 * 1024,
            checkpoint_interval: Duration::from_secs(60),
            auto_recover: true,
            max_retries: 3,
        }
    }
}

/// `batching` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingSettings {
    pub enabled: bool,
    pub adaptive_mode: bool,
    pub immediate_threshold: usize,
    pub batch_threshold: usize,
    pub max_batch_size: usize,
    pub max_wait_time: Duration,
    pub priority_lanes: usize,
    pub memory_limit_bytes: u64,
}

impl Default for BatchingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            adaptive_mode: true,
            immediate_threshold: 1,
            batch_threshold: 5,
            max_batch_size: 1000,
            max_wait_time: Duration::from_millis(100),
            priority_lanes: 3,
            memory_limit_bytes: 100 * 1024 * 1024,
        }
    }
}

/// The full assembled configuration for one `GraphVectorDb` instance.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub hnsw: HnswSettings,
    pub storage: StorageSettings,
    pub cache: CacheSettings,
    pub wal: WalSettings,
    pub batching: BatchingSettings,
}

impl Settings {
    /// Load settings from defaults, an optional config file, and
    /// `GRAPHDB_`-prefixed environment variables — the same three-tier
    /// precedence the `config` crate is built for.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Settings::default()).map_err(|e| {
                CoreError::ConfigurationError(format!("default settings rejected: {e}"))
            })?);

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("GRAPHDB")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| CoreError::ConfigurationError(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| CoreError::ConfigurationError(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.hnsw.m == 0 {
            return Err(CoreError::ConfigurationError("hnsw.m must be > 0".into()));
        }
        if self.hnsw.quantization.rerank_multiplier < 1 {
            return Err(CoreError::ConfigurationError(
                "hnsw.quantization.rerank_multiplier must be >= 1".into(),
            ));
        }
        if matches!(self.storage.backend, StorageBackendKind::Filesystem)
            && self.storage.location.is_empty()
        {
            return Err(CoreError::ConfigurationError(
                "storage.location is required for the filesystem backend".into(),
            ));
        }
        Ok(())
    }
}
