//! Persisted JSON record shapes and the object-key layout
//! that every `StorageAdapter` implementation must agree on
//! bit-for-bit.

use graphdb_core::{EntityId, Metadata, NounType, TimestampMs, VerbType, shard_of};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `entities/nouns/vectors/<shard>/<id>.json` — vector + level + connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NounVectorRecord {
    pub id: EntityId,
    pub vector: Vec<f32>,
    /// Level (as a string key) -> neighbor ids.
    pub connections: HashMap<String, Vec<EntityId>>,
    pub level: usize,
}

/// `entities/nouns/metadata/<shard>/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NounMetadataRecord {
    #[serde(rename = "type")]
    pub noun_type: NounType,
    #[serde(rename = "createdAt")]
    pub created_at: TimestampMs,
    #[serde(rename = "updatedAt")]
    pub updated_at: TimestampMs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default)]
    pub data: Metadata,
}

/// `entities/verbs/vectors/<shard>/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerbVectorRecord {
    pub id: EntityId,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub connections: HashMap<String, Vec<EntityId>>,
    pub verb: VerbType,
    #[serde(rename = "sourceId")]
    pub source_id: EntityId,
    #[serde(rename = "targetId")]
    pub target_id: EntityId,
}

/// `entities/verbs/metadata/<shard>/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerbMetadataRecord {
    pub weight: f32,
    #[serde(rename = "createdAt")]
    pub created_at: TimestampMs,
    #[serde(rename = "updatedAt")]
    pub updated_at: TimestampMs,
    #[serde(default)]
    pub data: Metadata,
}

/// `system/hnsw-system.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HnswSystemRecord {
    #[serde(rename = "entryPointId")]
    pub entry_point_id: Option<EntityId>,
    #[serde(rename = "maxLevel")]
    pub max_level: usize,
}

/// `system/counts.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CountsRecord {
    #[serde(rename = "totalNounCount")]
    pub total_noun_count: u64,
    #[serde(rename = "totalVerbCount")]
    pub total_verb_count: u64,
    #[serde(rename = "entityCounts")]
    pub entity_counts: HashMap<String, u64>,
    #[serde(rename = "verbCounts")]
    pub verb_counts: HashMap<String, u64>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: String,
}

impl CountsRecord {
    /// Merge during migration: max of each counter, latest timestamp.
    pub fn merge(&self, other: &CountsRecord) -> CountsRecord {
        let mut entity_counts = self.entity_counts.clone();
        for (k, v) in &other.entity_counts {
            let slot = entity_counts.entry(k.clone()).or_insert(0);
            *slot = (*slot).max(*v);
        }
        let mut verb_counts = self.verb_counts.clone();
        for (k, v) in &other.verb_counts {
            let slot = verb_counts.entry(k.clone()).or_insert(0);
            *slot = (*slot).max(*v);
        }
        CountsRecord {
            total_noun_count: self.total_noun_count.max(other.total_noun_count),
            total_verb_count: self.total_verb_count.max(other.total_verb_count),
            entity_counts,
            verb_counts,
            last_updated: if other.last_updated > self.last_updated {
                other.last_updated.clone()
            } else {
                self.last_updated.clone()
            },
        }
    }
}

/// `system/statistics.json` — aggregate stats beyond raw counts.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StatisticsRecord {
    #[serde(rename = "totalNounCount")]
    pub total_noun_count: u64,
    #[serde(rename = "totalVerbCount")]
    pub total_verb_count: u64,
    #[serde(rename = "entityCounts")]
    pub entity_counts: HashMap<String, u64>,
    #[serde(rename = "verbCounts")]
    pub verb_counts: HashMap<String, u64>,
    #[serde(rename = "totalBytes")]
    pub total_bytes: u64,
    #[serde(rename = "hnswNodeCount")]
    pub hnsw_node_count: u64,
    #[serde(rename = "lastUpdated")]
    pub last_updated: String,
}

/// Key-space prefixes, exactly as specified.
pub mod prefix {
    pub const NOUN_VECTORS: &str = "entities/nouns/vectors";
    pub const NOUN_HNSW: &str = "entities/nouns/hnsw";
    pub const NOUN_METADATA: &str = "entities/nouns/metadata";
    pub const VERB_VECTORS: &str = "entities/verbs/vectors";
    pub const VERB_METADATA: &str = "entities/verbs/metadata";
    pub const SYSTEM_HNSW: &str = "system/hnsw-system.json";
    pub const SYSTEM_COUNTS: &str = "system/counts.json";
    pub const SYSTEM_STATISTICS: &str = "system/statistics.json";
    pub const WAL: &str = "wal";
}

/// Builds the sharded object key for an entity under a given prefix, e.g.
/// `entities/nouns/vectors/ab/<id>.json`.
pub fn sharded_key(prefix_path: &str, id: &EntityId) -> String {
    format!("{}/{}/{}.json", prefix_path, shard_of(id), id)
}

/// All 256 two-hex-character shard labels, in iteration order `00..=ff`.
pub fn all_shards() -> impl Iterator<Item = String> {
    (0u16..256).map(|b| format!("{:02x}", b))
}
