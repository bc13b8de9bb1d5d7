//! Entity ("noun") and relationship ("verb") type definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Stable identifier for a noun or verb. The first two lowercase hex
/// characters select the storage shard.
pub type EntityId = Uuid;

/// Arbitrary, opaque per-entity metadata. The core never interprets these
/// values; type inference over them is an out-of-scope collaborator's job.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Closed enumeration of noun (entity) types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum NounType {
    Person,
    Organization,
    Location,
    Document,
    Event,
    Product,
    Task,
    Dataset,
    Thing,
}

impl NounType {
    pub const ALL: [NounType; 9] = [
        NounType::Person,
        NounType::Organization,
        NounType::Location,
        NounType::Document,
        NounType::Event,
        NounType::Product,
        NounType::Task,
        NounType::Dataset,
        NounType::Thing,
    ];
}

/// Closed enumeration of verb (relationship) types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum VerbType {
    Contains,
    Creates,
    MemberOf,
    DependsOn,
    References,
    RelatedTo,
}

impl VerbType {
    pub const ALL: [VerbType; 6] = [
        VerbType::Contains,
        VerbType::Creates,
        VerbType::MemberOf,
        VerbType::DependsOn,
        VerbType::References,
        VerbType::RelatedTo,
    ];
}

/// How a noun's vector is kept once it has been woven into the HNSW graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorStorageMode {
    /// Vector stays resident in RAM after insert.
    #[default]
    Memory,
    /// Vector is evicted after graph construction and reloaded through the
    /// unified cache on demand.
    Lazy,
}

/// Milliseconds since the Unix epoch, as persisted in JSON records.
pub type TimestampMs = i64;

/// Creation/update timestamps carried by every noun and verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

impl Timestamps {
    pub fn new(now_ms: TimestampMs) -> Self {
        Self {
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    pub fn touch(&mut self, now_ms: TimestampMs) {
        self.updated_at = now_ms;
    }
}

/// An entity ("noun") as stored by the core. The vector itself lives in the
/// HNSW node, not here — this is the metadata record persisted under
/// `entities/nouns/metadata/<shard>/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Noun {
    pub id: EntityId,
    #[serde(rename = "type")]
    pub noun_type: NounType,
    pub timestamps: Timestamps,
    pub confidence: Option<f32>,
    pub weight: Option<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Noun {
    pub fn new(id: EntityId, noun_type: NounType, now_ms: TimestampMs) -> Self {
        Self {
            id,
            noun_type,
            timestamps: Timestamps::new(now_ms),
            confidence: None,
            weight: None,
            metadata: Metadata::new(),
        }
    }
}

/// A typed, directional relationship ("verb") between two entities.
///
/// The relation vector is the arithmetic mean of its endpoints' vectors
/// unless the caller supplies one explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verb {
    pub id: EntityId,
    pub source_id: EntityId,
    pub target_id: EntityId,
    pub verb_type: VerbType,
    pub weight: f32,
    pub timestamps: Timestamps,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Verb {
    pub const DEFAULT_WEIGHT: f32 = 1.0;

    pub fn new(
        id: EntityId,
        source_id: EntityId,
        target_id: EntityId,
        verb_type: VerbType,
        now_ms: TimestampMs,
    ) -> Self {
        Self {
            id,
            source_id,
            target_id,
            verb_type,
            weight: Self::DEFAULT_WEIGHT,
            timestamps: Timestamps::new(now_ms),
            metadata: Metadata::new(),
        }
    }
}

/// Computes the relation vector for a verb: the componentwise mean of its
/// endpoint vectors. Both endpoints must share the same dimension.
pub fn mean_vector(a: &[f32], b: &[f32]) -> Vec<f32> {
    debug_assert_eq!(a.len(), b.len(), "endpoint vectors must share dimension");
    a.iter().zip(b.iter()).map(|(x, y)| (x + y) * 0.5).collect()
}

/// Lowercase first-two-hex-character shard for an id (256 shards, `00`-`ff`).
pub fn shard_of(id: &EntityId) -> String {
    let bytes = id.as_bytes();
    format!("{:02x}", bytes[0])
}
