//! HNSW index, SQ8 quantization, the unified cache, the relationship
//! overlay, in-memory statistics, and the `GraphVectorDb` facade that ties
//! them to `graphdb-storage`.

pub mod cache;
pub mod db;
pub mod distance;
pub mod error;
pub mod filter;
pub mod hnsw;
pub mod node;
pub mod overlay;
pub mod quantization;
pub mod stats;
pub mod types;

pub use cache::{CacheCategory, CacheKey, CacheStats, UnifiedCache};
pub use db::{AddNounRequest, GraphVectorDb};
pub use distance::DistanceMetric;
pub use error::{IndexError, Result};
pub use filter::{MetadataFilter, NodeFilter, candidate_id_filter};
pub use hnsw::{HnswConfig, HnswIndex, InsertOutcome};
pub use node::HnswNode;
pub use overlay::{RelateManyOptions, RelateManyOutcome, RelateProgress, RelateRequest, RelationshipOverlay};
pub use quantization::{QuantizedVector, approximate_distance};
pub use stats::Statistics;
pub use types::{AddManyOptions, AddManyOutcome, BulkProgress, SearchResult};
