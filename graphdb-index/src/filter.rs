//! Metadata and ID-set predicates used to restrict `search`. A filter is
//! resolved to a plain predicate over `EntityId` before it reaches the HNSW
//! layer — the graph never sees the metadata shape that produced it, only
//! whether a given id passes.

use std::collections::HashMap;
use std::sync::Arc;

use graphdb_core::{EntityId, Metadata};
use serde_json::Value;

/// A resolved predicate over node ids, cheap to clone (an `Arc` around the
/// closure) since `search_layer` threads it through every recursive call.
pub type NodeFilter = Arc<dyn Fn(&EntityId) -> bool + Send + Sync>;

/// Equality/membership constraints against a noun's metadata object,
/// evaluated against a caller-supplied metadata lookup to produce a
/// [`NodeFilter`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    equals: HashMap<String, Value>,
    one_of: HashMap<String, Vec<Value>>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `metadata[field] == value`.
    pub fn equals(mut self, field: impl Into<String>, value: Value) -> Self {
        self.equals.insert(field.into(), value);
        self
    }

    /// Require `metadata[field]` to be one of `values`.
    pub fn one_of(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.one_of.insert(field.into(), values);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_empty() && self.one_of.is_empty()
    }

    fn matches(&self, metadata: &Metadata) -> bool {
        for (field, expected) in &self.equals {
            match metadata.get(field) {
                Some(actual) if actual == expected => {}
                _ => return false,
            }
        }
        for (field, options) in &self.one_of {
            match metadata.get(field) {
                Some(actual) if options.contains(actual) => {}
                _ => return false,
            }
        }
        true
    }

    /// Resolves this filter into a [`NodeFilter`] given a synchronous
    /// metadata lookup (backed by the unified cache's `getSync`, so the
    /// HNSW traversal never awaits mid-search).
    pub fn into_node_filter(self, lookup: impl Fn(&EntityId) -> Option<Metadata> + Send + Sync + 'static) -> NodeFilter {
        Arc::new(move |id: &EntityId| match lookup(id) {
            Some(metadata) => self.matches(&metadata),
            None => false,
        })
    }
}

/// Restricts search to a precomputed set of candidate ids, bypassing
/// metadata lookups entirely.
pub fn candidate_id_filter(ids: std::collections::HashSet<EntityId>) -> NodeFilter {
    Arc::new(move |id: &EntityId| ids.contains(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn metadata(pairs: &[(&str, Value)]) -> Metadata {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn equals_filter_rejects_mismatched_field() {
        let filter = MetadataFilter::new().equals("status", json!("active"));
        let md = metadata(&[("status", json!("archived"))]);
        assert!(!filter.matches(&md));
    }

    #[test]
    fn one_of_filter_accepts_any_listed_value() {
        let filter = MetadataFilter::new().one_of("tier", vec![json!("gold"), json!("platinum")]);
        let md = metadata(&[("tier", json!("gold"))]);
        assert!(filter.matches(&md));
    }

    #[test]
    fn missing_field_fails_both_filter_kinds() {
        let filter = MetadataFilter::new().equals("status", json!("active"));
        let md = metadata(&[]);
        assert!(!filter.matches(&md));
    }

    #[test]
    fn candidate_id_filter_only_admits_listed_ids() {
        let allowed = Uuid::new_v4();
        let rejected = Uuid::new_v4();
        let mut set = std::collections::HashSet::new();
        set.insert(allowed);
        let filter = candidate_id_filter(set);
        assert!(filter(&allowed));
        assert!(!filter(&rejected));
    }
}
