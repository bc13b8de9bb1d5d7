//! In-memory authoritative statistics, periodically snapshot
//! to [`CountsRecord`]/[`StatisticsRecord`] for persistence. The in-memory
//! counters are the source of truth between snapshots; storage only ever
//! sees a point-in-time view, one reason `CountsRecord::merge` (used during
//! shard migration) takes the max of each counter rather than trusting
//! either side outright.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::RwLock;

use graphdb_core::{NounType, VerbType};
use graphdb_storage::{CountsRecord, StatisticsRecord};

/// Authoritative, process-wide counters. Cheap to update from hot paths
/// (`AtomicU64` for the scalar totals, an `RwLock<HashMap>` for the
/// per-type breakdowns since those change far less often than they're
/// read).
#[derive(Default)]
pub struct Statistics {
    total_noun_count: AtomicU64,
    total_verb_count: AtomicU64,
    total_bytes: AtomicU64,
    hnsw_node_count: AtomicU64,
    entity_counts: RwLock<HashMap<String, u64>>,
    verb_counts: RwLock<HashMap<String, u64>>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_noun_added(&self, noun_type: NounType, approx_bytes: u64) {
        self.total_noun_count.fetch_add(1, Ordering::Relaxed);
        self.hnsw_node_count.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(approx_bytes, Ordering::Relaxed);
        *self.entity_counts.write().entry(noun_type_key(noun_type)).or_insert(0) += 1;
    }

    pub fn record_noun_removed(&self, noun_type: NounType, approx_bytes: u64) {
        self.total_noun_count.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1))).ok();
        self.hnsw_node_count.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1))).ok();
        self.total_bytes.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(approx_bytes))).ok();
        if let Some(count) = self.entity_counts.write().get_mut(&noun_type_key(noun_type)) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn record_verb_added(&self, verb_type: VerbType) {
        self.total_verb_count.fetch_add(1, Ordering::Relaxed);
        *self.verb_counts.write().entry(verb_type_key(verb_type)).or_insert(0) += 1;
    }

    pub fn record_verb_removed(&self, verb_type: VerbType) {
        self.total_verb_count.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1))).ok();
        if let Some(count) = self.verb_counts.write().get_mut(&verb_type_key(verb_type)) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn total_noun_count(&self) -> u64 {
        self.total_noun_count.load(Ordering::Relaxed)
    }

    pub fn total_verb_count(&self) -> u64 {
        self.total_verb_count.load(Ordering::Relaxed)
    }

    /// Point-in-time snapshot used for the periodic/shutdown write to
    /// `system/counts.json`.
    pub fn to_counts_record(&self) -> CountsRecord {
        CountsRecord {
            total_noun_count: self.total_noun_count.load(Ordering::Relaxed),
            total_verb_count: self.total_verb_count.load(Ordering::Relaxed),
            entity_counts: self.entity_counts.read().clone(),
            verb_counts: self.verb_counts.read().clone(),
            last_updated: Utc::now().to_rfc3339(),
        }
    }

    /// Point-in-time snapshot for `system/statistics.json`.
    pub fn to_statistics_record(&self) -> StatisticsRecord {
        StatisticsRecord {
            total_noun_count: self.total_noun_count.load(Ordering::Relaxed),
            total_verb_count: self.total_verb_count.load(Ordering::Relaxed),
            entity_counts: self.entity_counts.read().clone(),
            verb_counts: self.verb_counts.read().clone(),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            hnsw_node_count: self.hnsw_node_count.load(Ordering::Relaxed),
            last_updated: Utc::now().to_rfc3339(),
        }
    }

    /// Restores counters from a persisted record, e.g. on process start
    /// after a clean shutdown (not a migration merge — that's
    /// `CountsRecord::merge`, applied before this is called).
    pub fn restore_from(&self, record: &CountsRecord) {
        self.total_noun_count.store(record.total_noun_count, Ordering::Relaxed);
        self.total_verb_count.store(record.total_verb_count, Ordering::Relaxed);
        *self.entity_counts.write() = record.entity_counts.clone();
        *self.verb_counts.write() = record.verb_counts.clone();
    }
}

fn noun_type_key(noun_type: NounType) -> String {
    serde_json::to_value(noun_type)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "Thing".to_string())
}

fn verb_type_key(verb_type: VerbType) -> String {
    serde_json::to_value(verb_type)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "RelatedTo".to_string())
}
