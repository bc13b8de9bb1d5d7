//! The unified, process-wide cache: one cache shared across
//! vectors, graph/metadata records, and relationships, with cost-aware
//! eviction and single-flight coalescing so concurrent misses on the same
//! key trigger exactly one loader call.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use graphdb_core::EntityId;

/// The three kinds of payload the shared cache holds. Categories only
/// disambiguate keys that would otherwise collide on `id` (a noun and a
/// verb can share a UUID) — entries across all three compete for the same
/// size budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    Vector,
    Graph,
    Relationship,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub category: CacheCategory,
    pub id: EntityId,
}

impl CacheKey {
    pub fn vector(id: EntityId) -> Self {
        Self { category: CacheCategory::Vector, id }
    }

    pub fn graph(id: EntityId) -> Self {
        Self { category: CacheCategory::Graph, id }
    }

    pub fn relationship(id: EntityId) -> Self {
        Self { category: CacheCategory::Relationship, id }
    }
}

#[derive(Clone)]
struct Entry<V> {
    value: V,
    size_bytes: u64,
    /// Relative rebuild cost hint: how expensive a cache miss on this key
    /// is to repair (e.g. a high-level HNSW node costs more to rebuild than
    /// a leaf), used alongside recency in eviction scoring.
    rebuild_cost: u32,
    last_access: u64,
}

struct Shard<V> {
    entries: HashMap<CacheKey, Entry<V>>,
    size_bytes: u64,
}

impl<V> Default for Shard<V> {
    fn default() -> Self {
        Self { entries: HashMap::new(), size_bytes: 0 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub coalesced_waits: u64,
    pub size_bytes: u64,
}

struct StatsInner {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    coalesced_waits: AtomicU64,
}

impl Default for StatsInner {
    fn default() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            coalesced_waits: AtomicU64::new(0),
        }
    }
}

/// Single-flight in-flight marker: concurrent misses on the same key await
/// the same `Notify` instead of each calling the loader.
struct InFlight {
    notify: Arc<Notify>,
}

/// A single process-wide cache over opaque cloneable values `V` (vectors,
/// metadata blobs, relationship records — whatever the caller stores under
/// a [`CacheKey`]).
pub struct UnifiedCache<V: Clone + Send + Sync + 'static> {
    shard: Mutex<Shard<V>>,
    in_flight: Mutex<HashMap<CacheKey, InFlight>>,
    max_size_bytes: u64,
    clock: AtomicU64,
    stats: StatsInner,
}

impl<V: Clone + Send + Sync + 'static> UnifiedCache<V> {
    pub fn new(max_size_bytes: u64) -> Self {
        Self {
            shard: Mutex::new(Shard::default()),
            in_flight: Mutex::new(HashMap::new()),
            max_size_bytes,
            clock: AtomicU64::new(0),
            stats: StatsInner::default(),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, AtomicOrdering::Relaxed)
    }

    /// Synchronous, non-coalescing lookup for latency-sensitive paths that
    /// cannot await.
    /// Never triggers a load; returns `None` on a miss.
    pub fn get_sync(&self, key: &CacheKey) -> Option<V> {
        let mut shard = self.shard.lock();
        let tick = self.tick();
        if let Some(entry) = shard.entries.get_mut(key) {
            entry.last_access = tick;
            self.stats.hits.fetch_add(1, AtomicOrdering::Relaxed);
            Some(entry.value.clone())
        } else {
            self.stats.misses.fetch_add(1, AtomicOrdering::Relaxed);
            None
        }
    }

    /// Coalesced async lookup: on a miss, exactly one concurrent caller
    /// runs `loader`; the rest await its `Notify` and then re-check the
    /// cache.
    pub async fn get<F, Fut>(&self, key: CacheKey, size_bytes: u64, rebuild_cost: u32, loader: F) -> Option<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<V>>,
    {
        if let Some(v) = self.get_sync(&key) {
            return Some(v);
        }

        let notify = {
            let mut in_flight = self.in_flight.lock();
            if let Some(existing) = in_flight.get(&key) {
                Some(existing.notify.clone())
            } else {
                in_flight.insert(key.clone(), InFlight { notify: Arc::new(Notify::new()) });
                None
            }
        };

        if let Some(notify) = notify {
            self.stats.coalesced_waits.fetch_add(1, AtomicOrdering::Relaxed);
            notify.notified().await;
            return self.get_sync(&key);
        }

        let loaded = loader().await;
        if let Some(value) = &loaded {
            self.set(key.clone(), value.clone(), size_bytes, rebuild_cost);
        }

        let notify = self.in_flight.lock().remove(&key).map(|f| f.notify);
        if let Some(notify) = notify {
            notify.notify_waiters();
        }

        loaded
    }

    pub fn set(&self, key: CacheKey, value: V, size_bytes: u64, rebuild_cost: u32) {
        let tick = self.tick();
        let mut shard = self.shard.lock();
        if let Some(old) = shard.entries.insert(
            key,
            Entry { value, size_bytes, rebuild_cost, last_access: tick },
        ) {
            shard.size_bytes = shard.size_bytes.saturating_sub(old.size_bytes);
        }
        shard.size_bytes += size_bytes;
        self.evict_to_budget(&mut shard);
    }

    pub fn invalidate(&self, key: &CacheKey) {
        let mut shard = self.shard.lock();
        if let Some(old) = shard.entries.remove(key) {
            shard.size_bytes = shard.size_bytes.saturating_sub(old.size_bytes);
        }
    }

    /// Cost-aware eviction: score = recency gap × size ÷ rebuild cost, so a
    /// large, stale, cheap-to-rebuild entry goes first and a small, hot,
    /// expensive-to-rebuild entry (e.g. a high-level HNSW node) survives
    /// longer.
    fn evict_to_budget(&self, shard: &mut Shard<V>) {
        let now = self.clock.load(AtomicOrdering::Relaxed);
        while shard.size_bytes > self.max_size_bytes && !shard.entries.is_empty() {
            let worst = shard
                .entries
                .iter()
                .map(|(k, e)| {
                    let age = now.saturating_sub(e.last_access).max(1);
                    let score = (age as f64 * e.size_bytes as f64) / e.rebuild_cost.max(1) as f64;
                    (k.clone(), score)
                })
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            let Some((key, _)) = worst else { break };
            if let Some(entry) = shard.entries.remove(&key) {
                shard.size_bytes = shard.size_bytes.saturating_sub(entry.size_bytes);
            }
            self.stats.evictions.fetch_add(1, AtomicOrdering::Relaxed);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let shard = self.shard.lock();
        CacheStats {
            hits: self.stats.hits.load(AtomicOrdering::Relaxed),
            misses: self.stats.misses.load(AtomicOrdering::Relaxed),
            evictions: self.stats.evictions.load(AtomicOrdering::Relaxed),
            coalesced_waits: self.stats.coalesced_waits.load(AtomicOrdering::Relaxed),
            size_bytes: shard.size_bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.shard.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    #[tokio::test]
    async fn get_caches_loader_result() {
        let cache: UnifiedCache<Vec<f32>> = UnifiedCache::new(1_000_000);
        let key = CacheKey::vector(Uuid::new_v4());
        let v = cache.get(key.clone(), 16, 1, || async { Some(vec![1.0, 2.0]) }).await;
        assert_eq!(v, Some(vec![1.0, 2.0]));
        assert_eq!(cache.get_sync(&key), Some(vec![1.0, 2.0]));
    }

    #[tokio::test]
    async fn concurrent_misses_on_same_key_coalesce_to_one_load() {
        let cache = Arc::new(UnifiedCache::<Vec<f32>>::new(1_000_000));
        let key = CacheKey::vector(Uuid::new_v4());
        let load_count = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let key = key.clone();
            let load_count = load_count.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get(key, 8, 1, || async {
                        load_count.fetch_add(1, AtomicOrdering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                        Some(vec![42.0])
                    })
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), Some(vec![42.0]));
        }
        assert_eq!(load_count.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn eviction_keeps_size_under_budget() {
        let cache: UnifiedCache<Vec<f32>> = UnifiedCache::new(100);
        for i in 0..20u32 {
            cache.set(CacheKey::vector(Uuid::new_v4()), vec![i as f32], 16, 1);
        }
        assert!(cache.stats().size_bytes <= 100);
        assert!(cache.stats().evictions > 0);
    }

    #[test]
    fn invalidate_removes_entry_and_frees_size() {
        let cache: UnifiedCache<Vec<f32>> = UnifiedCache::new(1_000);
        let key = CacheKey::graph(Uuid::new_v4());
        cache.set(key.clone(), vec![1.0], 32, 1);
        assert_eq!(cache.get_sync(&key), Some(vec![1.0]));
        cache.invalidate(&key);
        assert_eq!(cache.get_sync(&key), None);
        assert_eq!(cache.stats().size_bytes, 0);
    }
}
