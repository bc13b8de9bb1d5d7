//! Adaptive write batching: small writes get coalesced into storage-adapter
//! calls sized for the backend, while latency-sensitive call sites opt out
//! entirely via the refused-batching carve-outs.

use graphdb_core::{EntityId, Settings};
use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Write priority, highest first. Deletes jump the queue so a caller that
/// just deleted an entity never observes a queued save for the same id
/// land afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Add,
    Save,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub entity_id: EntityId,
    pub priority: Priority,
    pub payload: serde_json::Value,
    pub size_bytes: usize,
    pub queued_at: Instant,
}

impl PartialEq for PendingWrite {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.queued_at == other.queued_at
    }
}
impl Eq for PendingWrite {}
impl PartialOrd for PendingWrite {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PendingWrite {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; higher priority and older age pop first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.queued_at.cmp(&self.queued_at))
    }
}

/// Patterns that must never be coalesced: entities that behave like a
/// registry lookup (read-your-own-write expected immediately) and the
/// create-then-relate sequence, where a relate referencing a noun that's
/// still sitting in a batch would race the noun's own flush.
#[derive(Debug, Default, Clone)]
pub struct RefusedBatchingRegistry {
    registry_lookup_ids: HashSet<EntityId>,
    pending_creates: HashSet<EntityId>,
}

impl RefusedBatchingRegistry {
    pub fn mark_registry_lookup(&mut self, id: EntityId) {
        self.registry_lookup_ids.insert(id);
    }

    pub fn mark_pending_create(&mut self, id: EntityId) {
        self.pending_creates.insert(id);
    }

    pub fn clear_pending_create(&mut self, id: &EntityId) {
        self.pending_creates.remove(id);
    }

    fn should_bypass(&self, id: &EntityId, priority: Priority) -> bool {
        self.registry_lookup_ids.contains(id)
            || (priority != Priority::Add && self.pending_creates.contains(id))
    }
}

/// Outcome of submitting a write: either it must be applied immediately
/// (carve-out, threshold reached, or adaptive mode disabled), or it was
/// queued for a later coalesced flush.
pub enum SubmitOutcome {
    Immediate(PendingWrite),
    Queued,
    /// A full lane is returned for flushing; the caller is responsible for
    /// issuing the batched storage-adapter call.
    FlushLane(Vec<PendingWrite>),
}

struct Lanes {
    add: VecDeque<PendingWrite>,
    save: VecDeque<PendingWrite>,
    update: VecDeque<PendingWrite>,
    delete: VecDeque<PendingWrite>,
    memory_bytes: usize,
}

impl Lanes {
    fn new() -> Self {
        Self {
            add: VecDeque::new(),
            save: VecDeque::new(),
            update: VecDeque::new(),
            delete: VecDeque::new(),
            memory_bytes: 0,
        }
    }

    fn lane_mut(&mut self, priority: Priority) -> &mut VecDeque<PendingWrite> {
        match priority {
            Priority::Add => &mut self.add,
            Priority::Save => &mut self.save,
            Priority::Update => &mut self.update,
            Priority::Delete => &mut self.delete,
        }
    }

    fn total_len(&self) -> usize {
        self.add.len() + self.save.len() + self.update.len() + self.delete.len()
    }

    /// Drains the oldest-populated lane in priority order: delete, update,
    /// save, add — mirroring how writes are flushed, so memory pressure
    /// relief doesn't starve the highest-priority lane.
    fn drain_oldest_lane(&mut self) -> Vec<PendingWrite> {
        for lane in [&mut self.delete, &mut self.update, &mut self.save, &mut self.add] {
            if !lane.is_empty() {
                let drained: Vec<_> = lane.drain(..).collect();
                self.memory_bytes -= drained.iter().map(|w| w.size_bytes).sum::<usize>();
                return drained;
            }
        }
        Vec::new()
    }
}

/// Adaptive batcher driven by [`graphdb_core::BatchingSettings`]. Holds no
/// background task itself — callers drive flushing either off
/// `SubmitOutcome::FlushLane` or a periodic `drain_due()` poll tied to
/// `max_wait_time`.
pub struct AdaptiveBatcher {
    immediate_threshold: usize,
    batch_threshold: usize,
    max_wait_time: Duration,
    memory_limit_bytes: usize,
    adaptive_mode: bool,
    enabled: bool,
    lanes: Mutex<Lanes>,
    refused: Mutex<RefusedBatchingRegistry>,
}

impl AdaptiveBatcher {
    pub fn new(settings: &Settings) -> Self {
        let batching = &settings.batching;
        Self {
            immediate_threshold: batching.immediate_threshold,
            batch_threshold: batching.batch_threshold,
            max_wait_time: batching.max_wait_time,
            memory_limit_bytes: batching.memory_limit_bytes as usize,
            adaptive_mode: batching.adaptive_mode,
            enabled: batching.enabled,
            lanes: Mutex::new(Lanes::new()),
            refused: Mutex::new(RefusedBatchingRegistry::default()),
        }
    }

    pub fn refused_registry(&self) -> std::sync::MutexGuard<'_, RefusedBatchingRegistry> {
        self.refused.lock().unwrap()
    }

    pub fn submit(&self, write: PendingWrite) -> SubmitOutcome {
        if !self.enabled || self.refused.lock().unwrap().should_bypass(&write.entity_id, write.priority) {
            return SubmitOutcome::Immediate(write);
        }

        let mut lanes = self.lanes.lock().unwrap();
        if !self.adaptive_mode && lanes.total_len() + 1 <= self.immediate_threshold {
            return SubmitOutcome::Immediate(write);
        }

        lanes.memory_bytes += write.size_bytes;
        lanes.lane_mut(write.priority).push_back(write);

        if lanes.memory_bytes > self.memory_limit_bytes {
            debug!(
                memory_bytes = lanes.memory_bytes,
                limit = self.memory_limit_bytes,
                "batching memory ceiling exceeded, flushing oldest lane"
            );
            return SubmitOutcome::FlushLane(lanes.drain_oldest_lane());
        }

        for priority in [Priority::Delete, Priority::Update, Priority::Save, Priority::Add] {
            if lanes.lane_mut(priority).len() >= self.batch_threshold {
                let drained: Vec<_> = lanes.lane_mut(priority).drain(..).collect();
                lanes.memory_bytes -= drained.iter().map(|w| w.size_bytes).sum::<usize>();
                return SubmitOutcome::FlushLane(drained);
            }
        }

        SubmitOutcome::Queued
    }

    /// Called on a `max_wait_time` tick: flushes any lane holding writes
    /// older than the wait budget, even if it hasn't reached threshold.
    pub fn drain_due(&self) -> Vec<PendingWrite> {
        let mut lanes = self.lanes.lock().unwrap();
        let now = Instant::now();
        for priority in [Priority::Delete, Priority::Update, Priority::Save, Priority::Add] {
            let lane = lanes.lane_mut(priority);
            if let Some(front) = lane.front()
                && now.duration_since(front.queued_at) >= self.max_wait_time
            {
                let drained: Vec<_> = lane.drain(..).collect();
                lanes.memory_bytes -= drained.iter().map(|w| w.size_bytes).sum::<usize>();
                return drained;
            }
        }
        Vec::new()
    }

    pub fn drain_all(&self) -> Vec<PendingWrite> {
        let mut lanes = self.lanes.lock().unwrap();
        let mut all = Vec::new();
        for priority in [Priority::Delete, Priority::Update, Priority::Save, Priority::Add] {
            all.extend(lanes.lane_mut(priority).drain(..));
        }
        lanes.memory_bytes = 0;
        all
    }

    pub fn max_wait_time(&self) -> Duration {
        self.max_wait_time
    }
}
