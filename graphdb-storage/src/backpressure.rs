//! Weighted admission control for concurrent writes: callers request a
//! permission slot sized by the write's cost before starting it, and
//! release it once the write settles. Keeps total in-flight weight under
//! the configured ceiling instead of just counting requests.

use graphdb_core::{CoreError, EntityId, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

struct State {
    in_flight: HashMap<EntityId, u64>,
    total_weight: u64,
}

/// Weighted `requestPermission`/`releasePermission` controller. A request
/// that would push `total_weight` past `capacity` is
/// refused with `Throttled` rather than queued — callers are expected to
/// retry after a short backoff.
pub struct BackpressureController {
    capacity: u64,
    state: Mutex<State>,
}

impl BackpressureController {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            state: Mutex::new(State {
                in_flight: HashMap::new(),
                total_weight: 0,
            }),
        }
    }

    pub fn request_permission(&self, id: EntityId, weight: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.total_weight + weight > self.capacity {
            return Err(CoreError::Throttled(format!(
                "backpressure capacity exceeded: {} + {weight} > {}",
                state.total_weight, self.capacity
            )));
        }
        state.total_weight += weight;
        state.in_flight.insert(id, weight);
        Ok(())
    }

    /// Releases the slot held for `id`. `success = false` is logged but
    /// otherwise treated the same as `true` — the caller already knows the
    /// write failed and is responsible for any retry; this just frees
    /// capacity for the next one.
    pub fn release_permission(&self, id: &EntityId, success: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(weight) = state.in_flight.remove(id) {
            state.total_weight = state.total_weight.saturating_sub(weight);
        }
        if !success {
            warn!(%id, "released backpressure permission for a failed write");
        }
    }

    pub fn current_weight(&self) -> u64 {
        self.state.lock().unwrap().total_weight
    }
}
