//! Per-entity-type write coalescing: repeated writes to the same id before
//! a flush collapse into the latest value, so a hot-looping update doesn't
//! multiply storage-adapter calls.

use graphdb_core::EntityId;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

/// A coalescing buffer keyed by entity id. `upsert` overwrites any pending
/// value for the same id; `drain` hands the whole buffer to the caller
/// atomically.
pub struct WriteBuffer<T> {
    pending: Mutex<HashMap<EntityId, T>>,
    notify: Notify,
}

impl<T> Default for WriteBuffer<T> {
    fn default() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        }
    }
}

impl<T> WriteBuffer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, id: EntityId, value: T) {
        self.pending.lock().unwrap().insert(id, value);
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn drain(&self) -> Vec<(EntityId, T)> {
        self.pending.lock().unwrap().drain().collect()
    }

    async fn wait_for_write(&self) {
        self.notify.notified().await;
    }
}

/// Spawns a background task that flushes `buffer` on `interval`, calling
/// `flush` with whatever was pending. Returns the task handle so callers
/// can abort it on shutdown.
pub fn spawn_background_flusher<T, F, Fut>(
    buffer: std::sync::Arc<WriteBuffer<T>>,
    interval: Duration,
    mut flush: F,
) -> JoinHandle<()>
where
    T: Send + 'static,
    F: FnMut(Vec<(EntityId, T)>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = buffer.wait_for_write() => {
                    // Coalesce further arrivals within one tick before draining.
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
            let batch = buffer.drain();
            if !batch.is_empty() {
                debug!(count = batch.len(), "flushing write buffer");
                flush(batch).await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    #[test]
    fn upsert_overwrites_pending_value_for_same_id() {
        let buffer: WriteBuffer<i32> = WriteBuffer::new();
        let id = Uuid::new_v4();
        buffer.upsert(id, 1);
        buffer.upsert(id, 2);
        assert_eq!(buffer.len(), 1);
        let drained = buffer.drain();
        assert_eq!(drained[0].1, 2);
    }

    #[tokio::test]
    async fn background_flusher_eventually_drains_pending_writes() {
        let buffer = Arc::new(WriteBuffer::<i32>::new());
        let flushed = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let flushed2 = Arc::clone(&flushed);
        let handle = spawn_background_flusher(Arc::clone(&buffer), Duration::from_millis(20), move |batch| {
            let flushed = Arc::clone(&flushed2);
            async move {
                flushed.lock().await.extend(batch);
            }
        });

        buffer.upsert(Uuid::new_v4(), 42);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(flushed.lock().await.len(), 1);
        handle.abort();
    }
}
