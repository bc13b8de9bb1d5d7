//! Write-ahead log: durability for operations that haven't reached the
//! storage adapter yet. Entries are appended as newline-delimited JSON,
//! rotated by size, and replayed on startup when the last shutdown was
//! unclean. Each entry tracks its own `pending`/`completed`/`failed`
//! status by operation id, so recovery only re-runs work that never
//! finished rather than blindly replaying the whole log.

use graphdb_core::{CoreError, EntityId, Metadata, NounType, Result, TimestampMs, VerbType, now_ms};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A vector payload as it appears in the log. Large vectors are redacted to
/// their length only, matching the log's general rule that bulky payloads
/// become placeholders; vectors short enough to be a typical embedding
/// round-trip inline so crash recovery can still reinsert them exactly.
const INLINE_VECTOR_LIMIT: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactedVector {
    pub len: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f32>>,
}

impl RedactedVector {
    pub fn new(vector: &[f32]) -> Self {
        if vector.len() <= INLINE_VECTOR_LIMIT {
            Self { len: vector.len(), values: Some(vector.to_vec()) }
        } else {
            Self { len: vector.len(), values: None }
        }
    }

    /// `None` when the vector was redacted and can't be replayed exactly;
    /// the caller must treat this operation as unrecoverable and fail it.
    pub fn into_vector(self) -> Option<Vec<f32>> {
        self.values
    }
}

/// Every operation kind the log can carry. Replay must handle all five —
/// an earlier draft of this log only replayed inserts, which silently
/// dropped in-flight deletes and relates across a crash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum WalOperation {
    InsertNoun {
        id: EntityId,
        vector: RedactedVector,
        noun_type: NounType,
        metadata: Metadata,
    },
    UpdateNoun {
        id: EntityId,
        vector: Option<RedactedVector>,
        metadata: Option<Metadata>,
    },
    DeleteNoun {
        id: EntityId,
    },
    Relate {
        id: EntityId,
        source_id: EntityId,
        target_id: EntityId,
        vector: Option<RedactedVector>,
        verb: VerbType,
        weight: f32,
    },
    Unrelate {
        id: EntityId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WalStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub sequence: u64,
    #[serde(rename = "operationId")]
    pub operation_id: u64,
    pub timestamp: TimestampMs,
    /// `None` on a `complete`/`fail` entry written after the operation's
    /// own `begin` entry — the params only need to be logged once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<WalOperation>,
    pub status: WalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "checkpointId", skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<u64>,
}

struct Inner {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    size_bytes: u64,
    next_sequence: u64,
    checkpoint_id: u64,
}

/// Append-only log rotated by `max_size_bytes` and checkpointed on an
/// interval. `immediate_writes = true` fsyncs every append (durability
/// first); `false` lets writes buffer in the OS page cache (lower
/// latency, a narrow crash window).
pub struct WriteAheadLog {
    dir: PathBuf,
    max_size_bytes: u64,
    immediate_writes: bool,
    inner: Mutex<Inner>,
    /// Set while replaying on startup, so the coordinator driving replay
    /// doesn't re-log the operations it's re-applying.
    is_recovering: Arc<std::sync::atomic::AtomicBool>,
}

impl WriteAheadLog {
    pub async fn open(dir: impl Into<PathBuf>, max_size_bytes: u64, immediate_writes: bool) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let path = Self::active_path(&dir);
        let (file, size_bytes) = Self::open_append(&path).await?;
        Ok(Self {
            dir,
            max_size_bytes,
            immediate_writes,
            inner: Mutex::new(Inner {
                path,
                file: Some(file),
                size_bytes,
                next_sequence: 1,
                checkpoint_id: 0,
            }),
            is_recovering: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        })
    }

    fn active_path(dir: &Path) -> PathBuf {
        dir.join("wal.log")
    }

    async fn open_append(path: &Path) -> Result<(tokio::fs::File, u64)> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let size = file.metadata().await?.len();
        Ok((file, size))
    }

    pub fn is_recovering(&self) -> bool {
        self.is_recovering.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Logs the start of an operation and returns its id (the entry's own
    /// sequence number). A no-op returning `0` while recovering — the
    /// operation being replayed is already on the log, and re-logging it
    /// would duplicate work on the next crash.
    pub async fn begin(&self, operation: WalOperation) -> Result<u64> {
        if self.is_recovering() {
            return Ok(0);
        }
        let entry = self
            .write_entry(|sequence| WalEntry {
                sequence,
                operation_id: sequence,
                timestamp: now_ms(),
                operation: Some(operation),
                status: WalStatus::Pending,
                error: None,
                checkpoint_id: None,
            })
            .await?;
        Ok(entry)
    }

    /// Marks `operation_id` completed. A no-op for `0` (recovery) or while
    /// recovering.
    pub async fn complete(&self, operation_id: u64) -> Result<()> {
        if operation_id == 0 || self.is_recovering() {
            return Ok(());
        }
        self.write_entry(|sequence| WalEntry {
            sequence,
            operation_id,
            timestamp: now_ms(),
            operation: None,
            status: WalStatus::Completed,
            error: None,
            checkpoint_id: None,
        })
        .await?;
        Ok(())
    }

    /// Marks `operation_id` failed with `error`. `Failed` is terminal:
    /// recovery never replays it again.
    pub async fn fail(&self, operation_id: u64, error: impl Into<String>) -> Result<()> {
        if operation_id == 0 || self.is_recovering() {
            return Ok(());
        }
        self.write_entry(|sequence| WalEntry {
            sequence,
            operation_id,
            timestamp: now_ms(),
            operation: None,
            status: WalStatus::Failed,
            error: Some(error.into()),
            checkpoint_id: None,
        })
        .await?;
        Ok(())
    }

    async fn write_entry(&self, build: impl FnOnce(u64) -> WalEntry) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        let entry = build(sequence);
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        if inner.size_bytes + line.len() as u64 > self.max_size_bytes {
            self.rotate_locked(&mut inner).await?;
        }

        let file = inner.file.as_mut().expect("wal file open");
        file.write_all(&line).await?;
        if self.immediate_writes {
            file.sync_data().await?;
        }
        inner.size_bytes += line.len() as u64;
        Ok(entry.operation_id)
    }

    async fn rotate_locked(&self, inner: &mut Inner) -> Result<()> {
        if let Some(mut file) = inner.file.take() {
            file.flush().await?;
        }
        let rotated = self
            .dir
            .join(format!("wal-{}.log", now_ms()));
        tokio::fs::rename(&inner.path, &rotated).await?;
        info!(path = %rotated.display(), "rotated write-ahead log");
        let (file, _) = Self::open_append(&inner.path).await?;
        inner.file = Some(file);
        inner.size_bytes = 0;
        Ok(())
    }

    /// Writes a `CHECKPOINT` marker recording how many operations have been
    /// durably applied, then deletes rotated segments — replay never needs
    /// to look behind a checkpoint.
    pub async fn checkpoint(&self, operation_count: u64) -> Result<u64> {
        let checkpoint_id = {
            let mut inner = self.inner.lock().await;
            inner.checkpoint_id += 1;
            let id = inner.checkpoint_id;
            let sequence = inner.next_sequence;
            inner.next_sequence += 1;
            let entry = WalEntry {
                sequence,
                operation_id: 0,
                timestamp: now_ms(),
                operation: None,
                status: WalStatus::Completed,
                error: None,
                checkpoint_id: Some(id),
            };
            let mut line = serde_json::to_vec(&entry)?;
            line.push(b'\n');
            if inner.size_bytes + line.len() as u64 > self.max_size_bytes {
                self.rotate_locked(&mut inner).await?;
            }
            let file = inner.file.as_mut().expect("wal file open");
            file.write_all(&line).await?;
            if self.immediate_writes {
                file.sync_data().await?;
            }
            inner.size_bytes += line.len() as u64;
            id
        };

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut rotated = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("wal-") && name.ends_with(".log") {
                rotated.push(entry.path());
            }
        }
        for path in rotated {
            tokio::fs::remove_file(&path).await?;
        }
        debug!(operation_count, checkpoint_id, "write-ahead log checkpoint complete");
        Ok(checkpoint_id)
    }

    /// Reduces the log to each operation id's latest status, replays every
    /// id still `Pending` with a recorded operation (in id order), and
    /// marks each completed or failed based on the replay outcome. Sets
    /// `is_recovering` for the duration so the `apply` callback's own
    /// writes (made through the normal `begin`/`complete` API) don't
    /// re-log work that's already on this replay pass.
    pub async fn recover<F, Fut>(&self, mut apply: F) -> Result<usize>
    where
        F: FnMut(WalOperation) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        self.is_recovering
            .store(true, std::sync::atomic::Ordering::Release);
        let result = self.recover_inner(&mut apply).await;
        self.is_recovering
            .store(false, std::sync::atomic::Ordering::Release);
        result
    }

    async fn recover_inner<F, Fut>(&self, apply: &mut F) -> Result<usize>
    where
        F: FnMut(WalOperation) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let mut segments = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("wal-") && name.ends_with(".log") {
                segments.push(entry.path());
            }
        }
        segments.sort();
        segments.push(Self::active_path(&self.dir));

        let mut all_entries: Vec<WalEntry> = Vec::new();
        for segment in &segments {
            let file = match tokio::fs::File::open(segment).await {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(CoreError::Io(e)),
            };
            let mut lines = tokio::io::BufReader::new(file).lines();
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<WalEntry>(&line) {
                    Ok(entry) => all_entries.push(entry),
                    Err(e) => {
                        warn!(error = %e, segment = %segment.display(), "skipping corrupt wal line");
                    }
                }
            }
        }
        all_entries.sort_by_key(|e| e.sequence);

        // Reduce to the latest-seen status and operation payload per id.
        let mut by_id: HashMap<u64, (Option<WalOperation>, WalStatus)> = HashMap::new();
        for entry in all_entries {
            if entry.checkpoint_id.is_some() {
                continue;
            }
            let slot = by_id.entry(entry.operation_id).or_insert((None, WalStatus::Pending));
            if entry.operation.is_some() {
                slot.0 = entry.operation;
            }
            slot.1 = entry.status;
        }

        let mut unfinished: Vec<(u64, WalOperation)> = by_id
            .into_iter()
            .filter_map(|(id, (op, status))| match (op, status) {
                (Some(op), WalStatus::Pending) => Some((id, op)),
                _ => None,
            })
            .collect();
        unfinished.sort_by_key(|(id, _)| *id);

        let mut applied = 0usize;
        for (operation_id, operation) in unfinished {
            match apply(operation).await {
                Ok(()) => {
                    self.complete(operation_id).await?;
                    applied += 1;
                }
                Err(e) => {
                    warn!(operation_id, error = %e, "replayed operation failed, marking failed");
                    self.fail(operation_id, e.to_string()).await?;
                }
            }
        }
        info!(applied, "replayed write-ahead log");
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    #[tokio::test]
    async fn begin_without_complete_is_replayed_on_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path(), 10 * 1024 * 1024, true)
            .await
            .unwrap();
        let id = Uuid::new_v4();
        wal.begin(WalOperation::InsertNoun {
            id,
            vector: RedactedVector::new(&[1.0]),
            noun_type: NounType::Document,
            metadata: Default::default(),
        })
        .await
        .unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        let applied = wal
            .recover(move |_op| {
                let seen = Arc::clone(&seen2);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();
        assert_eq!(applied, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn begin_then_complete_is_not_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path(), 10 * 1024 * 1024, true)
            .await
            .unwrap();
        let id = Uuid::new_v4();
        let op_id = wal
            .begin(WalOperation::DeleteNoun { id })
            .await
            .unwrap();
        wal.complete(op_id).await.unwrap();

        let applied = wal.recover(|_op| async { Ok(()) }).await.unwrap();
        assert_eq!(applied, 0);
    }

    #[tokio::test]
    async fn begin_then_fail_is_not_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path(), 10 * 1024 * 1024, true)
            .await
            .unwrap();
        let id = Uuid::new_v4();
        let op_id = wal
            .begin(WalOperation::DeleteNoun { id })
            .await
            .unwrap();
        wal.fail(op_id, "boom").await.unwrap();

        let applied = wal.recover(|_op| async { Ok(()) }).await.unwrap();
        assert_eq!(applied, 0);
    }

    #[tokio::test]
    async fn recovering_flag_suppresses_reentrant_writes() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path(), 10 * 1024 * 1024, true)
            .await
            .unwrap();
        wal.begin(WalOperation::DeleteNoun { id: Uuid::new_v4() })
            .await
            .unwrap();
        assert!(!wal.is_recovering());
        wal.recover(|_op| async { Ok(()) }).await.unwrap();
        assert!(!wal.is_recovering());
    }

    #[tokio::test]
    async fn large_vector_is_redacted_to_length_and_skipped_on_replay() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path(), 10 * 1024 * 1024, true)
            .await
            .unwrap();
        let big = vec![0.0f32; INLINE_VECTOR_LIMIT + 1];
        let redacted = RedactedVector::new(&big);
        assert_eq!(redacted.len, big.len());
        assert!(redacted.values.is_none());

        let small = vec![1.0f32, 2.0];
        let inline = RedactedVector::new(&small);
        assert_eq!(inline.values, Some(small));
    }

    #[tokio::test]
    async fn rotation_happens_when_size_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path(), 128, true).await.unwrap();
        for _ in 0..20 {
            wal.begin(WalOperation::DeleteNoun { id: Uuid::new_v4() })
                .await
                .unwrap();
        }
        let mut saw_rotated = false;
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            if entry.file_name().to_string_lossy().starts_with("wal-") {
                saw_rotated = true;
            }
        }
        assert!(saw_rotated);
    }

    #[tokio::test]
    async fn checkpoint_removes_rotated_segments() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path(), 128, true).await.unwrap();
        for _ in 0..20 {
            wal.begin(WalOperation::DeleteNoun { id: Uuid::new_v4() })
                .await
                .unwrap();
        }
        wal.checkpoint(20).await.unwrap();
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            assert!(!entry.file_name().to_string_lossy().starts_with("wal-"));
        }
    }
}
