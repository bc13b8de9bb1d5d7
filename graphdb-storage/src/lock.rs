//! Advisory filesystem locks used to serialize the legacy-layout migration
//! and other cross-process exclusive sections on the filesystem adapter.
//!
//! Locks are files under `<root>/locks/<key>.lock` holding a small JSON
//! body (`lockValue`, `pid`, `expiresAt`), acquired via exclusive-create so
//! two processes racing to create the same lock never both succeed.

use fs2::FileExt;
use graphdb_core::{CoreError, Result, now_ms};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockBody {
    lock_value: String,
    pid: u32,
    expires_at: i64,
}

/// A held filesystem lock. Dropping it without calling [`FileLock::release`]
/// leaves the lock in place until it expires — callers that can't guarantee
/// clean unwind should keep the TTL short.
pub struct FileLock {
    path: PathBuf,
    lock_value: String,
    /// OS advisory lock on the same file, held for the process's lifetime
    /// of this guard. `create_new`'s atomicity already rules out two
    /// processes both winning the race on most filesystems; this is the
    /// same belt-and-braces `fs2` exclusive lock used for the equivalent
    /// concern elsewhere in the pack, kept for filesystems where it isn't.
    os_lock: Option<std::fs::File>,
}

impl FileLock {
    fn lock_path(root: &Path, key: &str) -> PathBuf {
        root.join("locks").join(format!("{key}.lock"))
    }

    /// Attempt to acquire the lock once, reclaiming it if the existing
    /// holder's `expiresAt` has passed. Returns `Ok(None)` if held by a
    /// live owner.
    pub async fn try_acquire(root: &Path, key: &str, ttl: Duration) -> Result<Option<Self>> {
        let path = Self::lock_path(root, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if let Ok(existing) = tokio::fs::read(&path).await {
            match serde_json::from_slice::<LockBody>(&existing) {
                Ok(body) if body.expires_at > now_ms() => return Ok(None),
                _ => {
                    // Missing/corrupt/expired: safe to reclaim.
                    let _ = tokio::fs::remove_file(&path).await;
                }
            }
        }

        let lock_value = Uuid::new_v4().to_string();
        let body = LockBody {
            lock_value: lock_value.clone(),
            pid: std::process::id(),
            expires_at: now_ms() + ttl.as_millis() as i64,
        };
        let bytes = serde_json::to_vec(&body)?;
        let blocking_path = path.clone();
        let opened = tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&blocking_path)?;
            file.try_lock_exclusive()?;
            Ok::<_, std::io::Error>(file)
        })
        .await
        .map_err(|e| CoreError::Internal(e.to_string()))?;

        match opened {
            Ok(mut file) => {
                use std::io::Write;
                file.write_all(&bytes)?;
                Ok(Some(Self { path, lock_value, os_lock: Some(file) }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(CoreError::Io(e)),
        }
    }

    /// Poll [`Self::try_acquire`] until it succeeds or `timeout` elapses.
    pub async fn acquire(
        root: &Path,
        key: &str,
        ttl: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(lock) = Self::try_acquire(root, key, ttl).await? {
                return Ok(lock);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CoreError::Throttled(format!(
                    "timed out waiting for lock '{key}'"
                )));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Release the lock, but only if we still hold it (the value on disk
    /// matches what we wrote) — guards against releasing a lock that
    /// expired and was reclaimed by someone else.
    pub async fn release(self) -> Result<()> {
        if let Ok(existing) = tokio::fs::read(&self.path).await
            && let Ok(body) = serde_json::from_slice::<LockBody>(&existing)
            && body.lock_value == self.lock_value
        {
            tokio::fs::remove_file(&self.path).await?;
        }
        if let Some(file) = self.os_lock {
            let _ = file.unlock();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock1 = FileLock::try_acquire(dir.path(), "migration", Duration::from_secs(30))
            .await
            .unwrap();
        assert!(lock1.is_some());
        let lock2 = FileLock::try_acquire(dir.path(), "migration", Duration::from_secs(30))
            .await
            .unwrap();
        assert!(lock2.is_none());
    }

    #[tokio::test]
    async fn release_then_reacquire_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileLock::try_acquire(dir.path(), "migration", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        lock.release().await.unwrap();
        let lock2 = FileLock::try_acquire(dir.path(), "migration", Duration::from_secs(30))
            .await
            .unwrap();
        assert!(lock2.is_some());
    }

    #[tokio::test]
    async fn expired_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let _lock = FileLock::try_acquire(dir.path(), "migration", Duration::from_millis(1))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let lock2 = FileLock::try_acquire(dir.path(), "migration", Duration::from_secs(30))
            .await
            .unwrap();
        assert!(lock2.is_some());
    }
}
