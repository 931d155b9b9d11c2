//! Lock files of the local store.
//!
//! - [`LeaseFile`]: keeps two controllers from driving the same store
//! - [`WriteLock`]: serializes single load-modify-save cycles across processes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, StoreError};

/// Lease duration in seconds.
pub const LEASE_DURATION_SECS: i64 = 60;

/// A lease held on a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Unique lease identifier.
    pub lease_id: String,
    /// Who holds the lease.
    pub holder: String,
    /// When the lease was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lease lapses unless renewed.
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Creates a new lease for `holder`.
    #[must_use]
    pub fn new(holder: &str) -> Self {
        let now = Utc::now();
        Self {
            lease_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(LEASE_DURATION_SECS),
        }
    }

    /// Checks if the lease has lapsed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Pushes the expiry forward by a full lease duration.
    pub fn renew(&mut self) {
        self.expires_at = Utc::now() + chrono::Duration::seconds(LEASE_DURATION_SECS);
    }
}

/// Lease file next to a store file.
#[derive(Debug, Clone)]
pub struct LeaseFile {
    path: PathBuf,
}

impl LeaseFile {
    /// Creates a handle for the lease file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the lease file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current lease, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn current(&self) -> Result<Option<Lease>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Corrupted {
                    message: format!("Failed to read lease file: {e}"),
                }
                .into());
            }
        };

        let lease = serde_json::from_str(&content).map_err(|e| StoreError::Corrupted {
            message: format!("Failed to parse lease file: {e}"),
        })?;
        Ok(Some(lease))
    }

    /// Acquires the lease for `holder`, taking over a lapsed one.
    ///
    /// # Errors
    ///
    /// Returns an error if another holder has a live lease or the file
    /// cannot be written.
    pub async fn acquire(&self, holder: &str) -> Result<Lease> {
        if let Some(existing) = self.current().await? {
            if !existing.is_expired() {
                return Err(StoreError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }
                .into());
            }
            debug!("Lapsed lease of {} found, taking over", existing.holder);
        }

        let lease = Lease::new(holder);
        self.write(&lease).await?;
        info!(
            "Acquired store lease {} (renew within {LEASE_DURATION_SECS}s)",
            lease.lease_id
        );
        Ok(lease)
    }

    /// Renews a lease this process holds.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease was taken over or cannot be written.
    pub async fn renew(&self, lease: &mut Lease) -> Result<()> {
        match self.current().await? {
            Some(current) if current.lease_id == lease.lease_id => {}
            Some(current) => {
                return Err(StoreError::LockedByOther {
                    holder: current.holder,
                    since: current.acquired_at.to_rfc3339(),
                }
                .into());
            }
            None => {
                return Err(StoreError::LockFailed {
                    message: String::from("lease file disappeared"),
                }
                .into());
            }
        }

        lease.renew();
        self.write(lease).await
    }

    /// Releases a lease. Does nothing if the file holds a different lease.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease file cannot be removed.
    pub async fn release(&self, lease: &Lease) -> Result<()> {
        let Some(current) = self.current().await? else {
            return Ok(());
        };
        if current.lease_id != lease.lease_id {
            debug!(
                "Lease id mismatch: expected {}, found {}",
                lease.lease_id, current.lease_id
            );
            return Ok(());
        }

        fs::remove_file(&self.path).await.map_err(|e| StoreError::LockFailed {
            message: format!("Failed to delete lease file: {e}"),
        })?;
        info!("Released store lease {}", lease.lease_id);
        Ok(())
    }

    async fn write(&self, lease: &Lease) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| StoreError::LockFailed {
                message: format!("Failed to create lease directory: {e}"),
            })?;
        }

        let content = serde_json::to_string_pretty(lease)
            .map_err(|e| StoreError::serialization(format!("Failed to serialize lease: {e}")))?;
        fs::write(&self.path, content)
            .await
            .map_err(|e| StoreError::LockFailed {
                message: format!("Failed to write lease file: {e}"),
            })?;
        Ok(())
    }
}

/// How long a writer waits for the write lock before giving up.
pub const WRITE_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Age after which a write lock is considered left behind by a crash.
const WRITE_LOCK_STALE_AFTER: Duration = Duration::from_secs(30);

/// Delay between attempts to take a busy write lock.
const WRITE_LOCK_POLL: Duration = Duration::from_millis(10);

/// Exclusive lock file held for the duration of one store write.
///
/// The file is created with `create_new`, so only one process can hold it.
/// A lock older than the stale threshold is removed and taken over.
#[derive(Debug, Clone)]
pub struct WriteLock {
    path: PathBuf,
    stale_after: Duration,
}

/// Held write lock; the lock file is removed on drop.
#[derive(Debug)]
pub struct WriteGuard {
    path: PathBuf,
}

impl WriteLock {
    /// Creates a handle for the write lock file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stale_after: WRITE_LOCK_STALE_AFTER,
        }
    }

    /// Overrides the age after which a held lock is taken over.
    #[must_use]
    pub const fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Returns the write lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Takes the lock, waiting up to [`WRITE_LOCK_TIMEOUT`] for the holder.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock stays busy past the timeout or the lock
    /// file cannot be created.
    pub async fn acquire(&self) -> Result<WriteGuard> {
        let deadline = Instant::now() + WRITE_LOCK_TIMEOUT;

        loop {
            let opened = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
                .await;

            match opened {
                Ok(mut file) => {
                    let guard = WriteGuard {
                        path: self.path.clone(),
                    };
                    file.write_all(generate_holder_id().as_bytes())
                        .await
                        .map_err(|e| StoreError::LockFailed {
                            message: format!("Failed to write write lock: {e}"),
                        })?;
                    return Ok(guard);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if self.is_stale().await {
                        warn!("Removing stale write lock {}", self.path.display());
                        match fs::remove_file(&self.path).await {
                            Ok(()) => continue,
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                            Err(e) => {
                                return Err(StoreError::LockFailed {
                                    message: format!("Failed to remove stale write lock: {e}"),
                                }
                                .into());
                            }
                        }
                    }
                    if Instant::now() >= deadline {
                        return Err(StoreError::LockFailed {
                            message: format!(
                                "Timed out waiting for write lock {}",
                                self.path.display()
                            ),
                        }
                        .into());
                    }
                    tokio::time::sleep(WRITE_LOCK_POLL).await;
                }
                Err(e) => {
                    return Err(StoreError::LockFailed {
                        message: format!("Failed to create write lock: {e}"),
                    }
                    .into());
                }
            }
        }
    }

    async fn is_stale(&self) -> bool {
        let Ok(metadata) = fs::metadata(&self.path).await else {
            return false;
        };
        metadata
            .modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age >= self.stale_after)
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove write lock {}: {e}", self.path.display());
            }
        }
    }
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get().map_or_else(
        |_| String::from("unknown"),
        |h| h.to_string_lossy().to_string(),
    );
    let pid = std::process::id();
    let suffix = Uuid::new_v4().simple().to_string();

    format!("{hostname}-{pid}-{}", &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_acquire_release() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let file = LeaseFile::new(temp.path().join("cluster.lock"));

        let lease = file.acquire("holder-1").await.unwrap();
        assert!(file.acquire("holder-2").await.is_err());

        file.release(&lease).await.unwrap();
        assert!(file.current().await.unwrap().is_none());
        assert!(file.acquire("holder-2").await.is_ok());
    }

    #[tokio::test]
    async fn test_lapsed_lease_taken_over() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let file = LeaseFile::new(temp.path().join("cluster.lock"));

        let mut stale = Lease::new("crashed");
        stale.expires_at = Utc::now() - chrono::Duration::seconds(1);
        file.write(&stale).await.unwrap();

        let lease = file.acquire("holder-1").await.unwrap();
        assert_eq!(lease.holder, "holder-1");
    }

    #[tokio::test]
    async fn test_renew_after_takeover_fails() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let file = LeaseFile::new(temp.path().join("cluster.lock"));

        let mut lease = file.acquire("holder-1").await.unwrap();
        file.renew(&mut lease).await.unwrap();

        let other = Lease::new("holder-2");
        file.write(&other).await.unwrap();
        assert!(file.renew(&mut lease).await.is_err());
    }

    #[tokio::test]
    async fn test_write_lock_is_exclusive() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let lock = WriteLock::new(temp.path().join("cluster.write.lock"));

        let guard = lock.acquire().await.unwrap();
        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire().await.map(drop) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap().unwrap();
        assert!(!lock.path().exists());
    }

    #[tokio::test]
    async fn test_stale_write_lock_taken_over() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let lock = WriteLock::new(temp.path().join("cluster.write.lock"))
            .with_stale_after(Duration::ZERO);
        fs::write(lock.path(), "crashed-writer").await.unwrap();

        let guard = lock.acquire().await.unwrap();
        assert!(lock.path().exists());
        drop(guard);
        assert!(!lock.path().exists());
    }

    #[test]
    fn test_holder_id_generation() {
        let id1 = generate_holder_id();
        let id2 = generate_holder_id();

        assert_ne!(id1, id2);
        assert!(id1.contains(&std::process::id().to_string()));
    }
}
