//! Local file-based cluster backend.
//!
//! This module keeps a whole [`ClusterSnapshot`] in one JSON file for
//! single-machine use. Every write takes a cross-process write lock, loads
//! the file, applies the change and saves it back atomically.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::lock::{LeaseFile, WriteLock};
use super::snapshot::{ClusterSnapshot, SNAPSHOT_VERSION};
use super::traits::{Cluster, InstanceAdmin, InstanceLister, InstanceStore, UnitStore};
use crate::error::{Result, StoreError};
use crate::model::{Instance, InstanceStatus, ObjectKey, Unit};

/// Default store directory name.
pub const STORE_DIR: &str = ".appinstance";

/// Store file name.
const STORE_FILE: &str = "cluster.json";

/// Lease file name.
const LEASE_FILE: &str = "cluster.lock";

/// Write lock file name.
const WRITE_LOCK_FILE: &str = "cluster.write.lock";

/// File-backed cluster.
#[derive(Debug)]
pub struct LocalCluster {
    /// Path to the store file.
    path: PathBuf,
    /// Lease guarding the store against a second controller.
    lease: LeaseFile,
    /// Serializes load-modify-save cycles across processes.
    write_lock: WriteLock,
    /// Serializes load-modify-save cycles within this process.
    local_writes: Mutex<()>,
}

impl LocalCluster {
    /// Creates a store in the default directory under the working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the working directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()?.join(STORE_DIR);
        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a store in a custom directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl AsRef<Path>) -> Self {
        Self::with_path(base_dir.as_ref().join(STORE_FILE))
    }

    /// Creates a store from a custom store file path.
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let base_dir = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        Self {
            lease: LeaseFile::new(base_dir.join(LEASE_FILE)),
            write_lock: WriteLock::new(base_dir.join(WRITE_LOCK_FILE)),
            path,
            local_writes: Mutex::new(()),
        }
    }

    /// Returns the store file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the lease file guarding this store.
    #[must_use]
    pub const fn lease_file(&self) -> &LeaseFile {
        &self.lease
    }

    /// Loads the store, or an empty snapshot if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn load(&self) -> Result<ClusterSnapshot> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Store file does not exist: {}", self.path.display());
                return Ok(ClusterSnapshot::new());
            }
            Err(e) => {
                return Err(StoreError::unavailable(format!("Failed to read store file: {e}")).into());
            }
        };

        let snapshot: ClusterSnapshot =
            serde_json::from_str(&content).map_err(|e| StoreError::Corrupted {
                message: format!("Failed to parse store file: {e}"),
            })?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::Corrupted {
                message: format!(
                    "Unsupported store version {} (expected {SNAPSHOT_VERSION})",
                    snapshot.version
                ),
            }
            .into());
        }
        Ok(snapshot)
    }

    async fn create_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::unavailable(format!("Failed to create store directory: {e}"))
            })?;
        }
        Ok(())
    }

    async fn save(&self, snapshot: &ClusterSnapshot) -> Result<()> {
        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| StoreError::serialization(format!("Failed to serialize store: {e}")))?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

        if let Err(e) = write_synced(&temp_path, content.as_bytes()).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::unavailable(format!("Failed to rename store file: {e}")).into());
        }

        debug!("Store saved at resource version {}", snapshot.resource_version);
        Ok(())
    }

    /// Runs `f` against the loaded snapshot and saves it if `f` reports a change.
    async fn modify<T>(
        &self,
        f: impl FnOnce(&mut ClusterSnapshot) -> Result<(T, bool)> + Send,
    ) -> Result<T>
    where
        T: Send,
    {
        let _local = self.local_writes.lock().await;
        self.create_dir().await?;
        let _guard = self.write_lock.acquire().await?;
        let mut snapshot = self.load().await?;
        let (value, changed) = f(&mut snapshot)?;
        if changed {
            self.save(&snapshot).await?;
        }
        Ok(value)
    }
}

async fn write_synced(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path).await.map_err(|e| {
        StoreError::unavailable(format!("Failed to create temp store file: {e}"))
    })?;
    file.write_all(content)
        .await
        .map_err(|e| StoreError::unavailable(format!("Failed to write store file: {e}")))?;
    file.sync_all()
        .await
        .map_err(|e| StoreError::unavailable(format!("Failed to sync store file: {e}")))?;
    Ok(())
}

#[async_trait]
impl InstanceStore for LocalCluster {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Instance>> {
        Ok(self.load().await?.instance(key).cloned())
    }

    async fn update_status(&self, key: &ObjectKey, status: &InstanceStatus) -> Result<()> {
        self.modify(|s| Ok(((), s.update_status(key, status)?)))
            .await
    }
}

#[async_trait]
impl UnitStore for LocalCluster {
    async fn list(&self, owner: &ObjectKey) -> Result<Vec<Unit>> {
        Ok(self.load().await?.units_of(owner))
    }

    async fn create(&self, unit: &Unit) -> Result<()> {
        self.modify(|s| s.create_unit(unit).map(|_| ((), true)))
            .await?;
        debug!("Created unit {}", unit.key());
        Ok(())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        self.modify(|s| s.delete_unit(key).map(|_| ((), true)))
            .await?;
        debug!("Deleted unit {key}");
        Ok(())
    }
}

#[async_trait]
impl InstanceLister for LocalCluster {
    async fn list_keys(&self, namespace: Option<&str>) -> Result<Vec<ObjectKey>> {
        Ok(self.load().await?.instance_keys(namespace))
    }
}

#[async_trait]
impl InstanceAdmin for LocalCluster {
    async fn apply_instance(&self, key: &ObjectKey, size: u32) -> Result<Instance> {
        let instance = self
            .modify(|s| Ok(s.apply_instance(key, size)))
            .await?;
        info!("Applied instance {key} with size {size}");
        Ok(instance)
    }

    async fn delete_instance(&self, key: &ObjectKey) -> Result<bool> {
        let collected = self
            .modify(|s| {
                let events = s.delete_instance(key);
                let changed = events.is_some();
                Ok((events.map(|e| e.len().saturating_sub(1)), changed))
            })
            .await?;

        match collected {
            Some(units) => {
                info!("Deleted instance {key}, garbage collected {units} units");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Cluster for LocalCluster {
    fn backend_type(&self) -> &'static str {
        "local"
    }
}
