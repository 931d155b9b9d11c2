//! In-process cluster backend.
//!
//! `MemoryCluster` keeps a [`ClusterSnapshot`] behind a mutex, publishes a
//! [`ClusterEvent`] for every effective change, and can be told to fail
//! selected operations so partial-failure behavior can be exercised.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info};

use super::snapshot::{ClusterEvent, ClusterSnapshot};
use super::traits::{Cluster, InstanceAdmin, InstanceLister, InstanceStore, UnitStore};
use crate::error::{Result, StoreError};
use crate::model::{Instance, InstanceStatus, ObjectKey, Unit};

/// Capacity of the change event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Failures to inject into subsequent calls.
#[derive(Debug, Default)]
struct Faults {
    /// Number of creates that still succeed before every create fails.
    creates_before_failure: Option<usize>,
    fail_deletes: bool,
    fail_status_updates: bool,
    fail_reads: bool,
}

/// Number of calls made through the store traits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    /// `UnitStore::create` calls.
    pub creates: usize,
    /// `UnitStore::delete` calls.
    pub deletes: usize,
    /// `InstanceStore::update_status` calls.
    pub status_updates: usize,
}

/// In-memory cluster.
#[derive(Debug)]
pub struct MemoryCluster {
    snapshot: Mutex<ClusterSnapshot>,
    events: broadcast::Sender<ClusterEvent>,
    faults: Mutex<Faults>,
    creates: AtomicUsize,
    deletes: AtomicUsize,
    status_updates: AtomicUsize,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    /// Creates an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            snapshot: Mutex::new(ClusterSnapshot::new()),
            events,
            faults: Mutex::new(Faults::default()),
            creates: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            status_updates: AtomicUsize::new(0),
        }
    }

    /// Subscribes to change events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events.subscribe()
    }

    /// Returns a copy of the current contents.
    pub async fn snapshot(&self) -> ClusterSnapshot {
        self.snapshot.lock().await.clone()
    }

    /// Returns the number of calls made through the store traits.
    #[must_use]
    pub fn op_counts(&self) -> OpCounts {
        OpCounts {
            creates: self.creates.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
            status_updates: self.status_updates.load(Ordering::SeqCst),
        }
    }

    /// Stores a unit exactly as given, bypassing the store traits.
    pub async fn put_unit(&self, unit: Unit) {
        let event = self.snapshot.lock().await.put_unit(unit);
        self.publish(event);
    }

    /// Removes a unit without going through the store traits.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit does not exist.
    pub async fn remove_unit(&self, key: &ObjectKey) -> Result<()> {
        let event = self.snapshot.lock().await.delete_unit(key)?;
        self.publish(event);
        Ok(())
    }

    /// Lets `n` more creates succeed, then fails every create.
    pub async fn fail_creates_after(&self, n: usize) {
        self.faults.lock().await.creates_before_failure = Some(n);
    }

    /// Makes every delete fail.
    pub async fn fail_deletes(&self, fail: bool) {
        self.faults.lock().await.fail_deletes = fail;
    }

    /// Makes every status update fail.
    pub async fn fail_status_updates(&self, fail: bool) {
        self.faults.lock().await.fail_status_updates = fail;
    }

    /// Makes every read fail.
    pub async fn fail_reads(&self, fail: bool) {
        self.faults.lock().await.fail_reads = fail;
    }

    /// Removes all injected failures.
    pub async fn clear_faults(&self) {
        *self.faults.lock().await = Faults::default();
    }

    fn publish(&self, event: ClusterEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    async fn check_read(&self) -> Result<()> {
        if self.faults.lock().await.fail_reads {
            return Err(injected("read"));
        }
        Ok(())
    }
}

fn injected(op: &str) -> crate::error::OperatorError {
    StoreError::unavailable(format!("injected {op} failure")).into()
}

#[async_trait]
impl InstanceStore for MemoryCluster {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Instance>> {
        self.check_read().await?;
        Ok(self.snapshot.lock().await.instance(key).cloned())
    }

    async fn update_status(&self, key: &ObjectKey, status: &InstanceStatus) -> Result<()> {
        self.status_updates.fetch_add(1, Ordering::SeqCst);
        if self.faults.lock().await.fail_status_updates {
            return Err(injected("status update"));
        }

        let changed = self.snapshot.lock().await.update_status(key, status)?;
        if changed {
            debug!("Status of {key} now lists {} units", status.observed_units.len());
            self.publish(ClusterEvent::InstanceChanged(key.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl UnitStore for MemoryCluster {
    async fn list(&self, owner: &ObjectKey) -> Result<Vec<Unit>> {
        self.check_read().await?;
        Ok(self.snapshot.lock().await.units_of(owner))
    }

    async fn create(&self, unit: &Unit) -> Result<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        {
            let mut faults = self.faults.lock().await;
            if let Some(remaining) = faults.creates_before_failure.as_mut() {
                if *remaining == 0 {
                    return Err(injected("create"));
                }
                *remaining -= 1;
            }
        }

        let event = self.snapshot.lock().await.create_unit(unit)?;
        debug!("Created unit {}", unit.key());
        self.publish(event);
        Ok(())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.faults.lock().await.fail_deletes {
            return Err(injected("delete"));
        }

        let event = self.snapshot.lock().await.delete_unit(key)?;
        debug!("Deleted unit {key}");
        self.publish(event);
        Ok(())
    }
}

#[async_trait]
impl InstanceLister for MemoryCluster {
    async fn list_keys(&self, namespace: Option<&str>) -> Result<Vec<ObjectKey>> {
        self.check_read().await?;
        Ok(self.snapshot.lock().await.instance_keys(namespace))
    }
}

#[async_trait]
impl InstanceAdmin for MemoryCluster {
    async fn apply_instance(&self, key: &ObjectKey, size: u32) -> Result<Instance> {
        let (instance, changed) = self.snapshot.lock().await.apply_instance(key, size);
        if changed {
            info!("Applied instance {key} with size {size}");
            self.publish(ClusterEvent::InstanceChanged(key.clone()));
        }
        Ok(instance)
    }

    async fn delete_instance(&self, key: &ObjectKey) -> Result<bool> {
        let events = self.snapshot.lock().await.delete_instance(key);
        let Some(events) = events else {
            return Ok(false);
        };

        info!(
            "Deleted instance {key}, garbage collected {} units",
            events.len().saturating_sub(1)
        );
        for event in events {
            self.publish(event);
        }
        Ok(true)
    }
}

impl Cluster for MemoryCluster {
    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MEMBERSHIP_LABEL, ObjectMeta, UnitSpec};

    fn unit_for(owner: &Instance, name: &str) -> Unit {
        let mut metadata = ObjectMeta::named(&owner.key().sibling(name));
        metadata
            .labels
            .insert(MEMBERSHIP_LABEL.to_string(), owner.name().to_string());
        metadata.owner_references.push(owner.controller_reference().unwrap());
        Unit::new(metadata, UnitSpec::default())
    }

    #[tokio::test]
    async fn test_events_only_on_change() {
        let cluster = MemoryCluster::new();
        let mut events = cluster.subscribe();
        let key = ObjectKey::new("default", "app");

        cluster.apply_instance(&key, 1).await.unwrap();
        assert_eq!(events.try_recv().unwrap(), ClusterEvent::InstanceChanged(key.clone()));

        cluster.apply_instance(&key, 1).await.unwrap();
        let status = InstanceStatus::default();
        cluster.update_status(&key, &status).await.unwrap();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unit_event_names_owner() {
        let cluster = MemoryCluster::new();
        let key = ObjectKey::new("default", "app");
        let owner = cluster.apply_instance(&key, 1).await.unwrap();
        let mut events = cluster.subscribe();

        cluster.create(&unit_for(&owner, "app-pod-0")).await.unwrap();

        let event = events.try_recv().unwrap();
        assert_eq!(event.instance_key(), Some(&key));
    }

    #[tokio::test]
    async fn test_fail_creates_after() {
        let cluster = MemoryCluster::new();
        let owner = cluster
            .apply_instance(&ObjectKey::new("default", "app"), 3)
            .await
            .unwrap();
        cluster.fail_creates_after(1).await;

        assert!(cluster.create(&unit_for(&owner, "app-pod-0")).await.is_ok());
        assert!(cluster.create(&unit_for(&owner, "app-pod-1")).await.is_err());
        assert_eq!(cluster.op_counts().creates, 2);

        cluster.clear_faults().await;
        assert!(cluster.create(&unit_for(&owner, "app-pod-1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_missing_unit_is_not_found() {
        let cluster = MemoryCluster::new();
        let err = UnitStore::delete(&cluster, &ObjectKey::new("default", "app-pod-9"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_instance_cascades() {
        let cluster = MemoryCluster::new();
        let key = ObjectKey::new("default", "app");
        let owner = cluster.apply_instance(&key, 2).await.unwrap();
        cluster.create(&unit_for(&owner, "app-pod-0")).await.unwrap();
        cluster.create(&unit_for(&owner, "app-pod-1")).await.unwrap();

        assert!(cluster.delete_instance(&key).await.unwrap());
        assert!(cluster.list(&key).await.unwrap().is_empty());
        assert_eq!(cluster.op_counts().deletes, 0);
        assert!(!cluster.delete_instance(&key).await.unwrap());
    }
}
