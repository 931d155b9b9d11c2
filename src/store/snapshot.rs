//! In-memory object table shared by the memory and file-backed stores.
//!
//! A snapshot behaves like a tiny API server: it assigns uids and resource
//! versions, answers label queries, and sweeps units whose controlling owner
//! is gone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::model::{Instance, InstanceStatus, MEMBERSHIP_LABEL, ObjectKey, Unit};

/// Current version of the snapshot format.
pub const SNAPSHOT_VERSION: &str = "1";

/// A change applied to a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    /// An instance was created, changed or deleted.
    InstanceChanged(ObjectKey),
    /// A unit was created or deleted.
    UnitChanged {
        /// Key of the unit.
        unit: ObjectKey,
        /// Key of the controlling instance, if the unit has one.
        owner: Option<ObjectKey>,
    },
}

impl ClusterEvent {
    /// Returns the instance that should be reconciled because of this event.
    #[must_use]
    pub fn instance_key(&self) -> Option<&ObjectKey> {
        match self {
            Self::InstanceChanged(key) => Some(key),
            Self::UnitChanged { owner, .. } => owner.as_ref(),
        }
    }

    fn for_unit(unit: &Unit) -> Self {
        let owner = unit
            .metadata
            .controller_ref()
            .map(|r| ObjectKey::new(unit.metadata.namespace.clone(), r.name.clone()));
        Self::UnitChanged {
            unit: unit.key(),
            owner,
        }
    }
}

/// All instances and units of a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    /// Snapshot format version.
    pub version: String,
    /// Last resource version handed out.
    #[serde(default)]
    pub resource_version: u64,
    /// Instances by key.
    #[serde(default)]
    pub instances: BTreeMap<ObjectKey, Instance>,
    /// Units by key.
    #[serde(default)]
    pub units: BTreeMap<ObjectKey, Unit>,
    /// When the snapshot was last modified.
    pub last_updated: DateTime<Utc>,
}

impl Default for ClusterSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            resource_version: 0,
            instances: BTreeMap::new(),
            units: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }
}

impl ClusterSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.last_updated = Utc::now();
        self.resource_version.to_string()
    }

    /// Returns an instance by key.
    #[must_use]
    pub fn instance(&self, key: &ObjectKey) -> Option<&Instance> {
        self.instances.get(key)
    }

    /// Lists instance keys, optionally in one namespace.
    #[must_use]
    pub fn instance_keys(&self, namespace: Option<&str>) -> Vec<ObjectKey> {
        self.instances
            .keys()
            .filter(|k| namespace.is_none_or(|ns| k.namespace == ns))
            .cloned()
            .collect()
    }

    /// Creates an instance or updates its desired size.
    ///
    /// Returns the stored instance and whether anything changed.
    pub fn apply_instance(&mut self, key: &ObjectKey, size: u32) -> (Instance, bool) {
        if let Some(existing) = self.instances.get(key) {
            if existing.spec.size == size {
                return (existing.clone(), false);
            }
        }

        let version = self.next_version();
        let instance = self
            .instances
            .entry(key.clone())
            .and_modify(|existing| {
                existing.spec.size = size;
                existing.metadata.generation = Some(existing.metadata.generation.unwrap_or(0) + 1);
                existing.metadata.resource_version = Some(version.clone());
            })
            .or_insert_with(|| {
                let mut instance = Instance::new(key, size);
                instance.metadata.uid = Some(Uuid::new_v4().to_string());
                instance.metadata.generation = Some(1);
                instance.metadata.resource_version = Some(version.clone());
                instance.metadata.creation_timestamp = Some(Utc::now());
                instance
            });

        (instance.clone(), true)
    }

    /// Deletes an instance and garbage-collects its units.
    ///
    /// Returns `None` if the instance did not exist, otherwise the events for
    /// the instance and every collected unit.
    pub fn delete_instance(&mut self, key: &ObjectKey) -> Option<Vec<ClusterEvent>> {
        self.instances.remove(key)?;
        self.next_version();

        let mut events = vec![ClusterEvent::InstanceChanged(key.clone())];
        events.extend(self.collect_garbage());
        Some(events)
    }

    /// Removes every unit whose controlling owner no longer exists.
    pub fn collect_garbage(&mut self) -> Vec<ClusterEvent> {
        let live_uids: BTreeSet<&str> = self
            .instances
            .values()
            .filter_map(|i| i.metadata.uid.as_deref())
            .collect();

        let orphans: Vec<ObjectKey> = self
            .units
            .iter()
            .filter(|(_, unit)| {
                unit.metadata
                    .controller_ref()
                    .is_some_and(|owner| !live_uids.contains(owner.uid.as_str()))
            })
            .map(|(key, _)| key.clone())
            .collect();

        if !orphans.is_empty() {
            self.next_version();
        }

        orphans
            .iter()
            .filter_map(|key| self.units.remove(key))
            .map(|unit| ClusterEvent::for_unit(&unit))
            .collect()
    }

    /// Replaces the status of an instance.
    ///
    /// Returns whether the stored status changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance does not exist.
    pub fn update_status(&mut self, key: &ObjectKey, status: &InstanceStatus) -> Result<bool> {
        let Some(current) = self.instances.get(key) else {
            return Err(StoreError::not_found("AppInstance", key).into());
        };
        if current.status == *status {
            return Ok(false);
        }

        let version = self.next_version();
        if let Some(instance) = self.instances.get_mut(key) {
            instance.status = status.clone();
            instance.metadata.resource_version = Some(version);
        }
        Ok(true)
    }

    /// Lists units labeled as members of `owner`, in the owner's namespace.
    #[must_use]
    pub fn units_of(&self, owner: &ObjectKey) -> Vec<Unit> {
        self.units
            .values()
            .filter(|u| u.metadata.namespace == owner.namespace)
            .filter(|u| u.metadata.labels.get(MEMBERSHIP_LABEL) == Some(&owner.name))
            .cloned()
            .collect()
    }

    /// Stores a new unit.
    ///
    /// # Errors
    ///
    /// Returns an error if a unit with the same key exists.
    pub fn create_unit(&mut self, unit: &Unit) -> Result<ClusterEvent> {
        let key = unit.key();
        if self.units.contains_key(&key) {
            return Err(StoreError::already_exists("Pod", key).into());
        }

        let mut stored = unit.clone();
        stored.metadata.uid = Some(Uuid::new_v4().to_string());
        stored.metadata.resource_version = Some(self.next_version());
        stored.metadata.creation_timestamp = Some(Utc::now());
        stored.metadata.deletion_timestamp = None;

        let event = ClusterEvent::for_unit(&stored);
        self.units.insert(key, stored);
        Ok(event)
    }

    /// Stores a unit exactly as given, replacing any unit with the same key.
    ///
    /// Used to simulate changes made by other actors, such as a unit stuck
    /// in termination.
    pub fn put_unit(&mut self, unit: Unit) -> ClusterEvent {
        self.next_version();
        let event = ClusterEvent::for_unit(&unit);
        self.units.insert(unit.key(), unit);
        event
    }

    /// Removes a unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit does not exist.
    pub fn delete_unit(&mut self, key: &ObjectKey) -> Result<ClusterEvent> {
        let unit = self
            .units
            .remove(key)
            .ok_or_else(|| StoreError::not_found("Pod", key))?;
        self.next_version();
        Ok(ClusterEvent::for_unit(&unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ObjectMeta, UnitSpec};

    fn owned_unit(owner: &Instance, name: &str) -> Unit {
        let mut metadata = ObjectMeta::named(&owner.key().sibling(name));
        metadata
            .labels
            .insert(MEMBERSHIP_LABEL.to_string(), owner.name().to_string());
        metadata.owner_references.push(owner.controller_reference().unwrap());
        Unit::new(metadata, UnitSpec::default())
    }

    #[test]
    fn test_apply_instance() {
        let mut snapshot = ClusterSnapshot::new();
        let key = ObjectKey::new("default", "app");

        let (created, changed) = snapshot.apply_instance(&key, 3);
        assert!(changed);
        assert!(created.metadata.uid.is_some());
        assert_eq!(created.metadata.generation, Some(1));

        let (same, changed) = snapshot.apply_instance(&key, 3);
        assert!(!changed);
        assert_eq!(same, created);

        let (resized, changed) = snapshot.apply_instance(&key, 1);
        assert!(changed);
        assert_eq!(resized.spec.size, 1);
        assert_eq!(resized.metadata.generation, Some(2));
        assert_eq!(resized.metadata.uid, created.metadata.uid);
    }

    #[test]
    fn test_label_query_is_namespaced() {
        let mut snapshot = ClusterSnapshot::new();
        let (a, _) = snapshot.apply_instance(&ObjectKey::new("default", "app"), 1);
        let (b, _) = snapshot.apply_instance(&ObjectKey::new("other", "app"), 1);

        snapshot.create_unit(&owned_unit(&a, "app-pod-0")).unwrap();
        snapshot.create_unit(&owned_unit(&b, "app-pod-0")).unwrap();

        let units = snapshot.units_of(&a.key());
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].metadata.namespace, "default");
    }

    #[test]
    fn test_create_duplicate_unit() {
        let mut snapshot = ClusterSnapshot::new();
        let (owner, _) = snapshot.apply_instance(&ObjectKey::new("default", "app"), 1);
        let unit = owned_unit(&owner, "app-pod-0");

        snapshot.create_unit(&unit).unwrap();
        let err = snapshot.create_unit(&unit).unwrap_err();
        assert!(matches!(
            err,
            crate::error::OperatorError::Store(StoreError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_delete_instance_collects_units() {
        let mut snapshot = ClusterSnapshot::new();
        let (owner, _) = snapshot.apply_instance(&ObjectKey::new("default", "app"), 2);
        let (other, _) = snapshot.apply_instance(&ObjectKey::new("default", "web"), 1);
        snapshot.create_unit(&owned_unit(&owner, "app-pod-0")).unwrap();
        snapshot.create_unit(&owned_unit(&owner, "app-pod-1")).unwrap();
        snapshot.create_unit(&owned_unit(&other, "web-pod-0")).unwrap();

        let events = snapshot.delete_instance(&owner.key()).unwrap();

        assert_eq!(events.len(), 3);
        assert!(snapshot.units_of(&owner.key()).is_empty());
        assert_eq!(snapshot.units_of(&other.key()).len(), 1);
        assert!(snapshot.delete_instance(&owner.key()).is_none());
    }

    #[test]
    fn test_update_status_reports_change() {
        let mut snapshot = ClusterSnapshot::new();
        let key = ObjectKey::new("default", "app");
        snapshot.apply_instance(&key, 1);

        let status = InstanceStatus {
            observed_units: vec![String::from("app-pod-0")],
        };
        assert!(snapshot.update_status(&key, &status).unwrap());
        assert!(!snapshot.update_status(&key, &status).unwrap());

        let missing = ObjectKey::new("default", "missing");
        assert!(snapshot.update_status(&missing, &status).is_err());
    }

    #[test]
    fn test_snapshot_json_keys() {
        let mut snapshot = ClusterSnapshot::new();
        snapshot.apply_instance(&ObjectKey::new("default", "app"), 2);

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"default/app\""));

        let restored: ClusterSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.instances.len(), 1);
    }
}
