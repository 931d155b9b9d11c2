//! Store interfaces used by the reconciler.
//!
//! The reconciler only talks to the cluster through these traits, so the
//! in-memory, file-backed and Kubernetes backends are interchangeable.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Instance, InstanceStatus, ObjectKey, Unit};

/// Read access to instances plus the status subresource.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Fetches an instance.
    ///
    /// Returns `None` if the instance does not exist.
    async fn get(&self, key: &ObjectKey) -> Result<Option<Instance>>;

    /// Replaces the status of an instance, leaving its spec untouched.
    async fn update_status(&self, key: &ObjectKey, status: &InstanceStatus) -> Result<()>;
}

/// Unit primitives.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UnitStore: Send + Sync {
    /// Lists the units labeled as members of `owner`, in the owner's namespace.
    ///
    /// Terminating units are included.
    async fn list(&self, owner: &ObjectKey) -> Result<Vec<Unit>>;

    /// Creates a unit.
    async fn create(&self, unit: &Unit) -> Result<()>;

    /// Deletes a unit.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;
}

/// Enumerates instances for periodic resync.
#[async_trait]
pub trait InstanceLister: Send + Sync {
    /// Lists instance keys, optionally restricted to one namespace.
    async fn list_keys(&self, namespace: Option<&str>) -> Result<Vec<ObjectKey>>;
}

/// Desired-state writes issued by users rather than the reconciler.
#[async_trait]
pub trait InstanceAdmin: Send + Sync {
    /// Creates the instance or updates its desired size.
    async fn apply_instance(&self, key: &ObjectKey, size: u32) -> Result<Instance>;

    /// Deletes the instance. Returns false if it did not exist.
    ///
    /// Owned units are removed by garbage collection.
    async fn delete_instance(&self, key: &ObjectKey) -> Result<bool>;
}

/// A complete cluster backend.
pub trait Cluster: InstanceStore + UnitStore + InstanceLister + InstanceAdmin {
    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
