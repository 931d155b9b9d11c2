//! Cluster store interfaces and local backends.
//!
//! The traits in this module are the only way the reconciler touches cluster
//! state. `MemoryCluster` and `LocalCluster` implement them on top of a shared
//! [`ClusterSnapshot`]; the Kubernetes backend lives in [`crate::kube`].

mod local;
mod lock;
mod memory;
mod snapshot;
mod traits;

pub use local::{LocalCluster, STORE_DIR};
pub use lock::{
    LEASE_DURATION_SECS, Lease, LeaseFile, WRITE_LOCK_TIMEOUT, WriteGuard, WriteLock,
    generate_holder_id,
};
pub use memory::{MemoryCluster, OpCounts};
pub use snapshot::{ClusterEvent, ClusterSnapshot, SNAPSHOT_VERSION};
pub use traits::{Cluster, InstanceAdmin, InstanceLister, InstanceStore, UnitStore};

#[cfg(test)]
pub use traits::{MockInstanceStore, MockUnitStore};
