//! Kubernetes API server backend.
//!
//! This module provides:
//! - [`KubeClient`]: authenticated HTTP access with status mapping
//! - [`KubeCluster`]: the store traits over the instance custom resource and pods
//! - Wire types for lists, delete options and error statuses

mod client;
mod store;
mod types;

pub use client::KubeClient;
pub use store::KubeCluster;
pub use types::{DeleteOptions, ObjectList, PartialObject, PropagationPolicy, Status};
