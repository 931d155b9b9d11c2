//! The `AppInstance` desired-state resource.

use serde::{Deserialize, Serialize};

use super::meta::{ObjectKey, ObjectMeta, OwnerReference};
use crate::error::{ReconcileError, Result};

/// Default API version of the instance resource.
pub const INSTANCE_API_VERSION: &str = "mygroup.mydomain.com/v1alpha1";

/// Default kind of the instance resource.
pub const INSTANCE_KIND: &str = "AppInstance";

fn default_api_version() -> String {
    INSTANCE_API_VERSION.to_string()
}

fn default_kind() -> String {
    INSTANCE_KIND.to_string()
}

/// An instance declaring how many units should exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// API version of the resource.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Kind of the resource.
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    #[serde(default)]
    pub spec: InstanceSpec,
    /// Last projected state.
    #[serde(default)]
    pub status: InstanceStatus,
}

/// Desired state of an instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Target number of live units.
    #[serde(default)]
    pub size: u32,
}

/// Observed state of an instance, as last projected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    /// Names of the live units, in index order.
    #[serde(rename = "nodes", default)]
    pub observed_units: Vec<String>,
}

impl Instance {
    /// Creates a new instance with the given desired size.
    #[must_use]
    pub fn new(key: &ObjectKey, size: u32) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta::named(key),
            spec: InstanceSpec { size },
            status: InstanceStatus::default(),
        }
    }

    /// Returns the key of this instance.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Returns the name of this instance.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Returns the desired number of units.
    #[must_use]
    pub const fn desired_size(&self) -> u32 {
        self.spec.size
    }

    /// Builds the controller reference that units of this instance carry.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance has not been assigned a uid.
    pub fn controller_reference(&self) -> Result<OwnerReference> {
        let uid = self
            .metadata
            .uid
            .clone()
            .ok_or_else(|| ReconcileError::MissingOwnerUid {
                key: self.key().to_string(),
            })?;

        Ok(OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.metadata.name.clone(),
            uid,
            controller: true,
            block_owner_deletion: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_wire_form() {
        let instance: Instance = serde_json::from_str(
            r#"{
                "apiVersion": "mygroup.mydomain.com/v1alpha1",
                "kind": "AppInstance",
                "metadata": {"name": "app", "namespace": "default", "uid": "abc"},
                "spec": {"size": 3},
                "status": {"nodes": ["app-pod-0"]}
            }"#,
        )
        .unwrap();

        assert_eq!(instance.desired_size(), 3);
        assert_eq!(instance.status.observed_units, vec!["app-pod-0"]);
    }

    #[test]
    fn test_negative_size_rejected() {
        let result: std::result::Result<Instance, _> = serde_json::from_str(
            r#"{"metadata": {"name": "app"}, "spec": {"size": -1}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_controller_reference() {
        let mut instance = Instance::new(&ObjectKey::new("default", "app"), 2);
        assert!(instance.controller_reference().is_err());

        instance.metadata.uid = Some(String::from("uid-1"));
        let owner = instance.controller_reference().unwrap();
        assert_eq!(owner.kind, INSTANCE_KIND);
        assert_eq!(owner.uid, "uid-1");
        assert!(owner.controller);
        assert!(owner.block_owner_deletion);
    }
}
