//! Worker units owned by an instance.

use serde::{Deserialize, Serialize};

use super::meta::{ObjectKey, ObjectMeta};

/// Label that ties a unit to its instance.
pub const MEMBERSHIP_LABEL: &str = "app";

/// Infix between the instance name and the unit index.
const UNIT_NAME_INFIX: &str = "-pod-";

/// A worker unit (a `Pod` on Kubernetes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    /// API version of the resource.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Kind of the resource.
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Workload.
    #[serde(default)]
    pub spec: UnitSpec,
}

fn default_api_version() -> String {
    String::from("v1")
}

fn default_kind() -> String {
    String::from("Pod")
}

/// Workload of a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSpec {
    /// Containers to run.
    #[serde(default)]
    pub containers: Vec<Container>,
}

/// A single container in a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Container name.
    pub name: String,
    /// Container image.
    pub image: String,
    /// Entrypoint command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
}

impl Unit {
    /// Creates a unit with the given metadata and workload.
    #[must_use]
    pub fn new(metadata: ObjectMeta, spec: UnitSpec) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata,
            spec,
        }
    }

    /// Returns the key of this unit.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Returns the name of this unit.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Returns true if the unit is not being deleted.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !self.metadata.is_terminating()
    }

    /// Returns the membership label value, if present.
    #[must_use]
    pub fn member_of(&self) -> Option<&str> {
        self.metadata.labels.get(MEMBERSHIP_LABEL).map(String::as_str)
    }
}

/// Returns the canonical name of unit `index` of `instance`.
#[must_use]
pub fn unit_name(instance: &str, index: u32) -> String {
    format!("{instance}{UNIT_NAME_INFIX}{index}")
}

/// Extracts the index from a canonical unit name.
///
/// Only names produced by [`unit_name`] carry an index, so leading zeros,
/// signs and foreign prefixes yield `None`.
#[must_use]
pub fn unit_index(instance: &str, name: &str) -> Option<u32> {
    let digits = name.strip_prefix(instance)?.strip_prefix(UNIT_NAME_INFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_name() {
        assert_eq!(unit_name("app", 0), "app-pod-0");
        assert_eq!(unit_name("web-1", 12), "web-1-pod-12");
    }

    #[test]
    fn test_unit_index() {
        assert_eq!(unit_index("app", "app-pod-0"), Some(0));
        assert_eq!(unit_index("app", "app-pod-17"), Some(17));
        assert_eq!(unit_index("app", "app-pod-01"), None);
        assert_eq!(unit_index("app", "app-pod-"), None);
        assert_eq!(unit_index("app", "app-pod-+1"), None);
        assert_eq!(unit_index("app", "other-pod-1"), None);
        assert_eq!(unit_index("app", "app-extra"), None);
        assert_eq!(unit_index("app", "app-pod-99999999999"), None);
    }

    #[test]
    fn test_decode_pod() {
        let unit: Unit = serde_json::from_str(
            r#"{
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {"name": "app-pod-0", "namespace": "default", "labels": {"app": "app"}},
                "spec": {"containers": [{"name": "busybox", "image": "busybox", "command": ["sleep", "3600"]}]},
                "status": {"phase": "Running"}
            }"#,
        )
        .unwrap();

        assert_eq!(unit.member_of(), Some("app"));
        assert!(unit.is_live());
        assert_eq!(unit.spec.containers[0].command, vec!["sleep", "3600"]);
    }
}
