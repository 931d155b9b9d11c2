//! Object identity and metadata shared by instances and units.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Namespace used when a key is given without one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Maximum length of a DNS-1123 label.
const MAX_NAME_LEN: usize = 63;

/// Namespaced identity of a stored object.
///
/// The textual form is `namespace/name`; a bare `name` parses into the
/// `default` namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectKey {
    /// Namespace of the object.
    pub namespace: String,
    /// Name of the object, unique within its namespace.
    pub name: String,
}

impl ObjectKey {
    /// Creates a key without validating its parts.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Returns a key for `name` in the same namespace as `self`.
    #[must_use]
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        Self::new(self.namespace.clone(), name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ObjectKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, name) = match s.split_once('/') {
            Some((ns, name)) => (ns, name),
            None => (DEFAULT_NAMESPACE, s),
        };

        for (part, what) in [(namespace, "namespace"), (name, "name")] {
            if !is_dns_label(part) {
                return Err(ConfigError::invalid_key(
                    s,
                    format!(
                        "{what} must be 1-{MAX_NAME_LEN} lowercase alphanumeric characters or '-', \
                         starting and ending with an alphanumeric character"
                    ),
                ));
            }
        }

        Ok(Self::new(namespace, name))
    }
}

/// Stored keys only need their `namespace/name` shape back; unit names
/// derived from a maximal instance name are longer than a DNS label.
impl TryFrom<String> for ObjectKey {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(namespace, name))
            }
            _ => Err(ConfigError::invalid_key(
                s.as_str(),
                "expected a stored key of the form namespace/name",
            )),
        }
    }
}

impl From<ObjectKey> for String {
    fn from(key: ObjectKey) -> Self {
        key.to_string()
    }
}

/// Returns true if `s` is a valid DNS-1123 label.
#[must_use]
pub fn is_dns_label(s: &str) -> bool {
    if s.is_empty() || s.len() > MAX_NAME_LEN {
        return false;
    }
    let bytes = s.as_bytes();
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    edge_ok(bytes[0])
        && edge_ok(bytes[bytes.len() - 1])
        && bytes
            .iter()
            .all(|&b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Metadata common to every stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name.
    pub name: String,
    /// Object namespace.
    #[serde(default)]
    pub namespace: String,
    /// Unique id assigned by the store on creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Opaque version of the stored object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// Generation of the desired state, bumped on spec changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
    /// Labels attached to the object.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Objects that own this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    /// When the object was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Set once deletion of the object has been requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Creates metadata with just a name and namespace.
    #[must_use]
    pub fn named(key: &ObjectKey) -> Self {
        Self {
            name: key.name.clone(),
            namespace: key.namespace.clone(),
            ..Self::default()
        }
    }

    /// Returns the key of this object.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    /// Returns the controlling owner reference, if any.
    #[must_use]
    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }

    /// Returns true once deletion has been requested.
    #[must_use]
    pub const fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

/// Link from an owned object to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    /// API version of the owner.
    pub api_version: String,
    /// Kind of the owner.
    pub kind: String,
    /// Name of the owner.
    pub name: String,
    /// Uid of the owner.
    pub uid: String,
    /// Whether the owner is the managing controller.
    #[serde(default)]
    pub controller: bool,
    /// Whether the owner's deletion waits for this object.
    #[serde(default)]
    pub block_owner_deletion: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key() {
        let key: ObjectKey = "team-a/app".parse().unwrap();
        assert_eq!(key, ObjectKey::new("team-a", "app"));
        assert_eq!(key.to_string(), "team-a/app");

        let key: ObjectKey = "app".parse().unwrap();
        assert_eq!(key.namespace, DEFAULT_NAMESPACE);
    }

    #[test]
    fn test_reject_invalid_key() {
        assert!("".parse::<ObjectKey>().is_err());
        assert!("Team/app".parse::<ObjectKey>().is_err());
        assert!("default/app_1".parse::<ObjectKey>().is_err());
        assert!("default/-app".parse::<ObjectKey>().is_err());
        assert!("a/b/c".parse::<ObjectKey>().is_err());
        assert!(format!("default/{}", "a".repeat(64)).parse::<ObjectKey>().is_err());
    }

    #[test]
    fn test_key_serde() {
        let key = ObjectKey::new("default", "app");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"default/app\"");

        let bad: Result<ObjectKey, _> = serde_json::from_str("\"no-namespace\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_stored_key_longer_than_label() {
        let name = format!("{}-pod-0", "a".repeat(60));
        let key: ObjectKey = serde_json::from_str(&format!("\"default/{name}\"")).unwrap();
        assert_eq!(key, ObjectKey::new("default", name.as_str()));

        // Command-line input keeps the label rule.
        assert!(format!("default/{name}").parse::<ObjectKey>().is_err());
    }

    #[test]
    fn test_meta_wire_names() {
        let meta: ObjectMeta = serde_json::from_str(
            r#"{
                "name": "app-pod-0",
                "namespace": "default",
                "resourceVersion": "12",
                "labels": {"app": "app"},
                "ownerReferences": [{
                    "apiVersion": "mygroup.mydomain.com/v1alpha1",
                    "kind": "AppInstance",
                    "name": "app",
                    "uid": "u-1",
                    "controller": true,
                    "blockOwnerDeletion": true
                }],
                "deletionTimestamp": "2026-01-01T00:00:00Z"
            }"#,
        )
        .unwrap();

        assert_eq!(meta.resource_version.as_deref(), Some("12"));
        assert_eq!(meta.controller_ref().map(|r| r.uid.as_str()), Some("u-1"));
        assert!(meta.is_terminating());
    }
}
