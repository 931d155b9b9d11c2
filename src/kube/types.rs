//! Wire types of the Kubernetes API that are not part of the data model.

use serde::{Deserialize, Serialize};

use crate::model::ObjectMeta;

/// A list response (`PodList`, `AppInstanceList`, ...).
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ObjectList<T> {
    /// Items of the list. The API server sends `null` for an empty list.
    #[serde(default = "Vec::new", deserialize_with = "null_as_empty")]
    pub items: Vec<T>,
}

/// An object of which only the metadata is of interest.
#[derive(Debug, Clone, Deserialize)]
pub struct PartialObject {
    /// Object metadata.
    pub metadata: ObjectMeta,
}

/// The `Status` object returned with API errors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Status {
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
    /// Machine-readable reason, such as `AlreadyExists`.
    #[serde(default)]
    pub reason: String,
    /// HTTP status code.
    #[serde(default)]
    pub code: u16,
}

/// Body of a delete request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOptions {
    /// Garbage collection policy for dependents.
    pub propagation_policy: PropagationPolicy,
}

/// How dependents of a deleted object are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PropagationPolicy {
    /// Delete the object now, dependents in the background.
    Background,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
