//! Configuration specification types for the operator.
//!
//! This module defines the structs that map to `appinstance.yaml`. Every
//! section has defaults, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::model::{INSTANCE_API_VERSION, INSTANCE_KIND};

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Cluster backend configuration.
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Instance resource coordinates.
    #[serde(default)]
    pub resource: ResourceConfig,
    /// Template for created units.
    #[serde(default)]
    pub unit: UnitTemplate,
    /// Work queue and resync settings.
    #[serde(default)]
    pub controller: ControllerConfig,
}

/// Cluster backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: ClusterBackend,
    /// API server URL (kube backend).
    #[serde(default)]
    pub api_server: Option<String>,
    /// Bearer token (kube backend).
    #[serde(default)]
    pub token: Option<String>,
    /// File holding the bearer token (kube backend).
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    /// PEM bundle of CAs to trust (kube backend).
    #[serde(default)]
    pub ca_cert_file: Option<PathBuf>,
    /// Skip TLS certificate verification (kube backend).
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
    /// Request timeout in seconds (kube backend).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Store file path (local backend).
    #[serde(default)]
    pub state_path: Option<PathBuf>,
}

/// Cluster backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClusterBackend {
    /// Local file-based store.
    #[default]
    Local,
    /// Kubernetes API server.
    Kube,
}

/// Coordinates of the instance custom resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceConfig {
    /// API group.
    #[serde(default = "default_group")]
    pub group: String,
    /// API version within the group.
    #[serde(default = "default_version")]
    pub version: String,
    /// Resource kind.
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Plural resource name used in URLs.
    #[serde(default = "default_plural")]
    pub plural: String,
}

/// Template for the workload of created units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitTemplate {
    /// Container name.
    #[serde(default = "default_container_name")]
    pub container_name: String,
    /// Container image.
    #[serde(default = "default_image")]
    pub image: String,
    /// Container command.
    #[serde(default = "default_command")]
    pub command: Vec<String>,
}

/// Work queue and resync settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch (all namespaces if unset).
    #[serde(default)]
    pub namespace: Option<String>,
    /// Number of concurrent workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Seconds between full resyncs.
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,
    /// Initial requeue delay after a failed pass, in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Maximum requeue delay, in seconds.
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    30
}

fn default_group() -> String {
    INSTANCE_API_VERSION
        .split_once('/')
        .map_or_else(String::new, |(group, _)| group.to_string())
}

fn default_version() -> String {
    INSTANCE_API_VERSION
        .split_once('/')
        .map_or_else(|| INSTANCE_API_VERSION.to_string(), |(_, v)| v.to_string())
}

fn default_kind() -> String {
    INSTANCE_KIND.to_string()
}

fn default_plural() -> String {
    String::from("appinstances")
}

fn default_container_name() -> String {
    String::from("busybox")
}

fn default_image() -> String {
    String::from("busybox")
}

fn default_command() -> Vec<String> {
    vec![String::from("sleep"), String::from("3600")]
}

const fn default_workers() -> usize {
    2
}

const fn default_resync_interval_secs() -> u64 {
    30
}

const fn default_backoff_base_ms() -> u64 {
    500
}

const fn default_backoff_max_secs() -> u64 {
    300
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            backend: ClusterBackend::default(),
            api_server: None,
            token: None,
            token_file: None,
            ca_cert_file: None,
            insecure_skip_tls_verify: false,
            timeout_secs: default_timeout_secs(),
            state_path: None,
        }
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            group: default_group(),
            version: default_version(),
            kind: default_kind(),
            plural: default_plural(),
        }
    }
}

impl ResourceConfig {
    /// Returns the `apiVersion` string (`group/version`).
    #[must_use]
    pub fn api_version(&self) -> String {
        format!("{}/{}", self.group, self.version)
    }
}

impl Default for UnitTemplate {
    fn default() -> Self {
        Self {
            container_name: default_container_name(),
            image: default_image(),
            command: default_command(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            workers: default_workers(),
            resync_interval_secs: default_resync_interval_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_secs: default_backoff_max_secs(),
        }
    }
}

impl std::fmt::Display for ClusterBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Kube => write!(f, "kube"),
        }
    }
}

impl std::str::FromStr for ClusterBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "kube" | "kubernetes" => Ok(Self::Kube),
            _ => Err(format!("unknown cluster backend: {s}")),
        }
    }
}
