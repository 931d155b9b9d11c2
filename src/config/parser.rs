//! Configuration parser for loading and merging configuration files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::{ClusterBackend, OperatorConfig};

/// Service account directory mounted into pods.
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Configuration parser for loading operator configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving the `.env` file.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving the `.env` file.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<OperatorConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// An empty document yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<OperatorConfig> {
        debug!("Parsing YAML configuration");

        if content.trim().is_empty() {
            return Ok(OperatorConfig::default());
        }

        let config: OperatorConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            }
        })?;

        debug!("Parsed configuration for the {} backend", config.cluster.backend);
        Ok(config)
    }

    /// Loads the configuration the CLI runs with.
    ///
    /// Uses `path` if given, otherwise searches from the working directory
    /// upward and falls back to defaults when nothing is found. Environment
    /// overrides are applied last.
    ///
    /// # Errors
    ///
    /// Returns an error if a file is found but invalid, or an override does
    /// not parse.
    pub fn load(&self, path: Option<&Path>) -> Result<OperatorConfig> {
        let mut config = match path {
            Some(path) => self.load_file(path)?,
            None => match std::env::current_dir()
                .ok()
                .and_then(|dir| find_config_file(dir).ok())
            {
                Some(found) => self.load_file(found)?,
                None => {
                    debug!("No configuration file found, using defaults");
                    OperatorConfig::default()
                }
            },
        };

        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    ///
    /// `lookup` resolves a variable name to its value. Recognized variables
    /// are `APPINSTANCE_BACKEND`, `APPINSTANCE_API_SERVER`,
    /// `APPINSTANCE_TOKEN`, `APPINSTANCE_TOKEN_FILE`, `APPINSTANCE_NAMESPACE`,
    /// `APPINSTANCE_STATE_PATH` and `APPINSTANCE_WORKERS`. With the kube
    /// backend and no API server configured, the in-cluster service address
    /// and service account credentials are used.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an unparsable value.
    pub fn apply_env_overrides(
        config: &mut OperatorConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(backend) = lookup("APPINSTANCE_BACKEND") {
            debug!("Overriding cluster.backend from environment");
            config.cluster.backend = backend.parse().map_err(|message| ConfigError::ParseError {
                message,
                location: Some(String::from("APPINSTANCE_BACKEND")),
            })?;
        }

        if let Some(server) = lookup("APPINSTANCE_API_SERVER") {
            debug!("Overriding cluster.api_server from environment");
            config.cluster.api_server = Some(server);
        }

        if let Some(token) = lookup("APPINSTANCE_TOKEN") {
            debug!("Overriding cluster.token from environment");
            config.cluster.token = Some(token);
        }

        if let Some(token_file) = lookup("APPINSTANCE_TOKEN_FILE") {
            debug!("Overriding cluster.token_file from environment");
            config.cluster.token_file = Some(PathBuf::from(token_file));
        }

        if let Some(path) = lookup("APPINSTANCE_STATE_PATH") {
            debug!("Overriding cluster.state_path from environment");
            config.cluster.state_path = Some(PathBuf::from(path));
        }

        if let Some(namespace) = lookup("APPINSTANCE_NAMESPACE") {
            debug!("Overriding controller.namespace from environment");
            config.controller.namespace = Some(namespace);
        }

        if let Some(workers) = lookup("APPINSTANCE_WORKERS") {
            debug!("Overriding controller.workers from environment");
            config.controller.workers = workers.parse().map_err(|e| ConfigError::ParseError {
                message: format!("Invalid worker count '{workers}': {e}"),
                location: Some(String::from("APPINSTANCE_WORKERS")),
            })?;
        }

        if config.cluster.backend == ClusterBackend::Kube && config.cluster.api_server.is_none() {
            Self::apply_in_cluster_defaults(config, &lookup);
        }

        Ok(())
    }

    /// Fills the API server and credentials from the in-cluster environment.
    fn apply_in_cluster_defaults(config: &mut OperatorConfig, lookup: &impl Fn(&str) -> Option<String>) {
        let Some(host) = lookup("KUBERNETES_SERVICE_HOST") else {
            return;
        };
        let port = lookup("KUBERNETES_SERVICE_PORT").unwrap_or_else(|| String::from("443"));

        // IPv6 hosts need brackets in URLs.
        let host = if host.contains(':') { format!("[{host}]") } else { host };
        info!("Using in-cluster API server at {host}:{port}");
        config.cluster.api_server = Some(format!("https://{host}:{port}"));

        let sa_dir = Path::new(SERVICE_ACCOUNT_DIR);
        if config.cluster.token.is_none() && config.cluster.token_file.is_none() {
            config.cluster.token_file = Some(sa_dir.join("token"));
        }
        if config.cluster.ca_cert_file.is_none() {
            config.cluster.ca_cert_file = Some(sa_dir.join("ca.crt"));
        }
        if config.controller.namespace.is_none() {
            if let Ok(namespace) = std::fs::read_to_string(sa_dir.join("namespace")) {
                config.controller.namespace = Some(namespace.trim().to_string());
            }
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "appinstance.yaml",
    "appinstance.yml",
    "operator.yaml",
    "operator.yml",
];

/// Finds the configuration file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }
    .into())
}
