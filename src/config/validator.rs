//! Configuration validation for the operator.
//!
//! This module checks a loaded configuration for values that would make the
//! operator fail at runtime, and warns about ones that are merely unusual.

use crate::error::{ConfigError, Result};
use tracing::debug;

use super::spec::{
    ClusterBackend, ClusterConfig, ControllerConfig, OperatorConfig, ResourceConfig, UnitTemplate,
};
use crate::model::is_dns_label;

/// Upper bound above which a worker count is reported as unusual.
const MANY_WORKERS: usize = 64;

/// Validator for operator configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Collects every error and warning in a configuration.
    #[must_use]
    pub fn check(&self, config: &OperatorConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_cluster(&config.cluster, &mut result);
        Self::validate_resource(&config.resource, &mut result);
        Self::validate_unit(&config.unit, &mut result);
        Self::validate_controller(&config.controller, &mut result);

        result
    }

    /// Validates an operator configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error if validation fails.
    pub fn validate(&self, config: &OperatorConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        match result.errors.first() {
            None => {
                debug!("Configuration validation passed");
                Ok(result)
            }
            Some(first_error) => Err(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }
            .into()),
        }
    }

    fn validate_cluster(cluster: &ClusterConfig, result: &mut ValidationResult) {
        match cluster.backend {
            ClusterBackend::Kube => {
                match cluster.api_server.as_deref() {
                    None | Some("") => result.error(
                        "cluster.api_server",
                        "API server URL is required for the kube backend (or run in-cluster)",
                    ),
                    Some(url) if !url.starts_with("https://") && !url.starts_with("http://") => {
                        result.error(
                            "cluster.api_server",
                            format!("API server URL must start with http:// or https://: {url}"),
                        );
                    }
                    Some(url) if url.starts_with("http://") => result
                        .warnings
                        .push(format!("cluster.api_server: '{url}' is not using TLS")),
                    Some(_) => {}
                }

                if cluster.token.is_some() && cluster.token_file.is_some() {
                    result.error("cluster.token", "Set either token or token_file, not both");
                }
                if cluster.token.is_none() && cluster.token_file.is_none() {
                    result
                        .warnings
                        .push(String::from("cluster: no token configured, requests are anonymous"));
                }
                if cluster.insecure_skip_tls_verify {
                    result.warnings.push(String::from(
                        "cluster.insecure_skip_tls_verify: certificate verification is disabled",
                    ));
                }
                if cluster.timeout_secs == 0 {
                    result.error("cluster.timeout_secs", "Request timeout must be at least 1 second");
                }
            }
            ClusterBackend::Local => {
                if cluster.api_server.is_some() {
                    result
                        .warnings
                        .push(String::from("cluster.api_server is ignored by the local backend"));
                }
            }
        }
    }

    fn validate_resource(resource: &ResourceConfig, result: &mut ValidationResult) {
        if resource.group.is_empty() || resource.group.split('.').any(|part| !is_dns_label(part)) {
            result.error(
                "resource.group",
                format!("API group '{}' is not a valid DNS subdomain", resource.group),
            );
        }
        if !is_dns_label(&resource.version) {
            result.error(
                "resource.version",
                format!("API version '{}' is invalid", resource.version),
            );
        }
        if resource.kind.is_empty() || !resource.kind.starts_with(|c: char| c.is_ascii_uppercase()) {
            result.error(
                "resource.kind",
                format!("Kind '{}' must start with an uppercase letter", resource.kind),
            );
        }
        if !is_dns_label(&resource.plural) {
            result.error(
                "resource.plural",
                format!("Plural name '{}' is invalid", resource.plural),
            );
        }
    }

    fn validate_unit(unit: &UnitTemplate, result: &mut ValidationResult) {
        if !is_dns_label(&unit.container_name) {
            result.error(
                "unit.container_name",
                format!(
                    "Container name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    unit.container_name
                ),
            );
        }

        if unit.image.is_empty() {
            result.error("unit.image", "Container image cannot be empty");
        } else if unit.image.ends_with(":latest") {
            result.warnings.push(String::from(
                "unit.image: Using ':latest' tag is not recommended for production",
            ));
        }

        if unit.command.is_empty() {
            result
                .warnings
                .push(String::from("unit.command: empty, the image entrypoint will be used"));
        }
    }

    fn validate_controller(controller: &ControllerConfig, result: &mut ValidationResult) {
        if let Some(namespace) = controller.namespace.as_deref() {
            if !is_dns_label(namespace) {
                result.error(
                    "controller.namespace",
                    format!("Namespace '{namespace}' is invalid"),
                );
            }
        }

        if controller.workers == 0 {
            result.error("controller.workers", "At least one worker is required");
        } else if controller.workers > MANY_WORKERS {
            result.warnings.push(format!(
                "controller.workers: {} workers is unusual",
                controller.workers
            ));
        }

        if controller.resync_interval_secs == 0 {
            result.error(
                "controller.resync_interval_secs",
                "Resync interval must be at least 1 second",
            );
        }

        if controller.backoff_base_ms == 0 {
            result.error("controller.backoff_base_ms", "Backoff base must be positive");
        }
        if controller.backoff_max_secs.saturating_mul(1000) < controller.backoff_base_ms {
            result.error(
                "controller.backoff_max_secs",
                "Maximum backoff must not be below the backoff base",
            );
        }
    }
}

impl ValidationResult {
    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let result = ConfigValidator::new().check(&OperatorConfig::default());
        assert!(result.is_valid(), "{:?}", result.errors);
    }

    #[test]
    fn test_kube_backend_requires_api_server() {
        let mut config = OperatorConfig::default();
        config.cluster.backend = ClusterBackend::Kube;

        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert!(err.to_string().contains("API server URL is required"));

        config.cluster.api_server = Some(String::from("http://localhost:8001"));
        let result = ConfigValidator::new().validate(&config).unwrap();
        assert!(result.warnings.iter().any(|w| w.contains("not using TLS")));
    }

    #[test]
    fn test_invalid_controller_settings() {
        let mut config = OperatorConfig::default();
        config.controller.workers = 0;
        config.controller.namespace = Some(String::from("Team_A"));
        config.controller.backoff_base_ms = 10_000;
        config.controller.backoff_max_secs = 1;

        let result = ConfigValidator::new().check(&config);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "controller.namespace",
                "controller.workers",
                "controller.backoff_max_secs"
            ]
        );
    }

    #[test]
    fn test_invalid_resource_and_unit() {
        let mut config = OperatorConfig::default();
        config.resource.group = String::from("My_Group");
        config.resource.kind = String::from("appInstance");
        config.unit.image = String::new();

        let result = ConfigValidator::new().check(&config);
        assert_eq!(result.error_count(), 3);
    }
}
