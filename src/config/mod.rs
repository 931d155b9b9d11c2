//! Configuration module for the operator.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `appinstance.yaml`
//! - Environment overrides, including in-cluster defaults
//! - Validation of configuration values

mod parser;
mod spec;
mod validator;

pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, SERVICE_ACCOUNT_DIR, find_config_file};
pub use spec::{
    ClusterBackend, ClusterConfig, ControllerConfig, OperatorConfig, ResourceConfig, UnitTemplate,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
