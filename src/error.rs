//! Error types for the `AppInstance` operator.
//!
//! This module provides the error hierarchy for every stage of a
//! reconciliation pass: configuration, the object stores, the Kubernetes
//! API server, and the reconciler itself.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the operator.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Object store errors (memory and local backends).
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Kubernetes API server errors.
    #[error("API server error: {0}")]
    Api(#[from] ApiError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// An object key could not be parsed.
    #[error("Invalid object key '{key}': {reason}")]
    InvalidKey {
        /// The rejected key text.
        key: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Object store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object does not exist.
    #[error("{kind} not found: {key}")]
    NotFound {
        /// Object kind.
        kind: String,
        /// Object key (`namespace/name`).
        key: String,
    },

    /// An object with the same key already exists.
    #[error("{kind} already exists: {key}")]
    AlreadyExists {
        /// Object kind.
        kind: String,
        /// Object key (`namespace/name`).
        key: String,
    },

    /// The store refused the write because of a concurrent change.
    #[error("Conflicting write: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// The store could not be reached or refused the call.
    #[error("Store unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// Persisted store content is corrupted.
    #[error("Store is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Serialization error.
    #[error("Store serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// Store lock acquisition failed.
    #[error("Failed to acquire store lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// Store lock is held by another process.
    #[error("Store is locked by another controller (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },
}

/// Kubernetes API server errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Authentication or authorization failed.
    #[error("API server rejected credentials: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// The requested object does not exist.
    #[error("Object not found: {path}")]
    NotFound {
        /// Request path.
        path: String,
    },

    /// The object to create already exists.
    #[error("Object already exists: {message}")]
    AlreadyExists {
        /// Message from the API server.
        message: String,
    },

    /// Optimistic concurrency conflict.
    #[error("Conflict: {message}")]
    Conflict {
        /// Message from the API server.
        message: String,
    },

    /// Rate limited.
    #[error("API server rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The API server failed internally.
    #[error("API server error: {status} - {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Message from the API server.
        message: String,
    },

    /// The request was rejected for another reason.
    #[error("API request failed: {status} - {message}")]
    RequestFailed {
        /// HTTP status code.
        status: u16,
        /// Message from the API server.
        message: String,
    },

    /// Network error.
    #[error("Network error communicating with the API server: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response body.
    #[error("Invalid response from the API server: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The instance has no uid, so no ownership link can be built.
    #[error("Instance '{key}' has no uid; cannot set owner reference")]
    MissingOwnerUid {
        /// Instance key.
        key: String,
    },

    /// A lifecycle action failed part-way through a batch.
    #[error("Failed to {action} unit '{unit}': {reason}")]
    ActionFailed {
        /// Action verb (create/delete).
        action: String,
        /// Unit name.
        unit: String,
        /// Reason for failure.
        reason: String,
    },

    /// The reconciliation was aborted.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for operator operations.
pub type Result<T> = std::result::Result<T, OperatorError>;

impl OperatorError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error means the addressed object does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::NotFound { .. }) | Self::Api(ApiError::NotFound { .. })
        )
    }

    /// Returns true if this error means the object's name is already taken.
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::AlreadyExists { .. }) | Self::Api(ApiError::AlreadyExists { .. })
        )
    }

    /// Returns true if this error is expected to clear on its own.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Store(
                StoreError::Conflict { .. }
                    | StoreError::Unavailable { .. }
                    | StoreError::LockFailed { .. }
            ) | Self::Api(
                ApiError::Conflict { .. }
                    | ApiError::RateLimited { .. }
                    | ApiError::ServerError { .. }
                    | ApiError::NetworkError { .. }
            )
        )
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Api(ApiError::RateLimited { retry_after_secs }) => Some(*retry_after_secs),
            Self::Api(ApiError::NetworkError { .. } | ApiError::ServerError { .. }) => Some(5),
            Self::Store(StoreError::LockFailed { .. }) => Some(2),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates an invalid key error.
    #[must_use]
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

impl StoreError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(kind: &str, key: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            key: key.to_string(),
        }
    }

    /// Creates an already-exists error.
    #[must_use]
    pub fn already_exists(kind: &str, key: impl std::fmt::Display) -> Self {
        Self::AlreadyExists {
            kind: kind.to_string(),
            key: key.to_string(),
        }
    }

    /// Creates an unavailable error with the given message.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ApiError {
    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Creates an invalid response error.
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        let err = OperatorError::from(StoreError::not_found("AppInstance", "default/app"));
        assert!(err.is_not_found());
        assert!(!err.is_retryable());

        let err = OperatorError::from(ApiError::NotFound {
            path: String::from("/api/v1/namespaces/default/pods/app-pod-0"),
        });
        assert!(err.is_not_found());
    }

    #[test]
    fn test_already_exists() {
        let err = OperatorError::from(StoreError::already_exists("Unit", "default/app-pod-0"));
        assert!(err.is_already_exists());
        assert!(!err.is_retryable());

        let err = OperatorError::from(ApiError::AlreadyExists {
            message: String::from("pods \"app-pod-0\" already exists"),
        });
        assert!(err.is_already_exists());
        assert!(!OperatorError::from(StoreError::unavailable("down")).is_already_exists());
    }

    #[test]
    fn test_retry_hints() {
        let err = OperatorError::from(ApiError::RateLimited { retry_after_secs: 17 });
        assert!(err.is_retryable());
        assert_eq!(err.retry_delay_secs(), Some(17));

        let err = OperatorError::from(StoreError::unavailable("connection reset"));
        assert!(err.is_retryable());
        assert_eq!(err.retry_delay_secs(), None);

        let err = OperatorError::from(ReconcileError::MissingOwnerUid {
            key: String::from("default/app"),
        });
        assert!(!err.is_retryable());
    }
}
