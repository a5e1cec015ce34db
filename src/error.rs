//! Error types for the email operator.

use std::time::Duration;

use crate::resources::{ObjectKey, ResourceKind};

/// Top-level error type for the operator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Resource store errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: ResourceKind, key: ObjectKey },

    #[error("{kind} {key} was modified concurrently")]
    Conflict { kind: ResourceKind, key: ObjectKey },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Failures while walking the sender config → secret → token chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("SenderConfig not found: {name}")]
    SenderConfigNotFound { name: String },

    #[error("API token secret not found: {name}")]
    CredentialNotFound { name: String },

    #[error("API token not found in secret {secret} (key {key})")]
    CredentialKeyMissing { secret: String, key: String },
}

/// Failures reported by the delivery provider or the path to it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("failed to send email: {status}")]
    ProviderRejected { status: u16, body: String },

    #[error("failed to send email: {0}")]
    TransportFailure(String),
}

/// Errors returned from a reconcile pass. Every variant asks the runtime
/// to requeue the key; terminal business outcomes are reported as `Ok`.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to fetch resource: {0}")]
    Fetch(StoreError),

    #[error("configuration resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("failed to persist status: {0}")]
    Persist(StoreError),

    #[error("reconcile timed out after {0:?}")]
    Timeout(Duration),
}

/// Manifest loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse manifest {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Failed to apply manifest {path}: {source}")]
    Store {
        path: String,
        #[source]
        source: StoreError,
    },
}

/// Result type alias for the operator.
pub type Result<T> = std::result::Result<T, Error>;
