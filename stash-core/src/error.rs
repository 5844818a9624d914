//! Error types for STASH operations

use thiserror::Error;

/// Boxed error returned by user supplied loaders.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Storage tier errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Backend failure in {tier} tier: {reason}")]
    Backend { tier: String, reason: String },

    #[error("Failed to encode record for key {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Failed to decode record for key {key}: {reason}")]
    Deserialization { key: String, reason: String },

    #[error("Entry type mismatch for key {key}: expected {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: String,
        found: String,
    },

    #[error("Corrupted record for key {key}: {reason}")]
    Corrupted { key: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Loader invocation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoaderError {
    #[error("Loader for {key} failed: {reason}")]
    Failed { key: String, reason: String },
}

impl LoaderError {
    /// Wrap a loader's own error, tagging it with the cache key.
    pub fn failed(key: impl Into<String>, source: BoxError) -> Self {
        Self::Failed {
            key: key.into(),
            reason: source.to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Operation not registered: {operation}")]
    UnknownOperation { operation: String },

    #[error("Operation {operation} resolves to {registered}, requested as {requested}")]
    PayloadTypeMismatch {
        operation: String,
        registered: String,
        requested: String,
    },
}

/// Master error type for all STASH errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StashError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for STASH operations.
pub type StashResult<T> = Result<T, StashError>;

// =============================================================================
// TESTS
// =============================================================================
