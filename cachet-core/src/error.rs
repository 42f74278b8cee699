//! Error types for cachet operations

use std::time::Duration;
use thiserror::Error;

/// Cache backend errors.
///
/// These originate from the engine behind a `Client`: the backend being
/// unreachable, refusing a write, or handing back something that cannot be
/// decoded into the requested type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Read failed for {key}: {reason}")]
    Read { key: String, reason: String },

    #[error("Write failed for {key}: {reason}")]
    Write { key: String, reason: String },

    #[error("Delete failed for {key}: {reason}")]
    Delete { key: String, reason: String },

    #[error("Cache engine connection failed: {reason}")]
    Connection { reason: String },
}

/// Value generation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerateError {
    #[error("Generator failed for id '{id}': {reason}")]
    Failed { id: String, reason: String },

    #[error("Generation for id '{id}' timed out after {timeout:?}")]
    Timeout { id: String, timeout: Duration },

    #[error("Generation for id '{id}' ended without producing a result")]
    Abandoned { id: String },
}

impl GenerateError {
    /// Convenience constructor for generator implementations.
    pub fn failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid segment name '{segment}': {reason}")]
    InvalidSegment { segment: String, reason: String },

    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

/// Master error type for all cachet errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CachetError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Generate error: {0}")]
    Generate(#[from] GenerateError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CachetError {
    /// True for the synthetic error produced when `generate_timeout` elapses.
    pub fn is_generate_timeout(&self) -> bool {
        matches!(self, Self::Generate(GenerateError::Timeout { .. }))
    }

    /// True for backend-origin errors.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Result type alias for cachet operations.
pub type CachetResult<T> = Result<T, CachetError>;

// =============================================================================
// TESTS
// =============================================================================
