//! Error types for tandem-core

use thiserror::Error;

use crate::models::{CommittedOperation, ResourceKey};

/// Result type alias using tandem-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tandem-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// No initialized state exists for the resource
    #[error("Resource not found: {0}")]
    ResourceNotFound(ResourceKey),

    /// The operation claims a base version the resource never reached
    #[error("Invalid base version {base} for resource at version {current}")]
    InvalidVersion { base: u64, current: u64 },

    /// The transformer rejected the operation
    #[error("Operation conflicts with {} committed operation(s) at version {current_version}", conflicts.len())]
    Conflict {
        current_version: u64,
        conflicts: Vec<CommittedOperation>,
    },

    /// A conditional write found the stored version had moved on
    #[error("Version mismatch: expected {expected}, found {actual}")]
    VersionMismatch { expected: u64, actual: u64 },

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether the caller may retry (after rebasing, for conflicts)
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. }
                | Self::VersionMismatch { .. }
                | Self::Database(_)
                | Self::LibSql(_)
        )
    }
}
