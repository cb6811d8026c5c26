//! Error types for snapshot operations.

use crate::types::{FiscalBookId, SnapshotId};
use std::time::Duration;
use thiserror::Error;

/// Main error type for snapshot, rollback and retention operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(SnapshotId),

    #[error("Fiscal book not found: {0}")]
    FiscalBookNotFound(FiscalBookId),

    #[error("Snapshot {0} is protected")]
    Protected(SnapshotId),

    #[error("Confirmation text does not match the name of fiscal book {0}")]
    ConfirmationMismatch(FiscalBookId),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Collaborator failure: {0}")]
    Collaborator(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,
}

impl SnapshotError {
    /// Build a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Build a timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// True when the referenced snapshot or fiscal book no longer exists.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SnapshotError::SnapshotNotFound(_) | SnapshotError::FiscalBookNotFound(_)
        )
    }

    /// True for transient failures that are safe to retry with backoff.
    ///
    /// Only read operations should be retried automatically. A timed-out
    /// rollback needs a human to look at the ledger first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SnapshotError::Timeout { .. })
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(e: serde_json::Error) -> Self {
        SnapshotError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for SnapshotError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        SnapshotError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for SnapshotError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        SnapshotError::Deserialization(e.to_string())
    }
}

/// Result type for snapshot operations.
pub type Result<T> = std::result::Result<T, SnapshotError>;
