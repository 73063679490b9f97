//! Error types for the sync engine.

use crate::types::Version;
use thiserror::Error;

/// Main error type for sync operations.
///
/// Missing devices, versions and logs are never errors: they read as the
/// empty state.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Concurrent modification: expected version {expected}, found {actual}")]
    ConcurrentModification { expected: Version, actual: Version },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,
}

impl SyncError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Storage(_) | SyncError::ConcurrentModification { .. }
        )
    }

    /// Whether the caller sent something the engine can never accept.
    pub fn is_client_error(&self) -> bool {
        matches!(self, SyncError::InvalidCursor(_) | SyncError::InvalidKey(_))
    }
}

impl From<rmp_serde::encode::Error> for SyncError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for SyncError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        SyncError::Deserialization(e.to_string())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
