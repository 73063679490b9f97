//! Identifier to directory-name mapping.

use crate::error::{Result, SyncError};
use sha2::{Digest, Sha256};

/// Directory name for a user or device identifier.
///
/// Identifiers are arbitrary client strings, so they are hashed rather than
/// used as path components.
pub fn key_dir(id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Reject identifiers that cannot address anything.
pub fn validate_key(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(SyncError::InvalidKey(format!("{} must not be empty", kind)));
    }
    Ok(())
}
