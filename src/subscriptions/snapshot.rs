//! On-disk layout of one (user, device) snapshot chain.

use crate::error::{Result, SyncError};
use crate::storage::frame;
use crate::types::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Magic bytes for snapshot files.
const SNAPSHOT_MAGIC: &[u8; 4] = b"SNP\0";

/// Magic bytes for the head marker.
const HEAD_MAGIC: &[u8; 4] = b"HED\0";

/// Name of the head marker file.
const HEAD_FILE: &str = "HEAD";

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    version: Version,
    feeds: BTreeSet<String>,
}

#[derive(Serialize, Deserialize)]
struct HeadMarker {
    version: Version,
}

/// Directory holding `<version>.snap` files plus a `HEAD` marker.
pub struct SnapshotDir {
    path: PathBuf,
}

impl SnapshotDir {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current version, or 0 when nothing was ever written.
    pub fn head(&self) -> Result<Version> {
        let marker: Option<HeadMarker> =
            frame::read_file_opt(&self.path.join(HEAD_FILE), HEAD_MAGIC)?;
        Ok(marker.map(|m| m.version).unwrap_or(Version::EMPTY))
    }

    /// Load the set stored as `version`. Version 0 is always the empty set.
    pub fn load(&self, version: Version) -> Result<Option<BTreeSet<String>>> {
        if version.is_empty() {
            return Ok(Some(BTreeSet::new()));
        }

        let file: Option<SnapshotFile> =
            frame::read_file_opt(&self.snapshot_path(version), SNAPSHOT_MAGIC)?;
        match file {
            Some(file) if file.version != version => Err(SyncError::Corruption(format!(
                "snapshot file for version {} holds version {}",
                version, file.version
            ))),
            Some(file) => Ok(Some(file.feeds)),
            None => Ok(None),
        }
    }

    /// Durably write `feeds` as `version`, then move the head marker to it.
    ///
    /// A crash between the two steps leaves an unreferenced snapshot file that
    /// the next write of the same version replaces.
    pub fn commit(&self, version: Version, feeds: &BTreeSet<String>) -> Result<()> {
        fs::create_dir_all(&self.path)?;

        let file = SnapshotFile {
            version,
            feeds: feeds.clone(),
        };
        frame::write_file(&self.snapshot_path(version), SNAPSHOT_MAGIC, &file)?;
        frame::write_file(
            &self.path.join(HEAD_FILE),
            HEAD_MAGIC,
            &HeadMarker { version },
        )
    }

    fn snapshot_path(&self, version: Version) -> PathBuf {
        self.path.join(format!("{}.snap", version.0))
    }
}
