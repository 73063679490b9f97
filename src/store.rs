//! Main SyncStore struct tying all components together.

use crate::actions::ActionLog;
use crate::devices::DeviceRegistry;
use crate::error::{Result, SyncError};
use crate::subscriptions::SubscriptionStore;
use crate::types::StoreStats;
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Subscription snapshot cache size (number of snapshots).
    pub snapshot_cache_size: usize,

    /// fsync the action log after every uploaded batch.
    pub sync_on_append: bool,

    /// Action log files kept open at once.
    pub max_open_logs: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./podsync-data"),
            create_if_missing: true,
            snapshot_cache_size: 1024,
            sync_on_append: true,
            max_open_logs: 256,
        }
    }
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"PSY\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// Directory holding per-user data.
const USERS_DIR: &str = "users";

/// The durable sync store.
///
/// Owns the on-disk root and the three stores living under it:
/// - Versioned subscription sets per (user, device)
/// - Append-only episode action logs per user
/// - Device metadata per user
pub struct SyncStore {
    /// Store configuration.
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    subscriptions: Arc<SubscriptionStore>,

    actions: ActionLog,

    devices: DeviceRegistry,
}

impl SyncStore {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(SyncError::NotInitialized)
        }
    }

    /// Create a new store.
    ///
    /// The store lock is taken before the manifest is written, so creating
    /// over a store held elsewhere fails with `Locked` and leaves it untouched.
    pub fn create(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(config.path.join(USERS_DIR))?;
        let lock_file = Self::acquire_lock(&config.path)?;
        Self::write_manifest(&config.path)?;

        info!(path = %config.path.display(), "created sync store");
        Self::init(config, lock_file)
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        info!(path = %config.path.display(), "opened sync store");
        Self::init(config, lock_file)
    }

    fn init(config: StoreConfig, lock_file: File) -> Result<Self> {
        let users = config.path.join(USERS_DIR);
        let subscriptions = Arc::new(SubscriptionStore::open(
            &users,
            config.snapshot_cache_size,
        )?);
        let actions = ActionLog::open(&users, config.sync_on_append, config.max_open_logs)?;
        let devices = DeviceRegistry::open(&users, Arc::clone(&subscriptions))?;

        Ok(Self {
            config,
            _lock_file: lock_file,
            subscriptions,
            actions,
            devices,
        })
    }

    pub fn subscriptions(&self) -> &SubscriptionStore {
        &self.subscriptions
    }

    pub fn actions(&self) -> &ActionLog {
        &self.actions
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    /// Get store statistics.
    pub fn stats(&self) -> Result<StoreStats> {
        let mut user_count = 0;
        for entry in fs::read_dir(self.config.path.join(USERS_DIR))? {
            if entry?.file_type()?.is_dir() {
                user_count += 1;
            }
        }

        Ok(StoreStats {
            user_count,
            cached_snapshots: self.subscriptions.cached_snapshots() as u64,
            open_logs: self.actions.open_logs() as u64,
        })
    }

    /// Sync all data to disk.
    pub fn sync(&self) -> Result<()> {
        self.actions.sync()
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // --- Private Helpers ---

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::open(manifest_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SyncError::NotInitialized,
            _ => SyncError::Storage(e),
        })?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(SyncError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(SyncError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| SyncError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for SyncStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}
