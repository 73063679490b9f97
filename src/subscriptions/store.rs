//! Subscription store: diff-since and apply-update over snapshot chains.

use crate::error::{Result, SyncError};
use crate::storage::{key_dir, validate_key, KeyedLocks};
use crate::subscriptions::SnapshotDir;
use crate::types::{RewriteMap, Version};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Changes a device must apply to catch up with the latest version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionDiff {
    pub add: Vec<String>,
    pub remove: Vec<String>,
    pub latest: Version,
}

/// Outcome of an up-sync.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionUpdate {
    pub version: Version,
    pub rewrites: RewriteMap,
}

type SubKey = (String, String);

/// Versioned subscription sets for every (user, device).
pub struct SubscriptionStore {
    /// Base directory (`<store>/users`).
    root: PathBuf,

    /// One writer per (user, device).
    locks: KeyedLocks<SubKey>,

    /// Snapshots are immutable once written, so cached sets never go stale.
    cache: Mutex<LruCache<(String, String, Version), Arc<BTreeSet<String>>>>,
}

impl SubscriptionStore {
    /// Open the store rooted at `root`, caching up to `cache_size` snapshots.
    pub fn open(root: impl AsRef<Path>, cache_size: usize) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            root,
            locks: KeyedLocks::new(),
            cache: Mutex::new(LruCache::new(cache_size)),
        })
    }

    /// Current version for a device (0 if it never uploaded).
    pub fn version(&self, user: &str, device: &str) -> Result<Version> {
        validate(user, device)?;
        self.dir(user, device).head()
    }

    /// The set stored as `version`, or `None` if that version was never written.
    pub fn snapshot_at(
        &self,
        user: &str,
        device: &str,
        version: Version,
    ) -> Result<Option<Arc<BTreeSet<String>>>> {
        validate(user, device)?;
        self.load(user, device, version)
    }

    /// Current version and its set.
    pub fn current(&self, user: &str, device: &str) -> Result<(Version, Arc<BTreeSet<String>>)> {
        validate(user, device)?;
        self.load_current(user, device)
    }

    /// Number of feeds in the device's current set.
    pub fn subscription_count(&self, user: &str, device: &str) -> Result<u64> {
        let (_, feeds) = self.current(user, device)?;
        Ok(feeds.len() as u64)
    }

    /// Compute what changed between `since` and the current version.
    ///
    /// A `since` that was never written (0 included) diffs against the empty set.
    pub fn diff_since(&self, user: &str, device: &str, since: Version) -> Result<SubscriptionDiff> {
        validate(user, device)?;

        let (latest, current) = self.load_current(user, device)?;
        let base = match self.load(user, device, since)? {
            Some(base) => base,
            None => {
                debug!(user, device, %since, "unknown base version, diffing against empty set");
                Arc::new(BTreeSet::new())
            }
        };

        let add: Vec<String> = current.difference(&base).cloned().collect();
        let remove: Vec<String> = base.difference(&current).cloned().collect();

        debug!(
            user,
            device,
            %since,
            %latest,
            added = add.len(),
            removed = remove.len(),
            "computed subscription diff"
        );

        Ok(SubscriptionDiff {
            add,
            remove,
            latest,
        })
    }

    /// Write `(current ∪ add) \ remove` as the next version.
    ///
    /// Writers on the same (user, device) serialize, so no update is lost.
    pub fn apply_update(
        &self,
        user: &str,
        device: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<SubscriptionUpdate> {
        self.apply(user, device, None, add, remove)
    }

    /// Like [`apply_update`](Self::apply_update), but only if the current
    /// version is still `expected`.
    pub fn apply_update_at(
        &self,
        user: &str,
        device: &str,
        expected: Version,
        add: &[String],
        remove: &[String],
    ) -> Result<SubscriptionUpdate> {
        self.apply(user, device, Some(expected), add, remove)
    }

    /// Number of snapshots currently cached.
    pub fn cached_snapshots(&self) -> usize {
        self.cache.lock().len()
    }

    fn apply(
        &self,
        user: &str,
        device: &str,
        expected: Option<Version>,
        add: &[String],
        remove: &[String],
    ) -> Result<SubscriptionUpdate> {
        validate(user, device)?;

        let key = (user.to_string(), device.to_string());
        self.locks.with(&key, || -> Result<SubscriptionUpdate> {
            let (current_version, current) = self.load_current(user, device)?;
            if let Some(expected) = expected {
                if expected != current_version {
                    warn!(user, device, %expected, actual = %current_version, "subscription update conflict");
                    return Err(SyncError::ConcurrentModification {
                        expected,
                        actual: current_version,
                    });
                }
            }

            let mut next: BTreeSet<String> = (*current).clone();
            next.extend(add.iter().cloned());
            for url in remove {
                next.remove(url);
            }

            let version = current_version.next();
            self.dir(user, device).commit(version, &next)?;
            self.cache
                .lock()
                .put((user.to_string(), device.to_string(), version), Arc::new(next));

            info!(
                user,
                device,
                %version,
                added = add.len(),
                removed = remove.len(),
                "subscription version advanced"
            );

            Ok(SubscriptionUpdate {
                version,
                rewrites: RewriteMap::new(),
            })
        })
    }

    fn load_current(&self, user: &str, device: &str) -> Result<(Version, Arc<BTreeSet<String>>)> {
        let version = self.dir(user, device).head()?;
        match self.load(user, device, version)? {
            Some(feeds) => Ok((version, feeds)),
            None => Err(SyncError::Corruption(format!(
                "head of {}/{} names missing version {}",
                user, device, version
            ))),
        }
    }

    fn load(
        &self,
        user: &str,
        device: &str,
        version: Version,
    ) -> Result<Option<Arc<BTreeSet<String>>>> {
        if version.is_empty() {
            return Ok(Some(Arc::new(BTreeSet::new())));
        }

        let key = (user.to_string(), device.to_string(), version);
        if let Some(feeds) = self.cache.lock().get(&key) {
            return Ok(Some(Arc::clone(feeds)));
        }

        let loaded = match self.dir(user, device).load(version)? {
            Some(feeds) => Arc::new(feeds),
            None => return Ok(None),
        };
        self.cache.lock().put(key, Arc::clone(&loaded));
        Ok(Some(loaded))
    }

    fn dir(&self, user: &str, device: &str) -> SnapshotDir {
        SnapshotDir::new(
            self.root
                .join(key_dir(user))
                .join("subscriptions")
                .join(key_dir(device)),
        )
    }
}

fn validate(user: &str, device: &str) -> Result<()> {
    validate_key("user", user)?;
    validate_key("device", device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn urls(items: &[&str]) -> Vec<String> {
        items.iter().map(|u| u.to_string()).collect()
    }

    fn test_store(dir: &TempDir) -> SubscriptionStore {
        SubscriptionStore::open(dir.path().join("users"), 16).unwrap()
    }

    #[test]
    fn test_fresh_device_diff_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let diff = store.diff_since("alice", "phone", Version(0)).unwrap();
        assert!(diff.add.is_empty());
        assert!(diff.remove.is_empty());
        assert_eq!(diff.latest, Version(0));
    }

    #[test]
    fn test_versions_increment() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        for expected in 1..=5 {
            let update = store
                .apply_update("alice", "phone", &urls(&["http://a"]), &[])
                .unwrap();
            assert_eq!(update.version, Version(expected));
            assert!(update.rewrites.is_empty());
        }
    }

    #[test]
    fn test_diff_against_superseded_version() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store
            .apply_update("alice", "phone", &urls(&["http://a", "http://b"]), &[])
            .unwrap();
        store
            .apply_update("alice", "phone", &urls(&["http://c"]), &urls(&["http://a"]))
            .unwrap();
        store
            .apply_update("alice", "phone", &urls(&["http://d"]), &[])
            .unwrap();

        let diff = store.diff_since("alice", "phone", Version(1)).unwrap();
        assert_eq!(diff.add, urls(&["http://c", "http://d"]));
        assert_eq!(diff.remove, urls(&["http://a"]));
        assert_eq!(diff.latest, Version(3));
    }

    #[test]
    fn test_unknown_since_diffs_against_empty() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        store
            .apply_update("alice", "phone", &urls(&["http://a"]), &[])
            .unwrap();

        let diff = store.diff_since("alice", "phone", Version(99)).unwrap();
        assert_eq!(diff.add, urls(&["http://a"]));
        assert!(diff.remove.is_empty());
    }

    #[test]
    fn test_devices_are_independent() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store
            .apply_update("alice", "phone", &urls(&["http://a"]), &[])
            .unwrap();

        assert_eq!(store.version("alice", "laptop").unwrap(), Version(0));
        assert_eq!(store.version("bob", "phone").unwrap(), Version(0));
        assert_eq!(store.subscription_count("alice", "phone").unwrap(), 1);
    }

    #[test]
    fn test_compare_and_swap() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store
            .apply_update_at("alice", "phone", Version(0), &urls(&["http://a"]), &[])
            .unwrap();

        let stale =
            store.apply_update_at("alice", "phone", Version(0), &urls(&["http://b"]), &[]);
        assert!(matches!(
            stale,
            Err(SyncError::ConcurrentModification {
                expected: Version(0),
                actual: Version(1)
            })
        ));

        // Nothing was written by the rejected call
        let (version, feeds) = store.current("alice", "phone").unwrap();
        assert_eq!(version, Version(1));
        assert!(!feeds.contains("http://b"));
    }

    #[test]
    fn test_reads_survive_cold_cache() {
        let dir = TempDir::new().unwrap();
        {
            let store = test_store(&dir);
            store
                .apply_update("alice", "phone", &urls(&["http://a"]), &[])
                .unwrap();
        }

        let store = test_store(&dir);
        assert_eq!(store.cached_snapshots(), 0);
        let (version, feeds) = store.current("alice", "phone").unwrap();
        assert_eq!(version, Version(1));
        assert!(feeds.contains("http://a"));
        assert_eq!(store.cached_snapshots(), 1);
    }

    #[test]
    fn test_empty_ids_rejected() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        assert!(matches!(
            store.apply_update("", "phone", &[], &[]),
            Err(SyncError::InvalidKey(_))
        ));
        assert!(matches!(
            store.diff_since("alice", "", Version(0)),
            Err(SyncError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_write_locks_released_per_device() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        for i in 0..50 {
            store
                .apply_update("alice", &format!("device-{}", i), &urls(&["http://a"]), &[])
                .unwrap();
        }
        assert!(store.locks.is_empty());

        // A failed compare-and-swap releases its lock too
        assert!(store
            .apply_update_at("alice", "device-0", Version(0), &[], &[])
            .is_err());
        assert!(store.locks.is_empty());
    }
}
