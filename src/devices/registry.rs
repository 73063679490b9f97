//! Device registry implementation.

use crate::error::Result;
use crate::storage::{frame, key_dir, validate_key, KeyedLocks};
use crate::subscriptions::SubscriptionStore;
use crate::types::{DeviceRecord, DeviceType, DeviceUpdate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Magic bytes for the device registry file.
const REGISTRY_MAGIC: &[u8; 4] = b"DEV\0";

/// File name of a user's registry inside their directory.
const REGISTRY_FILE: &str = "devices.bin";

/// Stored part of a device; the subscription count is derived on read.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct DeviceMeta {
    caption: String,
    kind: DeviceType,
}

/// Registry file stored on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    devices: BTreeMap<String, DeviceMeta>,
}

/// Per-user device metadata.
pub struct DeviceRegistry {
    /// Base directory (`<store>/users`).
    root: PathBuf,

    /// Source of derived subscription counts.
    subscriptions: Arc<SubscriptionStore>,

    /// One writer per user registry file.
    locks: KeyedLocks<String>,
}

impl DeviceRegistry {
    pub fn open(root: impl AsRef<Path>, subscriptions: Arc<SubscriptionStore>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        Ok(Self {
            root,
            subscriptions,
            locks: KeyedLocks::new(),
        })
    }

    /// All devices of a user, ordered by id.
    pub fn list(&self, user: &str) -> Result<Vec<DeviceRecord>> {
        validate_key("user", user)?;

        let registry = self.load(user)?;
        registry
            .devices
            .into_iter()
            .map(|(id, meta)| self.record(user, id, meta))
            .collect()
    }

    /// A single device, if registered.
    pub fn get(&self, user: &str, device: &str) -> Result<Option<DeviceRecord>> {
        validate_key("user", user)?;
        validate_key("device", device)?;

        let mut registry = self.load(user)?;
        match registry.devices.remove(device) {
            Some(meta) => self.record(user, device.to_string(), meta).map(Some),
            None => Ok(None),
        }
    }

    /// Create or update a device. Fields left as `None` keep their value.
    pub fn upsert(&self, user: &str, device: &str, update: &DeviceUpdate) -> Result<()> {
        validate_key("user", user)?;
        validate_key("device", device)?;

        self.locks.with(&user.to_string(), || -> Result<()> {
            let mut registry = self.load(user)?;
            let meta = registry.devices.entry(device.to_string()).or_default();
            if let Some(caption) = &update.caption {
                meta.caption = caption.clone();
            }
            if let Some(kind) = update.kind {
                meta.kind = kind;
            }

            self.save(user, &registry)?;
            info!(user, device, "device updated");
            Ok(())
        })
    }

    /// Register `device` with default metadata unless it already exists.
    ///
    /// Returns whether the device was newly created.
    pub fn ensure(&self, user: &str, device: &str) -> Result<bool> {
        validate_key("user", user)?;
        validate_key("device", device)?;

        self.locks.with(&user.to_string(), || -> Result<bool> {
            let mut registry = self.load(user)?;
            if registry.devices.contains_key(device) {
                return Ok(false);
            }

            registry
                .devices
                .insert(device.to_string(), DeviceMeta::default());
            self.save(user, &registry)?;
            info!(user, device, "device registered on first upload");
            Ok(true)
        })
    }

    fn record(&self, user: &str, id: String, meta: DeviceMeta) -> Result<DeviceRecord> {
        let subscriptions = self.subscriptions.subscription_count(user, &id)?;
        Ok(DeviceRecord {
            id,
            caption: meta.caption,
            kind: meta.kind,
            subscriptions,
        })
    }

    fn load(&self, user: &str) -> Result<RegistryFile> {
        let registry: Option<RegistryFile> =
            frame::read_file_opt(&self.registry_path(user), REGISTRY_MAGIC)?;
        Ok(registry.unwrap_or_default())
    }

    fn save(&self, user: &str, registry: &RegistryFile) -> Result<()> {
        let path = self.registry_path(user);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        frame::write_file(&path, REGISTRY_MAGIC, registry)
    }

    fn registry_path(&self, user: &str) -> PathBuf {
        self.root.join(key_dir(user)).join(REGISTRY_FILE)
    }
}
