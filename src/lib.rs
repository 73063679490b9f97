//! # podsync
//!
//! A synchronization engine for podcast clients speaking the gpodder sync
//! protocol: subscription lists and episode actions shared between the
//! devices of one user.
//!
//! ## Core Concepts
//!
//! - **Subscription snapshots**: every up-sync writes the device's complete
//!   feed set as a new version; down-sync diffs an old version against the
//!   latest
//! - **Action log**: per-user append-only log of episode actions; the cursor
//!   is the number of actions already seen
//! - **Devices**: caption and type per device, with subscription counts
//!   derived from the latest snapshot
//! - **Coordinator**: request-level façade returning cursors and rewrite maps
//!
//! ## Example
//!
//! ```ignore
//! use podsync::{StoreConfig, SubscriptionChanges, SubscriptionQuery, SyncCoordinator, SyncStore};
//! use std::sync::Arc;
//!
//! let store = SyncStore::open_or_create(StoreConfig {
//!     path: "./podsync-data".into(),
//!     ..Default::default()
//! })?;
//! let sync = SyncCoordinator::new(Arc::new(store));
//!
//! let up = sync.push_subscriptions("alice", "phone", &SubscriptionChanges {
//!     add: vec!["http://example.com/feed.xml".into()],
//!     remove: vec![],
//! })?;
//! assert_eq!(up.timestamp, 1);
//!
//! let down = sync.pull_subscriptions("alice", "phone", &SubscriptionQuery::default())?;
//! assert_eq!(down.add, vec!["http://example.com/feed.xml".to_string()]);
//! ```

pub mod actions;
pub mod coordinator;
pub mod devices;
pub mod error;
pub mod storage;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use actions::{ActionLog, ActionLogFile, ActionPage, ActionUpload};
pub use coordinator::{
    ActionQuery, BareFeedDirectory, CoordinatorConfig, EpisodeActions, FeedDirectory,
    SubscriptionChanges, SubscriptionDelta, SubscriptionQuery, SyncCoordinator, UploadResponse,
};
pub use devices::DeviceRegistry;
pub use error::{Result, SyncError};
pub use store::{StoreConfig, SyncStore};
pub use subscriptions::{SnapshotDir, SubscriptionDiff, SubscriptionStore, SubscriptionUpdate};
pub use types::*;
