//! Versioned subscription sets.
//!
//! Every (user, device) pair owns a chain of immutable snapshots:
//! - Version 0 is the implicit empty set and is never written
//! - Each up-sync writes version `v + 1` as a complete set
//! - A head marker names the current version, so reads never scan history
//!
//! Down-sync diffs the snapshot a client last saw against the current one.
//!
//! # Example
//!
//! ```ignore
//! let store = SubscriptionStore::open(root.join("users"), 256)?;
//!
//! let update = store.apply_update("alice", "phone", &["http://a".into()], &[])?;
//! assert_eq!(update.version, Version(1));
//!
//! let diff = store.diff_since("alice", "phone", Version(0))?;
//! assert_eq!(diff.add, vec!["http://a".to_string()]);
//! ```

mod snapshot;
mod store;

pub use snapshot::SnapshotDir;
pub use store::{SubscriptionDiff, SubscriptionStore, SubscriptionUpdate};
