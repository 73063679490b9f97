//! Request-level façade over the store.
//!
//! The coordinator turns transport requests (already authenticated, with the
//! user passed in explicitly) into store calls, fills in defaults and shapes
//! the response envelopes clients expect. Store errors pass through unchanged.

use crate::actions::ActionPage;
use crate::error::{Result, SyncError};
use crate::store::SyncStore;
use crate::types::{
    DeviceRecord, DeviceUpdate, EpisodeAction, FeedDescriptor, Offset, RewriteMap, Version,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Looks up metadata for subscribed feeds.
pub trait FeedDirectory: Send + Sync {
    fn describe(&self, url: &str) -> Result<FeedDescriptor>;
}

/// Directory that knows nothing beyond the URL itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct BareFeedDirectory;

impl FeedDirectory for BareFeedDirectory {
    fn describe(&self, url: &str) -> Result<FeedDescriptor> {
        Ok(FeedDescriptor::bare(url))
    }
}

/// Defaults applied when a request leaves a parameter out.
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Cursor used when a down-sync carries no `since`.
    pub default_since: u64,

    /// Whether action down-syncs aggregate unless told otherwise.
    pub default_aggregated: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_since: 0,
            default_aggregated: false,
        }
    }
}

/// Subscription down-sync parameters.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SubscriptionQuery {
    #[serde(default)]
    pub since: Option<Version>,
}

/// Subscription up-sync body.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SubscriptionChanges {
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

/// Subscription down-sync response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionDelta {
    pub add: Vec<String>,
    pub remove: Vec<String>,
    pub timestamp: Version,
}

/// Response to any upload: the new cursor and rewritten URLs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub timestamp: u64,
    pub update_urls: Vec<(String, String)>,
}

impl UploadResponse {
    fn new(timestamp: u64, rewrites: RewriteMap) -> Self {
        Self {
            timestamp,
            update_urls: rewrites.into_iter().collect(),
        }
    }
}

/// Episode action down-sync parameters.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ActionQuery {
    /// Only actions for this feed.
    #[serde(default)]
    pub podcast: Option<String>,

    /// Only actions recorded by this device.
    #[serde(default)]
    pub device: Option<String>,

    #[serde(default)]
    pub since: Option<Offset>,

    /// Keep only the latest action per episode.
    #[serde(default)]
    pub aggregated: Option<bool>,
}

/// Episode action down-sync response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeActions {
    pub actions: Vec<EpisodeAction>,
    pub timestamp: Offset,
}

/// Binds client requests to the store.
pub struct SyncCoordinator<F = BareFeedDirectory> {
    store: Arc<SyncStore>,
    feeds: F,
    config: CoordinatorConfig,
}

impl SyncCoordinator<BareFeedDirectory> {
    pub fn new(store: Arc<SyncStore>) -> Self {
        Self::with_directory(store, BareFeedDirectory, CoordinatorConfig::default())
    }
}

impl<F: FeedDirectory> SyncCoordinator<F> {
    pub fn with_directory(store: Arc<SyncStore>, feeds: F, config: CoordinatorConfig) -> Self {
        Self {
            store,
            feeds,
            config,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Parse a raw `since` parameter; absent means the configured default.
    pub fn parse_cursor(&self, raw: Option<&str>) -> Result<u64> {
        match raw {
            None => Ok(self.config.default_since),
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|_| SyncError::InvalidCursor(raw.to_string())),
        }
    }

    // --- Devices ---

    pub fn list_devices(&self, user: &str) -> Result<Vec<DeviceRecord>> {
        self.store.devices().list(user)
    }

    pub fn update_device(&self, user: &str, device: &str, update: &DeviceUpdate) -> Result<()> {
        self.store.devices().upsert(user, device, update)
    }

    // --- Subscriptions ---

    /// Current subscriptions of a device, described by the feed directory.
    pub fn subscriptions(&self, user: &str, device: &str) -> Result<Vec<FeedDescriptor>> {
        let (_, feeds) = self.store.subscriptions().current(user, device)?;
        feeds.iter().map(|url| self.feeds.describe(url)).collect()
    }

    pub fn pull_subscriptions(
        &self,
        user: &str,
        device: &str,
        query: &SubscriptionQuery,
    ) -> Result<SubscriptionDelta> {
        let since = query.since.unwrap_or(Version(self.config.default_since));
        let diff = self.store.subscriptions().diff_since(user, device, since)?;

        Ok(SubscriptionDelta {
            add: diff.add,
            remove: diff.remove,
            timestamp: diff.latest,
        })
    }

    /// Apply a device's local changes, registering the device once they are stored.
    pub fn push_subscriptions(
        &self,
        user: &str,
        device: &str,
        changes: &SubscriptionChanges,
    ) -> Result<UploadResponse> {
        let update = self.store.subscriptions().apply_update(
            user,
            device,
            &changes.add,
            &changes.remove,
        )?;
        self.store.devices().ensure(user, device)?;

        Ok(UploadResponse::new(update.version.0, update.rewrites))
    }

    // --- Episode actions ---

    /// Actions since the cursor, filtered by podcast and device, optionally
    /// aggregated. `timestamp` is always the full log length.
    pub fn pull_actions(&self, user: &str, query: &ActionQuery) -> Result<EpisodeActions> {
        let since = query.since.unwrap_or(Offset(self.config.default_since));
        let aggregated = query.aggregated.unwrap_or(self.config.default_aggregated);

        let ActionPage { actions, offset } = self.store.actions().read_since(user, since)?;
        let read = actions.len();
        let actions = filter_actions(actions, query, aggregated);

        debug!(user, %since, read, returned = actions.len(), aggregated, "pulled actions");

        Ok(EpisodeActions {
            actions,
            timestamp: offset,
        })
    }

    pub fn push_actions(&self, user: &str, actions: &[EpisodeAction]) -> Result<UploadResponse> {
        let upload = self.store.actions().append(user, actions)?;
        Ok(UploadResponse::new(upload.offset.0, upload.rewrites))
    }
}

fn filter_actions(
    actions: Vec<EpisodeAction>,
    query: &ActionQuery,
    aggregated: bool,
) -> Vec<EpisodeAction> {
    let mut actions: Vec<EpisodeAction> = actions
        .into_iter()
        .filter(|a| query.podcast.as_deref().map_or(true, |p| a.podcast == p))
        .filter(|a| query.device.as_deref().map_or(true, |d| a.device == d))
        .collect();

    if aggregated {
        // Walk newest first so the first action seen per episode is the latest.
        let mut seen = HashSet::new();
        actions.reverse();
        actions.retain(|a| seen.insert((a.podcast.clone(), a.episode.clone())));
        actions.reverse();
    }

    actions
}
