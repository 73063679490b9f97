//! Core types for the sync engine.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Version of a (user, device) subscription set. Version 0 is the empty set.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
    /// The implicit empty snapshot every device starts at.
    pub const EMPTY: Version = Version(0);

    pub fn next(self) -> Self {
        Version(self.0 + 1)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version({})", self.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position in a user's action log. Equal to the number of records before it.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Offset(pub u64);

impl fmt::Debug for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Offset({})", self.0)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client URL -> canonical URL, returned after every upload.
pub type RewriteMap = BTreeMap<String, String>;

/// What a client did with an episode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Download,
    Delete,
    Play,
    New,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::Download => "download",
            ActionKind::Delete => "delete",
            ActionKind::Play => "play",
            ActionKind::New => "new",
        };
        f.write_str(s)
    }
}

/// A single episode action as uploaded by a client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeAction {
    /// Feed URL of the podcast.
    pub podcast: String,

    /// Media URL of the episode.
    pub episode: String,

    /// Device that performed the action.
    pub device: String,

    pub action: ActionKind,

    #[serde(with = "action_time")]
    pub timestamp: NaiveDateTime,

    /// Playback start, in seconds (play actions only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<u64>,

    /// Playback stop position, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,

    /// Total episode duration, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
}

impl EpisodeAction {
    /// Create an action without playback fields.
    pub fn new(
        podcast: impl Into<String>,
        episode: impl Into<String>,
        device: impl Into<String>,
        action: ActionKind,
        timestamp: NaiveDateTime,
    ) -> Self {
        Self {
            podcast: podcast.into(),
            episode: episode.into(),
            device: device.into(),
            action,
            timestamp,
            started: None,
            position: None,
            total: None,
            guid: None,
        }
    }

    /// Attach playback progress.
    pub fn with_playback(mut self, started: u64, position: u64, total: u64) -> Self {
        self.started = Some(started);
        self.position = Some(position);
        self.total = Some(total);
        self
    }

    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = Some(guid.into());
        self
    }
}

/// Wire format for action timestamps: `YYYY-MM-DDTHH:MM:SS`, no zone.
pub mod action_time {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&ts.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    /// Parse a timestamp, tolerating fractional seconds.
    pub fn parse(raw: &str) -> Result<NaiveDateTime, chrono::ParseError> {
        NaiveDateTime::parse_from_str(raw, FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
    }
}

/// Kind of client device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Laptop,
    Mobile,
    Server,
    #[default]
    Other,
}

/// Device as listed to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: String,
    pub caption: String,
    #[serde(rename = "type")]
    pub kind: DeviceType,
    /// Size of the device's latest subscription set.
    pub subscriptions: u64,
}

/// Partial device update; `None` keeps the stored value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceUpdate {
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<DeviceType>,
}

impl DeviceUpdate {
    pub fn new(caption: impl Into<String>, kind: DeviceType) -> Self {
        Self {
            caption: Some(caption.into()),
            kind: Some(kind),
        }
    }
}

/// Feed directory entry for a subscribed URL.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedDescriptor {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_last_week: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribers: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mygpo_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaled_logo_url: Option<String>,
}

impl FeedDescriptor {
    /// Descriptor that knows nothing but the URL.
    pub fn bare(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Store statistics.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    pub user_count: u64,
    pub cached_snapshots: u64,
    pub open_logs: u64,
}
