//! Per-user action logs.

use crate::actions::ActionLogFile;
use crate::error::Result;
use crate::storage::{key_dir, validate_key};
use crate::types::{EpisodeAction, Offset, RewriteMap};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// File name of a user's log inside their directory.
const LOG_FILE: &str = "actions.log";

/// Result of a read: the actions and the cursor to resume from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPage {
    pub actions: Vec<EpisodeAction>,
    pub offset: Offset,
}

/// Result of an append.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionUpload {
    pub offset: Offset,
    pub rewrites: RewriteMap,
}

/// Action logs for all users, opened on first use.
pub struct ActionLog {
    /// Base directory (`<store>/users`).
    root: PathBuf,

    /// Open logs by user id, least recently used last.
    ///
    /// At most one `ActionLogFile` exists per user: lookups and opens happen
    /// under this lock, and only logs nobody else holds are closed.
    logs: Mutex<LruCache<String, Arc<ActionLogFile>>>,

    /// Idle logs beyond this many are closed.
    max_open: usize,

    sync_on_append: bool,
}

impl ActionLog {
    pub fn open(root: impl AsRef<Path>, sync_on_append: bool, max_open: usize) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        Ok(Self {
            root,
            logs: Mutex::new(LruCache::unbounded()),
            max_open: max_open.max(1),
            sync_on_append,
        })
    }

    /// Actions appended at or after `offset`, in append order.
    ///
    /// An offset at or past the end yields no actions and the unchanged length.
    pub fn read_since(&self, user: &str, offset: Offset) -> Result<ActionPage> {
        validate_key("user", user)?;

        let (actions, offset) = match self.existing(user)? {
            Some(log) => log.read_since(offset)?,
            None => (Vec::new(), Offset(0)),
        };
        Ok(ActionPage { actions, offset })
    }

    /// Append `actions` as one batch and return the new log length.
    pub fn append(&self, user: &str, actions: &[EpisodeAction]) -> Result<ActionUpload> {
        validate_key("user", user)?;

        let log = self.open_log(user)?;
        let offset = log.append(actions)?;

        info!(user, appended = actions.len(), %offset, "action log advanced");

        Ok(ActionUpload {
            offset,
            rewrites: RewriteMap::new(),
        })
    }

    /// Number of actions logged for `user`.
    pub fn len(&self, user: &str) -> Result<Offset> {
        validate_key("user", user)?;
        Ok(self
            .existing(user)?
            .map(|log| log.len())
            .unwrap_or_default())
    }

    /// Number of logs currently held open.
    pub fn open_logs(&self) -> usize {
        self.logs.lock().len()
    }

    /// Flush every open log.
    pub fn sync(&self) -> Result<()> {
        for (_, log) in self.logs.lock().iter() {
            log.sync()?;
        }
        Ok(())
    }

    /// The user's log if it exists, without creating anything on disk.
    fn existing(&self, user: &str) -> Result<Option<Arc<ActionLogFile>>> {
        if let Some(log) = self.logs.lock().get(user) {
            return Ok(Some(Arc::clone(log)));
        }

        if !self.log_path(user).exists() {
            return Ok(None);
        }
        self.open_log(user).map(Some)
    }

    fn open_log(&self, user: &str) -> Result<Arc<ActionLogFile>> {
        let mut logs = self.logs.lock();
        if let Some(log) = logs.get(user) {
            return Ok(Arc::clone(log));
        }

        let path = self.log_path(user);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let log = Arc::new(ActionLogFile::open(&path, self.sync_on_append)?);
        logs.put(user.to_string(), Arc::clone(&log));
        self.close_idle(&mut logs);
        Ok(log)
    }

    /// Close least recently used logs until the cap is met, skipping any
    /// still held by a reader or writer.
    fn close_idle(&self, logs: &mut LruCache<String, Arc<ActionLogFile>>) {
        let excess = logs.len().saturating_sub(self.max_open);
        if excess == 0 {
            return;
        }

        let idle: Vec<String> = logs
            .iter()
            .rev()
            .filter(|(_, log)| Arc::strong_count(log) == 1)
            .map(|(user, _)| user.clone())
            .take(excess)
            .collect();

        for user in idle {
            if let Some(log) = logs.pop(&user) {
                if let Err(e) = log.sync() {
                    warn!(user = %user, error = %e, "failed to sync action log on close");
                }
                debug!(user = %user, "closed idle action log");
            }
        }
    }

    fn log_path(&self, user: &str) -> PathBuf {
        self.root.join(key_dir(user)).join(LOG_FILE)
    }
}
