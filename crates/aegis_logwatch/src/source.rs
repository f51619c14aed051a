//! Log source configuration and the offset/cursor abstraction watchers
//! advance as they tail a source.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use aegis_event_bus::ServerId;

/// Where a server's `SquadGame.log` (or equivalent) is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSourceKind {
    Local,
    Sftp,
    Ftp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCredentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key_path: Option<String>,
}

/// Configuration for a single server's log source. Exactly one exists per
/// `ServerId` registered with the watcher manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSourceConfig {
    pub kind: LogSourceKind,
    pub path: String,
    pub credentials: Option<RemoteCredentials>,
    /// Poll interval for SFTP/FTP sources. Ignored for `Local`, which
    /// instead follows filesystem change notifications.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// When true, start tailing from byte 0 instead of the end of the
    /// file on first attach.
    #[serde(default)]
    pub read_from_start: bool,
}

fn default_poll_interval_secs() -> u64 {
    5
}

impl LogSourceConfig {
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            kind: LogSourceKind::Local,
            path: path.into(),
            credentials: None,
            poll_interval_secs: default_poll_interval_secs(),
            read_from_start: false,
        }
    }
}

/// Identifies a specific underlying file instance, so that a truncation
/// or rotation (new file reusing the old name) can be told apart from
/// ordinary growth. Local sources use the inode; remote sources use the
/// size-shrink heuristic (a shrunk or missing file implies rotation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileIdentity {
    pub inode: Option<u64>,
    pub len_at_last_check: u64,
}

impl FileIdentity {
    /// True if `new` looks like a different file than `self`: a changed
    /// inode, or a size that shrank since the last observation.
    pub fn indicates_rotation(&self, new: &FileIdentity) -> bool {
        match (self.inode, new.inode) {
            (Some(old_ino), Some(new_ino)) if old_ino != new_ino => true,
            _ => new.len_at_last_check < self.len_at_last_check,
        }
    }
}

/// Per-server byte offset, persisted across rotations and process
/// restarts so a watcher resumes exactly where it left off. The spec's
/// persisted-state list names this as the only durable state the log
/// watcher keeps.
#[derive(Default)]
pub struct CursorStore {
    offsets: DashMap<ServerId, AtomicU64>,
}

impl CursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, server_id: ServerId) -> u64 {
        self.offsets
            .get(&server_id)
            .map(|o| o.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn set(&self, server_id: ServerId, offset: u64) {
        self.offsets
            .entry(server_id)
            .or_insert_with(|| AtomicU64::new(0))
            .store(offset, Ordering::Release);
    }

    /// Drops the tracked offset, e.g. on rotation, so the next read
    /// starts from 0 (or from the configured `read_from_start` default).
    pub fn reset(&self, server_id: ServerId) {
        self.set(server_id, 0);
    }

    pub fn remove(&self, server_id: ServerId) {
        self.offsets.remove(&server_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inode_change_indicates_rotation() {
        let old = FileIdentity {
            inode: Some(1),
            len_at_last_check: 100,
        };
        let new = FileIdentity {
            inode: Some(2),
            len_at_last_check: 50,
        };
        assert!(old.indicates_rotation(&new));
    }

    #[test]
    fn size_shrink_without_inode_info_indicates_rotation() {
        let old = FileIdentity {
            inode: None,
            len_at_last_check: 1_000_000,
        };
        let new = FileIdentity {
            inode: None,
            len_at_last_check: 1_000,
        };
        assert!(old.indicates_rotation(&new));
    }

    #[test]
    fn growth_is_not_rotation() {
        let old = FileIdentity {
            inode: Some(1),
            len_at_last_check: 100,
        };
        let new = FileIdentity {
            inode: Some(1),
            len_at_last_check: 200,
        };
        assert!(!old.indicates_rotation(&new));
    }

    #[test]
    fn cursor_store_round_trips_and_resets() {
        let store = CursorStore::new();
        let server_id = ServerId::new();
        assert_eq!(store.get(server_id), 0);
        store.set(server_id, 4096);
        assert_eq!(store.get(server_id), 4096);
        store.reset(server_id);
        assert_eq!(store.get(server_id), 0);
    }
}
