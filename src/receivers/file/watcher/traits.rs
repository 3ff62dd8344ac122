// SPDX-License-Identifier: Apache-2.0

//! Traits and types for change notification sources.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for watcher operations
#[derive(Debug)]
pub enum WatcherError {
    /// Failed to initialize the watcher
    Init(String),
    /// Failed to watch a path
    Watch(String),
    /// Notification channel closed
    Channel(String),
}

impl fmt::Display for WatcherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatcherError::Init(msg) => write!(f, "watcher initialization failed: {}", msg),
            WatcherError::Watch(msg) => write!(f, "watch failed: {}", msg),
            WatcherError::Channel(msg) => write!(f, "channel error: {}", msg),
        }
    }
}

impl std::error::Error for WatcherError {}

/// Decoded kind of a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Written,
    Removed,
    Renamed,
    PermissionChanged,
    Other,
}

/// A change notification for one or more paths in a watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub paths: Vec<PathBuf>,
}

impl FileEvent {
    pub fn new(kind: FileEventKind, paths: Vec<PathBuf>) -> Self {
        Self { kind, paths }
    }

    pub fn created(path: PathBuf) -> Self {
        Self::new(FileEventKind::Created, vec![path])
    }

    pub fn written(path: PathBuf) -> Self {
        Self::new(FileEventKind::Written, vec![path])
    }

    pub fn removed(path: PathBuf) -> Self {
        Self::new(FileEventKind::Removed, vec![path])
    }

    /// A rename with both sides known; `paths` holds `[from, to]`. One-sided
    /// renames are built with `new` and a single path.
    pub fn renamed(from: PathBuf, to: PathBuf) -> Self {
        Self::new(FileEventKind::Renamed, vec![from, to])
    }

    /// What this event means for the file at `path`, or `None` when the event
    /// concerns other files only.
    ///
    /// Renames are resolved to the side that touches `path`: renaming onto it
    /// acts as a creation, renaming it away acts as a removal. A rename that
    /// only reports one side is resolved by whether `path` still exists.
    pub fn effect_on(&self, path: &Path) -> Option<FileEventKind> {
        if self.kind != FileEventKind::Renamed {
            return self.paths.iter().any(|p| p == path).then_some(self.kind);
        }

        match self.paths.as_slice() {
            [_, to] if to == path => Some(FileEventKind::Created),
            [from, _] if from == path => Some(FileEventKind::Removed),
            [only] if only == path => Some(if path.exists() {
                FileEventKind::Created
            } else {
                FileEventKind::Removed
            }),
            _ => None,
        }
    }
}

/// Source of change notifications.
pub trait FileWatcher {
    /// Add a path to watch. Directories are watched non-recursively.
    fn watch(&mut self, path: &Path) -> Result<(), WatcherError>;

    /// Remove a path from watching.
    fn unwatch(&mut self, path: &Path) -> Result<(), WatcherError>;

    /// Return any pending events without blocking.
    fn try_recv(&mut self) -> Result<Vec<FileEvent>, WatcherError>;

    /// Block until events arrive or the timeout expires. Returns an empty
    /// vector on timeout.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Vec<FileEvent>, WatcherError>;

    /// Name of the backend, for logging.
    fn backend_name(&self) -> &'static str;
}
