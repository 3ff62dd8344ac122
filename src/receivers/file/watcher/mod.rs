// SPDX-License-Identifier: Apache-2.0

//! Change notification sources for the event-driven worker.
//!
//! The polling worker needs none of this: it detects changes by comparing
//! file snapshots on every pass. The event-driven worker subscribes to the
//! parent directory of its file through OS-level notifications (inotify on
//! Linux, FSEvents on macOS, ReadDirectoryChangesW on Windows) and only reads
//! when something happened.

mod native;
mod traits;

pub use native::NativeWatcher;
pub use traits::{FileEvent, FileEventKind, FileWatcher, WatcherError};

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a worker learns that its file changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// Use native notifications where the platform has them, otherwise poll.
    Auto,
    /// Force native notifications, falling back to polling only if the
    /// directory cannot be watched.
    Native,
    /// Compare file snapshots on every pass. Use this for network file
    /// systems (NFS) where notifications are unreliable.
    #[default]
    #[serde(alias = "polling")]
    Poll,
}

impl WatchMode {
    /// Whether a worker in this mode should try the event-driven loop.
    pub fn prefers_events(&self) -> bool {
        match self {
            WatchMode::Poll => false,
            WatchMode::Native => true,
            WatchMode::Auto => cfg!(any(
                target_os = "linux",
                target_os = "macos",
                target_os = "windows"
            )),
        }
    }
}

impl std::str::FromStr for WatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(WatchMode::Auto),
            "native" => Ok(WatchMode::Native),
            "poll" | "polling" => Ok(WatchMode::Poll),
            _ => Err(format!(
                "Invalid watch mode '{}'. Valid options: auto, native, poll",
                s
            )),
        }
    }
}

/// Create a native watcher subscribed to `directory`.
pub fn watch_directory(
    directory: &Path,
    poll_interval: Duration,
) -> Result<NativeWatcher, WatcherError> {
    let mut watcher = NativeWatcher::new(poll_interval)?;
    watcher.watch(directory)?;
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_mode_from_str() {
        assert_eq!("auto".parse::<WatchMode>().unwrap(), WatchMode::Auto);
        assert_eq!("native".parse::<WatchMode>().unwrap(), WatchMode::Native);
        assert_eq!("poll".parse::<WatchMode>().unwrap(), WatchMode::Poll);
        assert_eq!("polling".parse::<WatchMode>().unwrap(), WatchMode::Poll);
        assert_eq!("AUTO".parse::<WatchMode>().unwrap(), WatchMode::Auto);
        assert!("invalid".parse::<WatchMode>().is_err());
    }

    #[test]
    fn test_watch_mode_deserialize() {
        let mode: WatchMode = serde_json::from_str("\"polling\"").unwrap();
        assert_eq!(mode, WatchMode::Poll);
        let mode: WatchMode = serde_json::from_str("\"native\"").unwrap();
        assert_eq!(mode, WatchMode::Native);
        assert_eq!(WatchMode::default(), WatchMode::Poll);
    }

    #[test]
    fn test_prefers_events() {
        assert!(!WatchMode::Poll.prefers_events());
        assert!(WatchMode::Native.prefers_events());
    }

    #[test]
    fn test_watch_directory_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(watch_directory(&dir.path().join("nope"), Duration::from_millis(50)).is_err());
    }
}
