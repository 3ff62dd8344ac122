// SPDX-License-Identifier: Apache-2.0

//! Native change notifications using the `notify` crate.
//!
//! Uses OS-level file system notifications:
//! - Linux: inotify
//! - macOS: FSEvents
//! - Windows: ReadDirectoryChangesW

use std::path::Path;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError, channel};
use std::time::Duration;

use notify::event::{MetadataKind, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::traits::{FileEvent, FileEventKind, FileWatcher, WatcherError};

pub struct NativeWatcher {
    watcher: RecommendedWatcher,
    receiver: Receiver<Result<Event, notify::Error>>,
}

impl NativeWatcher {
    /// `poll_interval` only applies when notify falls back to its polling backend.
    pub fn new(poll_interval: Duration) -> Result<Self, WatcherError> {
        let (tx, rx) = channel();

        let config = Config::default().with_poll_interval(poll_interval);

        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            config,
        )
        .map_err(|e| WatcherError::Init(e.to_string()))?;

        Ok(Self {
            watcher,
            receiver: rx,
        })
    }

    fn convert_kind(kind: &EventKind) -> Option<FileEventKind> {
        let kind = match kind {
            EventKind::Create(_) => FileEventKind::Created,
            EventKind::Remove(_) => FileEventKind::Removed,
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => FileEventKind::Removed,
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => FileEventKind::Created,
            EventKind::Modify(ModifyKind::Name(_)) => FileEventKind::Renamed,
            EventKind::Modify(ModifyKind::Metadata(
                MetadataKind::Any | MetadataKind::Permissions | MetadataKind::Ownership,
            )) => FileEventKind::PermissionChanged,
            EventKind::Modify(ModifyKind::Metadata(_)) => FileEventKind::Other,
            EventKind::Modify(_) => FileEventKind::Written,
            EventKind::Access(_) => return None,
            EventKind::Any | EventKind::Other => FileEventKind::Other,
        };
        Some(kind)
    }

    fn convert_event(event: Event) -> Option<FileEvent> {
        let kind = Self::convert_kind(&event.kind)?;
        if event.paths.is_empty() {
            return None;
        }
        Some(FileEvent::new(kind, event.paths))
    }

    fn accept(events: &mut Vec<FileEvent>, res: Result<Event, notify::Error>) {
        match res {
            Ok(event) => events.extend(Self::convert_event(event)),
            Err(e) => tracing::warn!(error = %e, "File watcher error"),
        }
    }
}

impl FileWatcher for NativeWatcher {
    fn watch(&mut self, path: &Path) -> Result<(), WatcherError> {
        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| WatcherError::Watch(format!("{}: {}", path.display(), e)))
    }

    fn unwatch(&mut self, path: &Path) -> Result<(), WatcherError> {
        self.watcher
            .unwatch(path)
            .map_err(|e| WatcherError::Watch(format!("{}: {}", path.display(), e)))
    }

    fn try_recv(&mut self) -> Result<Vec<FileEvent>, WatcherError> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(res) => Self::accept(&mut events, res),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return Err(WatcherError::Channel("watcher channel disconnected".into()));
                }
            }
        }
        Ok(events)
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Vec<FileEvent>, WatcherError> {
        let mut events = Vec::new();

        // Wait for at least one event, then drain whatever else is pending.
        match self.receiver.recv_timeout(timeout) {
            Ok(res) => Self::accept(&mut events, res),
            Err(RecvTimeoutError::Timeout) => return Ok(events),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(WatcherError::Channel("watcher channel disconnected".into()));
            }
        }

        events.extend(self.try_recv()?);
        Ok(events)
    }

    fn backend_name(&self) -> &'static str {
        #[cfg(target_os = "linux")]
        {
            "inotify"
        }
        #[cfg(target_os = "macos")]
        {
            "FSEvents"
        }
        #[cfg(target_os = "windows")]
        {
            "ReadDirectoryChangesW"
        }
        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            "poll"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_convert_kinds() {
        let cases = [
            (EventKind::Create(CreateKind::File), Some(FileEventKind::Created)),
            (EventKind::Remove(RemoveKind::File), Some(FileEventKind::Removed)),
            (
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                Some(FileEventKind::Written),
            ),
            (
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                Some(FileEventKind::Renamed),
            ),
            (
                EventKind::Modify(ModifyKind::Name(RenameMode::From)),
                Some(FileEventKind::Removed),
            ),
            (
                EventKind::Modify(ModifyKind::Name(RenameMode::To)),
                Some(FileEventKind::Created),
            ),
            (
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
                Some(FileEventKind::PermissionChanged),
            ),
            (
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)),
                Some(FileEventKind::Other),
            ),
            (EventKind::Access(notify::event::AccessKind::Any), None),
        ];
        for (kind, expected) in cases {
            assert_eq!(NativeWatcher::convert_kind(&kind), expected, "{:?}", kind);
        }
    }

    #[test]
    fn test_convert_event_without_paths() {
        let event = Event::new(EventKind::Create(CreateKind::File));
        assert!(NativeWatcher::convert_event(event).is_none());

        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/a"))
            .add_path(PathBuf::from("/b"));
        let converted = NativeWatcher::convert_event(event).unwrap();
        assert_eq!(converted, FileEvent::renamed("/a".into(), "/b".into()));
    }

    #[test]
    fn test_native_watcher_watch_directory() {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = NativeWatcher::new(Duration::from_millis(50)).unwrap();
        assert!(watcher.watch(temp_dir.path()).is_ok());
        assert!(watcher.unwatch(temp_dir.path()).is_ok());
    }

    #[test]
    fn test_native_watcher_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = NativeWatcher::new(Duration::from_millis(50)).unwrap();
        let result = watcher.watch(&temp_dir.path().join("missing"));
        assert!(matches!(result, Err(WatcherError::Watch(_))));
    }

    #[test]
    fn test_native_watcher_detects_write() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.log");
        fs::write(&file_path, b"initial\n").unwrap();

        let mut watcher = NativeWatcher::new(Duration::from_millis(50)).unwrap();
        watcher.watch(temp_dir.path()).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        let _ = watcher.try_recv();

        let mut file = OpenOptions::new().append(true).open(&file_path).unwrap();
        file.write_all(b"more\n").unwrap();
        file.flush().unwrap();
        drop(file);

        // FSEvents on macOS can have noticeable latency
        let events = watcher.recv_timeout(Duration::from_secs(2)).unwrap();
        let has_change = events.iter().any(|e| {
            matches!(
                e.effect_on(&file_path),
                Some(FileEventKind::Written | FileEventKind::Created)
            )
        });
        assert!(has_change, "expected a write for {:?}, got {:?}", file_path, events);
    }

    #[test]
    fn test_native_watcher_timeout_without_events() {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = NativeWatcher::new(Duration::from_millis(50)).unwrap();
        watcher.watch(temp_dir.path()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let _ = watcher.try_recv();

        let events = watcher.recv_timeout(Duration::from_millis(50)).unwrap();
        assert!(events.is_empty());
        assert!(!watcher.backend_name().is_empty());
    }
}
