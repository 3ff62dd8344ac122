// SPDX-License-Identifier: Apache-2.0

//! Worker loops driving a single [`FileTracker`].
//!
//! Each pass does exactly one of: observe cancellation and exit, run the
//! time-driven flush sweep, or run one content step. The content path and the
//! time path therefore never interleave for a tracker.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::receivers::file::tracker::{FileTracker, PollOutcome};
use crate::receivers::file::watcher::{FileWatcher, NativeWatcher, WatchMode, watch_directory};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Idle sleep between content passes, and the event wait timeout.
    pub poll_interval: Duration,
    /// Period of the time-driven flush sweep.
    pub flush_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

/// Current wall-clock time in epoch seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

struct FlushTimer {
    interval: Duration,
    deadline: Instant,
}

impl FlushTimer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: Instant::now() + interval,
        }
    }

    fn take_elapsed(&mut self) -> bool {
        let now = Instant::now();
        if now < self.deadline {
            return false;
        }
        self.deadline = now + self.interval;
        true
    }
}

/// Run the worker until `cancel` fires, then close the file.
pub fn run(mut tracker: FileTracker, mode: WatchMode, config: WorkerConfig, cancel: CancellationToken) {
    info!(source = %tracker.name(), path = ?tracker.path(), watch_mode = ?mode, "Tail worker starting");

    let mut timer = FlushTimer::new(config.flush_interval);
    if mode.prefers_events() {
        run_event_driven(&mut tracker, &config, &cancel, &mut timer);
    } else {
        run_polling(&mut tracker, &config, &cancel, &mut timer);
    }

    tracker.close();
    info!(source = %tracker.name(), "Tail worker exiting");
}

fn run_polling(
    tracker: &mut FileTracker,
    config: &WorkerConfig,
    cancel: &CancellationToken,
    timer: &mut FlushTimer,
) {
    loop {
        if cancel.is_cancelled() {
            debug!(source = %tracker.name(), "Cancellation received");
            break;
        }

        if timer.take_elapsed() {
            tracker.time_flush(now_secs());
            continue;
        }

        tracker.poll(now_secs());
        std::thread::sleep(config.poll_interval);
    }
}

/// Absolute form of the tracked path and the directory to watch for it.
fn watch_target(path: &Path) -> (PathBuf, PathBuf) {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let directory = absolute
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    (absolute, directory)
}

fn run_event_driven(
    tracker: &mut FileTracker,
    config: &WorkerConfig,
    cancel: &CancellationToken,
    timer: &mut FlushTimer,
) {
    let (target, directory) = watch_target(tracker.path());
    let mut watcher = match watch_directory(&directory, config.poll_interval) {
        Ok(watcher) => watcher,
        Err(e) => {
            warn!(
                source = %tracker.name(),
                directory = ?directory,
                error = %e,
                "Unable to watch directory, falling back to polling"
            );
            return run_polling(tracker, config, cancel, timer);
        }
    };
    info!(source = %tracker.name(), backend = watcher.backend_name(), directory = ?directory, "Watching for file changes");

    if !event_loop(tracker, &mut watcher, &target, config, cancel, timer) {
        drop(watcher);
        return run_polling(tracker, config, cancel, timer);
    }

    if let Err(e) = watcher.unwatch(&directory) {
        debug!(directory = ?directory, error = %e, "Failed to unwatch directory");
    }
}

/// Returns false when the watcher failed and the caller should fall back to
/// polling; true on cancellation.
fn event_loop(
    tracker: &mut FileTracker,
    watcher: &mut NativeWatcher,
    target: &Path,
    config: &WorkerConfig,
    cancel: &CancellationToken,
    timer: &mut FlushTimer,
) -> bool {
    loop {
        if cancel.is_cancelled() {
            debug!(source = %tracker.name(), "Cancellation received");
            return true;
        }

        if timer.take_elapsed() {
            tracker.time_flush(now_secs());
            continue;
        }

        if !tracker.is_open() {
            tracker.poll(now_secs());
        } else if tracker.has_backlog()
            && tracker.read_remainder(now_secs()) != PollOutcome::Idle
        {
            continue;
        }

        match watcher.recv_timeout(config.poll_interval) {
            Ok(events) => {
                for event in events {
                    if let Some(kind) = event.effect_on(target) {
                        debug!(source = %tracker.name(), kind = ?kind, "File event");
                        tracker.on_event(kind, now_secs());
                    }
                }
            }
            Err(e) => {
                warn!(source = %tracker.name(), error = %e, "Watcher failed, falling back to polling");
                return false;
            }
        }
    }
}
