// SPDX-License-Identifier: Apache-2.0

//! Per-file tailing state machine.
//!
//! A tracker is either closed (no handle) or open. Every poll first stats the
//! open handle and compares it with the stored snapshot; only a difference
//! leads to a read. After [`MAX_IDLE_TICKS`] consecutive quiet polls the path
//! is reopened and compared by identity, which is how a rotation that leaves
//! the old handle silent is noticed. Truncation is detected by the reader.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use opentelemetry::KeyValue;
use opentelemetry::metrics::Counter;
use tracing::{debug, info, warn};

use crate::exporters::falcon::{MetricPoint, PointSink};
use crate::receivers::file::config::LogSourceConfig;
use crate::receivers::file::error::Result;
use crate::receivers::file::input::{FileSnapshot, LineBatch, LineReader, ReadOutcome};
use crate::receivers::file::matcher::{TimestampPattern, match_timestamp};
use crate::receivers::file::task::AggregatorTask;
use crate::receivers::file::watcher::FileEventKind;
use crate::receivers::get_meter;

/// Consecutive quiet polls before the path is reopened and compared by identity.
pub const MAX_IDLE_TICKS: u32 = 5;

/// What a single poll or event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The file could not be opened; the tracker stays closed.
    Closed,
    /// The file was opened and its existing content skipped.
    Opened,
    /// A forced recheck found a new file at the path and switched to it.
    Rotated,
    /// A forced recheck found the same file.
    Rechecked,
    /// Nothing changed since the last poll.
    Unchanged,
    /// The file changed but no new bytes were pending.
    Idle,
    /// Complete lines were read and matched.
    Read { lines: usize, bytes: u64 },
    /// The file shrank below the cursor; the cursor was reset.
    Truncated,
    /// An over-long line was skipped.
    Skipped,
    /// The handle was closed and the accumulators zeroed.
    Removed,
    /// Nothing to do for this event.
    Ignored,
}

struct TrackerMetrics {
    lines: Counter<u64>,
    points: Counter<u64>,
    rotations: Counter<u64>,
    tags: [KeyValue; 1],
}

impl TrackerMetrics {
    fn new(name: &str) -> Self {
        Self {
            lines: get_meter()
                .u64_counter("log_agent_lines_read")
                .with_description("Number of complete lines read from tailed files.")
                .with_unit("lines")
                .build(),
            points: get_meter()
                .u64_counter("log_agent_points_flushed")
                .with_description("Number of metric points produced by window flushes.")
                .with_unit("points")
                .build(),
            rotations: get_meter()
                .u64_counter("log_agent_file_rotations")
                .with_description("Number of times a tailed path was found to be a new file.")
                .with_unit("rotations")
                .build(),
            tags: [KeyValue::new("source", name.to_string())],
        }
    }

    fn add_lines(&self, count: u64) {
        if count > 0 {
            self.lines.add(count, &self.tags);
        }
    }

    fn add_points(&self, count: u64) {
        if count > 0 {
            self.points.add(count, &self.tags);
        }
    }

    fn add_rotation(&self) {
        self.rotations.add(1, &self.tags);
    }
}

fn emit(sink: &dyn PointSink, metrics: &TrackerMetrics, points: Vec<MetricPoint>) {
    if points.is_empty() {
        return;
    }
    for point in &points {
        debug!(point = %point, "Flushed metric point");
    }
    metrics.add_points(points.len() as u64);
    sink.submit(points);
}

pub struct FileTracker {
    name: String,
    path: PathBuf,
    handle: Option<File>,
    identity: Option<FileSnapshot>,
    reader: LineReader,
    idle_ticks: u32,
    ts_pattern: Option<TimestampPattern>,
    tasks: Vec<AggregatorTask>,
    sink: Arc<dyn PointSink>,
    metrics: TrackerMetrics,
}

impl FileTracker {
    /// Build a closed tracker and its tasks. Every value needed later is
    /// copied out of `source` here.
    pub fn new(
        source: &LogSourceConfig,
        endpoint: &str,
        sink: Arc<dyn PointSink>,
        now: i64,
    ) -> Result<Self> {
        source.validate()?;

        let ts_pattern = if source.ts_enabled {
            Some(TimestampPattern::new(&source.ts_pattern)?)
        } else {
            None
        };

        let tasks = source
            .items
            .iter()
            .map(|item| AggregatorTask::new(item, endpoint, source.ts_enabled, now))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: source.name.clone(),
            path: source.path.clone(),
            handle: None,
            identity: None,
            reader: LineReader::new(source.delimiter_bytes()),
            idle_ticks: 0,
            ts_pattern,
            tasks,
            sink,
            metrics: TrackerMetrics::new(&source.name),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn cursor(&self) -> u64 {
        self.reader.cursor()
    }

    pub fn idle_ticks(&self) -> u32 {
        self.idle_ticks
    }

    pub fn tasks(&self) -> &[AggregatorTask] {
        &self.tasks
    }

    /// True when the stored size holds content not yet examined, left by a
    /// truncation or a capped read. Such content is read without waiting for
    /// another change.
    pub fn has_backlog(&self) -> bool {
        self.is_open()
            && self
                .identity
                .as_ref()
                .is_some_and(|snapshot| self.reader.has_backlog(snapshot.size()))
    }

    /// Open the path, skip its existing content and restart every task's
    /// window on `now`. Any previous handle is closed first.
    pub fn open(&mut self, now: i64) -> std::io::Result<()> {
        let file = File::open(&self.path)?;
        let snapshot = FileSnapshot::of_file(&file)?;
        self.install(file, snapshot, now);
        Ok(())
    }

    fn install(&mut self, file: File, snapshot: FileSnapshot, now: i64) {
        self.handle = None;

        self.reader.set_cursor(snapshot.size());
        info!(
            source = %self.name,
            path = ?self.path,
            offset = snapshot.size(),
            "Tailing file from its current end"
        );
        self.handle = Some(file);
        self.identity = Some(snapshot);
        self.idle_ticks = 0;
        for task in &mut self.tasks {
            task.reset(now);
        }
    }

    /// Drop the handle. Aggregator state is kept.
    pub fn close(&mut self) {
        if self.handle.take().is_some() {
            debug!(source = %self.name, path = ?self.path, "Closed file");
        }
        self.identity = None;
    }

    /// Zero every task's accumulators without moving their windows.
    pub fn reset_accumulators(&mut self) {
        for task in &mut self.tasks {
            task.reset_accumulators();
        }
    }

    /// One content pass: open if closed, read if the handle changed or a
    /// backlog remains, otherwise force a recheck when the file has been
    /// quiet for too long.
    pub fn poll(&mut self, now: i64) -> PollOutcome {
        if !self.is_open() {
            return match self.open(now) {
                Ok(()) => PollOutcome::Opened,
                Err(e) => {
                    debug!(source = %self.name, path = ?self.path, error = %e, "Unable to open file");
                    PollOutcome::Closed
                }
            };
        }

        if !self.is_changed() {
            if self.has_backlog() {
                let outcome = self.read_remainder(now);
                if outcome != PollOutcome::Idle {
                    self.idle_ticks = 0;
                    return outcome;
                }
            }
            if self.idle_ticks >= MAX_IDLE_TICKS {
                return self.recheck(now);
            }
            return PollOutcome::Unchanged;
        }

        self.read_remainder(now)
    }

    /// Compare the open handle's attributes with the stored snapshot. A
    /// change replaces the snapshot; a stat failure counts as a quiet tick.
    pub fn is_changed(&mut self) -> bool {
        let current = match self.handle.as_ref().map(FileSnapshot::of_file) {
            Some(Ok(snapshot)) => snapshot,
            Some(Err(e)) => {
                warn!(source = %self.name, path = ?self.path, error = %e, "Unable to stat file");
                self.idle_ticks += 1;
                return false;
            }
            None => return false,
        };

        if let Some(previous) = &self.identity {
            if previous.is_unchanged(&current) {
                self.idle_ticks += 1;
                return false;
            }
        }

        self.idle_ticks = 0;
        self.identity = Some(current);
        true
    }

    /// Reopen the path and compare identities. A different file replaces the
    /// current handle; the same file only resets the quiet-tick count.
    /// Failures leave the current handle in place.
    pub fn recheck(&mut self, now: i64) -> PollOutcome {
        self.idle_ticks = 0;

        let opened = File::open(&self.path)
            .and_then(|file| FileSnapshot::of_file(&file).map(|snapshot| (file, snapshot)));
        let (file, snapshot) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                debug!(source = %self.name, path = ?self.path, error = %e, "Recheck failed");
                return PollOutcome::Unchanged;
            }
        };

        let same = self
            .identity
            .as_ref()
            .is_some_and(|identity| identity.same_file(&snapshot));
        if same {
            return PollOutcome::Rechecked;
        }

        info!(source = %self.name, path = ?self.path, "File was replaced, switching to the new file");
        self.metrics.add_rotation();
        self.install(file, snapshot, now);
        PollOutcome::Rotated
    }

    /// Read every complete line appended since the last read, using the
    /// size from the stored snapshot.
    pub fn read_remainder(&mut self, now: i64) -> PollOutcome {
        let Some(size) = self.identity.as_ref().map(FileSnapshot::size) else {
            return PollOutcome::Idle;
        };
        let Some(file) = self.handle.as_mut() else {
            return PollOutcome::Closed;
        };

        match self.reader.read(file, size) {
            Ok(ReadOutcome::Idle) => PollOutcome::Idle,
            Ok(ReadOutcome::Truncated { size, cursor }) => {
                info!(
                    source = %self.name,
                    path = ?self.path,
                    size,
                    cursor,
                    "File was truncated, reading from the start"
                );
                PollOutcome::Truncated
            }
            Ok(ReadOutcome::Skipped { .. }) => PollOutcome::Skipped,
            Ok(ReadOutcome::Lines { batch, bytes }) => {
                let lines = batch.len();
                self.process_lines(&batch, now);
                PollOutcome::Read { lines, bytes }
            }
            Err(e) => {
                warn!(source = %self.name, path = ?self.path, error = %e, "Unable to read file");
                PollOutcome::Idle
            }
        }
    }

    fn process_lines(&mut self, batch: &LineBatch, now: i64) {
        self.metrics.add_lines(batch.len() as u64);
        for line in batch.iter() {
            self.process_line(line, now);
        }
    }

    /// Fold one complete line into every task. With timestamps enabled a line
    /// without a usable timestamp is skipped entirely.
    pub fn process_line(&mut self, line: &[u8], now: i64) {
        let ts = match &self.ts_pattern {
            None => now,
            Some(pattern) => match match_timestamp(line, pattern) {
                Ok(Some(ts)) => ts.timestamp(),
                Ok(None) => return,
                Err(e) => {
                    debug!(source = %self.name, error = %e, "Skipping line with unusable timestamp");
                    return;
                }
            },
        };

        for task in &mut self.tasks {
            if let Some(points) = task.observe(line, ts, now) {
                emit(self.sink.as_ref(), &self.metrics, points);
            }
        }
    }

    /// Time-driven sweep: flush every task whose window is due, even when it
    /// saw no samples. Returns the number of tasks flushed.
    pub fn time_flush(&mut self, now: i64) -> usize {
        let mut flushed = 0;
        for task in &mut self.tasks {
            if task.flush_due(now) {
                let points = task.flush(now);
                emit(self.sink.as_ref(), &self.metrics, points);
                flushed += 1;
            }
        }
        flushed
    }

    /// Apply a change notification that concerns this tracker's path.
    pub fn on_event(&mut self, kind: FileEventKind, now: i64) -> PollOutcome {
        match kind {
            FileEventKind::Written => {
                if !self.is_open() {
                    return self.poll(now);
                }
                let snapshot = self.handle.as_ref().map(FileSnapshot::of_file);
                match snapshot {
                    Some(Ok(snapshot)) => {
                        self.identity = Some(snapshot);
                        self.idle_ticks = 0;
                        self.read_remainder(now)
                    }
                    Some(Err(e)) => {
                        warn!(source = %self.name, path = ?self.path, error = %e, "Unable to stat file");
                        PollOutcome::Idle
                    }
                    None => PollOutcome::Closed,
                }
            }
            FileEventKind::Created | FileEventKind::Renamed => {
                self.close();
                match self.open(now) {
                    Ok(()) => PollOutcome::Opened,
                    Err(e) => {
                        debug!(source = %self.name, path = ?self.path, error = %e, "Unable to open file");
                        PollOutcome::Closed
                    }
                }
            }
            FileEventKind::Removed => {
                info!(source = %self.name, path = ?self.path, "File was removed or renamed away");
                self.close();
                self.reset_accumulators();
                PollOutcome::Removed
            }
            FileEventKind::PermissionChanged => {
                info!(source = %self.name, path = ?self.path, "File permissions changed");
                PollOutcome::Ignored
            }
            FileEventKind::Other => PollOutcome::Ignored,
        }
    }
}
