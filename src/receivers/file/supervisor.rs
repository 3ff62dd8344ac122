// SPDX-License-Identifier: Apache-2.0

//! Builds trackers from configuration and runs one worker per log source.
//!
//! Reconfiguration is all-or-nothing: every worker is stopped and awaited,
//! then the full set is rebuilt from the new sources. Unflushed aggregates
//! of the stopped workers are dropped.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::exporters::falcon::PointSink;
use crate::receivers::file::config::LogSourceConfig;
use crate::receivers::file::error::{Error, Result};
use crate::receivers::file::tracker::FileTracker;
use crate::receivers::file::watcher::WatchMode;
use crate::receivers::file::worker::{self, WorkerConfig, now_secs};

struct WorkerRecord {
    name: String,
    path: PathBuf,
    cancel: CancellationToken,
}

pub struct Supervisor {
    endpoint: String,
    sink: Arc<dyn PointSink>,
    config: WorkerConfig,
    cancel: CancellationToken,
    records: Vec<WorkerRecord>,
    workers: JoinSet<String>,
}

impl Supervisor {
    /// `cancel` is the parent of every worker's stop signal; cancelling it
    /// stops all workers without going through [`Supervisor::stop_all`].
    pub fn new(
        endpoint: String,
        sink: Arc<dyn PointSink>,
        config: WorkerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            endpoint,
            sink,
            config,
            cancel,
            records: Vec::new(),
            workers: JoinSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn worker_names(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.name.as_str()).collect()
    }

    fn build(&self, sources: &[LogSourceConfig]) -> Result<Vec<(FileTracker, WatchMode)>> {
        let now = now_secs();
        let mut trackers = Vec::with_capacity(sources.len());
        for source in sources {
            if trackers
                .iter()
                .any(|(t, _): &(FileTracker, WatchMode)| t.name() == source.name)
            {
                return Err(Error::DuplicateSource(source.name.clone()));
            }
            let tracker = FileTracker::new(source, &self.endpoint, self.sink.clone(), now)?;
            trackers.push((tracker, source.watch_mode));
        }
        Ok(trackers)
    }

    fn spawn(&mut self, trackers: Vec<(FileTracker, WatchMode)>) {
        for (tracker, mode) in trackers {
            let cancel = self.cancel.child_token();
            let record = WorkerRecord {
                name: tracker.name().to_string(),
                path: tracker.path().to_path_buf(),
                cancel: cancel.clone(),
            };
            info!(source = %record.name, path = ?record.path, "Starting tail worker");

            let config = self.config;
            let name = record.name.clone();
            self.workers.spawn_blocking(move || {
                worker::run(tracker, mode, config, cancel);
                name
            });
            self.records.push(record);
        }
    }

    /// Build a tracker for every source and start its worker. Nothing is
    /// started unless every tracker could be built. Must be called from
    /// within a tokio runtime.
    pub fn start_all(&mut self, sources: &[LogSourceConfig]) -> Result<()> {
        let trackers = self.build(sources)?;
        self.spawn(trackers);
        Ok(())
    }

    /// Signal every worker to stop and wait until all of them have exited.
    pub async fn stop_all(&mut self) {
        for record in &self.records {
            record.cancel.cancel();
        }

        while let Some(result) = self.workers.join_next().await {
            match result {
                Ok(name) => info!(source = %name, "Tail worker stopped"),
                Err(e) => error!(error = %e, "Tail worker panicked"),
            }
        }
        self.records.clear();
    }

    /// Replace every worker with ones built from `sources`. If the new set
    /// cannot be built the running workers are left untouched.
    pub async fn restart(&mut self, sources: &[LogSourceConfig]) -> Result<()> {
        let trackers = self.build(sources)?;
        info!(stopping = self.records.len(), starting = trackers.len(), "Restarting tail workers");
        self.stop_all().await;
        self.spawn(trackers);
        Ok(())
    }
}
