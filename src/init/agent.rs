// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::bounded;
use crate::exporters::falcon::exporter::DEFAULT_DRAIN_TIMEOUT;
use crate::exporters::falcon::{FalconClient, FalconExporter, resolve_endpoint};
use crate::init::args::AgentRun;
use crate::init::config::{AgentConfig, ConfigChecksum, load_config};
use crate::init::wait::{self, TaskSet};
use crate::receivers::file::Supervisor;

/// How long the exporter gets to push what is queued once the workers are
/// gone, before it is cancelled.
const EXPORTER_CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

/// The tail workers and the exporter they feed, started and stopped as a unit.
struct Pipeline {
    supervisor: Supervisor,
    exporter_cancel: CancellationToken,
    exporter_tasks: TaskSet,
}

impl Pipeline {
    fn start(config: &AgentConfig, client: FalconClient, args: &AgentRun) -> Result<Self, BoxError> {
        let (points_tx, points_rx) = bounded(args.points_queue_size());

        let mut supervisor = Supervisor::new(
            resolve_endpoint(&config.falcon.endpoint),
            Arc::new(points_tx),
            args.worker_config(),
            CancellationToken::new(),
        );
        supervisor.start_all(&config.logs)?;

        let exporter_cancel = CancellationToken::new();
        let mut exporter_tasks = TaskSet::new();
        let mut exporter = FalconExporter::new(points_rx, client, DEFAULT_DRAIN_TIMEOUT);
        let token = exporter_cancel.clone();
        exporter_tasks.spawn(async move { exporter.start(token).await });

        Ok(Self {
            supervisor,
            exporter_cancel,
            exporter_tasks,
        })
    }

    /// Stop every worker, then let the exporter push what the workers left
    /// in the queue.
    async fn stop(self) -> Result<(), BoxError> {
        let Pipeline {
            mut supervisor,
            exporter_cancel,
            mut exporter_tasks,
        } = self;

        supervisor.stop_all().await;
        // Dropping the supervisor releases the last queue sender, so the
        // exporter exits once the queue is empty.
        drop(supervisor);

        let res = wait::wait_for_tasks_with_timeout(&mut exporter_tasks, EXPORTER_CLOSE_TIMEOUT).await;
        if res.is_err() {
            warn!("Exporter did not exit on queue close, cancelling.");
            exporter_cancel.cancel();

            let stop_at = Instant::now() + DEFAULT_DRAIN_TIMEOUT + Duration::from_secs(1);
            if let Err(e) = wait::wait_for_tasks_with_deadline(&mut exporter_tasks, stop_at).await {
                return Err(format!("timed out waiting for exporter to exit: {}", e).into());
            }
        }
        Ok(())
    }
}

pub struct Agent {
    args: Box<AgentRun>,
}

impl Agent {
    pub fn new(args: Box<AgentRun>) -> Self {
        Self { args }
    }

    /// Tail every configured source until `agent_cancel` fires, reloading the
    /// configuration whenever its checksum changes. The initial configuration
    /// must be valid; an invalid reload keeps the running configuration.
    pub async fn run(self, agent_cancel: CancellationToken) -> Result<(), BoxError> {
        let path = self.args.config.clone();
        info!(config = ?path, "Starting log-agent.");

        let mut checksum = ConfigChecksum::from_file(&path)?;
        let mut current = load_config(&path)?;
        let client = FalconClient::new(&current.falcon.url, self.args.push_timeout())?;
        let mut pipeline = Pipeline::start(&current, client, &self.args)?;
        info!(
            sources = current.logs.len(),
            falcon = %current.falcon.url,
            checksum = %checksum,
            "Tail workers started."
        );

        let interval = self.args.config_check_interval();
        let mut config_check = tokio::time::interval_at(Instant::now() + interval, interval);
        config_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut result = Ok(());
        loop {
            select! {
                _ = agent_cancel.cancelled() => {
                    debug!("Agent cancellation signaled.");
                    break;
                },
                _ = config_check.tick() => {
                    let latest = match ConfigChecksum::from_file(&path) {
                        Ok(sum) => sum,
                        Err(e) => {
                            warn!(error = %e, "Unable to read configuration for change check");
                            continue;
                        }
                    };
                    if latest == checksum {
                        continue;
                    }
                    info!(old = %checksum, new = %latest, "Configuration changed, reloading.");
                    // Recorded even when the reload fails, so a broken file is reported once.
                    checksum = latest;

                    let next = match load_config(&path) {
                        Ok(next) => next,
                        Err(e) => {
                            error!(error = %e, "Invalid configuration, keeping the running one");
                            continue;
                        }
                    };

                    if next.falcon == current.falcon {
                        match pipeline.supervisor.restart(&next.logs).await {
                            Ok(()) => current = next,
                            Err(e) => error!(error = %e, "Failed to restart tail workers, keeping the running ones"),
                        }
                        continue;
                    }

                    let client = match FalconClient::new(&next.falcon.url, self.args.push_timeout()) {
                        Ok(client) => client,
                        Err(e) => {
                            error!(error = %e, "Invalid falcon settings, keeping the running configuration");
                            continue;
                        }
                    };
                    pipeline.stop().await?;
                    pipeline = Pipeline::start(&next, client, &self.args)?;
                    info!(sources = next.logs.len(), falcon = %next.falcon.url, "Pipeline restarted.");
                    current = next;
                },
                e = wait::wait_for_any_task(&mut pipeline.exporter_tasks) => {
                    match e {
                        Ok(()) => warn!("Unexpected early exit of exporter."),
                        Err(e) => result = Err(e),
                    }
                    break;
                }
            }
        }

        pipeline.stop().await?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write(path: &std::path::Path, data: &str) {
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(data.as_bytes()).unwrap();
        f.flush().unwrap();
    }

    fn config(url: &str, log: &std::path::Path, metric: &str) -> String {
        format!(
            "falcon:\n  url: {}\n  endpoint: test-host\nlogs:\n  - name: app\n    path: {}\n    items:\n      - metric: {}\n        pattern: ERROR\n        method: count\n        step: 60\n",
            url,
            log.display(),
            metric
        )
    }

    fn args(config: PathBuf) -> Box<AgentRun> {
        Box::new(AgentRun {
            config,
            config_check_interval_secs: 1,
            poll_interval_ms: 10,
            flush_interval_ms: 100,
            ..Default::default()
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_initial_config_fails() {
        let dir = TempDir::new().unwrap();
        let cfg = dir.path().join("config.yaml");
        write(&cfg, "falcon:\n  url: ''\n");

        let agent = Agent::new(args(cfg));
        assert!(agent.run(CancellationToken::new()).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_config_fails() {
        let dir = TempDir::new().unwrap();
        let agent = Agent::new(args(dir.path().join("missing.yaml")));
        assert!(agent.run(CancellationToken::new()).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_runs_reloads_and_stops() {
        let dir = TempDir::new().unwrap();
        let cfg = dir.path().join("config.yaml");
        let log = dir.path().join("app.log");
        write(&cfg, &config("http://127.0.0.1:9/v1/push", &log, "app.err"));

        let cancel = CancellationToken::new();
        let agent = Agent::new(args(cfg.clone()));
        let handle = tokio::spawn(agent.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(300)).await;
        // An invalid edit is ignored, a valid one with a new falcon url rebuilds.
        write(&cfg, "falcon: [broken\n");
        tokio::time::sleep(Duration::from_millis(1500)).await;
        write(&cfg, &config("http://127.0.0.1:10/v1/push", &log, "app.err2"));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!handle.is_finished());

        cancel.cancel();
        let res = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(res.is_ok(), "{:?}", res);
    }
}
