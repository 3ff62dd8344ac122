// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::metrics::Counter;
use tokio::select;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, warn};

use crate::bounded_channel::BoundedReceiver;
use crate::exporters::falcon::MetricPoint;
use crate::exporters::falcon::client::MetricPusher;
use crate::exporters::get_meter;

pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

struct ExporterMetrics {
    sent: Counter<u64>,
    failed: Counter<u64>,
    tags: [KeyValue; 1],
}

impl ExporterMetrics {
    fn new() -> Self {
        Self {
            sent: get_meter()
                .u64_counter("log_agent_exporter_sent_points")
                .with_description("Number of metric points successfully pushed.")
                .with_unit("points")
                .build(),
            failed: get_meter()
                .u64_counter("log_agent_exporter_send_failed_points")
                .with_description("Number of metric points dropped after a failed push.")
                .with_unit("points")
                .build(),
            tags: [KeyValue::new("exporter", "falcon")],
        }
    }
}

/// Drains flushed point batches and hands each to the pusher. Failed pushes
/// are logged and dropped, never retried.
pub struct FalconExporter<P> {
    rx: BoundedReceiver<Vec<MetricPoint>>,
    pusher: P,
    drain_timeout: Duration,
    metrics: ExporterMetrics,
}

impl<P: MetricPusher> FalconExporter<P> {
    pub fn new(rx: BoundedReceiver<Vec<MetricPoint>>, pusher: P, drain_timeout: Duration) -> Self {
        Self {
            rx,
            pusher,
            drain_timeout,
            metrics: ExporterMetrics::new(),
        }
    }

    /// Run until cancelled or until every sender is gone, then push whatever
    /// is still queued within the drain timeout.
    pub async fn start(&mut self, token: CancellationToken) -> Result<(), BoxError> {
        loop {
            select! {
                biased;

                _ = token.cancelled() => {
                    debug!("FalconExporter received shutdown signal, exiting main processing loop.");
                    break;
                },

                batch = self.rx.next() => {
                    match batch {
                        Some(points) => self.export(points).await,
                        None => {
                            debug!("FalconExporter receiver has closed, exiting main processing loop.");
                            return Ok(());
                        }
                    }
                },
            }
        }

        self.drain().await
    }

    async fn drain(&mut self) -> Result<(), BoxError> {
        let finish = Instant::now() + self.drain_timeout;
        while let Some(points) = self.rx.try_recv() {
            if timeout_at(finish, self.export(points)).await.is_err() {
                let remaining = self.rx.len();
                warn!(remaining, "Timed out draining queued metric points");
                return Err(format!(
                    "FalconExporter timed out draining, {} batches dropped",
                    remaining
                )
                .into());
            }
        }
        Ok(())
    }

    async fn export(&self, points: Vec<MetricPoint>) {
        if points.is_empty() {
            return;
        }
        let count = points.len() as u64;
        match self.pusher.push(&points).await {
            Ok(ack) => {
                self.metrics.sent.add(count, &self.metrics.tags);
                debug!(points = count, ack = %String::from_utf8_lossy(&ack), "Pushed metric points");
            }
            Err(e) => {
                self.metrics.failed.add(count, &self.metrics.tags);
                error!(points = count, error = %e, "Pushing metric points failed, dropping data.");
            }
        }
    }
}
