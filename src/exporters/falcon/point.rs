// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use tracing::warn;

use crate::bounded_channel::{BoundedSender, SendError};
use crate::receivers::file::config::CounterType;

/// One Open-Falcon data point, serialized in the push API's JSON shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricPoint {
    pub metric: String,
    pub endpoint: String,
    pub value: f64,
    pub counter_type: CounterType,
    pub tags: String,
    pub timestamp: i64,
    pub step: i64,
}

impl MetricPoint {
    /// Build a point. A non-positive timestamp is replaced by `now`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        metric: String,
        endpoint: &str,
        value: f64,
        counter_type: CounterType,
        tags: &str,
        timestamp: i64,
        step: i64,
        now: i64,
    ) -> Self {
        Self {
            metric,
            endpoint: endpoint.to_string(),
            value,
            counter_type,
            tags: tags.to_string(),
            timestamp: if timestamp > 0 { timestamp } else { now },
            step,
        }
    }
}

impl std::fmt::Display for MetricPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{{endpoint={}, tags={}}} {} @{} ({}, step={})",
            self.metric,
            self.endpoint,
            self.tags,
            self.value,
            self.timestamp,
            self.counter_type.as_str(),
            self.step
        )
    }
}

/// Resolve the endpoint reported with every point: the configured value,
/// else the host name, else `localhost`.
pub fn resolve_endpoint(configured: &str) -> String {
    if !configured.is_empty() {
        return configured.to_string();
    }
    gethostname::gethostname()
        .into_string()
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Destination for points produced by a flush. Called from blocking worker
/// threads, so implementations must not block on the push transport.
pub trait PointSink: Send + Sync {
    fn submit(&self, points: Vec<MetricPoint>);
}

impl PointSink for BoundedSender<Vec<MetricPoint>> {
    fn submit(&self, points: Vec<MetricPoint>) {
        if points.is_empty() {
            return;
        }
        let count = points.len();
        match self.try_send(points) {
            Ok(()) => {}
            Err(SendError::Full) => {
                warn!(points = count, "Push queue is full, dropping flushed points")
            }
            Err(SendError::Disconnected) => {
                warn!(points = count, "Push queue is closed, dropping flushed points")
            }
        }
    }
}
