// SPDX-License-Identifier: Apache-2.0

//! Windowed aggregation for a single metric item.
//!
//! Windows are half-open `[start, end)`. When line timestamps drive windowing
//! a window is always the minute containing the timestamp; otherwise windows
//! start on the current minute and advance by exactly `step` seconds on each
//! time-driven flush.

use tracing::debug;

use crate::exporters::falcon::MetricPoint;
use crate::receivers::file::config::{CounterType, Method, MetricItemConfig};
use crate::receivers::file::error::Result;
use crate::receivers::file::matcher::{
    CostPattern, KeywordPattern, MatchError, match_cost, match_keyword,
};

const MINUTE_SECS: i64 = 60;

/// Start of the minute containing `ts` (epoch seconds).
pub fn minute_start(ts: i64) -> i64 {
    ts - ts.rem_euclid(MINUTE_SECS)
}

#[derive(Debug, Clone)]
enum Extractor {
    Count(KeywordPattern),
    Statistic(CostPattern),
}

impl Extractor {
    fn method(&self) -> Method {
        match self {
            Extractor::Count(_) => Method::Count,
            Extractor::Statistic(_) => Method::Statistic,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorTask {
    metric: String,
    tags: String,
    endpoint: String,
    counter_type: CounterType,
    step: i64,
    ts_driven: bool,
    extractor: Extractor,

    window_start: i64,
    window_end: i64,
    last_update: i64,

    count: u64,
    max: f64,
    min: f64,
    sum: f64,
}

impl AggregatorTask {
    /// Build a task from its item definition with its window aligned on `now`.
    pub fn new(item: &MetricItemConfig, endpoint: &str, ts_driven: bool, now: i64) -> Result<Self> {
        item.validate()?;
        let extractor = match item.method {
            Method::Count => Extractor::Count(KeywordPattern::new(&item.pattern)?),
            Method::Statistic => Extractor::Statistic(CostPattern::new(&item.pattern)?),
        };

        let mut task = Self {
            metric: item.metric.clone(),
            tags: item.tags.clone(),
            endpoint: endpoint.to_string(),
            counter_type: item.counter_type,
            step: item.step,
            ts_driven,
            extractor,
            window_start: 0,
            window_end: 0,
            last_update: 0,
            count: 0,
            max: f64::NEG_INFINITY,
            min: f64::INFINITY,
            sum: 0.0,
        };
        task.reset(now);
        Ok(task)
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn method(&self) -> Method {
        self.extractor.method()
    }

    pub fn window(&self) -> (i64, i64) {
        (self.window_start, self.window_end)
    }

    pub fn last_update(&self) -> i64 {
        self.last_update
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Zero the accumulators and realign the window on `now`.
    pub fn reset(&mut self, now: i64) {
        self.reset_accumulators();
        self.align_window(now);
        self.last_update = now;
    }

    /// Zero the accumulators, keeping the current window.
    pub fn reset_accumulators(&mut self) {
        self.count = 0;
        self.max = f64::NEG_INFINITY;
        self.min = f64::INFINITY;
        self.sum = 0.0;
    }

    fn align_window(&mut self, ts: i64) {
        self.window_start = minute_start(ts);
        self.window_end = if self.ts_driven {
            self.window_start + MINUTE_SECS
        } else {
            self.window_start + self.step
        };
    }

    /// Fold one complete line into the task.
    ///
    /// `ts` is the line's extracted timestamp when timestamps drive windowing
    /// and is ignored otherwise. A timestamp outside the current window first
    /// closes it; the flushed points are returned.
    pub fn observe(&mut self, line: &[u8], ts: i64, now: i64) -> Option<Vec<MetricPoint>> {
        let flushed = if self.ts_driven && (ts >= self.window_end || ts < self.window_start) {
            let points = self.points(now);
            self.reset_accumulators();
            self.align_window(ts);
            self.last_update = ts;
            Some(points)
        } else {
            None
        };

        let touched = match &self.extractor {
            Extractor::Count(pattern) => {
                if match_keyword(line, pattern) {
                    self.count += 1;
                    true
                } else {
                    false
                }
            }
            Extractor::Statistic(pattern) => match match_cost(line, pattern) {
                Ok(Some(cost)) => {
                    self.count += 1;
                    self.max = self.max.max(cost);
                    self.min = self.min.min(cost);
                    self.sum += cost;
                    true
                }
                Ok(None) => false,
                Err(MatchError::NotNumeric(text)) => {
                    debug!(metric = %self.metric, value = %text, "Ignoring non-numeric statistic value");
                    false
                }
                Err(e) => {
                    debug!(metric = %self.metric, error = %e, "Ignoring unusable statistic value");
                    false
                }
            },
        };

        if touched {
            self.last_update = if self.ts_driven { ts } else { now };
        }

        flushed
    }

    /// Whether a time-driven flush is due at `now`.
    pub fn flush_due(&self, now: i64) -> bool {
        if self.ts_driven {
            now - self.last_update >= self.step
        } else {
            now - self.window_start >= self.step
        }
    }

    /// Time-driven flush: emit the window (even when empty), reset, and roll
    /// forward. Timestamp-driven tasks jump to the minute containing `now`;
    /// wall-clock tasks advance by exactly one step.
    pub fn flush(&mut self, now: i64) -> Vec<MetricPoint> {
        let points = self.points(now);
        self.reset_accumulators();
        if self.ts_driven {
            self.align_window(now);
            self.last_update = now;
        } else {
            self.window_start += self.step;
            self.window_end += self.step;
        }
        points
    }

    /// Emit the current window's points without changing any state.
    pub fn points(&self, now: i64) -> Vec<MetricPoint> {
        let timestamp = self.window_end - 1;
        let point = |suffix: &str, value: f64| {
            MetricPoint::new(
                format!("{}.{}", self.metric, suffix),
                &self.endpoint,
                value,
                self.counter_type,
                &self.tags,
                timestamp,
                self.step,
                now,
            )
        };

        let count = self.count as f64;
        match self.extractor {
            Extractor::Count(_) => vec![point("cnt", count)],
            Extractor::Statistic(_) => {
                let max = if self.count == 0 { 0.0 } else { self.max };
                let min = if self.min > self.max { 0.0 } else { self.min };
                let avg = if self.count == 0 {
                    0.0
                } else {
                    self.sum / count
                };
                vec![
                    point("cnt", count),
                    point("max", max),
                    point("min", min),
                    point("avg", avg),
                ]
            }
        }
    }
}
