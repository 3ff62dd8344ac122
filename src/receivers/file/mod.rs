// SPDX-License-Identifier: Apache-2.0

//! Log file tailing and windowed metric extraction.
//!
//! Each configured log source gets a [`FileTracker`] owning the file handle,
//! its read cursor and one [`AggregatorTask`] per metric item. A worker loop
//! drives the tracker on tokio's blocking pool, either by polling file
//! snapshots or by reacting to native change notifications, and the
//! [`Supervisor`] starts, stops and rebuilds the workers as a group.
//!
//! Features:
//! - Growth, truncation and rotation detection (device + inode identity)
//! - Delimiter-safe incremental reads; partial lines are never consumed
//! - `count` and `statistic` aggregation over minute or fixed-step windows

pub mod config;
pub mod error;
pub mod input;
pub mod matcher;
pub mod supervisor;
pub mod task;
pub mod tracker;
pub mod watcher;
pub mod worker;

pub use config::{CounterType, LogSourceConfig, Method, MetricItemConfig};
pub use error::{Error, Result};
pub use supervisor::Supervisor;
pub use task::AggregatorTask;
pub use tracker::{FileTracker, MAX_IDLE_TICKS, PollOutcome};
pub use watcher::WatchMode;
pub use worker::WorkerConfig;
