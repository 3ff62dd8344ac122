// SPDX-License-Identifier: Apache-2.0

use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

use crate::receivers::file::WorkerConfig;

#[derive(Debug, Args, Clone)]
pub struct AgentRun {
    /// Path to the YAML configuration file
    #[arg(long, env = "LOG_AGENT_CONFIG", default_value = "config.yaml")]
    pub config: PathBuf,

    /// How often the configuration file is checked for changes
    #[arg(long, env = "LOG_AGENT_CONFIG_CHECK_INTERVAL_SECS", default_value = "5")]
    pub config_check_interval_secs: u64,

    /// Idle sleep between reads of a tailed file
    #[arg(long, env = "LOG_AGENT_POLL_INTERVAL_MS", default_value = "100")]
    pub poll_interval_ms: u64,

    /// Period of the time-driven window flush
    #[arg(long, env = "LOG_AGENT_FLUSH_INTERVAL_MS", default_value = "1000")]
    pub flush_interval_ms: u64,

    /// Maximum number of flushed batches waiting to be pushed
    #[arg(long, env = "LOG_AGENT_POINTS_QUEUE_SIZE", default_value = "1024")]
    pub points_queue_size: usize,

    /// Timeout for a single push to Open-Falcon
    #[arg(long, env = "LOG_AGENT_PUSH_TIMEOUT_MS", default_value = "5000")]
    pub push_timeout_ms: u64,
}

impl Default for AgentRun {
    fn default() -> Self {
        AgentRun {
            config: PathBuf::from("config.yaml"),
            config_check_interval_secs: 5,
            poll_interval_ms: 100,
            flush_interval_ms: 1000,
            points_queue_size: 1024,
            push_timeout_ms: 5000,
        }
    }
}

impl AgentRun {
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            flush_interval: Duration::from_millis(self.flush_interval_ms.max(1)),
        }
    }

    pub fn config_check_interval(&self) -> Duration {
        Duration::from_secs(self.config_check_interval_secs.max(1))
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn points_queue_size(&self) -> usize {
        self.points_queue_size.max(1)
    }
}
