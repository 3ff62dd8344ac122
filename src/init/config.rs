// SPDX-License-Identifier: Apache-2.0

use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::receivers::file::LogSourceConfig;

pub const ENV_PREFIX: &str = "LOG_AGENT_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FalconConfig {
    /// Push URL of the Open-Falcon agent or transfer, e.g. http://127.0.0.1:1988/v1/push
    pub url: String,
    /// Endpoint reported with every point; empty means the host name
    #[serde(default)]
    pub endpoint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub falcon: FalconConfig,
    #[serde(default)]
    pub logs: Vec<LogSourceConfig>,
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.falcon.url.trim().is_empty() {
            return Err(ConfigError::Invalid("falcon.url must not be empty".to_string()));
        }

        let mut names = HashSet::new();
        for source in &self.logs {
            source
                .validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate log source name '{}'",
                    source.name
                )));
            }
        }
        Ok(())
    }
}

/// Load and validate the configuration at `path`. Environment variables
/// prefixed with `LOG_AGENT_` override file values, with `__` separating
/// nested keys (`LOG_AGENT_FALCON__URL`).
pub fn load_config(path: &Path) -> Result<AgentConfig, ConfigError> {
    load_config_with_env(path, ENV_PREFIX)
}

fn load_config_with_env(path: &Path, env_prefix: &str) -> Result<AgentConfig, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let config: AgentConfig = Figment::new()
        .merge(Yaml::file(path))
        .merge(Env::prefixed(env_prefix).split("__"))
        .extract()
        .map_err(Box::new)?;

    config.validate()?;
    Ok(config)
}

/// Digest of the raw configuration file bytes, used to detect edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigChecksum(md5::Digest);

impl ConfigChecksum {
    pub fn from_bytes(data: &[u8]) -> Self {
        ConfigChecksum(md5::compute(data))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self::from_bytes(&data))
    }
}

impl Display for ConfigChecksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}", self.0)
    }
}
