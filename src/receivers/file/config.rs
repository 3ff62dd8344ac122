// SPDX-License-Identifier: Apache-2.0

//! Per-source tailing configuration.
//!
//! These values are copied into each tracker and its tasks when they are
//! built; workers never look at the configuration document again.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::receivers::file::error::{Error, Result};
use crate::receivers::file::matcher::{CostPattern, KeywordPattern, TimestampPattern};
use crate::receivers::file::watcher::WatchMode;

pub const DEFAULT_DELIMITER: &str = "\n";
pub const DEFAULT_STEP_SECS: i64 = 60;

/// Open-Falcon counter kind reported alongside every point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CounterType {
    #[default]
    Gauge,
    Counter,
}

impl CounterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterType::Gauge => "GAUGE",
            CounterType::Counter => "COUNTER",
        }
    }
}

/// Aggregation applied to the lines matching an item's pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Count lines in which the pattern matches anywhere.
    Count,
    /// Extract one numeric capture and track count/max/min/avg.
    Statistic,
}

impl std::str::FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "count" => Ok(Method::Count),
            "statistic" => Ok(Method::Statistic),
            _ => Err(format!(
                "Invalid method '{}'. Valid options: count, statistic",
                s
            )),
        }
    }
}

/// One metric extracted from a log source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricItemConfig {
    pub metric: String,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub counter_type: CounterType,
    /// Window length in seconds
    #[serde(default = "default_step")]
    pub step: i64,
    pub pattern: String,
    pub method: Method,
}

/// One tailed file and the metrics derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSourceConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Whether timestamps embedded in lines drive windowing
    #[serde(default)]
    pub ts_enabled: bool,
    #[serde(default)]
    pub ts_pattern: String,
    #[serde(default)]
    pub watch_mode: WatchMode,
    #[serde(default)]
    pub items: Vec<MetricItemConfig>,
}

fn default_delimiter() -> String {
    DEFAULT_DELIMITER.to_string()
}

fn default_step() -> i64 {
    DEFAULT_STEP_SECS
}

impl MetricItemConfig {
    /// Validate the item, compiling its pattern for the configured method.
    pub fn validate(&self) -> Result<()> {
        if self.metric.trim().is_empty() {
            return Err(Error::Config("metric name must not be empty".to_string()));
        }
        if self.pattern.is_empty() {
            return Err(Error::Config(format!(
                "metric '{}' has an empty pattern",
                self.metric
            )));
        }
        if self.step <= 0 {
            return Err(Error::Config(format!(
                "metric '{}' has non-positive step {}",
                self.metric, self.step
            )));
        }
        match self.method {
            Method::Count => KeywordPattern::new(&self.pattern).map(|_| ()),
            Method::Statistic => CostPattern::new(&self.pattern).map(|_| ()),
        }
    }
}

impl LogSourceConfig {
    /// Validate the source and all of its items.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("log source name must not be empty".to_string()));
        }
        if self.path.as_os_str().is_empty() {
            return Err(Error::Config(format!(
                "log source '{}' has an empty path",
                self.name
            )));
        }
        if self.delimiter.is_empty() {
            return Err(Error::Config(format!(
                "log source '{}' has an empty delimiter",
                self.name
            )));
        }
        if self.ts_enabled {
            if self.ts_pattern.is_empty() {
                return Err(Error::Config(format!(
                    "log source '{}' enables timestamps without a tsPattern",
                    self.name
                )));
            }
            TimestampPattern::new(&self.ts_pattern)?;
        }
        for item in &self.items {
            item.validate()
                .map_err(|e| Error::Config(format!("log source '{}': {}", self.name, e)))?;
        }
        Ok(())
    }

    pub fn delimiter_bytes(&self) -> &[u8] {
        self.delimiter.as_bytes()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn count_item(metric: &str, pattern: &str, step: i64) -> MetricItemConfig {
        MetricItemConfig {
            metric: metric.to_string(),
            tags: String::new(),
            counter_type: CounterType::Gauge,
            step,
            pattern: pattern.to_string(),
            method: Method::Count,
        }
    }

    pub(crate) fn statistic_item(metric: &str, pattern: &str, step: i64) -> MetricItemConfig {
        MetricItemConfig {
            method: Method::Statistic,
            ..count_item(metric, pattern, step)
        }
    }

    pub(crate) fn source(name: &str, path: PathBuf, items: Vec<MetricItemConfig>) -> LogSourceConfig {
        LogSourceConfig {
            name: name.to_string(),
            path,
            delimiter: DEFAULT_DELIMITER.to_string(),
            ts_enabled: false,
            ts_pattern: String::new(),
            watch_mode: WatchMode::Poll,
            items,
        }
    }

    #[test]
    fn test_deserialize_defaults() {
        let json = r#"{
            "name": "app",
            "path": "/var/log/app.log",
            "items": [{"metric": "app.error", "pattern": "ERROR", "method": "count"}]
        }"#;
        let cfg: LogSourceConfig = serde_json::from_str(json).unwrap();

        assert_eq!(cfg.delimiter, "\n");
        assert!(!cfg.ts_enabled);
        assert_eq!(cfg.watch_mode, WatchMode::Poll);
        assert_eq!(cfg.items[0].step, 60);
        assert_eq!(cfg.items[0].counter_type, CounterType::Gauge);
        assert_eq!(cfg.items[0].tags, "");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_deserialize_camel_case_fields() {
        let json = r#"{
            "name": "nginx",
            "path": "/var/log/nginx/access.log",
            "tsEnabled": true,
            "tsPattern": "(\\d{4})-(\\d{2})-(\\d{2}) (\\d{2}):(\\d{2}):(\\d{2})",
            "watchMode": "native",
            "items": [{
                "metric": "nginx.cost",
                "tags": "module=web",
                "counterType": "COUNTER",
                "step": 30,
                "pattern": "cost=(\\d+)",
                "method": "statistic"
            }]
        }"#;
        let cfg: LogSourceConfig = serde_json::from_str(json).unwrap();

        assert!(cfg.ts_enabled);
        assert_eq!(cfg.watch_mode, WatchMode::Native);
        assert_eq!(cfg.items[0].counter_type, CounterType::Counter);
        assert_eq!(cfg.items[0].method, Method::Statistic);
        assert_eq!(cfg.items[0].step, 30);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_sources() {
        let ok = source("a", PathBuf::from("/tmp/a.log"), vec![count_item("m", "x", 60)]);
        assert!(ok.validate().is_ok());

        let mut bad = ok.clone();
        bad.name = " ".to_string();
        assert!(bad.validate().is_err());

        let mut bad = ok.clone();
        bad.path = PathBuf::new();
        assert!(bad.validate().is_err());

        let mut bad = ok.clone();
        bad.delimiter = String::new();
        assert!(bad.validate().is_err());

        let mut bad = ok.clone();
        bad.ts_enabled = true;
        assert!(bad.validate().is_err());

        bad.ts_pattern = r"(\d+)-(\d+)".to_string();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_items() {
        assert!(count_item("m", "(", 60).validate().is_err());
        assert!(count_item("", "x", 60).validate().is_err());
        assert!(count_item("m", "", 60).validate().is_err());
        assert!(count_item("m", "x", 0).validate().is_err());
        assert!(statistic_item("m", r"cost=\d+", 60).validate().is_err());
        assert!(statistic_item("m", r"cost=(\d+)", 60).validate().is_ok());
    }

    #[test]
    fn test_method_from_str() {
        assert_eq!("count".parse::<Method>().unwrap(), Method::Count);
        assert_eq!("Statistic".parse::<Method>().unwrap(), Method::Statistic);
        assert!("sum".parse::<Method>().is_err());
    }
}
