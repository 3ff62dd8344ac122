// SPDX-License-Identifier: Apache-2.0

//! Stateless pattern matching over tailed lines.
//!
//! Patterns are compiled once when a tracker is built; a pattern that does not
//! compile, or that has the wrong number of capture groups, is rejected there
//! and never reaches the read path. Every extraction returns a three-way
//! outcome: `Ok(Some(_))` on a match, `Ok(None)` when the line does not match,
//! and `Err(MatchError)` when it matched but the captured text is unusable.

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use regex::bytes::{Captures, Regex};
use thiserror::Error;

use crate::receivers::file::error::{Error, Result};

/// Extraction failure on a line that did match its pattern.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("captured value {0:?} is not a finite number")]
    NotNumeric(String),

    #[error("captured timestamp {0:?} is not a valid local time")]
    InvalidTimestamp(String),
}

pub type MatchResult<T> = std::result::Result<Option<T>, MatchError>;

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Regex(format!("invalid pattern {:?}: {}", pattern, e)))
}

/// Number of explicit capture groups (the implicit whole-match group excluded).
fn group_count(regex: &Regex) -> usize {
    regex.captures_len() - 1
}

/// Pattern capturing year, month, day, hour, minute and optionally second,
/// in that order.
#[derive(Debug, Clone)]
pub struct TimestampPattern {
    regex: Regex,
    has_seconds: bool,
}

impl TimestampPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = compile(pattern)?;
        let has_seconds = match group_count(&regex) {
            5 => false,
            6 => true,
            n => {
                return Err(Error::Config(format!(
                    "timestamp pattern {:?} must have 5 or 6 capture groups \
                     (year, month, day, hour, minute[, second]), found {}",
                    pattern, n
                )));
            }
        };
        Ok(Self { regex, has_seconds })
    }
}

/// Pattern whose presence anywhere in a line counts as a hit.
#[derive(Debug, Clone)]
pub struct KeywordPattern {
    regex: Regex,
}

impl KeywordPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            regex: compile(pattern)?,
        })
    }
}

/// Pattern with exactly one capture group holding a numeric value.
#[derive(Debug, Clone)]
pub struct CostPattern {
    regex: Regex,
}

impl CostPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = compile(pattern)?;
        let groups = group_count(&regex);
        if groups != 1 {
            return Err(Error::Config(format!(
                "statistic pattern {:?} must have exactly one capture group, found {}",
                pattern, groups
            )));
        }
        Ok(Self { regex })
    }
}

fn group_str<'l>(captures: &Captures<'l>, index: usize) -> Option<&'l str> {
    captures
        .get(index)
        .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
}

/// Extract the line's timestamp, interpreted in the local time zone.
pub fn match_timestamp(line: &[u8], pattern: &TimestampPattern) -> MatchResult<DateTime<Local>> {
    let Some(captures) = pattern.regex.captures(line) else {
        return Ok(None);
    };

    let raw = String::from_utf8_lossy(captures.get(0).map_or(&[][..], |m| m.as_bytes()));
    let invalid = || MatchError::InvalidTimestamp(raw.to_string());

    let field = |index: usize| -> std::result::Result<u32, MatchError> {
        group_str(&captures, index)
            .and_then(|s| s.trim().parse::<u32>().ok())
            .ok_or_else(invalid)
    };

    let year = field(1)? as i32;
    let month = field(2)?;
    let day = field(3)?;
    let hour = field(4)?;
    let minute = field(5)?;
    let second = if pattern.has_seconds { field(6)? } else { 0 };

    let naive = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second))
        .ok_or_else(invalid)?;

    // Ambiguous local times (DST fall-back) resolve to the earlier instant;
    // nonexistent ones (DST gap) are rejected.
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(Some)
        .ok_or_else(invalid)
}

/// True iff the pattern matches anywhere in the line.
pub fn match_keyword(line: &[u8], pattern: &KeywordPattern) -> bool {
    pattern.regex.is_match(line)
}

/// Extract the numeric value of the pattern's single capture group.
pub fn match_cost(line: &[u8], pattern: &CostPattern) -> MatchResult<f64> {
    let Some(captures) = pattern.regex.captures(line) else {
        return Ok(None);
    };

    let text = captures
        .get(1)
        .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
        .unwrap_or_default();

    match text.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Some(value)),
        _ => Err(MatchError::NotNumeric(text)),
    }
}
