// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Rejections raised while turning log source configuration into trackers.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid log source configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Regex(String),

    #[error("duplicate log source name '{0}'")]
    DuplicateSource(String),
}

pub type Result<T> = std::result::Result<T, Error>;
