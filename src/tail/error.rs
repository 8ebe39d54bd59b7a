// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid glob pattern: {0}")]
    InvalidGlob(String),

    #[error("Invalid path template: {0}")]
    InvalidTemplate(String),

    #[error("Regex error: {0}")]
    Regex(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Channel send error")]
    ChannelSend,

    #[error("Reactor error: {0}")]
    Reactor(String),
}

pub type Result<T> = std::result::Result<T, Error>;
