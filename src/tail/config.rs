// SPDX-License-Identifier: Apache-2.0

//! Configuration for the tail receiver.

use std::path::PathBuf;
use std::time::Duration;

use crate::tail::error::{Error, Result};
use crate::tail::expander::PathExpander;
use crate::tail::parser;
use crate::tail::tag::TagResolver;

/// Parser type for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParserType {
    /// No parsing, the raw line is stored under `message`
    #[default]
    None,
    /// Parse as a JSON object
    Json,
    /// Parse with a regex pattern using named capture groups
    Regex,
}

/// Configuration for the tail receiver
#[derive(Debug, Clone)]
pub struct TailReceiverConfig {
    /// Path templates. Each may contain strftime placeholders and glob patterns.
    pub paths: Vec<String>,
    /// Glob patterns for paths to exclude after expansion
    pub exclude: Vec<String>,
    /// Interpret strftime placeholders in `paths` against the current time
    pub expand_date: bool,
    /// Read files never tracked before from their first byte instead of their end.
    /// Only takes effect when a position file is configured.
    pub read_from_beginning: bool,
    /// How often the set of watched files is re-evaluated
    pub refresh_interval: Duration,
    /// How often the reactor reads new data from followed files
    pub poll_interval: Duration,
    /// How long a rotated-away file keeps being drained. Deferred close waits twice this.
    pub rotate_wait: Duration,
    /// Routing tag. A single `*` is replaced with the sanitized file path.
    pub tag: String,
    /// Record field that receives the source path, if set
    pub path_key: Option<String>,
    /// Where read positions are persisted. No persistence when unset.
    pub pos_file: Option<PathBuf>,
    /// How often dirty read positions are flushed to `pos_file`
    pub position_sync_interval: Duration,
    /// Parser type
    pub parser: ParserType,
    /// Regex pattern (when parser is Regex)
    pub regex_pattern: Option<String>,
    /// Maximum line size in bytes, longer lines are truncated
    pub max_line_size: usize,
    /// Maximum number of bytes read from a single file per reactor tick
    pub read_bytes_limit: usize,
    /// Capacity of the queue between the reactor and the event consumer
    pub event_queue_size: usize,
}

impl Default for TailReceiverConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            exclude: Vec::new(),
            expand_date: true,
            read_from_beginning: true,
            refresh_interval: Duration::from_secs(3600),
            poll_interval: Duration::from_millis(250),
            rotate_wait: Duration::from_secs(5),
            tag: String::new(),
            path_key: None,
            pos_file: None,
            position_sync_interval: Duration::from_secs(1),
            parser: ParserType::None,
            regex_pattern: None,
            max_line_size: 65536,
            read_bytes_limit: 1024 * 1024,
            event_queue_size: 1000,
        }
    }
}

impl TailReceiverConfig {
    /// Validate the configuration. Every error here is fatal and must be surfaced
    /// before the reactor starts.
    pub fn validate(&self) -> Result<()> {
        if self.paths.is_empty() {
            return Err(Error::Config(
                "At least one path template must be specified".to_string(),
            ));
        }

        if self.tag.is_empty() {
            return Err(Error::Config("tag must not be empty".to_string()));
        }

        if self.refresh_interval.is_zero()
            || self.poll_interval.is_zero()
            || self.position_sync_interval.is_zero()
        {
            return Err(Error::Config("intervals must be positive".to_string()));
        }

        if self.max_line_size == 0 || self.read_bytes_limit == 0 {
            return Err(Error::Config(
                "max_line_size and read_bytes_limit must be positive".to_string(),
            ));
        }

        if self.event_queue_size == 0 {
            return Err(Error::Config("event_queue_size must be positive".to_string()));
        }

        if let Some(key) = &self.path_key {
            if key.is_empty() {
                return Err(Error::Config("path_key must not be empty".to_string()));
            }
        }

        PathExpander::from_config(self)?;
        TagResolver::new(&self.tag)?;
        parser::build_parser(self.parser, self.regex_pattern.as_deref())?;

        Ok(())
    }
}
