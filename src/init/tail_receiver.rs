// SPDX-License-Identifier: Apache-2.0

use clap::{Args, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::tail::config::{ParserType as ConfigParserType, TailReceiverConfig};

/// Parser type for log lines
#[derive(Copy, Clone, Debug, Default, ValueEnum, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParserType {
    /// No parsing, the line is stored under "message"
    #[default]
    None,
    /// Parse as a JSON object
    Json,
    /// Parse with regex pattern
    Regex,
}

impl From<ParserType> for ConfigParserType {
    fn from(p: ParserType) -> Self {
        match p {
            ParserType::None => ConfigParserType::None,
            ParserType::Json => ConfigParserType::Json,
            ParserType::Regex => ConfigParserType::Regex,
        }
    }
}

#[derive(Debug, Args, Clone, Deserialize)]
#[serde(default)]
pub struct TailReceiverArgs {
    /// Comma-separated path templates. Each may contain strftime placeholders
    /// and glob patterns (e.g., "/var/log/app/%Y%m%d/*.log")
    #[arg(long, env = "ROTEL_TAIL_RECEIVER_PATH", value_delimiter = ',')]
    pub tail_receiver_path: Vec<String>,

    /// Comma-separated glob patterns for files to exclude
    #[arg(long, env = "ROTEL_TAIL_RECEIVER_EXCLUDE", value_delimiter = ',')]
    pub tail_receiver_exclude: Vec<String>,

    /// Interpret strftime placeholders in path templates
    #[arg(
        long,
        env = "ROTEL_TAIL_RECEIVER_EXPAND_DATE",
        default_value = "true",
        action = clap::ArgAction::Set
    )]
    pub tail_receiver_expand_date: bool,

    /// Read files never tracked in the position file from their first byte
    #[arg(
        long,
        env = "ROTEL_TAIL_RECEIVER_READ_FROM_BEGINNING",
        default_value = "true",
        action = clap::ArgAction::Set
    )]
    pub tail_receiver_read_from_beginning: bool,

    /// Interval in seconds between re-evaluations of the path templates
    #[arg(
        long,
        env = "ROTEL_TAIL_RECEIVER_REFRESH_INTERVAL_SECS",
        default_value = "3600"
    )]
    pub tail_receiver_refresh_interval_secs: u64,

    /// Interval in milliseconds between reads of followed files
    #[arg(
        long,
        env = "ROTEL_TAIL_RECEIVER_POLL_INTERVAL_MS",
        default_value = "250"
    )]
    pub tail_receiver_poll_interval_ms: u64,

    /// Time in milliseconds a rotated file keeps being drained. Files that stop
    /// matching are released after twice this.
    #[arg(
        long,
        env = "ROTEL_TAIL_RECEIVER_ROTATE_WAIT_MS",
        default_value = "5000"
    )]
    pub tail_receiver_rotate_wait_ms: u64,

    /// Routing tag. A "*" is replaced with the file path, dot-delimited.
    #[arg(long, env = "ROTEL_TAIL_RECEIVER_TAG", default_value = "tail.*")]
    pub tail_receiver_tag: String,

    /// Record field that receives the source path
    #[arg(long, env = "ROTEL_TAIL_RECEIVER_PATH_KEY")]
    pub tail_receiver_path_key: Option<String>,

    /// Path of the position file. Read positions are not persisted when unset.
    #[arg(long, env = "ROTEL_TAIL_RECEIVER_POS_FILE")]
    pub tail_receiver_pos_file: Option<PathBuf>,

    /// Interval in milliseconds between position file flushes
    #[arg(
        long,
        env = "ROTEL_TAIL_RECEIVER_POSITION_SYNC_INTERVAL_MS",
        default_value = "1000"
    )]
    pub tail_receiver_position_sync_interval_ms: u64,

    /// Parser type: none, json, regex
    #[arg(
        value_enum,
        long,
        env = "ROTEL_TAIL_RECEIVER_PARSER",
        default_value = "none"
    )]
    pub tail_receiver_parser: ParserType,

    /// Regex pattern with named capture groups (when parser=regex)
    #[arg(long, env = "ROTEL_TAIL_RECEIVER_REGEX_PATTERN")]
    pub tail_receiver_regex_pattern: Option<String>,

    /// Maximum line size in bytes (longer lines are truncated)
    #[arg(
        long,
        env = "ROTEL_TAIL_RECEIVER_MAX_LINE_SIZE",
        default_value = "65536"
    )]
    pub tail_receiver_max_line_size: usize,

    /// Maximum bytes read from a single file per read tick
    #[arg(
        long,
        env = "ROTEL_TAIL_RECEIVER_READ_BYTES_LIMIT",
        default_value = "1048576"
    )]
    pub tail_receiver_read_bytes_limit: usize,

    /// Capacity of the event queue between the reactor and the consumer
    #[arg(
        long,
        env = "ROTEL_TAIL_RECEIVER_EVENT_QUEUE_SIZE",
        default_value = "1000"
    )]
    pub tail_receiver_event_queue_size: usize,
}

impl Default for TailReceiverArgs {
    fn default() -> Self {
        Self {
            tail_receiver_path: Vec::new(),
            tail_receiver_exclude: Vec::new(),
            tail_receiver_expand_date: true,
            tail_receiver_read_from_beginning: true,
            tail_receiver_refresh_interval_secs: 3600,
            tail_receiver_poll_interval_ms: 250,
            tail_receiver_rotate_wait_ms: 5000,
            tail_receiver_tag: "tail.*".to_string(),
            tail_receiver_path_key: None,
            tail_receiver_pos_file: None,
            tail_receiver_position_sync_interval_ms: 1000,
            tail_receiver_parser: ParserType::None,
            tail_receiver_regex_pattern: None,
            tail_receiver_max_line_size: 65536,
            tail_receiver_read_bytes_limit: 1024 * 1024,
            tail_receiver_event_queue_size: 1000,
        }
    }
}

impl TailReceiverArgs {
    /// Build the receiver config from command line args
    pub fn build_config(&self) -> TailReceiverConfig {
        TailReceiverConfig {
            paths: self.tail_receiver_path.clone(),
            exclude: self.tail_receiver_exclude.clone(),
            expand_date: self.tail_receiver_expand_date,
            read_from_beginning: self.tail_receiver_read_from_beginning,
            refresh_interval: Duration::from_secs(self.tail_receiver_refresh_interval_secs),
            poll_interval: Duration::from_millis(self.tail_receiver_poll_interval_ms),
            rotate_wait: Duration::from_millis(self.tail_receiver_rotate_wait_ms),
            tag: self.tail_receiver_tag.clone(),
            path_key: self.tail_receiver_path_key.clone(),
            pos_file: self.tail_receiver_pos_file.clone(),
            position_sync_interval: Duration::from_millis(
                self.tail_receiver_position_sync_interval_ms,
            ),
            parser: self.tail_receiver_parser.into(),
            regex_pattern: self.tail_receiver_regex_pattern.clone(),
            max_line_size: self.tail_receiver_max_line_size,
            read_bytes_limit: self.tail_receiver_read_bytes_limit,
            event_queue_size: self.tail_receiver_event_queue_size,
        }
    }
}
