// SPDX-License-Identifier: Apache-2.0

//! Dynamic file tailing.
//!
//! Path templates (strftime placeholders plus globs) are re-expanded on a
//! timer; a watcher is started for every newly matching file and stopped,
//! after a grace period, for every file that no longer matches. Lines read by
//! the watchers are parsed, tagged from the file path and emitted to an
//! [`EventSink`]. Read positions survive restarts through a JSON position file.

pub mod config;
pub mod error;
pub mod expander;
pub mod file_id;
pub mod follower;
pub mod parser;
pub mod position;
pub mod reactor;
pub mod receiver;
pub mod reconciler;
pub mod sink;
pub mod tag;
pub mod watcher;

pub use config::{ParserType, TailReceiverConfig};
pub use error::{Error, Result};
pub use reactor::ShutdownStep;
pub use receiver::TailReceiver;
pub use sink::{ChannelEventSink, Event, EventBatch, EventSink, LineRouter, LineSink};
