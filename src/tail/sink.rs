// SPDX-License-Identifier: Apache-2.0

//! Where delivered lines go.
//!
//! Watchers hand complete line batches to a [`LineSink`]. The shipped
//! implementation, [`LineRouter`], parses each line into a record, resolves the
//! routing tag and emits the batch to an [`EventSink`]. Failures on this side
//! are logged and dropped; they never reach the watcher.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::bounded_channel::{BoundedSender, TrySendError};
use crate::tail::error::{Error, Result};
use crate::tail::parser::{Parser, Record};
use crate::tail::tag::TagResolver;

/// Receives the complete lines read by a watcher.
pub trait LineSink: Send + Sync {
    fn deliver(&self, lines: Vec<String>, token: &str, path: &Path);
}

/// One parsed line
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub time: DateTime<Utc>,
    pub record: Record,
}

/// All events parsed from one delivery, with their routing tag
#[derive(Debug, Clone, PartialEq)]
pub struct EventBatch {
    pub tag: String,
    pub events: Vec<Event>,
}

/// Downstream consumer of tagged events.
pub trait EventSink: Send + Sync {
    fn emit(&self, tag: &str, events: Vec<Event>) -> Result<()>;
}

/// Emits batches into a bounded channel without ever blocking the reactor.
#[derive(Clone)]
pub struct ChannelEventSink {
    tx: BoundedSender<EventBatch>,
}

impl ChannelEventSink {
    pub fn new(tx: BoundedSender<EventBatch>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, tag: &str, events: Vec<Event>) -> Result<()> {
        let batch = EventBatch {
            tag: tag.to_string(),
            events,
        };
        match self.tx.try_send(batch) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(batch)) => {
                debug!(tag = %batch.tag, events = batch.events.len(), "Event queue full");
                Err(Error::ChannelSend)
            }
            Err(TrySendError::Disconnected(_)) => Err(Error::ChannelSend),
        }
    }
}

/// Parses, tags and forwards line batches.
pub struct LineRouter {
    parser: Box<dyn Parser>,
    tag: TagResolver,
    path_key: Option<String>,
    sink: Box<dyn EventSink>,
}

impl LineRouter {
    pub fn new(
        parser: Box<dyn Parser>,
        tag: TagResolver,
        path_key: Option<String>,
        sink: Box<dyn EventSink>,
    ) -> Self {
        Self {
            parser,
            tag,
            path_key,
            sink,
        }
    }

    fn parse_lines(&self, lines: &[String], path: &Path) -> Vec<Event> {
        let time = Utc::now();
        let mut events = Vec::with_capacity(lines.len());

        for line in lines {
            match self.parser.parse(line) {
                Ok(mut record) => {
                    if let Some(key) = &self.path_key {
                        record.insert(
                            key.clone(),
                            Value::String(path.to_string_lossy().into_owned()),
                        );
                    }
                    events.push(Event { time, record });
                }
                Err(e) => {
                    warn!(path = ?path, "Skipping unparseable line: {}", e);
                }
            }
        }

        events
    }
}

impl LineSink for LineRouter {
    fn deliver(&self, lines: Vec<String>, token: &str, path: &Path) {
        let events = self.parse_lines(&lines, path);
        if events.is_empty() {
            return;
        }

        let tag = self.tag.resolve(token);
        let count = events.len();
        if let Err(e) = self.sink.emit(&tag, events) {
            warn!(tag = %tag, path = ?path, events = count, "Dropping events: {}", e);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// A single recorded delivery
    #[derive(Debug, Clone, PartialEq)]
    pub struct Delivery {
        pub lines: Vec<String>,
        pub token: String,
        pub path: PathBuf,
    }

    /// LineSink that records every delivery
    #[derive(Default)]
    pub struct RecordingLineSink {
        deliveries: Mutex<Vec<Delivery>>,
    }

    impl RecordingLineSink {
        pub fn deliveries(&self) -> Vec<Delivery> {
            self.deliveries.lock().unwrap().clone()
        }

        pub fn lines(&self) -> Vec<String> {
            self.deliveries()
                .into_iter()
                .flat_map(|d| d.lines)
                .collect()
        }
    }

    impl LineSink for RecordingLineSink {
        fn deliver(&self, lines: Vec<String>, token: &str, path: &Path) {
            self.deliveries.lock().unwrap().push(Delivery {
                lines,
                token: token.to_string(),
                path: path.to_path_buf(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::bounded;
    use crate::tail::parser::{JsonParser, MESSAGE_KEY, NoneParser};

    fn router(
        parser: Box<dyn Parser>,
        tag: &str,
        path_key: Option<&str>,
        size: usize,
    ) -> (LineRouter, crate::bounded_channel::BoundedReceiver<EventBatch>) {
        let (tx, rx) = bounded(size);
        let router = LineRouter::new(
            parser,
            TagResolver::new(tag).unwrap(),
            path_key.map(String::from),
            Box::new(ChannelEventSink::new(tx)),
        );
        (router, rx)
    }

    #[test]
    fn test_router_tags_and_parses() {
        let (router, rx) = router(Box::new(NoneParser), "app.*", Some("path"), 4);
        let path = Path::new("/var/log/app.log");

        router.deliver(
            vec!["one".to_string(), "two".to_string()],
            "var.log.app.log",
            path,
        );

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.tag, "app.var.log.app.log");
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.events[0].record[MESSAGE_KEY], "one");
        assert_eq!(batch.events[1].record["path"], "/var/log/app.log");
    }

    #[test]
    fn test_router_skips_bad_lines() {
        let (router, rx) = router(Box::new(JsonParser::new()), "static", None, 4);

        router.deliver(
            vec![
                r#"{"n":1}"#.to_string(),
                "garbage".to_string(),
                r#"{"n":3}"#.to_string(),
            ],
            "x.log",
            Path::new("/x.log"),
        );

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.tag, "static");
        let ns: Vec<_> = batch.events.iter().map(|e| e.record["n"].clone()).collect();
        assert_eq!(ns, vec![1, 3]);
    }

    #[test]
    fn test_router_emits_nothing_when_every_line_fails() {
        let (router, rx) = router(Box::new(JsonParser::new()), "t", None, 4);
        router.deliver(vec!["nope".to_string()], "x", Path::new("/x"));
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (router, rx) = router(Box::new(NoneParser), "t", None, 1);
        let path = Path::new("/a.log");

        router.deliver(vec!["first".to_string()], "a.log", path);
        router.deliver(vec!["second".to_string()], "a.log", path);

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.events[0].record[MESSAGE_KEY], "first");
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_closed_channel_is_an_error() {
        let (tx, rx) = bounded(1);
        drop(rx);
        let sink = ChannelEventSink::new(tx);
        assert!(matches!(sink.emit("t", vec![]), Err(Error::ChannelSend)));
    }
}
