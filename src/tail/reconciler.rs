// SPDX-License-Identifier: Apache-2.0

//! Watch-set reconciliation.
//!
//! The reconciler owns the path to watcher map. Every refresh diffs the
//! expander's output against the current keys: watchers for paths that no
//! longer match are closed with a deferred close, new paths get a watcher.
//! Watchers in their grace period are moved out of the map so its keys always
//! equal the last expansion.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone};
use tracing::{debug, warn};

use crate::tail::config::TailReceiverConfig;
use crate::tail::error::Result;
use crate::tail::expander::PathExpander;
use crate::tail::file_id::FileId;
use crate::tail::follower::FollowerLimits;
use crate::tail::position::{PositionEntry, PositionStore};
use crate::tail::sink::LineSink;
use crate::tail::watcher::{CloseMode, TailWatcher, WatcherState};

/// Outcome of one refresh
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshStats {
    pub started: usize,
    pub stopped: usize,
}

impl RefreshStats {
    pub fn is_empty(&self) -> bool {
        self.started == 0 && self.stopped == 0
    }
}

pub struct Reconciler {
    expander: PathExpander,
    positions: Option<PositionStore>,
    sink: Arc<dyn LineSink>,
    rotate_wait: Duration,
    limits: FollowerLimits,
    read_from_beginning: bool,
    watchers: HashMap<PathBuf, TailWatcher>,
    closing: Vec<TailWatcher>,
    next_id: u64,
}

impl Reconciler {
    pub fn new(
        expander: PathExpander,
        positions: Option<PositionStore>,
        sink: Arc<dyn LineSink>,
        rotate_wait: Duration,
        limits: FollowerLimits,
        read_from_beginning: bool,
    ) -> Self {
        Self {
            expander,
            positions,
            sink,
            rotate_wait,
            limits,
            read_from_beginning,
            watchers: HashMap::new(),
            closing: Vec::new(),
            next_id: 0,
        }
    }

    pub fn from_config(
        config: &TailReceiverConfig,
        positions: Option<PositionStore>,
        sink: Arc<dyn LineSink>,
    ) -> Result<Self> {
        Ok(Self::new(
            PathExpander::from_config(config)?,
            positions,
            sink,
            config.rotate_wait,
            FollowerLimits {
                max_line_size: config.max_line_size,
                read_bytes_limit: config.read_bytes_limit,
            },
            config.read_from_beginning,
        ))
    }

    /// Re-evaluate the path templates against the current time and reconcile.
    pub fn refresh(&mut self) -> RefreshStats {
        let current = self.expander.expand();
        self.reconcile(current, Instant::now())
    }

    /// Re-evaluate the path templates against `wall_clock`. Deferred closes are
    /// armed relative to `now`.
    pub fn refresh_at<Tz>(&mut self, wall_clock: &DateTime<Tz>, now: Instant) -> RefreshStats
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let current = self.expander.expand_at(wall_clock);
        self.reconcile(current, now)
    }

    fn reconcile(&mut self, current: Vec<PathBuf>, now: Instant) -> RefreshStats {
        let current_set: HashSet<&PathBuf> = current.iter().collect();

        let missing: Vec<PathBuf> = self
            .watchers
            .keys()
            .filter(|p| !current_set.contains(p))
            .cloned()
            .collect();
        let added: Vec<&PathBuf> = current
            .iter()
            .filter(|p| !self.watchers.contains_key(*p))
            .collect();

        let mut stats = RefreshStats::default();

        for path in &missing {
            if self.stop_watch(path, CloseMode::Deferred, now) {
                stats.stopped += 1;
            }
        }

        for path in added {
            if self.start_watch(path) {
                stats.started += 1;
            }
        }

        if !stats.is_empty() {
            debug!(
                started = stats.started,
                stopped = stats.stopped,
                watching = self.watchers.len(),
                "Refreshed watch set"
            );
        }

        stats
    }

    fn start_watch(&mut self, path: &Path) -> bool {
        let entry = self.resolve_entry(path);
        let id = self.next_id;

        match TailWatcher::start(
            id,
            path,
            entry,
            self.rotate_wait,
            self.limits,
            self.sink.clone(),
        ) {
            Ok(watcher) => {
                self.next_id += 1;
                self.watchers.insert(path.to_path_buf(), watcher);
                true
            }
            Err(e) => {
                // Retried on the next refresh while the path keeps matching
                warn!(path = ?path, "Failed to start watching file: {}", e);
                false
            }
        }
    }

    fn resolve_entry(&self, path: &Path) -> PositionEntry {
        let Some(store) = &self.positions else {
            return PositionEntry::Null;
        };

        let entry = store.lookup(path);
        if self.read_from_beginning && entry.read_inode() == 0 {
            match FileId::from_path(path) {
                Ok(id) => {
                    debug!(path = ?path, inode = id.ino(), "Tracking new file from offset 0");
                    entry.update(id.ino(), 0);
                }
                Err(e) => debug!(path = ?path, "Failed to stat new file: {}", e),
            }
        }
        entry
    }

    fn stop_watch(&mut self, path: &Path, mode: CloseMode, now: Instant) -> bool {
        let Some(mut watcher) = self.watchers.remove(path) else {
            return false;
        };
        watcher.close(mode, now);
        if watcher.state() != WatcherState::Closed {
            self.closing.push(watcher);
        }
        true
    }

    /// Read from every following watcher.
    pub fn poll_watchers(&mut self, now: Instant) {
        for watcher in self.watchers.values_mut() {
            watcher.poll(now);
        }
    }

    /// Fire every grace timer that is due. Returns how many watchers closed.
    pub fn fire_due_closes(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        self.closing.retain_mut(|watcher| {
            if watcher.fire_close_if_due(now) {
                fired += 1;
            }
            watcher.state() != WatcherState::Closed
        });
        fired
    }

    /// Earliest pending grace timer
    pub fn next_close_deadline(&self) -> Option<Instant> {
        self.closing
            .iter()
            .filter_map(|w| w.close_deadline())
            .min()
    }

    /// Close every watcher immediately, including those in their grace period.
    /// Returns how many watchers were closed.
    pub fn shutdown(&mut self, now: Instant) -> usize {
        let mut closed = 0;
        for path in self.watched_paths() {
            if self.stop_watch(&path, CloseMode::Immediate, now) {
                closed += 1;
            }
        }
        for mut watcher in self.closing.drain(..) {
            watcher.close(CloseMode::Immediate, now);
            closed += 1;
        }
        closed
    }

    /// Flush position updates, if persistence is enabled.
    pub fn sync_positions(&self) -> Result<()> {
        match &self.positions {
            Some(store) => store.sync(),
            None => Ok(()),
        }
    }

    /// Snapshot of the watched paths, sorted
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.watchers.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn watcher(&self, path: &Path) -> Option<&TailWatcher> {
        self.watchers.get(path)
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    /// Watchers detached but still inside their grace period
    pub fn closing_len(&self) -> usize {
        self.closing.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tail::sink::testing::RecordingLineSink;
    use chrono::Utc;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use tempfile::TempDir;

    const ROTATE_WAIT: Duration = Duration::from_secs(1);

    fn append(path: &Path, data: &str) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(data.as_bytes()).unwrap();
    }

    fn reconciler(
        dir: &TempDir,
        positions: Option<PositionStore>,
        read_from_beginning: bool,
    ) -> (Reconciler, Arc<RecordingLineSink>) {
        let pattern = format!("{}/*.log", dir.path().display());
        let expander = PathExpander::new(vec![pattern], vec![], false).unwrap();
        let sink = Arc::new(RecordingLineSink::default());
        let reconciler = Reconciler::new(
            expander,
            positions,
            sink.clone(),
            ROTATE_WAIT,
            FollowerLimits::default(),
            read_from_beginning,
        );
        (reconciler, sink)
    }

    #[test]
    fn test_refresh_matches_expansion() {
        let dir = TempDir::new().unwrap();
        append(&dir.path().join("a.log"), "");
        append(&dir.path().join("b.log"), "");
        append(&dir.path().join("c.txt"), "");

        let (mut reconciler, _) = reconciler(&dir, None, true);
        let stats = reconciler.refresh();
        assert_eq!(stats, RefreshStats { started: 2, stopped: 0 });
        assert_eq!(
            reconciler.watched_paths(),
            vec![dir.path().join("a.log"), dir.path().join("b.log")]
        );

        fs::remove_file(dir.path().join("a.log")).unwrap();
        append(&dir.path().join("d.log"), "");

        let stats = reconciler.refresh();
        assert_eq!(stats, RefreshStats { started: 1, stopped: 1 });
        assert_eq!(
            reconciler.watched_paths(),
            vec![dir.path().join("b.log"), dir.path().join("d.log")]
        );
        assert_eq!(reconciler.closing_len(), 1);
    }

    #[test]
    fn test_refresh_is_idempotent_and_keeps_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        append(&path, "");

        let (mut reconciler, _) = reconciler(&dir, None, true);
        reconciler.refresh();
        let id = reconciler.watcher(&path).unwrap().id();

        let stats = reconciler.refresh();
        assert!(stats.is_empty());
        assert_eq!(reconciler.watcher(&path).unwrap().id(), id);
        assert_eq!(reconciler.closing_len(), 0);
    }

    #[test]
    fn test_reappearing_path_gets_new_watcher() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        append(&path, "");

        let (mut reconciler, _) = reconciler(&dir, None, true);
        reconciler.refresh();
        let first = reconciler.watcher(&path).unwrap().id();

        fs::remove_file(&path).unwrap();
        reconciler.refresh();
        assert!(reconciler.watcher(&path).is_none());

        append(&path, "");
        reconciler.refresh();
        assert_ne!(reconciler.watcher(&path).unwrap().id(), first);
    }

    #[test]
    fn test_deferred_close_fires_after_grace() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        append(&path, "");

        let (mut reconciler, _) = reconciler(&dir, None, true);
        let start = Instant::now();
        reconciler.refresh_at(&Utc::now(), start);

        fs::remove_file(&path).unwrap();
        reconciler.refresh_at(&Utc::now(), start);
        assert_eq!(reconciler.closing_len(), 1);
        assert_eq!(reconciler.next_close_deadline(), Some(start + ROTATE_WAIT * 2));

        assert_eq!(reconciler.fire_due_closes(start + ROTATE_WAIT), 0);
        assert_eq!(reconciler.closing_len(), 1);

        assert_eq!(reconciler.fire_due_closes(start + ROTATE_WAIT * 2), 1);
        assert_eq!(reconciler.closing_len(), 0);
        assert_eq!(reconciler.next_close_deadline(), None);
    }

    #[test]
    fn test_poll_delivers_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        append(&path, "");

        let (mut reconciler, sink) = reconciler(&dir, None, true);
        reconciler.refresh();

        append(&path, "hello\n");
        reconciler.poll_watchers(Instant::now());
        assert_eq!(sink.lines(), vec!["hello"]);
    }

    #[test]
    fn test_new_file_seeded_from_start_when_reading_from_beginning() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        append(&path, "existing\n");
        let ino = FileId::from_path(&path).unwrap().ino();

        let store = PositionStore::open_memory();
        let (mut reconciler, sink) = reconciler(&dir, Some(store.clone()), true);
        reconciler.refresh();

        let pos = store.get(&path).unwrap();
        assert_eq!((pos.ino, pos.offset), (ino, 0));

        reconciler.poll_watchers(Instant::now());
        assert_eq!(sink.lines(), vec!["existing"]);
    }

    #[test]
    fn test_new_file_starts_at_end_without_reading_from_beginning() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        append(&path, "existing\n");
        let ino = FileId::from_path(&path).unwrap().ino();

        let store = PositionStore::open_memory();
        let (mut reconciler, sink) = reconciler(&dir, Some(store.clone()), false);
        reconciler.refresh();

        // Recorded before anything was read
        let pos = store.get(&path).unwrap();
        assert_eq!((pos.ino, pos.offset), (ino, 9));

        reconciler.poll_watchers(Instant::now());
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn test_known_file_resumes_from_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        append(&path, "one\ntwo\n");
        let ino = FileId::from_path(&path).unwrap().ino();

        let store = PositionStore::open_memory();
        store.update(&path, ino, 4);

        let (mut reconciler, sink) = reconciler(&dir, Some(store.clone()), true);
        reconciler.refresh();
        reconciler.poll_watchers(Instant::now());
        assert_eq!(sink.lines(), vec!["two"]);
    }

    #[test]
    fn test_recreated_file_is_read_from_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        append(&path, "");

        let store = PositionStore::open_memory();
        let (mut reconciler, sink) = reconciler(&dir, Some(store.clone()), true);
        reconciler.refresh();
        let old_ino = FileId::from_path(&path).unwrap().ino();

        // Old inode stays alive under the new name
        fs::rename(&path, dir.path().join("a.log.1")).unwrap();
        reconciler.refresh();
        assert!(reconciler.watcher(&path).is_none());
        assert_eq!(store.get(&path).unwrap().ino, old_ino);

        append(&path, "written before discovery\n");
        let new_ino = FileId::from_path(&path).unwrap().ino();
        reconciler.refresh();
        reconciler.poll_watchers(Instant::now());

        assert_eq!(sink.lines(), vec!["written before discovery"]);
        let pos = store.get(&path).unwrap();
        assert_eq!((pos.ino, pos.offset), (new_ino, 25));

        // The old watcher's close cannot move the new file's position
        assert_eq!(reconciler.fire_due_closes(Instant::now() + ROTATE_WAIT * 2), 1);
        let pos = store.get(&path).unwrap();
        assert_eq!((pos.ino, pos.offset), (new_ino, 25));
    }

    #[test]
    fn test_shutdown_closes_everything_immediately() {
        let dir = TempDir::new().unwrap();
        append(&dir.path().join("a.log"), "");
        append(&dir.path().join("b.log"), "");

        let (mut reconciler, _) = reconciler(&dir, None, true);
        reconciler.refresh();
        fs::remove_file(dir.path().join("a.log")).unwrap();
        reconciler.refresh();
        assert_eq!(reconciler.len(), 1);
        assert_eq!(reconciler.closing_len(), 1);

        assert_eq!(reconciler.shutdown(Instant::now()), 2);
        assert!(reconciler.is_empty());
        assert_eq!(reconciler.closing_len(), 0);
        assert_eq!(reconciler.next_close_deadline(), None);
    }
}
