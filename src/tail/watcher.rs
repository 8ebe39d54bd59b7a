// SPDX-License-Identifier: Apache-2.0

//! Per-path tail watcher.
//!
//! Wraps a [`FileFollower`] with tag-token derivation, line delivery to the
//! injected [`LineSink`], and the close protocol:
//!
//! ```text
//! Following --close(Deferred)--> Closing --grace timer--> Closed
//!     |                             |
//!     +------close(Immediate)-------+-------------------> Closed
//! ```
//!
//! Deferred close stops line delivery at once but holds the file handle for
//! `2 * rotate_wait`. Immediate close is used at shutdown only.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::tail::follower::{FileFollower, FollowerLimits};
use crate::tail::position::PositionEntry;
use crate::tail::sink::LineSink;
use crate::tail::tag::path_token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Following,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Detach now, release after the grace period
    Deferred,
    /// Detach and release in the same call
    Immediate,
}

pub struct TailWatcher {
    id: u64,
    path: PathBuf,
    token: String,
    state: WatcherState,
    attached: bool,
    follower: FileFollower,
    sink: Arc<dyn LineSink>,
    rotate_wait: Duration,
    close_deadline: Option<Instant>,
}

impl TailWatcher {
    /// Open the file behind `path` and start following it.
    pub fn start(
        id: u64,
        path: impl AsRef<Path>,
        entry: PositionEntry,
        rotate_wait: Duration,
        limits: FollowerLimits,
        sink: Arc<dyn LineSink>,
    ) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let follower = FileFollower::open(&path, entry, rotate_wait, limits)?;
        let token = path_token(&path);

        info!(path = ?path, "following tail of {}", path.display());

        Ok(Self {
            id,
            path,
            token,
            state: WatcherState::Following,
            attached: true,
            follower,
            sink,
            rotate_wait,
            close_deadline: None,
        })
    }

    /// Unique per watcher instance, distinguishes a restart from a kept watcher
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// True once the underlying file handle has been released
    pub fn is_released(&self) -> bool {
        self.follower.is_released()
    }

    /// Rotated files still held open for draining
    pub fn rotate_queue_len(&self) -> usize {
        self.follower.rotate_queue_len()
    }

    /// When the deferred-close timer fires, if armed
    pub fn close_deadline(&self) -> Option<Instant> {
        self.close_deadline
    }

    /// Read new data and deliver complete lines. A no-op unless following.
    pub fn poll(&mut self, now: Instant) {
        if self.state != WatcherState::Following || !self.attached {
            return;
        }

        let sink = &self.sink;
        let token = &self.token;
        let path = &self.path;
        self.follower
            .poll(now, &mut |lines| sink.deliver(lines, token, path));
    }

    pub fn close(&mut self, mode: CloseMode, now: Instant) {
        match (self.state, mode) {
            (WatcherState::Following, CloseMode::Deferred) => {
                self.attached = false;
                self.state = WatcherState::Closing;
                let deadline = now + self.rotate_wait * 2;
                self.close_deadline = Some(deadline);
                debug!(path = ?self.path, grace = ?self.rotate_wait * 2, "Deferred close armed");
            }
            (WatcherState::Following, CloseMode::Immediate)
            | (WatcherState::Closing, CloseMode::Immediate) => {
                self.attached = false;
                self.state = WatcherState::Closing;
                self.finish_close();
            }
            // Already closing with a timer armed, or already closed
            (WatcherState::Closing, CloseMode::Deferred) | (WatcherState::Closed, _) => {}
        }
    }

    /// Fire the grace timer if it is due. Returns true when the watcher closed.
    pub fn fire_close_if_due(&mut self, now: Instant) -> bool {
        match self.close_deadline {
            Some(deadline) if now >= deadline => {
                self.finish_close();
                true
            }
            _ => false,
        }
    }

    fn finish_close(&mut self) {
        // Disarm first so the timer can never fire a second close
        self.close_deadline = None;
        if self.state == WatcherState::Closed {
            return;
        }

        let discarded = self.follower.discard_rotations();
        if discarded > 0 {
            debug!(path = ?self.path, discarded, "Closed queued rotated files");
        }
        self.attached = false;
        self.follower.on_end_of_stream();
        self.follower.release();
        self.state = WatcherState::Closed;

        info!(path = ?self.path, "stop following of {}", self.path.display());
    }
}

impl fmt::Debug for TailWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TailWatcher")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("state", &self.state)
            .field("attached", &self.attached)
            .field("close_deadline", &self.close_deadline)
            .field("rotate_queue", &self.follower.rotate_queue_len())
            .finish()
    }
}
