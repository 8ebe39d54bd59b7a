// SPDX-License-Identifier: Apache-2.0

//! Single-threaded reactor hosting every watcher and timer.
//!
//! The reactor runs a current-thread tokio runtime on its own OS thread. All
//! reconciler state lives on that thread; the owner only holds a cancellation
//! token and the join handle.

use std::fmt;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::select;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::tail::error::{Error, Result};
use crate::tail::reconciler::Reconciler;

/// A completed step of the shutdown sequence, in the order they happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStep {
    RefreshTimerDetached,
    WatchersClosed(usize),
    LoopStopped,
    ThreadJoined,
    PositionStoreClosed,
}

impl fmt::Display for ShutdownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownStep::RefreshTimerDetached => write!(f, "refresh timer detached"),
            ShutdownStep::WatchersClosed(n) => write!(f, "{} watchers closed", n),
            ShutdownStep::LoopStopped => write!(f, "reactor loop stopped"),
            ShutdownStep::ThreadJoined => write!(f, "control thread joined"),
            ShutdownStep::PositionStoreClosed => write!(f, "position store closed"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReactorTimers {
    pub refresh_interval: Duration,
    pub poll_interval: Duration,
    pub position_sync_interval: Duration,
}

pub struct Reactor {
    reconciler: Reconciler,
    timers: ReactorTimers,
}

/// Owner side of a running reactor
pub struct ReactorHandle {
    cancel: CancellationToken,
    thread: JoinHandle<Result<Vec<ShutdownStep>>>,
}

impl Reactor {
    /// `reconciler` should already have done its initial refresh.
    pub fn new(reconciler: Reconciler, timers: ReactorTimers) -> Self {
        Self { reconciler, timers }
    }

    /// Start the control thread running the loop.
    pub fn spawn(self) -> Result<ReactorHandle> {
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();

        let thread = std::thread::Builder::new()
            .name("tail-reactor".to_string())
            .spawn(move || self.run_blocking(loop_cancel))
            .map_err(|e| Error::Reactor(format!("failed to spawn reactor thread: {}", e)))?;

        Ok(ReactorHandle { cancel, thread })
    }

    fn run_blocking(self, cancel: CancellationToken) -> Result<Vec<ShutdownStep>> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| Error::Reactor(format!("failed to build reactor runtime: {}", e)))?;

        rt.block_on(self.run(cancel))
    }

    async fn run(mut self, cancel: CancellationToken) -> Result<Vec<ShutdownStep>> {
        let ReactorTimers {
            refresh_interval,
            poll_interval,
            position_sync_interval,
        } = self.timers;

        // The initial refresh already happened, the first timed one is a full period out
        let mut refresh = time::interval_at(time::Instant::now() + refresh_interval, refresh_interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut poll = time::interval(poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut sync = time::interval_at(
            time::Instant::now() + position_sync_interval,
            position_sync_interval,
        );
        sync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(watching = self.reconciler.len(), "Reactor loop started");

        loop {
            let close_deadline = self.reconciler.next_close_deadline();

            select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Reactor cancelled, starting shutdown sequence");
                    break;
                }

                _ = wait_until(close_deadline) => {
                    self.reconciler.fire_due_closes(Instant::now());
                }

                _ = refresh.tick() => {
                    let stats = self.reconciler.refresh();
                    if !stats.is_empty() {
                        info!(
                            started = stats.started,
                            stopped = stats.stopped,
                            "Watch set refreshed"
                        );
                    }
                }

                _ = poll.tick() => {
                    self.reconciler.poll_watchers(Instant::now());
                }

                _ = sync.tick() => {
                    if let Err(e) = self.reconciler.sync_positions() {
                        warn!("Failed to sync read positions: {}", e);
                    }
                }
            }
        }

        let mut steps = Vec::with_capacity(3);

        drop(refresh);
        debug!("Refresh timer detached");
        steps.push(ShutdownStep::RefreshTimerDetached);

        let closed = self.reconciler.shutdown(Instant::now());
        steps.push(ShutdownStep::WatchersClosed(closed));

        steps.push(ShutdownStep::LoopStopped);
        Ok(steps)
    }
}

impl ReactorHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Stop the loop and join the control thread. Returns the steps completed
    /// by the loop followed by the join.
    pub fn stop(self) -> Result<Vec<ShutdownStep>> {
        self.cancel.cancel();

        let mut steps = match self.thread.join() {
            Ok(result) => result?,
            Err(_) => return Err(Error::Reactor("reactor thread panicked".to_string())),
        };
        steps.push(ShutdownStep::ThreadJoined);
        Ok(steps)
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tail::expander::PathExpander;
    use crate::tail::follower::FollowerLimits;
    use crate::tail::sink::testing::RecordingLineSink;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn append(path: &Path, data: &str) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(data.as_bytes()).unwrap();
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn timers() -> ReactorTimers {
        ReactorTimers {
            refresh_interval: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
            position_sync_interval: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_reactor_reads_refreshes_and_stops() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("first.log");
        append(&first, "");

        let pattern = format!("{}/*.log", dir.path().display());
        let expander = PathExpander::new(vec![pattern], vec![], false).unwrap();
        let sink = Arc::new(RecordingLineSink::default());
        let mut reconciler = Reconciler::new(
            expander,
            None,
            sink.clone(),
            Duration::from_millis(20),
            FollowerLimits::default(),
            true,
        );
        reconciler.refresh();

        let handle = Reactor::new(reconciler, timers()).spawn().unwrap();

        append(&first, "one\n");
        assert!(wait_for(|| sink.lines() == vec!["one"]));

        // Picked up by a timed refresh, read from its end
        let second = dir.path().join("second.log");
        append(&second, "skipped\n");
        std::thread::sleep(Duration::from_millis(150));
        append(&second, "two\n");
        assert!(wait_for(|| sink.lines().contains(&"two".to_string())));
        assert!(!sink.lines().contains(&"skipped".to_string()));

        // Removed from the match set: deferred close, then released
        fs::remove_file(&first).unwrap();
        std::thread::sleep(Duration::from_millis(150));

        assert!(!handle.is_finished());
        let steps = handle.stop().unwrap();
        assert_eq!(
            steps,
            vec![
                ShutdownStep::RefreshTimerDetached,
                ShutdownStep::WatchersClosed(1),
                ShutdownStep::LoopStopped,
                ShutdownStep::ThreadJoined,
            ]
        );
    }

    #[tokio::test]
    async fn test_wait_until_without_deadline_never_fires() {
        let fired = time::timeout(Duration::from_millis(20), wait_until(None)).await;
        assert!(fired.is_err());

        let fired = time::timeout(
            Duration::from_millis(200),
            wait_until(Some(Instant::now() + Duration::from_millis(5))),
        )
        .await;
        assert!(fired.is_ok());
    }
}
