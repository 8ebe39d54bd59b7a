// SPDX-License-Identifier: Apache-2.0

//! Single-file byte stream follower.
//!
//! A follower owns the open handle for one watched path, turns appended bytes
//! into complete lines, records its progress in a [`PositionEntry`] and follows
//! the path across rotation: when a different file appears behind the path the
//! old handle is queued and drained for `rotate_wait` before it is closed.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::tail::file_id::FileId;
use crate::tail::position::PositionEntry;

/// Read limits applied by a follower
#[derive(Debug, Clone, Copy)]
pub struct FollowerLimits {
    /// Maximum size of a single line in bytes, longer lines are truncated
    pub max_line_size: usize,
    /// Maximum number of bytes read from one handle per poll
    pub read_bytes_limit: usize,
}

impl Default for FollowerLimits {
    fn default() -> Self {
        Self {
            max_line_size: 65536,
            read_bytes_limit: 1024 * 1024,
        }
    }
}

/// An open file plus the line framing state for it
#[derive(Debug)]
struct TailHandle {
    file: File,
    id: FileId,
    /// Offset just past the last complete line
    offset: u64,
    /// Bytes of the current incomplete line, capped at `max_line_size`
    partial: Vec<u8>,
    /// Real length of the current incomplete line, including dropped bytes
    partial_len: u64,
}

impl TailHandle {
    fn new(file: File, id: FileId, offset: u64) -> Self {
        Self {
            file,
            id,
            offset,
            partial: Vec::new(),
            partial_len: 0,
        }
    }

    /// Offset of the next byte to read
    fn read_pos(&self) -> u64 {
        self.offset + self.partial_len
    }

    fn rewind(&mut self) {
        self.offset = 0;
        self.partial.clear();
        self.partial_len = 0;
    }

    /// Read newly available bytes and return every complete line.
    fn read_lines(&mut self, limits: FollowerLimits) -> io::Result<Vec<String>> {
        let mut lines = Vec::new();

        self.file.seek(SeekFrom::Start(self.read_pos()))?;
        let mut buf = Vec::with_capacity(limits.read_bytes_limit.min(64 * 1024));
        (&mut self.file)
            .take(limits.read_bytes_limit as u64)
            .read_to_end(&mut buf)?;

        let mut rest = buf.as_slice();
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.push_partial(&rest[..pos], limits.max_line_size);
            lines.push(self.finish_line());
            rest = &rest[pos + 1..];
        }
        self.push_partial(rest, limits.max_line_size);

        Ok(lines)
    }

    fn push_partial(&mut self, bytes: &[u8], max_line_size: usize) {
        self.partial_len += bytes.len() as u64;
        let room = max_line_size.saturating_sub(self.partial.len());
        self.partial
            .extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    fn finish_line(&mut self) -> String {
        let truncated = self.partial_len > self.partial.len() as u64;
        // +1 for the newline
        self.offset += self.partial_len + 1;
        self.partial_len = 0;

        let mut bytes = std::mem::take(&mut self.partial);
        if truncated {
            // Do not leave half of a multi-byte char at the cut
            if let Err(e) = std::str::from_utf8(&bytes) {
                if e.error_len().is_none() {
                    bytes.truncate(e.valid_up_to());
                }
            }
        } else if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        match String::from_utf8(bytes) {
            Ok(line) => line,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }
}

/// A handle that was replaced behind its path and is drained until `rotate_wait` passes
#[derive(Debug)]
struct RotationRequest {
    handle: TailHandle,
    queued_at: Instant,
}

/// Follows one path, including across rotation.
#[derive(Debug)]
pub struct FileFollower {
    path: PathBuf,
    entry: PositionEntry,
    current: Option<TailHandle>,
    rotate_queue: VecDeque<RotationRequest>,
    rotate_wait: Duration,
    limits: FollowerLimits,
    released: bool,
}

impl FileFollower {
    /// Open `path` and position the handle.
    ///
    /// A null entry, or one that has never seen an inode, starts at the current
    /// end of the file. An entry tracking this inode resumes at the stored offset.
    /// An entry tracking a different inode means the file was replaced while
    /// nobody was reading it, so reading starts at 0. Either way the chosen
    /// (inode, offset) is recorded before any bytes are consumed.
    pub fn open(
        path: impl AsRef<Path>,
        entry: PositionEntry,
        rotate_wait: Duration,
        limits: FollowerLimits,
    ) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (file, id, len) = open_with_identity(&path)?;

        let tracked = if entry.is_null() { 0 } else { entry.read_inode() };
        let offset = if tracked == 0 {
            len
        } else if tracked == id.ino() {
            let stored = entry.read_offset();
            if stored > len {
                debug!(path = ?path, stored, len, "File shrank since last run, reading from start");
                0
            } else {
                stored
            }
        } else {
            info!(path = ?path, file_id = %id, "File replaced since last tracked, reading from start");
            0
        };
        entry.update(id.ino(), offset);

        debug!(path = ?path, file_id = %id, offset, "Opened file");

        Ok(Self {
            path,
            entry,
            current: Some(TailHandle::new(file, id, offset)),
            rotate_queue: VecDeque::new(),
            rotate_wait,
            limits,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset just past the last line delivered from the current handle
    pub fn offset(&self) -> Option<u64> {
        self.current.as_ref().map(|h| h.offset)
    }

    pub fn file_id(&self) -> Option<FileId> {
        self.current.as_ref().map(|h| h.id)
    }

    pub fn rotate_queue_len(&self) -> usize {
        self.rotate_queue.len()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Check for rotation, then read every available line. Lines from rotated
    /// handles are delivered before lines from the current handle. Read errors
    /// are logged here and retried on the next poll.
    pub fn poll(&mut self, now: Instant, deliver: &mut dyn FnMut(Vec<String>)) {
        if self.released {
            return;
        }

        self.check_rotation(now);

        let limits = self.limits;
        let rotate_wait = self.rotate_wait;
        let path = &self.path;
        self.rotate_queue.retain_mut(|req| {
            match req.handle.read_lines(limits) {
                Ok(lines) => {
                    if !lines.is_empty() {
                        deliver(lines);
                    }
                }
                Err(e) => {
                    warn!(path = ?path, file_id = %req.handle.id, "Error draining rotated file: {}", e);
                    return false;
                }
            }
            if now.saturating_duration_since(req.queued_at) >= rotate_wait {
                debug!(path = ?path, file_id = %req.handle.id, "Closing rotated file after rotate_wait");
                return false;
            }
            true
        });

        if let Some(handle) = self.current.as_mut() {
            match handle.read_lines(limits) {
                Ok(lines) => {
                    self.entry.update_offset(handle.offset);
                    if !lines.is_empty() {
                        deliver(lines);
                    }
                }
                Err(e) => {
                    warn!(path = ?self.path, "Error reading file: {}", e);
                }
            }
        }
    }

    fn check_rotation(&mut self, now: Instant) {
        let (id, len) = match stat_identity(&self.path) {
            Ok(stat) => stat,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Keep draining the handle we have, a replacement may appear later
                return;
            }
            Err(e) => {
                debug!(path = ?self.path, "Failed to stat file: {}", e);
                return;
            }
        };

        if let Some(handle) = self.current.as_mut() {
            if handle.id == id {
                if len < handle.read_pos() {
                    info!(path = ?self.path, file_id = %id, "File truncated, reading from start");
                    handle.rewind();
                    self.entry.update(id.ino(), 0);
                }
                return;
            }
        }

        // Identity changed, only now is the replacement opened
        let (file, id) = match open_with_identity(&self.path) {
            Ok((file, id, _)) => (file, id),
            Err(e) => {
                debug!(path = ?self.path, "Failed to open replaced file: {}", e);
                return;
            }
        };
        if self.current.as_ref().is_some_and(|h| h.id == id) {
            return;
        }

        if let Some(old) = self.current.replace(TailHandle::new(file, id, 0)) {
            info!(path = ?self.path, file_id = %id, "Detected rotation");
            self.rotate_queue.push_back(RotationRequest {
                handle: old,
                queued_at: now,
            });
        }
        self.entry.update(id.ino(), 0);
    }

    /// Close every queued rotation handle without reading from it.
    /// Returns how many handles were closed.
    pub fn discard_rotations(&mut self) -> usize {
        let count = self.rotate_queue.len();
        self.rotate_queue.clear();
        count
    }

    /// End-of-stream hook: record the final consumed position and drop any
    /// incomplete trailing line. Nothing is delivered from here. The position
    /// is only moved forward, a newer watcher for the same path may own it by now.
    pub fn on_end_of_stream(&mut self) {
        if let Some(handle) = self.current.as_mut() {
            if handle.partial_len > 0 {
                debug!(
                    path = ?self.path,
                    bytes = handle.partial_len,
                    "Discarding incomplete trailing line"
                );
            }
            handle.partial.clear();
            handle.partial_len = 0;
            self.entry.advance(handle.id.ino(), handle.offset);
        }
    }

    /// Release hook: close the file handle. The follower is inert afterwards.
    pub fn release(&mut self) {
        self.current = None;
        self.rotate_queue.clear();
        self.released = true;
    }
}

fn open_with_identity(path: &Path) -> io::Result<(File, FileId, u64)> {
    let file = File::open(path)?;
    let id = FileId::from_file(&file)?;
    let len = file.metadata()?.len();
    Ok((file, id, len))
}

/// Identity and length of whatever is behind `path` right now
#[cfg(unix)]
fn stat_identity(path: &Path) -> io::Result<(FileId, u64)> {
    let metadata = std::fs::metadata(path)?;
    Ok((FileId::from_metadata(&metadata), metadata.len()))
}

// The file index is only reachable through a handle here
#[cfg(not(unix))]
fn stat_identity(path: &Path) -> io::Result<(FileId, u64)> {
    let (_, id, len) = open_with_identity(path)?;
    Ok((id, len))
}
