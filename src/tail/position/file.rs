// SPDX-License-Identifier: Apache-2.0

//! JSON file-backed position storage with atomic writes.
//!
//! Writes use a write-to-temp-then-rename strategy so a crash mid-write never
//! leaves a truncated position file behind.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::schema::{POSITION_FILE_VERSION, PersistedPosition, PersistedPositions};
use crate::tail::error::{Error, Result};

/// In-memory view of the position file plus its backing location.
#[derive(Debug)]
pub struct PositionFile {
    /// Empty for in-memory files
    path: PathBuf,
    entries: BTreeMap<String, PersistedPosition>,
    dirty: bool,
    closed: bool,
}

impl PositionFile {
    /// Open or create the position file at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let state = if path.exists() {
            let file = File::open(&path)
                .map_err(|e| Error::Persistence(format!("failed to open position file: {}", e)))?;
            let reader = BufReader::new(file);
            let state: PersistedPositions = serde_json::from_reader(reader).map_err(|e| {
                Error::Persistence(format!(
                    "position file {:?} is corrupted and cannot be loaded: {}. \
                     To start fresh, delete the file and restart.",
                    path, e
                ))
            })?;
            if state.version != POSITION_FILE_VERSION {
                return Err(Error::Persistence(format!(
                    "unsupported position file version {}",
                    state.version
                )));
            }
            state
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent).map_err(|e| {
                        Error::Persistence(format!(
                            "failed to create position file directory: {}",
                            e
                        ))
                    })?;
                }
            }
            PersistedPositions::default()
        };

        debug!(
            path = ?path,
            entries = state.entries.len(),
            "Loaded position file"
        );

        Ok(Self {
            path,
            entries: state.entries,
            dirty: false,
            closed: false,
        })
    }

    /// Create an in-memory position file (useful for testing)
    pub fn open_memory() -> Self {
        Self {
            path: PathBuf::new(),
            entries: BTreeMap::new(),
            dirty: false,
            closed: false,
        }
    }

    pub fn get(&self, key: &str) -> Option<PersistedPosition> {
        self.entries.get(key).copied()
    }

    /// Get the entry for `key`, registering a never-tracked (0, 0) entry if absent.
    pub fn get_or_insert(&mut self, key: &str) -> PersistedPosition {
        if let Some(pos) = self.entries.get(key) {
            return *pos;
        }
        self.entries.insert(key.to_string(), PersistedPosition::default());
        self.dirty = true;
        PersistedPosition::default()
    }

    pub fn set(&mut self, key: &str, pos: PersistedPosition) {
        if self.closed {
            debug!(key, "Ignoring position update after close");
            return;
        }
        match self.entries.get_mut(key) {
            Some(existing) if *existing == pos => {}
            Some(existing) => {
                *existing = pos;
                self.dirty = true;
            }
            None => {
                self.entries.insert(key.to_string(), pos);
                self.dirty = true;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Write pending changes to disk. A no-op when nothing changed.
    pub fn sync(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        if !self.path.as_os_str().is_empty() {
            let state = PersistedPositions {
                version: POSITION_FILE_VERSION,
                entries: self.entries.clone(),
            };
            atomic_write(&self.path, &state)?;
        }

        self.dirty = false;
        Ok(())
    }

    /// Flush and release the backing resource. Later updates are ignored.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let result = self.sync();
        self.closed = true;
        result
    }
}

/// Write state to file atomically (write to temp, then rename)
fn atomic_write(path: &Path, state: &PersistedPositions) -> Result<()> {
    use portable_atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("failed to create parent directory: {}", e))
            })?;
        }
    }

    // Process ID plus a counter keeps concurrent writers off each other's temp files
    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let file = File::create(&temp_path)
        .map_err(|e| Error::Persistence(format!("failed to create temp file: {}", e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, state)
        .map_err(|e| Error::Persistence(format!("failed to write position file: {}", e)))?;

    writer
        .flush()
        .map_err(|e| Error::Persistence(format!("failed to flush position file: {}", e)))?;

    // Close the handle before rename
    drop(writer);

    fs::rename(&temp_path, path)
        .map_err(|e| Error::Persistence(format!("failed to rename position file: {}", e)))?;

    Ok(())
}
