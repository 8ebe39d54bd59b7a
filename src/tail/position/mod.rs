// SPDX-License-Identifier: Apache-2.0

//! Durable read positions, keyed by watched path.
//!
//! The store is shared between the reconciler (which looks entries up when a
//! watcher starts) and the followers (which record progress as they consume
//! bytes). Both run on the reactor thread; the owner thread only touches the
//! store again to close it after the reactor has been joined. The mutex makes
//! that hand-off safe.

mod file;
mod schema;

pub use file::PositionFile;
pub use schema::{POSITION_FILE_VERSION, PersistedPosition, PersistedPositions};

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::tail::error::Result;

/// Shared handle to a position file
#[derive(Debug, Clone)]
pub struct PositionStore {
    file: Arc<Mutex<PositionFile>>,
}

impl PositionStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_file(PositionFile::open(path)?))
    }

    pub fn open_memory() -> Self {
        Self::from_file(PositionFile::open_memory())
    }

    fn from_file(file: PositionFile) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PositionFile> {
        // A panic while holding the lock cannot leave the map half-written
        self.file.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up the entry for `path`, registering it as never tracked if unknown.
    pub fn lookup(&self, path: &Path) -> PositionEntry {
        let key = store_key(path);
        self.lock().get_or_insert(&key);
        PositionEntry::Tracked {
            key,
            store: self.clone(),
        }
    }

    pub fn update(&self, path: &Path, ino: u64, offset: u64) {
        self.lock()
            .set(&store_key(path), PersistedPosition { ino, offset });
    }

    /// Current persisted position for `path`, without registering it.
    pub fn get(&self, path: &Path) -> Option<PersistedPosition> {
        self.lock().get(&store_key(path))
    }

    pub fn sync(&self) -> Result<()> {
        self.lock().sync()
    }

    pub fn close(&self) -> Result<()> {
        self.lock().close()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_closed()
    }
}

fn store_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// The (inode, offset) pair a follower reads from and records into.
///
/// The null variant is used when persistence is disabled: it always reports
/// inode 0 and ignores updates.
#[derive(Debug, Clone)]
pub enum PositionEntry {
    Null,
    Tracked { key: String, store: PositionStore },
}

impl PositionEntry {
    pub fn is_null(&self) -> bool {
        matches!(self, PositionEntry::Null)
    }

    fn read(&self) -> PersistedPosition {
        match self {
            PositionEntry::Null => PersistedPosition::default(),
            PositionEntry::Tracked { key, store } => store.lock().get(key).unwrap_or_default(),
        }
    }

    pub fn read_inode(&self) -> u64 {
        self.read().ino
    }

    pub fn read_offset(&self) -> u64 {
        self.read().offset
    }

    pub fn update(&self, ino: u64, offset: u64) {
        if let PositionEntry::Tracked { key, store } = self {
            store.lock().set(key, PersistedPosition { ino, offset });
        }
    }

    pub fn update_offset(&self, offset: u64) {
        if let PositionEntry::Tracked { key, store } = self {
            let mut file = store.lock();
            let ino = file.get(key).unwrap_or_default().ino;
            file.set(key, PersistedPosition { ino, offset });
        }
    }

    /// Record `offset` only when the entry still tracks `ino` and the offset moves forward.
    pub fn advance(&self, ino: u64, offset: u64) {
        if let PositionEntry::Tracked { key, store } = self {
            let mut file = store.lock();
            let current = file.get(key).unwrap_or_default();
            if current.ino == ino && current.offset < offset {
                file.set(key, PersistedPosition { ino, offset });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_entry_ignores_updates() {
        let entry = PositionEntry::Null;
        entry.update(42, 100);
        assert_eq!(entry.read_inode(), 0);
        assert_eq!(entry.read_offset(), 0);
        assert!(entry.is_null());
    }

    #[test]
    fn test_lookup_unknown_path_is_untracked() {
        let store = PositionStore::open_memory();
        let entry = store.lookup(Path::new("/var/log/new.log"));
        assert_eq!(entry.read_inode(), 0);
        assert_eq!(entry.read_offset(), 0);
        assert!(store.get(Path::new("/var/log/new.log")).is_some());
    }

    #[test]
    fn test_entry_updates_are_visible_through_store() {
        let store = PositionStore::open_memory();
        let entry = store.lookup(Path::new("/var/log/a.log"));

        entry.update(9, 0);
        entry.update_offset(64);

        assert_eq!(
            store.get(Path::new("/var/log/a.log")),
            Some(PersistedPosition { ino: 9, offset: 64 })
        );

        // A second lookup for the same path sees the same data
        let again = store.lookup(Path::new("/var/log/a.log"));
        assert_eq!(again.read_inode(), 9);
        assert_eq!(again.read_offset(), 64);
    }

    #[test]
    fn test_advance_only_moves_forward_for_same_inode() {
        let store = PositionStore::open_memory();
        let path = Path::new("/var/log/a.log");
        let entry = store.lookup(path);
        entry.update(3, 100);

        entry.advance(3, 50);
        assert_eq!(entry.read_offset(), 100);

        entry.advance(4, 500);
        assert_eq!(entry.read_inode(), 3);

        entry.advance(3, 120);
        assert_eq!(entry.read_offset(), 120);
    }

    #[test]
    fn test_store_persists_across_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pos_path = temp_dir.path().join("pos.json");

        {
            let store = PositionStore::open(&pos_path).unwrap();
            store.update(Path::new("/var/log/a.log"), 5, 500);
            store.close().unwrap();
            assert!(store.is_closed());
        }

        let store = PositionStore::open(&pos_path).unwrap();
        let entry = store.lookup(Path::new("/var/log/a.log"));
        assert_eq!(entry.read_inode(), 5);
        assert_eq!(entry.read_offset(), 500);
    }
}
