// SPDX-License-Identifier: Apache-2.0

//! On-disk schema of the position file.
//!
//! ```json
//! {"version": 1, "entries": {"/var/log/app.log": {"ino": 1234, "offset": 5678}}}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Current schema version for the position file
pub const POSITION_FILE_VERSION: u8 = 1;

/// Persisted read positions for all known paths
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedPositions {
    /// Schema version
    pub version: u8,
    /// Map from watched path to its position. Ordered so the file diffs cleanly.
    #[serde(default)]
    pub entries: BTreeMap<String, PersistedPosition>,
}

impl Default for PersistedPositions {
    fn default() -> Self {
        Self {
            version: POSITION_FILE_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

/// Persisted position for a single path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedPosition {
    /// Inode of the file last read at this path. Zero means never tracked.
    pub ino: u64,
    /// Byte offset just past the last consumed line
    pub offset: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_current_version() {
        let state = PersistedPositions::default();
        assert_eq!(state.version, POSITION_FILE_VERSION);
        assert!(state.entries.is_empty());
    }

    #[test]
    fn test_parses_human_edited_file() {
        let json = r#"{
            "version": 1,
            "entries": {
                "/var/log/app.log": {"ino": 42, "offset": 100}
            }
        }"#;
        let state: PersistedPositions = serde_json::from_str(json).unwrap();
        assert_eq!(
            state.entries.get("/var/log/app.log"),
            Some(&PersistedPosition { ino: 42, offset: 100 })
        );
    }

    #[test]
    fn test_missing_entries_field_is_empty() {
        let state: PersistedPositions = serde_json::from_str(r#"{"version": 1}"#).unwrap();
        assert!(state.entries.is_empty());
    }
}
