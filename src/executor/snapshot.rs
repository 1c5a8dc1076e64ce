// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Snapshots: the durable record of what one execution changed

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::plan::MoveOp;
use crate::{Result, TidyError};

/// Everything needed to reverse one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub plan_id: Option<String>,
    /// `new location -> original source`, in the order they were applied
    #[serde(default)]
    pub reverse_moves: Vec<MoveOp>,
    /// Shallowest first
    #[serde(default)]
    pub created_directories: Vec<PathBuf>,
    /// True hardlinks only; fallback copies are not recorded
    #[serde(default)]
    pub created_hardlinks: Vec<PathBuf>,
    #[serde(default)]
    pub removed_directories: Vec<PathBuf>,
}

impl Snapshot {
    pub fn new(plan_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            timestamp: Utc::now(),
            plan_id,
            reverse_moves: Vec::new(),
            created_directories: Vec::new(),
            created_hardlinks: Vec::new(),
            removed_directories: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.reverse_moves.is_empty()
            && self.created_directories.is_empty()
            && self.created_hardlinks.is_empty()
            && self.removed_directories.is_empty()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| TidyError::at(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// One JSON file per snapshot, written once and never modified
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Persist a snapshot. Refuses to replace an existing one.
    pub fn save(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|e| TidyError::at(&self.dir, e))?;
        let path = self.path_for(&snapshot.id)?;

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(TidyError::InvalidState(format!(
                    "snapshot {} is already persisted",
                    snapshot.id
                )));
            }
            Err(e) => return Err(TidyError::at(&path, e)),
        };
        file.write_all(serde_json::to_string_pretty(snapshot)?.as_bytes())?;
        file.sync_all()?;
        Ok(path)
    }

    pub fn get(&self, id: &str) -> Result<Snapshot> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Err(TidyError::SnapshotNotFound(id.to_string()));
        }
        Snapshot::load(&path)
    }

    /// All readable snapshots, newest first
    pub fn list(&self) -> Result<Vec<Snapshot>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Snapshot::load(&path) {
                Ok(s) => snapshots.push(s),
                Err(e) => tracing::warn!("Failed to read snapshot {:?}: {}", path, e),
            }
        }
        snapshots.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(snapshots)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(TidyError::SnapshotNotFound(id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample() -> Snapshot {
        let mut s = Snapshot::new(Some("plan1".into()));
        s.reverse_moves.push(MoveOp::new("/d/Docs/a.txt", "/d/a.txt"));
        s
    }

    #[test]
    fn test_save_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        let snapshot = sample();
        store.save(&snapshot).unwrap();

        let loaded = store.get(&snapshot.id).unwrap();
        assert_eq!(loaded.reverse_moves, snapshot.reverse_moves);
        assert_eq!(loaded.plan_id.as_deref(), Some("plan1"));
    }

    #[test]
    fn test_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().to_path_buf());
        let snapshot = sample();
        store.save(&snapshot).unwrap();
        assert!(matches!(store.save(&snapshot), Err(TidyError::InvalidState(_))));
    }

    #[test]
    fn test_unknown_and_malformed_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().to_path_buf());
        assert!(matches!(store.get("missing"), Err(TidyError::SnapshotNotFound(_))));
        assert!(matches!(store.get("../etc/passwd"), Err(TidyError::SnapshotNotFound(_))));
    }

    #[test]
    fn test_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().to_path_buf());
        let mut older = sample();
        older.timestamp = Utc::now() - Duration::hours(1);
        let newer = sample();
        store.save(&older).unwrap();
        store.save(&newer).unwrap();
        fs::write(dir.path().join("junk.json"), "nope").unwrap();

        let ids: Vec<_> = store.list().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }
}
