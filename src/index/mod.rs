// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! SQLite index of the most recent scan and duplicate search

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::categories::category_for;
use crate::dedupe::DuplicateGroup;
use crate::scanner::ScanResult;
use crate::{Result, TidyError};

/// Thread-safe handle to the index database
#[derive(Clone)]
pub struct IndexStore {
    conn: Arc<Mutex<Connection>>,
}

/// An indexed file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub name: String,
    pub size_bytes: u64,
    pub created_utc: DateTime<Utc>,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub file_count: i64,
    pub total_bytes: i64,
    pub duplicate_groups: i64,
    pub wasted_bytes: i64,
    pub last_scan: Option<DateTime<Utc>>,
    pub last_scan_truncated: bool,
    pub categories: Vec<(String, i64)>,
}

impl IndexStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize()?;
        Ok(store)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TidyError::InvalidState("Index lock poisoned".to_string()))
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS scans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scanned_at TEXT NOT NULL,
                roots TEXT NOT NULL,
                total_files INTEGER NOT NULL,
                total_dirs INTEGER NOT NULL,
                bytes INTEGER NOT NULL,
                truncated INTEGER NOT NULL,
                errors INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS files (
                path TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                size INTEGER NOT NULL,
                created_utc TEXT NOT NULL,
                category TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS duplicates (
                hash TEXT NOT NULL,
                size INTEGER NOT NULL,
                path TEXT NOT NULL,
                PRIMARY KEY (hash, path)
            );

            CREATE INDEX IF NOT EXISTS idx_files_name ON files(name);
            CREATE INDEX IF NOT EXISTS idx_files_category ON files(category);
        "#,
        )?;
        Ok(())
    }

    /// Replace the indexed files with the contents of `result`
    pub fn record_scan(&self, result: &ScanResult, roots: &[PathBuf]) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM files", [])?;
        {
            let mut insert = tx.prepare(
                "INSERT OR REPLACE INTO files (path, name, size, created_utc, category) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for file in result.root_tree.files() {
                insert.execute(params![
                    file.path.to_string_lossy().into_owned(),
                    file.name,
                    file.size_bytes as i64,
                    file.created_utc.to_rfc3339(),
                    category_for(&file.path).as_str(),
                ])?;
            }
        }

        let roots_json = serde_json::to_string(roots)?;
        tx.execute(
            r#"INSERT INTO scans (scanned_at, roots, total_files, total_dirs, bytes, truncated, errors)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                Utc::now().to_rfc3339(),
                roots_json,
                result.total_files as i64,
                result.total_dirs as i64,
                result.bytes_scanned as i64,
                result.truncated,
                result.errors as i64,
            ],
        )?;
        tx.commit()?;

        if !result.duplicates.is_empty() {
            drop(conn);
            self.record_duplicates(&result.duplicates)?;
        }
        Ok(())
    }

    /// Replace the stored duplicate groups
    pub fn record_duplicates(&self, groups: &[DuplicateGroup]) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM duplicates", [])?;
        {
            let mut insert =
                tx.prepare("INSERT OR IGNORE INTO duplicates (hash, size, path) VALUES (?1, ?2, ?3)")?;
            for group in groups {
                for path in &group.paths {
                    insert.execute(params![group.hash, group.size_bytes as i64, path.to_string_lossy().into_owned()])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Files whose name or path contains `query`
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<FileRecord>> {
        let conn = self.lock_conn()?;
        let pattern = format!("%{}%", query);
        let mut stmt = conn.prepare(
            r#"SELECT path, name, size, created_utc, category FROM files
               WHERE name LIKE ?1 OR path LIKE ?1
               ORDER BY name LIMIT ?2"#,
        )?;

        let files = stmt
            .query_map(params![pattern, limit as i64], |row| {
                let path: String = row.get(0)?;
                let size: i64 = row.get(2)?;
                let created: String = row.get(3)?;
                Ok(FileRecord {
                    path: PathBuf::from(path),
                    name: row.get(1)?,
                    size_bytes: size.max(0) as u64,
                    created_utc: DateTime::parse_from_rfc3339(&created)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    category: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    /// Stored duplicate groups, largest waste first
    pub fn duplicates(&self) -> Result<Vec<DuplicateGroup>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT hash, size, path FROM duplicates ORDER BY hash, path")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut groups: BTreeMap<String, DuplicateGroup> = BTreeMap::new();
        for (hash, size, path) in rows {
            groups
                .entry(hash.clone())
                .or_insert_with(|| DuplicateGroup {
                    hash,
                    size_bytes: size.max(0) as u64,
                    paths: Vec::new(),
                })
                .paths
                .push(PathBuf::from(path));
        }

        let mut groups: Vec<_> = groups.into_values().filter(|g| g.paths.len() > 1).collect();
        groups.sort_by(|a, b| b.wasted_bytes().cmp(&a.wasted_bytes()));
        Ok(groups)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let conn = self.lock_conn()?;
        let (file_count, total_bytes): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM files",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let (duplicate_groups, wasted_bytes): (i64, i64) = conn.query_row(
            r#"SELECT COUNT(*), COALESCE(SUM(size * (members - 1)), 0)
               FROM (SELECT hash, size, COUNT(*) AS members FROM duplicates GROUP BY hash, size)"#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let last: Option<(String, bool)> = match conn.query_row(
            "SELECT scanned_at, truncated FROM scans ORDER BY id DESC LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        ) {
            Ok(row) => Some(row),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        let mut stmt = conn.prepare(
            "SELECT category, COUNT(*) AS n FROM files GROUP BY category ORDER BY n DESC, category",
        )?;
        let categories = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(IndexStats {
            file_count,
            total_bytes,
            duplicate_groups,
            wasted_bytes,
            last_scan: last.as_ref().and_then(|(at, _)| {
                DateTime::parse_from_rfc3339(at).ok().map(|dt| dt.with_timezone(&Utc))
            }),
            last_scan_truncated: last.map(|(_, t)| t).unwrap_or(false),
            categories,
        })
    }
}
