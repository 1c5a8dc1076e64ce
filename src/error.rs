// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for tidyfs

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for tidyfs operations
pub type Result<T> = std::result::Result<T, TidyError>;

/// tidyfs error types
#[derive(Error, Debug)]
pub enum TidyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    /// Locked, denied or vanished file. Callers drop the file from the
    /// current pass instead of aborting the batch.
    #[error("Unreadable file {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path:?}: {source}")]
    Path {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("No enumerable roots")]
    NoEnumerableRoots,

    #[error("Planner error: {0}")]
    Planner(String),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Invalid executor state: {0}")]
    InvalidState(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),
}

impl TidyError {
    /// Attach the offending path to an I/O error
    pub fn at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TidyError::Path { path: path.into(), source }
    }

    /// Cancellation is an outcome, not a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TidyError::Cancelled)
    }
}
