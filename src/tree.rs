// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Owned file tree produced by the scanner, and its compact digest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A scanned file or directory. Children are owned by their parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTreeNode {
    pub path: PathBuf,
    pub name: String,
    pub is_directory: bool,
    pub size_bytes: u64,
    pub created_utc: DateTime<Utc>,
    #[serde(default)]
    pub children: Vec<FileTreeNode>,
}

/// Compact mirror of the tree sent to the external planner.
///
/// Directories carry no size and files carry no children
/// (`children == None` exactly when the node is a file).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestNode {
    pub path: String,
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub created_utc: DateTime<Utc>,
    pub children: Option<Vec<DigestNode>>,
}

impl FileTreeNode {
    pub fn file(path: PathBuf, size_bytes: u64, created_utc: DateTime<Utc>) -> Self {
        let name = display_name(&path);
        Self {
            path,
            name,
            is_directory: false,
            size_bytes,
            created_utc,
            children: Vec::new(),
        }
    }

    pub fn directory(path: PathBuf, created_utc: DateTime<Utc>) -> Self {
        let name = display_name(&path);
        Self {
            path,
            name,
            is_directory: true,
            size_bytes: 0,
            created_utc,
            children: Vec::new(),
        }
    }

    /// Synthetic root holding one child per scanned root
    pub fn root() -> Self {
        Self {
            path: PathBuf::new(),
            name: "Root".to_string(),
            is_directory: true,
            size_bytes: 0,
            created_utc: Utc::now(),
            children: Vec::new(),
        }
    }

    /// Directory if it has children, its path ends with a separator, it was
    /// recorded as one, or it is a directory on disk.
    pub fn classify_directory(&self) -> bool {
        if self.is_directory || !self.children.is_empty() {
            return true;
        }
        let raw = self.path.to_string_lossy();
        if raw.ends_with('/') || raw.ends_with('\\') {
            return true;
        }
        !raw.is_empty() && self.path.is_dir()
    }

    pub fn to_digest(&self) -> DigestNode {
        if self.classify_directory() {
            DigestNode {
                path: self.path.to_string_lossy().into_owned(),
                name: self.name.clone(),
                is_dir: true,
                size: 0,
                created_utc: self.created_utc,
                children: Some(self.children.iter().map(FileTreeNode::to_digest).collect()),
            }
        } else {
            DigestNode {
                path: self.path.to_string_lossy().into_owned(),
                name: self.name.clone(),
                is_dir: false,
                size: self.size_bytes,
                created_utc: self.created_utc,
                children: None,
            }
        }
    }

    /// Every file (non-directory) node, depth-first in tree order
    pub fn files(&self) -> Vec<&FileTreeNode> {
        let mut out = Vec::new();
        self.collect_files(&mut out);
        out
    }

    fn collect_files<'a>(&'a self, out: &mut Vec<&'a FileTreeNode>) {
        for child in &self.children {
            if child.is_directory {
                child.collect_files(out);
            } else {
                out.push(child);
            }
        }
    }

    /// Total number of nodes below this one
    pub fn descendant_count(&self) -> usize {
        self.children
            .iter()
            .map(|c| 1 + c.descendant_count())
            .sum()
    }

    pub fn find(&self, path: &Path) -> Option<&FileTreeNode> {
        if self.path == path {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(path))
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
