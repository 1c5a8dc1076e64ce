// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Dry-run conflicts and the caller's answers to them

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Why a planned operation cannot proceed as written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictReason {
    DestinationExists,
    InvalidDestination,
    NoWriteAccess,
    CannotCreateDirectory,
    TargetMissing,
    LinkPathExists,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConflictReason::DestinationExists => "Destination exists",
            ConflictReason::InvalidDestination => "Invalid destination",
            ConflictReason::NoWriteAccess => "No write access",
            ConflictReason::CannotCreateDirectory => "Cannot create destination directory",
            ConflictReason::TargetMissing => "Hardlink target no longer exists",
            ConflictReason::LinkPathExists => "Link path already exists",
        };
        f.write_str(text)
    }
}

/// A pre-detected obstruction found by a dry run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Move destination, or link path for hardlinks
    pub destination: PathBuf,
    pub reason: ConflictReason,
    pub existing: Option<PathBuf>,
}

impl Conflict {
    pub fn new(destination: &Path, reason: ConflictReason) -> Self {
        Self {
            destination: destination.to_path_buf(),
            reason,
            existing: None,
        }
    }

    pub fn existing(destination: &Path, reason: ConflictReason) -> Self {
        Self {
            existing: Some(destination.to_path_buf()),
            ..Self::new(destination, reason)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictChoice {
    Skip,
    Rename,
    Overwrite,
}

/// The caller's decision for one conflicting destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub destination: PathBuf,
    pub choice: ConflictChoice,
    /// Explicit alternate path for `Rename`; auto-suffixed when absent
    #[serde(default)]
    pub rename_to: Option<PathBuf>,
}

impl ConflictResolution {
    pub fn new(destination: impl Into<PathBuf>, choice: ConflictChoice) -> Self {
        Self {
            destination: destination.into(),
            choice,
            rename_to: None,
        }
    }

    pub fn rename_to(destination: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            rename_to: Some(target.into()),
            ..Self::new(destination, ConflictChoice::Rename)
        }
    }

    /// Apply one choice to every conflict
    pub fn for_all(conflicts: &[Conflict], choice: ConflictChoice) -> Vec<Self> {
        conflicts
            .iter()
            .map(|c| Self::new(c.destination.clone(), choice))
            .collect()
    }
}

/// Resolutions keyed by case-folded destination
pub(crate) struct ResolutionMap<'a> {
    by_destination: HashMap<String, &'a ConflictResolution>,
}

impl<'a> ResolutionMap<'a> {
    pub(crate) fn new(resolutions: &'a [ConflictResolution]) -> Self {
        Self {
            by_destination: resolutions
                .iter()
                .map(|r| (fold(&r.destination), r))
                .collect(),
        }
    }

    pub(crate) fn get(&self, destination: &Path) -> Option<&'a ConflictResolution> {
        self.by_destination.get(&fold(destination)).copied()
    }
}

pub(crate) fn fold(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_text() {
        assert_eq!(ConflictReason::DestinationExists.to_string(), "Destination exists");
        assert_eq!(ConflictReason::TargetMissing.to_string(), "Hardlink target no longer exists");
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let resolutions = vec![ConflictResolution::new("/d/Docs/X.txt", ConflictChoice::Skip)];
        let map = ResolutionMap::new(&resolutions);
        assert_eq!(map.get(Path::new("/d/docs/x.TXT")).map(|r| r.choice), Some(ConflictChoice::Skip));
        assert!(map.get(Path::new("/d/docs/y.txt")).is_none());
    }

    #[test]
    fn test_for_all() {
        let conflicts = vec![
            Conflict::existing(Path::new("/a"), ConflictReason::DestinationExists),
            Conflict::new(Path::new("/b"), ConflictReason::NoWriteAccess),
        ];
        let all = ConflictResolution::for_all(&conflicts, ConflictChoice::Overwrite);
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|r| r.choice == ConflictChoice::Overwrite && r.rename_to.is_none()));
    }
}
