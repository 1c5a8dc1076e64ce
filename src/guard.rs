// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Path classification: protected system paths, exclusions and hidden entries

use glob::{MatchOptions, Pattern};
use std::fs::Metadata;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::{Result, TidyError};

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Immutable set of protected path prefixes and excluded name patterns
#[derive(Debug, Clone, Default)]
pub struct SystemDenylist {
    prefixes: Vec<String>,
    excludes: Vec<Pattern>,
}

impl SystemDenylist {
    pub fn new(system_paths: &[String], exclude_patterns: &[String]) -> Result<Self> {
        let prefixes = system_paths
            .iter()
            .map(|p| normalize(p).trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .collect();

        let excludes = exclude_patterns
            .iter()
            .map(|p| {
                Pattern::new(p)
                    .map_err(|e| TidyError::Config(format!("Bad exclude pattern '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { prefixes, excludes })
    }

    /// Also protect `path` and everything below it
    pub fn protect(&mut self, path: &Path) {
        let prefix = normalize(&path.to_string_lossy()).trim_end_matches('/').to_string();
        if !prefix.is_empty() {
            self.prefixes.push(prefix);
        }
    }

    /// A denylist that rejects nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// True if the path sits at or below a protected prefix
    pub fn is_system_path(&self, path: &Path) -> bool {
        let p = normalize(&path.to_string_lossy()).to_lowercase();
        self.prefixes.iter().any(|prefix| {
            let prefix = prefix.to_lowercase();
            p == prefix || p.starts_with(&format!("{}/", prefix))
        })
    }

    /// True if the entry name matches an exclusion pattern
    pub fn is_excluded(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.excludes.iter().any(|p| p.matches_with(name, GLOB_OPTIONS))
    }

    pub fn rejects(&self, path: &Path) -> bool {
        self.is_system_path(path) || self.is_excluded(path)
    }
}

/// Hidden by name (leading dot) or by the Windows hidden attribute
pub fn is_hidden(path: &Path, metadata: &Metadata) -> bool {
    let dotted = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.') && n != "." && n != "..")
        .unwrap_or(false);

    dotted || has_hidden_attribute(metadata)
}

#[cfg(windows)]
fn has_hidden_attribute(metadata: &Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    metadata.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0
}

#[cfg(not(windows))]
fn has_hidden_attribute(_metadata: &Metadata) -> bool {
    false
}

/// Case-insensitive "path is at or below root"
pub fn is_under(path: &Path, root: &Path) -> bool {
    let p = normalize(&path.to_string_lossy()).to_lowercase();
    let r = normalize(&root.to_string_lossy()).to_lowercase();
    let r = r.trim_end_matches('/');
    if r.is_empty() {
        return p.starts_with('/');
    }
    p == r || p.starts_with(&format!("{}/", r))
}

/// Absolute, lexically cleaned form of `path`.
///
/// Relative paths are joined onto the working directory, `.` segments are
/// dropped and `..` pops its parent. Symlinks are not resolved.
pub fn absolute(path: &Path) -> io::Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let at_root = matches!(
                    out.components().next_back(),
                    None | Some(Component::RootDir) | Some(Component::Prefix(_))
                );
                if !at_root {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denylist() -> SystemDenylist {
        SystemDenylist::new(
            &["/usr/".to_string(), "C:/Windows".to_string()],
            &["*.tmp".to_string(), "thumbs.db".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_system_prefix_matches() {
        let d = denylist();
        assert!(d.is_system_path(Path::new("/usr")));
        assert!(d.is_system_path(Path::new("/usr/lib/x.so")));
        assert!(d.is_system_path(Path::new("c:\\windows\\system32")));
        assert!(!d.is_system_path(Path::new("/usrdata/file")));
        assert!(!d.is_system_path(Path::new("/home/me")));
    }

    #[test]
    fn test_exclusions_are_case_insensitive() {
        let d = denylist();
        assert!(d.is_excluded(Path::new("/home/me/Thumbs.db")));
        assert!(d.is_excluded(Path::new("/home/me/download.TMP")));
        assert!(!d.is_excluded(Path::new("/home/me/report.pdf")));
    }

    #[test]
    fn test_protect_adds_prefix() {
        let mut d = SystemDenylist::empty();
        d.protect(Path::new("/home/me/.tidyfs/"));
        assert!(d.is_system_path(Path::new("/home/me/.tidyfs/index.db")));
        assert!(!d.is_system_path(Path::new("/home/me/notes.txt")));
    }

    #[test]
    fn test_empty_denylist_rejects_nothing() {
        let d = SystemDenylist::empty();
        assert!(!d.rejects(Path::new("/usr/bin/ls")));
    }

    #[test]
    fn test_bad_pattern_is_config_error() {
        let err = SystemDenylist::new(&[], &["[".to_string()]).unwrap_err();
        assert!(matches!(err, TidyError::Config(_)));
    }

    #[test]
    fn test_absolute_cleans_dots() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(absolute(Path::new("./inbox/r.pdf")).unwrap(), cwd.join("inbox").join("r.pdf"));
        assert_eq!(absolute(Path::new(".")).unwrap(), cwd);
        #[cfg(unix)]
        {
            assert_eq!(absolute(Path::new("/a/./b/../c")).unwrap(), PathBuf::from("/a/c"));
            assert_eq!(absolute(Path::new("/../x")).unwrap(), PathBuf::from("/x"));
        }
    }

    #[test]
    fn test_is_under() {
        assert!(is_under(Path::new("/Home/Me/docs/a.txt"), Path::new("/home/me")));
        assert!(is_under(Path::new("/home/me"), Path::new("/home/me/")));
        assert!(!is_under(Path::new("/home/meta/a.txt"), Path::new("/home/me")));
    }
}
