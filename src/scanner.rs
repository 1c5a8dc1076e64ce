// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Bounded recursive filesystem scan
//!
//! Walks each root depth-first, producing a full [`FileTreeNode`] tree and a
//! compact [`DigestNode`] mirror. A single item counter is shared across all
//! roots; hitting it, or descending past `max_depth`, truncates the result
//! instead of failing. Unreadable directories keep whatever children were
//! read before the failure and are only counted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dedupe::DuplicateGroup;
use crate::guard::{absolute, is_hidden, SystemDenylist};
use crate::progress::{fraction, rate, JobStage, Progress, ProgressSink, Throttle};
use crate::tree::{DigestNode, FileTreeNode};
use crate::{Result, TidyError};

/// Scan limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOptions {
    pub roots: Vec<PathBuf>,
    pub max_depth: usize,
    /// One cap shared by all roots
    pub max_items: usize,
    pub include_hidden: bool,
    pub follow_symlinks: bool,
    pub max_file_size_bytes: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            max_depth: 6,
            max_items: 50_000,
            include_hidden: false,
            follow_symlinks: false,
            max_file_size_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

/// Output of a scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub root_tree: FileTreeNode,
    pub digest: DigestNode,
    pub total_files: u64,
    pub total_dirs: u64,
    /// Item cap or depth limit was hit
    pub truncated: bool,
    #[serde(default)]
    pub duplicates: Vec<DuplicateGroup>,
    pub errors: u64,
    pub skipped: u64,
    pub bytes_scanned: u64,
    pub duration_ms: u64,
}

/// Filesystem scanner
pub struct Scanner {
    denylist: SystemDenylist,
    progress_interval: Duration,
}

impl Scanner {
    pub fn new(denylist: SystemDenylist) -> Self {
        Self {
            denylist,
            progress_interval: Duration::from_millis(100),
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Scan every root in `options`.
    ///
    /// Fails only when there are no roots, none of them can be enumerated,
    /// or the scan is cancelled.
    pub fn scan(
        &self,
        options: &ScanOptions,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ScanResult> {
        if options.roots.is_empty() {
            return Err(TidyError::Config("No scan roots given".to_string()));
        }

        let mut walk = Walk {
            options,
            denylist: &self.denylist,
            sink,
            cancel,
            throttle: Throttle::new(self.progress_interval),
            started: Instant::now(),
            files: 0,
            dirs: 0,
            items: 0,
            bytes: 0,
            errors: 0,
            skipped: 0,
            truncated: false,
        };

        walk.report(JobStage::Estimating, "Estimating...".to_string(), true);

        let mut root = FileTreeNode::root();
        let mut enumerable = 0usize;

        for given in &options.roots {
            if cancel.is_cancelled() {
                return Err(TidyError::Cancelled);
            }
            // Every node carries a full path, whatever form the root was given in
            let path = match absolute(given) {
                Ok(p) => p,
                Err(e) => {
                    warn!("Cannot resolve scan root {:?}: {}", given, e);
                    walk.errors += 1;
                    continue;
                }
            };
            let path = path.as_path();
            if self.denylist.is_system_path(path) {
                warn!("Refusing to scan protected path: {:?}", path);
                walk.skipped += 1;
                continue;
            }
            if !path.exists() {
                warn!("Scan root does not exist: {:?}", path);
                walk.errors += 1;
                continue;
            }
            enumerable += 1;
            if walk.cap_reached() {
                walk.truncated = true;
                break;
            }

            walk.report(JobStage::Scanning, format!("Scanning: {}", path.display()), true);
            if let Some(node) = walk.visit(path, 0)? {
                root.children.push(node);
            }
        }

        if enumerable == 0 {
            return Err(TidyError::NoEnumerableRoots);
        }

        let message = if walk.items == 0 {
            "No files to process.".to_string()
        } else {
            "Scan complete.".to_string()
        };
        walk.report(JobStage::Completed, message, true);

        info!(
            "Scanned {} files in {} directories ({} skipped, {} errors{})",
            walk.files,
            walk.dirs,
            walk.skipped,
            walk.errors,
            if walk.truncated { ", truncated" } else { "" }
        );

        let digest = root.to_digest();
        Ok(ScanResult {
            root_tree: root,
            digest,
            total_files: walk.files,
            total_dirs: walk.dirs,
            truncated: walk.truncated,
            duplicates: Vec::new(),
            errors: walk.errors,
            skipped: walk.skipped,
            bytes_scanned: walk.bytes,
            duration_ms: walk.started.elapsed().as_millis() as u64,
        })
    }
}

/// Per-call walk state; nothing here outlives one `scan` call
struct Walk<'a> {
    options: &'a ScanOptions,
    denylist: &'a SystemDenylist,
    sink: &'a dyn ProgressSink,
    cancel: &'a CancellationToken,
    throttle: Throttle,
    started: Instant,
    files: u64,
    dirs: u64,
    items: u64,
    bytes: u64,
    errors: u64,
    skipped: u64,
    truncated: bool,
}

impl Walk<'_> {
    fn cap_reached(&self) -> bool {
        self.items >= self.options.max_items as u64
    }

    fn visit(&mut self, path: &Path, depth: usize) -> Result<Option<FileTreeNode>> {
        if self.cancel.is_cancelled() {
            return Err(TidyError::Cancelled);
        }

        if depth > self.options.max_depth {
            self.truncated = true;
            self.skipped += 1;
            return Ok(None);
        }

        if self.denylist.is_system_path(path) {
            self.skipped += 1;
            return Ok(None);
        }

        let Some(metadata) = self.metadata(path) else {
            return Ok(None);
        };

        // Roots were chosen explicitly, so name-based filters start below them
        if depth > 0 {
            if self.denylist.is_excluded(path) {
                self.skipped += 1;
                return Ok(None);
            }
            if !self.options.include_hidden && is_hidden(path, &metadata) {
                self.skipped += 1;
                return Ok(None);
            }
        }

        if metadata.is_dir() {
            Ok(Some(self.visit_dir(path, &metadata, depth)?))
        } else {
            Ok(self.visit_file(path, &metadata))
        }
    }

    fn metadata(&mut self, path: &Path) -> Option<Metadata> {
        let link_meta = match fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) => {
                debug!("Cannot stat {:?}: {}", path, e);
                self.errors += 1;
                return None;
            }
        };

        if !link_meta.file_type().is_symlink() {
            return Some(link_meta);
        }
        if !self.options.follow_symlinks {
            self.skipped += 1;
            return None;
        }
        match fs::metadata(path) {
            Ok(m) => Some(m),
            Err(e) => {
                debug!("Dangling symlink {:?}: {}", path, e);
                self.errors += 1;
                None
            }
        }
    }

    fn visit_file(&mut self, path: &Path, metadata: &Metadata) -> Option<FileTreeNode> {
        let size = metadata.len();
        if size > self.options.max_file_size_bytes {
            self.skipped += 1;
            return None;
        }

        self.files += 1;
        self.items += 1;
        self.bytes += size;
        self.report(JobStage::Scanning, format!("Scanned {} files", self.files), false);

        Some(FileTreeNode::file(path.to_path_buf(), size, created_utc(metadata)))
    }

    fn visit_dir(&mut self, path: &Path, metadata: &Metadata, depth: usize) -> Result<FileTreeNode> {
        self.dirs += 1;
        self.items += 1;
        self.report(JobStage::Scanning, format!("Scanned {} directories", self.dirs), false);

        let mut node = FileTreeNode::directory(path.to_path_buf(), created_utc(metadata));

        let entries = match fs::read_dir(path) {
            Ok(rd) => rd,
            Err(e) => {
                self.errors += 1;
                self.report(
                    JobStage::Scanning,
                    format!("Skipped ({}): {}", e.kind(), path.display()),
                    false,
                );
                return Ok(node);
            }
        };

        // Keep whatever was listed before a mid-listing failure
        let mut subdirs = Vec::new();
        let mut files = Vec::new();
        for entry in entries {
            match entry {
                Ok(entry) => {
                    let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                    if is_dir {
                        subdirs.push(entry.path());
                    } else {
                        files.push(entry.path());
                    }
                }
                Err(e) => {
                    debug!("Listing {:?} failed part-way: {}", path, e);
                    self.errors += 1;
                    break;
                }
            }
        }
        subdirs.sort();
        files.sort();

        for child in subdirs.iter().chain(files.iter()) {
            if self.cap_reached() {
                self.truncated = true;
                break;
            }
            if let Some(child_node) = self.visit(child, depth + 1)? {
                node.children.push(child_node);
            }
        }

        Ok(node)
    }

    fn report(&mut self, stage: JobStage, message: String, force: bool) {
        if !self.throttle.ready(force) {
            return;
        }
        let cap = self.options.max_items as u64;
        let (throughput, eta) = rate(self.items, cap, self.started);
        let mut progress = Progress::new(stage).with_message(message);
        progress.stage_progress = fraction(self.items, cap);
        progress.files_processed = self.files;
        progress.files_total = cap;
        progress.bytes_processed = self.bytes;
        progress.throughput = throughput;
        progress.eta = if stage == JobStage::Completed { None } else { eta };
        progress.errors = self.errors;
        progress.skipped = self.skipped;
        self.sink.report(&progress);
    }
}

/// Creation time, falling back to modification time where unsupported
fn created_utc(metadata: &Metadata) -> DateTime<Utc> {
    metadata
        .created()
        .or_else(|_| metadata.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentSink;
    use std::sync::Mutex;

    fn write(path: &Path, bytes: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, bytes).unwrap();
    }

    fn options(root: &Path) -> ScanOptions {
        ScanOptions {
            roots: vec![root.to_path_buf()],
            ..ScanOptions::default()
        }
    }

    fn scan(options: &ScanOptions) -> Result<ScanResult> {
        Scanner::new(SystemDenylist::empty()).scan(options, &SilentSink, &CancellationToken::new())
    }

    #[test]
    fn test_root_paths_are_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("inbox/r.pdf"), b"x");

        let result = scan(&options(&dir.path().join("inbox").join("..").join("."))).unwrap();
        let root = &result.root_tree.children[0];
        assert_eq!(root.path, dir.path());
        assert_eq!(root.children[0].children[0].path, dir.path().join("inbox").join("r.pdf"));
    }

    #[test]
    fn test_scan_counts_and_tree() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("a.txt"), b"aaaa");
        write(&dir.path().join("sub/b.txt"), b"bb");

        let result = scan(&options(dir.path())).unwrap();
        assert_eq!(result.total_files, 2);
        assert_eq!(result.total_dirs, 2);
        assert!(!result.truncated);
        assert_eq!(result.bytes_scanned, 6);

        let root = &result.root_tree.children[0];
        assert!(root.is_directory);
        // directories come before files
        assert_eq!(root.children[0].name, "sub");
        assert_eq!(root.children[1].name, "a.txt");
        assert_eq!(root.children[1].size_bytes, 4);
    }

    #[test]
    fn test_item_cap_is_shared_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..10 {
            write(&dir.path().join(format!("f{}.txt", i)), b"x");
        }
        let mut opts = options(dir.path());
        opts.max_items = 4;

        let result = scan(&opts).unwrap();
        assert!(result.truncated);
        assert!(result.total_files + result.total_dirs <= 4);
        assert_eq!(result.total_files, 3);
    }

    #[test]
    fn test_exact_cap_without_overflow_is_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("a.txt"), b"x");
        write(&dir.path().join("b.txt"), b"x");
        let mut opts = options(dir.path());
        opts.max_items = 3;

        let result = scan(&opts).unwrap();
        assert!(!result.truncated);
        assert_eq!(result.total_files, 2);
    }

    #[test]
    fn test_hidden_and_oversized_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join(".secret"), b"x");
        write(&dir.path().join("big.bin"), &[0u8; 64]);
        write(&dir.path().join("ok.txt"), b"x");
        let mut opts = options(dir.path());
        opts.max_file_size_bytes = 32;

        let result = scan(&opts).unwrap();
        assert_eq!(result.total_files, 1);
        assert_eq!(result.skipped, 2);

        opts.include_hidden = true;
        let result = scan(&opts).unwrap();
        assert_eq!(result.total_files, 2);
    }

    #[test]
    fn test_protected_root_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let denylist = SystemDenylist::new(&[dir.path().to_string_lossy().into_owned()], &[]).unwrap();
        let err = Scanner::new(denylist)
            .scan(&options(dir.path()), &SilentSink, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, TidyError::NoEnumerableRoots));
    }

    #[test]
    fn test_protected_subtree_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("keep/a.txt"), b"x");
        write(&dir.path().join("system/b.txt"), b"x");
        let protected = dir.path().join("system").to_string_lossy().into_owned();
        let denylist = SystemDenylist::new(&[protected], &[]).unwrap();

        let result = Scanner::new(denylist)
            .scan(&options(dir.path()), &SilentSink, &CancellationToken::new())
            .unwrap();
        assert_eq!(result.total_files, 1);
    }

    #[test]
    fn test_cancelled_scan() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("a.txt"), b"x");
        let token = CancellationToken::new();
        token.cancel();
        let err = Scanner::new(SystemDenylist::empty())
            .scan(&options(dir.path()), &SilentSink, &token)
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_cancel_from_progress_sink_stops_scan() {
        let dir = tempfile::tempdir().unwrap();
        for n in 0..10 {
            write(&dir.path().join(format!("f{}.txt", n)), b"x");
        }
        let token = CancellationToken::new();
        let seen = Mutex::new(0u64);
        let sink = |p: &Progress| {
            *seen.lock().unwrap() = p.files_processed;
            if p.files_processed >= 2 {
                token.cancel();
            }
        };

        let err = Scanner::new(SystemDenylist::empty())
            .with_progress_interval(Duration::ZERO)
            .scan(&options(dir.path()), &sink, &token)
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(*seen.lock().unwrap() < 10);
    }

    #[cfg(unix)]
    #[test]
    fn test_unlistable_directory_is_counted_and_walk_continues() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        write(&locked.join("hidden.txt"), b"x");
        write(&dir.path().join("open/ok.txt"), b"y");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users can list the directory anyway
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let result = scan(&options(dir.path()));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        let result = result.unwrap();

        assert_eq!(result.errors, 1);
        assert_eq!(result.total_files, 1);
        assert!(result.root_tree.find(&dir.path().join("open/ok.txt")).is_some());
        let locked_node = result.root_tree.find(&locked).unwrap();
        assert!(locked_node.children.is_empty());
    }

    #[test]
    fn test_progress_stages_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("a.txt"), b"x");
        let stages = Mutex::new(Vec::new());
        let sink = |p: &Progress| stages.lock().unwrap().push(p.stage);

        Scanner::new(SystemDenylist::empty())
            .scan(&options(dir.path()), &sink, &CancellationToken::new())
            .unwrap();

        let stages = stages.into_inner().unwrap();
        assert_eq!(stages.first(), Some(&JobStage::Estimating));
        assert_eq!(stages.last(), Some(&JobStage::Completed));
        assert!(stages.contains(&JobStage::Scanning));
    }

    #[test]
    fn test_empty_roots_is_config_error() {
        let err = scan(&ScanOptions::default()).unwrap_err();
        assert!(matches!(err, TidyError::Config(_)));
    }
}
