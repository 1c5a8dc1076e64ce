// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Duplicate detection: size -> partial hash -> full hash funnel

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::guard::{absolute, SystemDenylist};
use crate::hasher::hash_file;
use crate::plan::{unique_in_batch, HardlinkOp, MoveOp};
use crate::progress::{fraction, rate, JobStage, Progress, ProgressSink, Throttle};
use crate::{Result, TidyError};

/// Prefix length hashed to prune non-duplicates before full reads
pub const PARTIAL_HASH_BYTES: u64 = 256 * 1024;

/// Files sharing identical size and full-content hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub hash: String,
    pub size_bytes: u64,
    pub paths: Vec<PathBuf>,
}

impl DuplicateGroup {
    /// Bytes reclaimable by keeping a single copy
    pub fn wasted_bytes(&self) -> u64 {
        self.size_bytes * (self.paths.len().saturating_sub(1) as u64)
    }
}

/// Outcome of a duplicate search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupeReport {
    pub groups: Vec<DuplicateGroup>,
    pub files_enumerated: u64,
    /// Files that survived size bucketing
    pub candidates: u64,
    pub hash_failures: u64,
    pub enumeration_errors: u64,
}

/// Duplicate finder
pub struct Deduplicator {
    denylist: SystemDenylist,
    partial_bytes: u64,
    progress_interval: Duration,
}

impl Deduplicator {
    pub fn new(denylist: SystemDenylist) -> Self {
        Self {
            denylist,
            partial_bytes: PARTIAL_HASH_BYTES,
            progress_interval: Duration::from_millis(100),
        }
    }

    pub fn with_partial_bytes(mut self, bytes: u64) -> Self {
        self.partial_bytes = bytes.max(1);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Find every group of identical files under `roots`.
    ///
    /// Enumeration and hashing report progress as two separate phases.
    /// Files that cannot be read are counted and left out.
    pub fn find_duplicates(
        &self,
        roots: &[PathBuf],
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<DedupeReport> {
        let mut report = DedupeReport::default();

        let files = self.enumerate(roots, sink, cancel, &mut report)?;
        report.files_enumerated = files.len() as u64;

        let mut by_size: HashMap<u64, Vec<PathBuf>> = HashMap::new();
        for (path, size) in files {
            by_size.entry(size).or_default().push(path);
        }
        let mut buckets: Vec<(u64, Vec<PathBuf>)> = by_size
            .into_iter()
            .filter(|(_, paths)| paths.len() > 1)
            .collect();
        buckets.sort_by(|a, b| b.0.cmp(&a.0));
        report.candidates = buckets.iter().map(|(_, p)| p.len() as u64).sum();

        let mut hashing = HashPhase {
            sink,
            cancel,
            throttle: Throttle::new(self.progress_interval),
            started: Instant::now(),
            total: report.candidates,
            hashed: 0,
            bytes: 0,
            failures: 0,
        };

        for (size, paths) in buckets {
            hashing.report(format!("Partial hash: {} bytes", size), false);

            let by_partial = hashing.group(&paths, size, self.partial_bytes)?;
            for (partial_hash, partial) in by_partial.into_iter().filter(|(_, p)| p.len() > 1) {
                // A prefix covering the whole file is already the full hash
                let by_full = if size <= self.partial_bytes {
                    HashMap::from([(partial_hash, partial)])
                } else {
                    hashing.total += partial.len() as u64;
                    hashing.group(&partial, size, 0)?
                };

                for (hash, mut paths) in by_full {
                    if paths.len() < 2 {
                        continue;
                    }
                    paths.sort();
                    report.groups.push(DuplicateGroup { hash, size_bytes: size, paths });
                }
            }
        }

        report.hash_failures = hashing.failures;
        report.groups.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes).then(a.hash.cmp(&b.hash)));

        let mut done = Progress::new(JobStage::Completed)
            .with_message(format!("{} duplicate groups", report.groups.len()));
        done.files_processed = hashing.hashed;
        done.files_total = hashing.total;
        done.stage_progress = 1.0;
        done.errors = report.hash_failures + report.enumeration_errors;
        sink.report(&done);

        info!(
            "Duplicate search: {} files, {} candidates, {} groups, {} hash failures",
            report.files_enumerated,
            report.candidates,
            report.groups.len(),
            report.hash_failures
        );
        Ok(report)
    }

    /// Regular, non-empty files under the roots. Protected and unreadable
    /// subtrees are skipped silently.
    fn enumerate(
        &self,
        roots: &[PathBuf],
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
        report: &mut DedupeReport,
    ) -> Result<Vec<(PathBuf, u64)>> {
        let mut throttle = Throttle::new(self.progress_interval);
        let started = Instant::now();
        let mut files = Vec::new();
        let mut seen = HashSet::new();
        let mut any_root = false;

        for given in roots {
            let root = match absolute(given) {
                Ok(root) if !given.as_os_str().is_empty() => root,
                _ => {
                    debug!("Skipping duplicate root {:?}", given);
                    continue;
                }
            };
            if !root.is_dir() || self.denylist.is_system_path(&root) {
                debug!("Skipping duplicate root {:?}", root);
                continue;
            }
            any_root = true;

            let walker = WalkDir::new(&root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !self.denylist.rejects(e.path()));

            for entry in walker {
                if cancel.is_cancelled() {
                    return Err(TidyError::Cancelled);
                }
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        debug!("Enumeration error: {}", e);
                        report.enumeration_errors += 1;
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let size = match entry.metadata() {
                    Ok(m) => m.len(),
                    Err(e) => {
                        debug!("Cannot stat {:?}: {}", entry.path(), e);
                        report.enumeration_errors += 1;
                        continue;
                    }
                };
                if size == 0 || !seen.insert(entry.path().to_path_buf()) {
                    continue;
                }
                files.push((entry.into_path(), size));

                if throttle.ready(false) {
                    let (throughput, _) = rate(files.len() as u64, 0, started);
                    let mut progress = Progress::new(JobStage::Enumerating)
                        .with_message(format!("Found {} files", files.len()));
                    progress.files_processed = files.len() as u64;
                    progress.throughput = throughput;
                    progress.errors = report.enumeration_errors;
                    sink.report(&progress);
                }
            }
        }

        if !any_root {
            return Err(TidyError::NoEnumerableRoots);
        }
        Ok(files)
    }
}

/// Hashing-phase counters, independent of enumeration. `total` counts hash
/// passes: one per candidate plus one per file that needs a full pass.
struct HashPhase<'a> {
    sink: &'a dyn ProgressSink,
    cancel: &'a CancellationToken,
    throttle: Throttle,
    started: Instant,
    total: u64,
    hashed: u64,
    bytes: u64,
    failures: u64,
}

impl HashPhase<'_> {
    fn group(
        &mut self,
        paths: &[PathBuf],
        size: u64,
        partial_bytes: u64,
    ) -> Result<HashMap<String, Vec<PathBuf>>> {
        let mut groups: HashMap<String, Vec<PathBuf>> = HashMap::new();
        for path in paths {
            if let Some(hash) = self.hash_one(path, partial_bytes, size)? {
                groups.entry(hash).or_default().push(path.clone());
            }
        }
        Ok(groups)
    }

    fn hash_one(&mut self, path: &Path, partial_bytes: u64, size: u64) -> Result<Option<String>> {
        match hash_file(path, partial_bytes, self.cancel) {
            Ok(hash) => {
                self.hashed += 1;
                self.bytes += if partial_bytes > 0 { partial_bytes.min(size) } else { size };
                self.report(format!("Hashed {}", path.display()), false);
                Ok(Some(hash))
            }
            Err(TidyError::Cancelled) => Err(TidyError::Cancelled),
            Err(e) => {
                debug!("Excluding from duplicate pass: {}", e);
                self.failures += 1;
                Ok(None)
            }
        }
    }

    fn report(&mut self, message: String, force: bool) {
        if !self.throttle.ready(force) {
            return;
        }
        let (throughput, eta) = rate(self.hashed, self.total, self.started);
        let mut progress = Progress::new(JobStage::Hashing).with_message(message);
        progress.stage_progress = fraction(self.hashed, self.total);
        progress.files_processed = self.hashed;
        progress.files_total = self.total;
        progress.bytes_processed = self.bytes;
        progress.throughput = throughput;
        progress.eta = eta;
        progress.errors = self.failures;
        self.sink.report(&progress);
    }
}

/// How the non-kept members of a group are handled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", content = "folder")]
pub enum DedupePolicy {
    MoveNextToKept,
    HardlinkToKept,
    MoveToArchive(PathBuf),
}

/// The member a user chose to keep for one group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateSelection {
    pub group: DuplicateGroup,
    pub kept: PathBuf,
}

/// Plan entries derived from approved duplicate selections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupeResolution {
    pub moves: Vec<MoveOp>,
    pub hardlinks: Vec<HardlinkOp>,
}

/// Turn selections into moves or hardlinks. Destinations created by the same
/// batch are uniquified with a `" (n)"` suffix without touching the disk.
pub fn resolve_duplicates(selections: &[DuplicateSelection], policy: &DedupePolicy) -> DedupeResolution {
    let mut resolution = DedupeResolution::default();
    let mut planned: HashSet<String> = selections
        .iter()
        .map(|s| s.kept.to_string_lossy().to_lowercase())
        .collect();

    for selection in selections {
        let kept_key = selection.kept.to_string_lossy().to_lowercase();
        for path in &selection.group.paths {
            if path.to_string_lossy().to_lowercase() == kept_key {
                continue;
            }
            let Some(file_name) = path.file_name() else {
                continue;
            };

            match policy {
                DedupePolicy::HardlinkToKept => resolution.hardlinks.push(HardlinkOp {
                    link_path: path.clone(),
                    target: selection.kept.clone(),
                }),
                DedupePolicy::MoveToArchive(folder) => {
                    let dest = unique_in_batch(&mut planned, folder.join(file_name));
                    resolution.moves.push(MoveOp::new(path.clone(), dest));
                }
                DedupePolicy::MoveNextToKept => {
                    let folder = selection.kept.parent().unwrap_or_else(|| Path::new(""));
                    let dest = unique_in_batch(&mut planned, folder.join(file_name));
                    resolution.moves.push(MoveOp::new(path.clone(), dest));
                }
            }
        }
    }

    resolution
}
