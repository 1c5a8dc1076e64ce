// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Plan execution: dry run, apply and revert
//!
//! Apply and revert are best-effort. Every per-item failure is caught,
//! counted and reported, and the batch carries on. Everything that was
//! actually changed is recorded in the [`Snapshot`].

pub mod conflict;
pub mod snapshot;

use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::plan::{numbered, HardlinkOp, MoveOp, Plan};
use crate::progress::{fraction, rate, JobStage, Progress, ProgressSink, Throttle};
use crate::{Result, TidyError};

use self::conflict::{fold, ResolutionMap};
pub use self::conflict::{Conflict, ConflictChoice, ConflictReason, ConflictResolution};
pub use self::snapshot::{Snapshot, SnapshotStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutorState {
    Idle,
    DryRun,
    AwaitingResolution,
    Applying,
    Reverting,
    Cancelling,
    Completed,
    Error,
}

/// Hardlink creation, replaceable so other volumes and filesystems can be simulated
pub trait Linker: Send + Sync {
    /// Create `link` as a hardlink to `target`
    fn hard_link(&self, target: &Path, link: &Path) -> io::Result<()>;
}

/// Real hardlinks, refused up front when the two paths sit on different volumes
pub struct FsLinker;

impl Linker for FsLinker {
    fn hard_link(&self, target: &Path, link: &Path) -> io::Result<()> {
        let link_dir = match link.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        if !same_volume(target, link_dir) {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "target and link are on different volumes",
            ));
        }
        fs::hard_link(target, link)
    }
}

/// Device ids where the platform has them, path roots otherwise
fn same_volume(a: &Path, b: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let (Ok(x), Ok(y)) = (fs::metadata(a), fs::metadata(b)) {
            return x.dev() == y.dev();
        }
    }
    path_root(a) == path_root(b)
}

fn path_root(path: &Path) -> Option<String> {
    match path.components().next()? {
        Component::Prefix(prefix) => Some(prefix.as_os_str().to_string_lossy().to_lowercase()),
        Component::RootDir => Some("/".to_string()),
        _ => None,
    }
}

/// A single item that could not be processed
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub snapshot: Snapshot,
    pub moved: u64,
    pub linked: u64,
    /// Hardlinks that fell back to a full copy
    pub copied: u64,
    pub directories_removed: u64,
    pub skipped: u64,
    pub errors: u64,
    pub failures: Vec<ItemFailure>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RevertReport {
    pub restored: u64,
    pub links_removed: u64,
    pub directories_removed: u64,
    pub directories_recreated: u64,
    pub failures: Vec<ItemFailure>,
    pub cancelled: bool,
}

impl RevertReport {
    fn fail(&mut self, path: &Path, error: impl ToString) {
        let message = error.to_string();
        warn!("Revert failed for {:?}: {}", path, message);
        self.failures.push(ItemFailure { path: path.to_path_buf(), message });
    }
}

pub struct Executor {
    state: ExecutorState,
    linker: Box<dyn Linker>,
    progress_interval: Duration,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self {
            state: ExecutorState::Idle,
            linker: Box::new(FsLinker),
            progress_interval: Duration::from_millis(100),
        }
    }

    pub fn with_linker(mut self, linker: impl Linker + 'static) -> Self {
        self.linker = Box::new(linker);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    /// Report every obstruction in `plan` without changing anything.
    ///
    /// Writability is tested with a throwaway file that is removed again, so
    /// repeated dry runs over an unchanged tree give the same answer.
    pub fn dry_run(&mut self, plan: &Plan, cancel: &CancellationToken) -> Result<Vec<Conflict>> {
        self.state = ExecutorState::DryRun;
        let mut conflicts = Vec::new();
        let mut writable: HashMap<PathBuf, Option<ConflictReason>> = HashMap::new();

        for mv in &plan.moves {
            if cancel.is_cancelled() {
                self.state = ExecutorState::Idle;
                return Err(TidyError::Cancelled);
            }
            let dest = &mv.destination;
            let Some(dir) = dest.parent().filter(|_| dest.file_name().is_some()) else {
                conflicts.push(Conflict::new(dest, ConflictReason::InvalidDestination));
                continue;
            };
            let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
            let obstruction = *writable
                .entry(dir.to_path_buf())
                .or_insert_with(|| check_writable(dir));
            if let Some(reason) = obstruction {
                conflicts.push(Conflict::new(dest, reason));
            } else if exists(dest) {
                conflicts.push(Conflict::existing(dest, ConflictReason::DestinationExists));
            }
        }

        for link in &plan.hardlinks {
            if cancel.is_cancelled() {
                self.state = ExecutorState::Idle;
                return Err(TidyError::Cancelled);
            }
            if !exists(&link.target) {
                conflicts.push(Conflict::new(&link.link_path, ConflictReason::TargetMissing));
            } else if exists(&link.link_path) {
                conflicts.push(Conflict::existing(&link.link_path, ConflictReason::LinkPathExists));
            }
        }

        debug!("Dry run found {} conflicts", conflicts.len());
        self.state = if conflicts.is_empty() {
            ExecutorState::DryRun
        } else {
            ExecutorState::AwaitingResolution
        };
        Ok(conflicts)
    }

    /// Apply `plan`: moves, then hardlinks, then empty-directory removal.
    ///
    /// A colliding destination with no resolution is auto-renamed. Cancellation
    /// stops before the next mutation and the partial snapshot is returned.
    pub fn execute(
        &mut self,
        plan: &Plan,
        resolutions: &[ConflictResolution],
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> ExecutionReport {
        self.state = ExecutorState::Applying;

        let mut empties: Vec<&Path> = plan.delete_empty.iter().map(PathBuf::as_path).collect();
        empties.sort_by_key(|p| Reverse(p.components().count()));

        let actions = plan
            .moves
            .iter()
            .map(Action::Move)
            .chain(plan.hardlinks.iter().map(Action::Link))
            .chain(empties.into_iter().map(Action::RemoveDir));

        let mut apply = Apply {
            linker: self.linker.as_ref(),
            resolutions: ResolutionMap::new(resolutions),
            reserved: HashSet::new(),
            snapshot: Snapshot::new(Some(plan.id.clone())),
        };
        let mut ticker = Ticker::new(sink, self.progress_interval, JobStage::Applying, plan.action_count());
        let mut report = Counts::default();
        let mut cancelled = false;

        for action in actions {
            if cancel.is_cancelled() {
                self.state = ExecutorState::Cancelling;
                cancelled = true;
                break;
            }
            let path = action.path().to_path_buf();
            match apply.run(action) {
                Ok(Outcome::Moved) => report.moved += 1,
                Ok(Outcome::Linked) => report.linked += 1,
                Ok(Outcome::Copied) => report.copied += 1,
                Ok(Outcome::Removed) => report.removed += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    warn!("Failed to apply {:?}: {}", path, e);
                    report.failures.push(ItemFailure { path: path.clone(), message: e.to_string() });
                }
            }
            ticker.advance(report.failures.len() as u64, report.skipped, &path);
        }

        let errors = report.failures.len() as u64;
        let succeeded = report.moved + report.linked + report.copied + report.removed;
        self.state = if cancelled {
            ExecutorState::Idle
        } else if errors > 0 && succeeded == 0 {
            ExecutorState::Error
        } else {
            ExecutorState::Completed
        };
        let stage = if cancelled { JobStage::Idle } else { JobStage::Completed };
        ticker.finish(stage, errors, report.skipped, if cancelled { "Cancelled." } else { "Apply complete." });

        info!(
            "Applied plan {}: {} moved, {} linked, {} copied, {} skipped, {} errors{}",
            plan.id,
            report.moved,
            report.linked,
            report.copied,
            report.skipped,
            errors,
            if cancelled { ", cancelled" } else { "" }
        );

        ExecutionReport {
            snapshot: apply.snapshot,
            moved: report.moved,
            linked: report.linked,
            copied: report.copied,
            directories_removed: report.removed,
            skipped: report.skipped,
            errors,
            failures: report.failures,
            cancelled,
        }
    }

    /// Undo an execution: most recent move first, then created hardlinks, then
    /// created directories that are now empty.
    pub fn revert(
        &mut self,
        snapshot: &Snapshot,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> RevertReport {
        self.state = ExecutorState::Reverting;
        let total = snapshot.removed_directories.len()
            + snapshot.reverse_moves.len()
            + snapshot.created_hardlinks.len()
            + snapshot.created_directories.len();
        let mut ticker = Ticker::new(sink, self.progress_interval, JobStage::Reverting, total);
        let mut report = RevertReport::default();

        let mut removed = snapshot.removed_directories.clone();
        removed.sort_by_key(|p| p.components().count());
        let mut created = snapshot.created_directories.clone();
        created.sort_by_key(|p| Reverse(p.components().count()));

        'sweep: {
            // Removed directories come back first so moves can land in them
            for dir in &removed {
                if cancel.is_cancelled() {
                    break 'sweep;
                }
                match fs::create_dir_all(dir) {
                    Ok(()) => report.directories_recreated += 1,
                    Err(e) => report.fail(dir, e),
                }
                ticker.advance(report.failures.len() as u64, 0, dir);
            }

            for mv in snapshot.reverse_moves.iter().rev() {
                if cancel.is_cancelled() {
                    break 'sweep;
                }
                match restore(mv) {
                    Ok(()) => report.restored += 1,
                    Err(e) => report.fail(&mv.source, e),
                }
                ticker.advance(report.failures.len() as u64, 0, &mv.destination);
            }

            for link in &snapshot.created_hardlinks {
                if cancel.is_cancelled() {
                    break 'sweep;
                }
                match fs::remove_file(link) {
                    Ok(()) => report.links_removed += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        debug!("Hardlink already gone: {:?}", link)
                    }
                    Err(e) => report.fail(link, e),
                }
                ticker.advance(report.failures.len() as u64, 0, link);
            }

            for dir in &created {
                if cancel.is_cancelled() {
                    break 'sweep;
                }
                if is_empty_dir(dir) {
                    match fs::remove_dir(dir) {
                        Ok(()) => report.directories_removed += 1,
                        Err(e) => report.fail(dir, e),
                    }
                }
                ticker.advance(report.failures.len() as u64, 0, dir);
            }
        }

        report.cancelled = cancel.is_cancelled();
        self.state = if report.cancelled { ExecutorState::Idle } else { ExecutorState::Completed };
        ticker.finish(
            if report.cancelled { JobStage::Idle } else { JobStage::Completed },
            report.failures.len() as u64,
            0,
            if report.cancelled { "Cancelled." } else { "Revert complete." },
        );

        info!(
            "Reverted snapshot {}: {} restored, {} links removed, {} directories removed, {} failures",
            snapshot.id,
            report.restored,
            report.links_removed,
            report.directories_removed,
            report.failures.len()
        );
        report
    }
}

enum Action<'p> {
    Move(&'p MoveOp),
    Link(&'p HardlinkOp),
    RemoveDir(&'p Path),
}

impl Action<'_> {
    fn path(&self) -> &Path {
        match self {
            Action::Move(mv) => &mv.source,
            Action::Link(link) => &link.link_path,
            Action::RemoveDir(dir) => *dir,
        }
    }
}

enum Outcome {
    Moved,
    Linked,
    Copied,
    Removed,
    Skipped,
}

#[derive(Default)]
struct Counts {
    moved: u64,
    linked: u64,
    copied: u64,
    removed: u64,
    skipped: u64,
    failures: Vec<ItemFailure>,
}

/// Per-call apply state
struct Apply<'a> {
    linker: &'a dyn Linker,
    resolutions: ResolutionMap<'a>,
    /// Case-folded destinations already taken by this batch
    reserved: HashSet<String>,
    snapshot: Snapshot,
}

impl Apply<'_> {
    fn run(&mut self, action: Action) -> Result<Outcome> {
        match action {
            Action::Move(mv) => self.apply_move(mv),
            Action::Link(link) => self.apply_hardlink(link),
            Action::RemoveDir(dir) => self.remove_empty(dir),
        }
    }

    fn apply_move(&mut self, mv: &MoveOp) -> Result<Outcome> {
        let source = &mv.source;
        fs::symlink_metadata(source).map_err(|e| TidyError::at(source, e))?;
        if *source == mv.destination {
            return Ok(Outcome::Skipped);
        }

        let Some(dest) = self.resolve_destination(&mv.destination) else {
            return Ok(Outcome::Skipped);
        };
        if let Some(parent) = dest.parent() {
            create_missing_dirs(parent, &mut self.snapshot.created_directories)?;
        }
        move_file(source, &dest)?;

        self.reserved.insert(fold(&dest));
        self.snapshot.reverse_moves.push(MoveOp::new(dest, source.clone()));
        Ok(Outcome::Moved)
    }

    /// Where a move should land, or `None` to skip it
    fn resolve_destination(&self, desired: &Path) -> Option<PathBuf> {
        let in_batch = self.reserved.contains(&fold(desired));
        if !in_batch && !exists(desired) {
            return Some(desired.to_path_buf());
        }

        let Some(resolution) = self.resolutions.get(desired) else {
            return Some(ensure_unique_on_disk(desired, &self.reserved));
        };
        match resolution.choice {
            ConflictChoice::Skip => None,
            ConflictChoice::Rename => {
                let target = resolution.rename_to.as_deref().unwrap_or(desired);
                Some(ensure_unique_on_disk(target, &self.reserved))
            }
            ConflictChoice::Overwrite => {
                if !in_batch {
                    match fs::remove_file(desired) {
                        Ok(()) => return Some(desired.to_path_buf()),
                        Err(e) => warn!("Cannot overwrite {:?} ({}), renaming instead", desired, e),
                    }
                }
                Some(ensure_unique_on_disk(desired, &self.reserved))
            }
        }
    }

    fn apply_hardlink(&mut self, op: &HardlinkOp) -> Result<Outcome> {
        if self.resolutions.get(&op.link_path).map(|r| r.choice) == Some(ConflictChoice::Skip) {
            return Ok(Outcome::Skipped);
        }
        if fold(&op.link_path) == fold(&op.target) {
            return Ok(Outcome::Skipped);
        }
        if !exists(&op.target) {
            return Err(TidyError::at(
                &op.target,
                io::Error::new(io::ErrorKind::NotFound, ConflictReason::TargetMissing.to_string()),
            ));
        }
        if exists(&op.link_path) {
            if let Err(e) = fs::remove_file(&op.link_path) {
                warn!("Cannot replace {:?} with a link ({}), skipping", op.link_path, e);
                return Ok(Outcome::Skipped);
            }
        }
        if let Some(parent) = op.link_path.parent() {
            create_missing_dirs(parent, &mut self.snapshot.created_directories)?;
        }

        match self.linker.hard_link(&op.target, &op.link_path) {
            Ok(()) => {
                self.snapshot.created_hardlinks.push(op.link_path.clone());
                Ok(Outcome::Linked)
            }
            Err(e) => {
                debug!("Hardlink {:?} failed ({}), copying instead", op.link_path, e);
                fs::copy(&op.target, &op.link_path).map_err(|e| TidyError::at(&op.link_path, e))?;
                Ok(Outcome::Copied)
            }
        }
    }

    fn remove_empty(&mut self, dir: &Path) -> Result<Outcome> {
        if !dir.is_dir() || !is_empty_dir(dir) {
            return Ok(Outcome::Skipped);
        }
        fs::remove_dir(dir).map_err(|e| TidyError::at(dir, e))?;
        self.snapshot.removed_directories.push(dir.to_path_buf());
        Ok(Outcome::Removed)
    }
}

/// Action-granular progress
struct Ticker<'a> {
    sink: &'a dyn ProgressSink,
    throttle: Throttle,
    started: Instant,
    stage: JobStage,
    total: u64,
    done: u64,
}

impl<'a> Ticker<'a> {
    fn new(sink: &'a dyn ProgressSink, interval: Duration, stage: JobStage, total: usize) -> Self {
        Self {
            sink,
            throttle: Throttle::new(interval),
            started: Instant::now(),
            stage,
            total: total as u64,
            done: 0,
        }
    }

    fn advance(&mut self, errors: u64, skipped: u64, path: &Path) {
        self.done += 1;
        let force = self.done == self.total;
        self.emit(self.stage, errors, skipped, path.display().to_string(), force);
    }

    fn finish(&mut self, stage: JobStage, errors: u64, skipped: u64, message: &str) {
        self.emit(stage, errors, skipped, message.to_string(), true);
    }

    fn emit(&mut self, stage: JobStage, errors: u64, skipped: u64, message: String, force: bool) {
        if !self.throttle.ready(force) {
            return;
        }
        let (throughput, eta) = rate(self.done, self.total, self.started);
        let mut progress = Progress::new(stage).with_message(message);
        progress.stage_progress = fraction(self.done, self.total);
        progress.actions_done = self.done;
        progress.actions_total = self.total;
        progress.throughput = throughput;
        progress.eta = eta;
        progress.errors = errors;
        progress.skipped = skipped;
        self.sink.report(&progress);
    }
}

/// `desired`, or the first `name (n).ext` free both on disk and in `reserved`
pub fn ensure_unique_on_disk(desired: &Path, reserved: &HashSet<String>) -> PathBuf {
    let taken = |p: &Path| exists(p) || reserved.contains(&fold(p));
    if !taken(desired) {
        return desired.to_path_buf();
    }
    let mut n = 1;
    loop {
        let candidate = numbered(desired, n);
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir).map(|mut rd| rd.next().is_none()).unwrap_or(false)
}

/// Nearest existing ancestor must be a directory we can create files in
fn check_writable(dir: &Path) -> Option<ConflictReason> {
    let mut existing = dir;
    loop {
        match fs::metadata(existing) {
            Ok(m) if m.is_dir() => break,
            Ok(_) => return Some(ConflictReason::CannotCreateDirectory),
            Err(_) => match existing.parent() {
                Some(p) if p.as_os_str().is_empty() => existing = Path::new("."),
                Some(p) => existing = p,
                None => return Some(ConflictReason::InvalidDestination),
            },
        }
    }

    let scratch = existing.join(format!(".tidyfs-write-{}", Uuid::new_v4().simple()));
    match OpenOptions::new().write(true).create_new(true).open(&scratch) {
        Ok(file) => {
            drop(file);
            if let Err(e) = fs::remove_file(&scratch) {
                warn!("Failed to remove scratch file {:?}: {}", scratch, e);
            }
            None
        }
        Err(e) => {
            debug!("Cannot create files in {:?}: {}", existing, e);
            Some(ConflictReason::NoWriteAccess)
        }
    }
}

/// Create `dir` and record each directory that did not exist, shallowest first
fn create_missing_dirs(dir: &Path, created: &mut Vec<PathBuf>) -> Result<()> {
    let mut missing = Vec::new();
    let mut current = Some(dir);
    while let Some(d) = current {
        if d.as_os_str().is_empty() || d.exists() {
            break;
        }
        missing.push(d.to_path_buf());
        current = d.parent();
    }
    if missing.is_empty() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|e| TidyError::at(dir, e))?;
    created.extend(missing.into_iter().rev());
    Ok(())
}

/// Rename, or copy and delete when the rename cannot cross devices
fn move_file(source: &Path, dest: &Path) -> Result<()> {
    let rename_err = match fs::rename(source, dest) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    let is_file = fs::symlink_metadata(source).map(|m| m.is_file()).unwrap_or(false);
    if !is_file {
        return Err(TidyError::at(source, rename_err));
    }

    debug!("Rename {:?} failed ({}), copying instead", source, rename_err);
    fs::copy(source, dest).map_err(|e| TidyError::at(dest, e))?;
    if let Err(e) = fs::remove_file(source) {
        if let Err(cleanup) = fs::remove_file(dest) {
            warn!("Failed to remove partial copy {:?}: {}", dest, cleanup);
        }
        return Err(TidyError::at(source, e));
    }
    Ok(())
}

fn restore(mv: &MoveOp) -> Result<()> {
    let (current, original) = (&mv.source, &mv.destination);
    if exists(original) {
        return Err(TidyError::at(
            original,
            io::Error::new(io::ErrorKind::AlreadyExists, "original path is occupied"),
        ));
    }
    if let Some(parent) = original.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| TidyError::at(parent, e))?;
        }
    }
    move_file(current, original)
}
