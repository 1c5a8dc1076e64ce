// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! End-to-end scan, plan, apply and revert over temporary directories

use chrono::{TimeZone, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use tidyfs::dedupe::{resolve_duplicates, DedupePolicy, Deduplicator, DuplicateSelection};
use tidyfs::executor::{ConflictChoice, ConflictResolution, Executor, ExecutorState, Linker};
use tidyfs::guard::SystemDenylist;
use tidyfs::plan::{self, HardlinkOp, MoveOp, Plan};
use tidyfs::planner::{FallbackPlanner, PlanPreferences, Planner};
use tidyfs::progress::SilentSink;
use tidyfs::rules::{self, Rule, RuleEvaluation, RuleSet};
use tidyfs::scanner::{ScanOptions, Scanner};
use tidyfs::tree::FileTreeNode;

fn write(path: &Path, content: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn scan(root: &Path, max_depth: usize) -> tidyfs::scanner::ScanResult {
    let options = ScanOptions {
        roots: vec![root.to_path_buf()],
        max_depth,
        ..ScanOptions::default()
    };
    Scanner::new(SystemDenylist::empty())
        .scan(&options, &SilentSink, &CancellationToken::new())
        .unwrap()
}

/// `path` spelled relative to the working directory, through `..` segments
#[cfg(unix)]
fn relative_to_cwd(path: &Path) -> PathBuf {
    let cwd = std::env::current_dir().unwrap();
    let mut rel = PathBuf::from(".");
    for _ in cwd.components().skip(1) {
        rel.push("..");
    }
    rel.join(path.strip_prefix("/").unwrap())
}

struct CrossVolume;

impl Linker for CrossVolume {
    fn hard_link(&self, _target: &Path, _link: &Path) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "different volume"))
    }
}

#[test]
fn depth_limit_truncates_without_failing() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir.path().join("a.txt"), b"a");
    write(&dir.path().join("b.txt"), b"b");
    write(&dir.path().join("c.txt"), b"c");
    write(&dir.path().join("one/two/deep.txt"), b"deep");

    let result = scan(dir.path(), 1);
    assert!(result.truncated);
    assert_eq!(result.total_files, 3);

    let one = result.root_tree.find(&dir.path().join("one")).unwrap();
    assert!(one.children.is_empty());
    assert!(result.root_tree.find(&dir.path().join("one/two/deep.txt")).is_none());
}

#[test]
fn duplicates_become_hardlinks_and_revert_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.bin");
    let b = dir.path().join("nested/b.bin");
    let c = dir.path().join("c.bin");
    write(&a, b"same bytes");
    write(&b, b"same bytes");
    write(&c, b"other data");

    let report = Deduplicator::new(SystemDenylist::empty())
        .find_duplicates(&[dir.path().to_path_buf()], &SilentSink, &CancellationToken::new())
        .unwrap();
    assert_eq!(report.groups.len(), 1);
    let group = report.groups[0].clone();
    assert_eq!(group.paths.len(), 2);
    assert!(!group.paths.contains(&c));

    let kept = group.paths[0].clone();
    let resolution = resolve_duplicates(
        &[DuplicateSelection { group, kept: kept.clone() }],
        &DedupePolicy::HardlinkToKept,
    );
    let plan = plan::merge("dedupe", &RuleEvaluation::default(), None, Some(&resolution));
    assert_eq!(plan.hardlinks.len(), 1);

    let mut executor = Executor::new();
    let applied = executor.execute(&plan, &[], &SilentSink, &CancellationToken::new());
    assert_eq!(applied.errors, 0);
    assert_eq!(applied.snapshot.created_hardlinks.len(), 1);

    let link = &plan.hardlinks[0].link_path;
    assert_eq!(fs::read(link).unwrap(), b"same bytes");

    let reverted = executor.revert(&applied.snapshot, &SilentSink, &CancellationToken::new());
    assert_eq!(reverted.links_removed, 1);
    assert!(!link.exists());
    assert!(kept.exists());
}

#[test]
fn cross_volume_link_falls_back_to_unrecorded_copy() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("keep.dat");
    let link = dir.path().join("dupe.dat");
    write(&target, b"payload");
    write(&link, b"payload");

    let mut plan = Plan::new("links");
    plan.hardlinks.push(HardlinkOp { link_path: link.clone(), target });

    let mut executor = Executor::new().with_linker(CrossVolume);
    let report = executor.execute(&plan, &[], &SilentSink, &CancellationToken::new());
    assert_eq!(report.copied, 1);
    assert_eq!(report.linked, 0);
    assert!(report.snapshot.created_hardlinks.is_empty());
    assert_eq!(fs::read(&link).unwrap(), b"payload");
}

#[test]
fn year_rule_routes_into_dated_folder() {
    let created = Utc.with_ymd_and_hms(2023, 4, 5, 12, 0, 0).unwrap();
    let mut root = FileTreeNode::directory(PathBuf::from("/home/me/inbox"), created);
    root.children.push(FileTreeNode::file(PathBuf::from("/home/me/inbox/report.pdf"), 10, created));
    root.children.push(FileTreeNode::file(PathBuf::from("/home/me/inbox/notes.txt"), 3, created));

    let mut rule = Rule::move_to("pdfs", "*.pdf", "/home/me/Docs");
    rule.group_by_year = true;
    let evaluation = rules::evaluate(&RuleSet { rules: vec![rule] }, &root);

    assert_eq!(
        evaluation.moves,
        vec![MoveOp::new("/home/me/inbox/report.pdf", "/home/me/Docs/2023/report.pdf")]
    );
}

#[test]
fn rule_claims_win_over_planner_moves() {
    let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut root = FileTreeNode::directory(PathBuf::from("/data"), created);
    root.children.push(FileTreeNode::file(PathBuf::from("/data/Scan.PDF"), 1, created));
    root.children.push(FileTreeNode::file(PathBuf::from("/data/song.mp3"), 1, created));

    let evaluation = rules::evaluate(
        &RuleSet { rules: vec![Rule::move_to("pdf", "*.pdf", "/data/Papers")] },
        &root,
    );

    let proposed = tokio_test::block_on(FallbackPlanner::new("/data/Organized").plan(
        &root.to_digest(),
        "organize",
        &PlanPreferences::default(),
    ))
    .unwrap();
    assert_eq!(proposed.plan.moves.len(), 2);

    let merged = plan::merge("organize", &evaluation, Some(&proposed.plan), None);
    let sources: Vec<_> = merged.moves.iter().map(|m| (m.source.clone(), m.destination.clone())).collect();
    assert_eq!(sources.len(), 2);
    assert!(sources.contains(&(PathBuf::from("/data/Scan.PDF"), PathBuf::from("/data/Papers/Scan.PDF"))));
    assert!(sources.contains(&(PathBuf::from("/data/song.mp3"), PathBuf::from("/data/Organized/Audio/song.mp3"))));
}

#[test]
fn renamed_conflict_is_reverted_to_original_layout() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("inbox/x.txt");
    let occupied = dir.path().join("sorted/x.txt");
    write(&source, b"new");
    write(&occupied, b"old");

    let mut plan = Plan::new("tidy");
    plan.moves.push(MoveOp::new(&source, &occupied));

    let mut executor = Executor::new();
    let cancel = CancellationToken::new();
    let conflicts = executor.dry_run(&plan, &cancel).unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(executor.dry_run(&plan, &cancel).unwrap(), conflicts);

    let resolutions = ConflictResolution::for_all(&conflicts, ConflictChoice::Rename);
    let report = executor.execute(&plan, &resolutions, &SilentSink, &cancel);
    assert_eq!(report.moved, 1);
    assert_eq!(executor.state(), ExecutorState::Completed);

    let renamed = dir.path().join("sorted/x (1).txt");
    assert_eq!(fs::read(&renamed).unwrap(), b"new");
    assert_eq!(fs::read(&occupied).unwrap(), b"old");
    assert!(!source.exists());

    let reverted = executor.revert(&report.snapshot, &SilentSink, &cancel);
    assert_eq!(reverted.restored, 1);
    assert!(reverted.failures.is_empty());
    assert_eq!(fs::read(&source).unwrap(), b"new");
    assert!(!renamed.exists());
    assert_eq!(fs::read(&occupied).unwrap(), b"old");
}

#[cfg(unix)]
#[test]
fn relative_root_still_honours_absolute_scopes_and_claims() {
    let dir = tempfile::tempdir().unwrap();
    let inbox = dir.path().join("inbox");
    write(&inbox.join("r.pdf"), b"pdf");

    let result = scan(&relative_to_cwd(dir.path()), 6);
    let files: Vec<PathBuf> = result.root_tree.files().iter().map(|f| f.path.clone()).collect();
    assert_eq!(files, vec![inbox.join("r.pdf")]);

    let mut scoped = Rule::move_to("scoped", "*.pdf", dir.path().join("Docs"));
    scoped.scopes = vec![inbox.clone()];
    let mut full = Rule::move_to("full", "**/inbox/*.pdf", dir.path().join("Other"));
    full.match_full_path = true;
    full.priority = 200;
    let evaluation = rules::evaluate(&RuleSet { rules: vec![scoped, full] }, &result.root_tree);
    assert_eq!(
        evaluation.moves,
        vec![MoveOp::new(inbox.join("r.pdf"), dir.path().join("Docs").join("r.pdf"))]
    );

    // A planner naming the same file another way is still subtracted
    let mut external = Plan::new("remote");
    external
        .moves
        .push(MoveOp::new(relative_to_cwd(&inbox.join("r.pdf")), dir.path().join("Misc/r.pdf")));
    let merged = plan::merge("organize", &evaluation, Some(&external), None);
    assert_eq!(merged.moves, evaluation.moves);
}
