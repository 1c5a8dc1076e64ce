// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! tidyfs Undo Utility
//!
//! Reverts an applied plan from its recorded snapshot.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use tidyfs::executor::{Executor, Snapshot, SnapshotStore};
use tidyfs::progress::SilentSink;

#[derive(Parser, Debug)]
#[command(name = "tidyfs-undo")]
#[command(version)]
#[command(about = "Undo tidyfs moves from a snapshot")]
struct Args {
    /// Snapshot id, or path to a snapshot file (default: most recent)
    snapshot: Option<String>,

    /// Directory holding recorded snapshots
    #[arg(short, long, default_value = ".tidyfs/snapshots")]
    snapshots_dir: PathBuf,

    /// Dry run - show what would be undone without doing it
    #[arg(long)]
    dry_run: bool,

    /// List recorded snapshots
    #[arg(long)]
    list: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let store = SnapshotStore::new(args.snapshots_dir.clone());

    if args.list {
        let snapshots = store
            .list()
            .with_context(|| format!("reading {:?}", args.snapshots_dir))?;
        if snapshots.is_empty() {
            println!("No snapshots found.");
            return Ok(());
        }
        println!("Snapshots ({} entries):", snapshots.len());
        println!("{:-<80}", "");
        for (i, s) in snapshots.iter().enumerate() {
            println!(
                "{:3}. [{}] {} ({} moves, {} links)",
                i + 1,
                s.timestamp.format("%Y-%m-%d %H:%M:%S"),
                s.id,
                s.reverse_moves.len(),
                s.created_hardlinks.len()
            );
        }
        return Ok(());
    }

    let snapshot = match &args.snapshot {
        Some(arg) if PathBuf::from(arg).is_file() => {
            Snapshot::load(&PathBuf::from(arg)).with_context(|| format!("loading snapshot file {}", arg))?
        }
        Some(id) => store.get(id).with_context(|| format!("loading snapshot {}", id))?,
        None => match store.list()?.into_iter().next() {
            Some(latest) => latest,
            None => bail!("No snapshots in {:?}", args.snapshots_dir),
        },
    };

    if args.dry_run {
        println!("Would revert snapshot {}:", snapshot.id);
        for mv in snapshot.reverse_moves.iter().rev() {
            println!("  {} -> {}", mv.source.display(), mv.destination.display());
        }
        for link in &snapshot.created_hardlinks {
            println!("  remove link {}", link.display());
        }
        for dir in &snapshot.created_directories {
            println!("  remove folder {} (if empty)", dir.display());
        }
        return Ok(());
    }

    let report = Executor::new().revert(&snapshot, &SilentSink, &CancellationToken::new());
    println!(
        "Reverted {}: {} restored, {} links removed, {} folders removed",
        snapshot.id, report.restored, report.links_removed, report.directories_removed
    );
    for failure in &report.failures {
        eprintln!("  failed: {} ({})", failure.path.display(), failure.message);
    }
    if !report.failures.is_empty() {
        bail!("{} item(s) could not be restored", report.failures.len());
    }
    Ok(())
}
