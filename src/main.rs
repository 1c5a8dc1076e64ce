// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! tidyfs: local file organizer
//!
//! Scan, find duplicates, classify with rules, plan, apply and revert.

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tidyfs::config::AppConfig;
use tidyfs::categories::Overview;
use tidyfs::dedupe::{
    resolve_duplicates, DedupePolicy, DedupeReport, DedupeResolution, Deduplicator, DuplicateSelection,
};
use tidyfs::executor::{ConflictChoice, ConflictResolution, Executor, SnapshotStore};
use tidyfs::guard::SystemDenylist;
use tidyfs::index::IndexStore;
use tidyfs::plan::{self, Plan};
use tidyfs::planner::{FallbackPlanner, HttpPlanner, Planner, PlannerOutput};
use tidyfs::progress::{JobStage, LatestSink, Progress, ProgressSink};
use tidyfs::rules::{self, Rule, RuleAction, RuleStore};
use tidyfs::scanner::{ScanResult, Scanner};
use tidyfs::tree::DigestNode;
use tidyfs::{Result, TidyError};

/// tidyfs CLI - local file organizer
#[derive(Parser, Debug)]
#[command(name = "tidyfs")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Scan, dedupe and reorganize local files with reversible moves", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "tidyfs.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan roots and index what was found
    Scan {
        /// Roots to scan (overrides config)
        roots: Vec<PathBuf>,

        /// Maximum recursion depth
        #[arg(long)]
        max_depth: Option<usize>,

        /// Maximum number of items across all roots
        #[arg(long)]
        max_items: Option<usize>,

        /// Include hidden files and folders
        #[arg(long)]
        include_hidden: bool,

        /// Also search for duplicate content
        #[arg(long)]
        dupes: bool,

        /// Write the planner digest to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Find files with identical content
    Dupes {
        /// Roots to search (overrides config)
        roots: Vec<PathBuf>,

        /// Turn every group into plan actions, keeping the first path
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,

        /// Archive folder for `--policy archive`
        #[arg(long)]
        archive: Option<PathBuf>,

        /// Where to write the resulting plan
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage classification rules
    Rules {
        #[command(subcommand)]
        action: RulesCommands,
    },

    /// Build a plan from rules, the planner and optional dedupe actions
    Plan {
        /// Roots to scan (overrides config)
        roots: Vec<PathBuf>,

        /// Scope keyword sent to the planner
        #[arg(long)]
        scope: Option<String>,

        /// Skip the remote planner and classify locally
        #[arg(long)]
        offline: bool,

        /// Fold duplicate resolution into the plan
        #[arg(long, value_enum)]
        dedupe: Option<PolicyArg>,

        /// Archive folder for `--dedupe archive`
        #[arg(long)]
        archive: Option<PathBuf>,

        /// Where to write the plan (default: <data_dir>/plan.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Dry-run and apply a plan, recording a snapshot
    Apply {
        /// Plan file (default: <data_dir>/plan.json)
        plan: Option<PathBuf>,

        /// What to do with conflicting destinations
        #[arg(long, value_enum, default_value = "rename")]
        on_conflict: ConflictArg,

        /// Only report conflicts
        #[arg(long)]
        dry_run: bool,

        /// Report the applied plan back to the planner
        #[arg(long)]
        commit: bool,
    },

    /// Revert a recorded snapshot
    Revert {
        /// Snapshot id
        id: String,
    },

    /// List recorded snapshots
    Snapshots {
        /// Maximum number to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Search the scan index
    Search {
        /// Name or path fragment
        query: String,

        /// Maximum results
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show planner, index and snapshot status
    Status,

    /// Initialize a new tidyfs workspace
    Init {
        /// Directory to initialize (default: current)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum RulesCommands {
    /// List rules in evaluation order
    List,

    /// Add a rule
    Add {
        /// Rule name
        #[arg(long)]
        name: String,

        /// Glob pattern (`*`, `?`, `**`)
        #[arg(long)]
        pattern: String,

        /// Destination folder (required unless --ignore)
        #[arg(long)]
        dest: Option<PathBuf>,

        /// Match against the full path instead of the file name
        #[arg(long)]
        full_path: bool,

        /// Leave matching files where they are
        #[arg(long)]
        ignore: bool,

        /// Add a yyyy subfolder
        #[arg(long)]
        year: bool,

        /// Add yyyy/yyyy-MM subfolders
        #[arg(long)]
        year_month: bool,

        /// Lower runs first
        #[arg(long, default_value = "100")]
        priority: i32,

        /// Limit the rule to these roots
        #[arg(long)]
        scope: Vec<PathBuf>,
    },

    /// Remove rules by name
    Remove {
        name: String,
    },

    /// Show what the rules would do to the given roots
    Test {
        roots: Vec<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "tidyfs.json")]
        output: PathBuf,
    },

    /// Validate configuration and rules
    Validate,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum PolicyArg {
    /// Move duplicates next to the kept copy
    Next,
    /// Replace duplicates with hardlinks to the kept copy
    Hardlink,
    /// Move duplicates into an archive folder
    Archive,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ConflictArg {
    Skip,
    Rename,
    Overwrite,
}

impl From<ConflictArg> for ConflictChoice {
    fn from(arg: ConflictArg) -> Self {
        match arg {
            ConflictArg::Skip => ConflictChoice::Skip,
            ConflictArg::Rename => ConflictChoice::Rename,
            ConflictArg::Overwrite => ConflictChoice::Overwrite,
        }
    }
}

/// Shared per-invocation settings
struct Ctx {
    config: AppConfig,
    config_path: PathBuf,
    json: bool,
    quiet: bool,
}

impl Ctx {
    fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.config.executor.progress_interval_ms)
    }

    /// Configured denylist that also keeps tidyfs' own files out of every walk
    fn denylist(&self) -> Result<SystemDenylist> {
        self.config.workspace_denylist(&self.config_path)
    }

    fn print<T: Serialize>(&self, value: &T, text: impl FnOnce()) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            text();
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::load(&cli.config)?;
    let ctx = Ctx {
        config,
        config_path: cli.config.clone(),
        json: cli.format == "json",
        quiet: cli.quiet,
    };

    let outcome = match cli.command {
        Commands::Scan { roots, max_depth, max_items, include_hidden, dupes, output } => {
            run_scan(&ctx, roots, max_depth, max_items, include_hidden, dupes, output).await
        }
        Commands::Dupes { roots, policy, archive, output } => {
            run_dupes(&ctx, roots, policy, archive, output).await
        }
        Commands::Rules { action } => run_rules(&ctx, action).await,
        Commands::Plan { roots, scope, offline, dedupe, archive, output } => {
            run_plan(&ctx, roots, scope, offline, dedupe, archive, output).await
        }
        Commands::Apply { plan, on_conflict, dry_run, commit } => {
            run_apply(&ctx, plan, on_conflict, dry_run, commit).await
        }
        Commands::Revert { id } => run_revert(&ctx, &id).await,
        Commands::Snapshots { limit } => run_snapshots(&ctx, limit),
        Commands::Search { query, limit } => run_search(&ctx, &query, limit),
        Commands::Config { action } => run_config_command(&ctx, action, &cli.config),
        Commands::Status => run_status(&ctx).await,
        Commands::Init { dir, force } => run_init(dir, force),
    };

    match outcome {
        Err(e) if e.is_cancelled() => {
            warn!("Cancelled");
            Ok(())
        }
        other => other,
    }
}

/// Run a blocking engine call off the async runtime, with Ctrl+C wired to
/// cancellation and the latest progress logged periodically.
async fn run_blocking<T, F>(quiet: bool, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn ProgressSink, &CancellationToken) -> Result<T> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let (sink, mut rx) = LatestSink::channel();

    let reporter = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let latest = rx.borrow_and_update().clone();
            if let Some(progress) = latest {
                if !quiet {
                    log_progress(&progress);
                }
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    });

    let on_signal = cancel.clone();
    let signals = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, cancelling...");
            on_signal.cancel();
        }
    });

    let worker_cancel = cancel.clone();
    let result = tokio::task::spawn_blocking(move || job(&sink, &worker_cancel))
        .await
        .map_err(|e| TidyError::InvalidState(format!("Worker failed: {}", e)))?;

    signals.abort();
    if let Err(e) = reporter.await {
        debug!("Progress reporter ended: {}", e);
    }
    result
}

fn log_progress(progress: &Progress) {
    let message = progress.message.as_deref().unwrap_or("");
    match progress.stage {
        JobStage::Applying | JobStage::Reverting => info!(
            "{:?}: {}/{} actions, {} errors - {}",
            progress.stage, progress.actions_done, progress.actions_total, progress.errors, message
        ),
        JobStage::Hashing => info!(
            "Hashing: {}/{} files ({:.0}%){}",
            progress.files_processed,
            progress.files_total,
            progress.stage_progress * 100.0,
            progress.eta.map(|eta| format!(", ~{}s left", eta.as_secs())).unwrap_or_default()
        ),
        _ => info!("{:?}: {}", progress.stage, message),
    }
}

async fn scan_roots(ctx: &Ctx, roots: &[PathBuf]) -> Result<ScanResult> {
    let options = ctx.config.scan_options(roots);
    let scanner = Scanner::new(ctx.denylist()?).with_progress_interval(ctx.progress_interval());
    run_blocking(ctx.quiet, move |sink, cancel| scanner.scan(&options, sink, cancel)).await
}

async fn find_duplicates(ctx: &Ctx, roots: &[PathBuf]) -> Result<DedupeReport> {
    let roots = if roots.is_empty() {
        ctx.config.roots.iter().map(PathBuf::from).collect()
    } else {
        roots.to_vec()
    };
    let finder = Deduplicator::new(ctx.denylist()?)
        .with_partial_bytes(ctx.config.dedupe.partial_bytes)
        .with_progress_interval(ctx.progress_interval());
    run_blocking(ctx.quiet, move |sink, cancel| finder.find_duplicates(&roots, sink, cancel)).await
}

fn dedupe_policy(policy: PolicyArg, archive: Option<PathBuf>) -> Result<DedupePolicy> {
    match policy {
        PolicyArg::Next => Ok(DedupePolicy::MoveNextToKept),
        PolicyArg::Hardlink => Ok(DedupePolicy::HardlinkToKept),
        PolicyArg::Archive => archive
            .map(DedupePolicy::MoveToArchive)
            .ok_or_else(|| TidyError::Config("--archive is required for the archive policy".to_string())),
    }
}

/// Keep the first path of every group
fn keep_first(report: &DedupeReport, policy: &DedupePolicy) -> DedupeResolution {
    let selections: Vec<DuplicateSelection> = report
        .groups
        .iter()
        .filter_map(|g| {
            g.paths.first().map(|kept| DuplicateSelection {
                group: g.clone(),
                kept: kept.clone(),
            })
        })
        .collect();
    resolve_duplicates(&selections, policy)
}

fn open_index(ctx: &Ctx) -> Option<IndexStore> {
    match IndexStore::open(ctx.config.index_path()) {
        Ok(index) => Some(index),
        Err(e) => {
            warn!("Index unavailable: {}", e);
            None
        }
    }
}

async fn run_scan(
    ctx: &Ctx,
    roots: Vec<PathBuf>,
    max_depth: Option<usize>,
    max_items: Option<usize>,
    include_hidden: bool,
    dupes: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut ctx_config = ctx.config.clone();
    if let Some(depth) = max_depth {
        ctx_config.scan.max_depth = depth;
    }
    if let Some(items) = max_items {
        ctx_config.scan.max_items = items;
    }
    ctx_config.scan.include_hidden |= include_hidden;
    let ctx = Ctx {
        config: ctx_config,
        config_path: ctx.config_path.clone(),
        json: ctx.json,
        quiet: ctx.quiet,
    };

    let mut result = scan_roots(&ctx, &roots).await?;
    if dupes && ctx.config.dedupe.enabled {
        let scanned: Vec<PathBuf> = ctx.config.scan_options(&roots).roots;
        result.duplicates = find_duplicates(&ctx, &scanned).await?.groups;
    }

    if let Some(index) = open_index(&ctx) {
        index.record_scan(&result, &ctx.config.scan_options(&roots).roots)?;
    }
    if let Some(path) = &output {
        std::fs::write(path, serde_json::to_string_pretty(&result.digest)?)?;
        info!("Digest written to {:?}", path);
    }

    #[derive(Serialize)]
    struct Summary<'a> {
        total_files: u64,
        total_dirs: u64,
        bytes: u64,
        truncated: bool,
        errors: u64,
        skipped: u64,
        duration_ms: u64,
        duplicates: &'a [tidyfs::dedupe::DuplicateGroup],
    }
    let summary = Summary {
        total_files: result.total_files,
        total_dirs: result.total_dirs,
        bytes: result.bytes_scanned,
        truncated: result.truncated,
        errors: result.errors,
        skipped: result.skipped,
        duration_ms: result.duration_ms,
        duplicates: &result.duplicates,
    };
    ctx.print(&summary, || {
        println!("Scan complete:");
        println!("  Files: {}", result.total_files);
        println!("  Directories: {}", result.total_dirs);
        println!("  Size: {}", human_bytes(result.bytes_scanned));
        println!("  Skipped: {}, errors: {}", result.skipped, result.errors);
        if result.truncated {
            println!("  Truncated: depth or item limit reached");
        }
        if dupes {
            println!("  Duplicate groups: {}", result.duplicates.len());
        }
    })
}

async fn run_dupes(
    ctx: &Ctx,
    roots: Vec<PathBuf>,
    policy: Option<PolicyArg>,
    archive: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let report = find_duplicates(ctx, &roots).await?;
    if let Some(index) = open_index(ctx) {
        index.record_duplicates(&report.groups)?;
    }

    ctx.print(&report, || {
        let wasted: u64 = report.groups.iter().map(|g| g.wasted_bytes()).sum();
        println!(
            "{} duplicate groups among {} files ({} reclaimable, {} unreadable)",
            report.groups.len(),
            report.files_enumerated,
            human_bytes(wasted),
            report.hash_failures
        );
        for group in &report.groups {
            println!("\n  {} x {} ({})", group.paths.len(), human_bytes(group.size_bytes), &group.hash[..group.hash.len().min(12)]);
            for (i, path) in group.paths.iter().enumerate() {
                let marker = if i == 0 { "*" } else { " " };
                println!("   {} {}", marker, path.display());
            }
        }
    })?;

    if let Some(policy) = policy {
        let policy = dedupe_policy(policy, archive)?;
        let resolution = keep_first(&report, &policy);
        let plan = plan::merge("dedupe", &rules::RuleEvaluation::default(), None, Some(&resolution));
        let path = output.unwrap_or_else(|| ctx.config.plan_path());
        save_plan(&plan, &path)?;
        if !ctx.quiet {
            println!("\nPlan with {} actions written to {:?}", plan.action_count(), path);
        }
    }
    Ok(())
}

async fn run_rules(ctx: &Ctx, action: RulesCommands) -> Result<()> {
    let store = RuleStore::new(ctx.config.rules_path());

    match action {
        RulesCommands::List => {
            let mut set = store.load();
            set.rules.sort_by_key(|r| r.priority);
            ctx.print(&set, || {
                if set.rules.is_empty() {
                    println!("No rules defined ({:?})", store.path());
                }
                for rule in &set.rules {
                    let target = match rule.action {
                        RuleAction::Ignore => "ignore".to_string(),
                        RuleAction::MoveToFolder => rule
                            .destination
                            .as_ref()
                            .map(|d| format!("-> {}", d.display()))
                            .unwrap_or_default(),
                    };
                    println!(
                        "  [{:>4}] {}{}: {} {}",
                        rule.priority,
                        rule.name,
                        if rule.enabled { "" } else { " (disabled)" },
                        rule.pattern,
                        target
                    );
                }
            })?;
        }
        RulesCommands::Add { name, pattern, dest, full_path, ignore, year, year_month, priority, scope } => {
            let mut rule = if ignore {
                Rule::ignore(&name, &pattern)
            } else {
                let dest = dest.ok_or_else(|| {
                    TidyError::InvalidRule(format!("rule '{}' needs --dest or --ignore", name))
                })?;
                Rule::move_to(&name, &pattern, dest)
            };
            rule.match_full_path = full_path;
            rule.group_by_year = year;
            rule.group_by_year_month = year_month;
            rule.priority = priority;
            rule.scopes = scope;

            let set = store.add(rule)?;
            println!("Added rule '{}' ({} rules)", name, set.rules.len());
        }
        RulesCommands::Remove { name } => {
            let removed = store.remove(&name)?;
            if removed == 0 {
                println!("No rule named '{}'", name);
            } else {
                println!("Removed {} rule(s) named '{}'", removed, name);
            }
        }
        RulesCommands::Test { roots } => {
            let scan = scan_roots(ctx, &roots).await?;
            let evaluation = rules::evaluate(&store.load(), &scan.root_tree);
            ctx.print(&evaluation, || {
                for mv in &evaluation.moves {
                    println!("  move   {} -> {}", mv.source.display(), mv.destination.display());
                }
                for path in &evaluation.ignored {
                    println!("  ignore {}", path.display());
                }
                println!(
                    "{} of {} files claimed by rules",
                    evaluation.claimed.len(),
                    scan.total_files
                );
            })?;
        }
    }
    Ok(())
}

/// Ask the remote planner, degrading to local classification when it fails
async fn request_plan(
    ctx: &Ctx,
    digest: &DigestNode,
    scope: &str,
    roots: &[PathBuf],
    offline: bool,
) -> Option<PlannerOutput> {
    let preferences = &ctx.config.planner.preferences;
    let fallback_root = ctx
        .config
        .planner
        .fallback_root
        .as_ref()
        .map(PathBuf::from)
        .or_else(|| roots.first().map(|r| r.join("Organized")));

    if !offline {
        let remote = match HttpPlanner::from_config(&ctx.config.planner) {
            Ok(planner) => planner.plan(digest, scope, preferences).await,
            Err(e) => Err(e),
        };
        match remote {
            Ok(output) => return Some(output),
            Err(e) => warn!("Planner unavailable, falling back to local classification: {}", e),
        }
    }

    let root = fallback_root?;
    info!("Classifying locally under {:?}", root);
    FallbackPlanner::new(root).plan(digest, scope, preferences).await.ok()
}

async fn run_plan(
    ctx: &Ctx,
    roots: Vec<PathBuf>,
    scope: Option<String>,
    offline: bool,
    dedupe: Option<PolicyArg>,
    archive: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let scan = scan_roots(ctx, &roots).await?;
    let scanned = ctx.config.scan_options(&roots).roots;

    let rule_set = RuleStore::new(ctx.config.rules_path()).load();
    let evaluation = rules::evaluate(&rule_set, &scan.root_tree);
    info!("Rules claimed {} files", evaluation.claimed.len());

    let scope = scope.unwrap_or_else(|| ctx.config.planner.scope.clone());
    let external = request_plan(ctx, &scan.digest, &scope, &scanned, offline).await;

    let resolution = match dedupe {
        Some(policy) => {
            let policy = dedupe_policy(policy, archive)?;
            let report = find_duplicates(ctx, &scanned).await?;
            Some(keep_first(&report, &policy))
        }
        None => None,
    };

    let merged = plan::merge(&scope, &evaluation, external.as_ref().map(|o| &o.plan), resolution.as_ref());
    let path = output.unwrap_or_else(|| ctx.config.plan_path());
    save_plan(&merged, &path)?;

    let overview = Overview::from_plan(&merged);
    ctx.print(&overview, || {
        if let Some(output) = &external {
            if !output.summary.is_empty() {
                println!("Planner: {}", output.summary);
            }
        }
        println!(
            "Plan {}: {} moves, {} hardlinks, {} empty folders",
            merged.id, overview.moves, overview.hardlinks, overview.delete_empty
        );
        for count in &overview.categories {
            println!("  {:<14} {}", count.category.as_str(), count.files);
        }
        println!("Saved to {:?}. Review it, then run `tidyfs apply`.", path);
    })
}

fn save_plan(plan: &Plan, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    plan.save(path)
}

async fn run_apply(
    ctx: &Ctx,
    plan_path: Option<PathBuf>,
    on_conflict: ConflictArg,
    dry_run: bool,
    commit: bool,
) -> Result<()> {
    let path = plan_path.unwrap_or_else(|| ctx.config.plan_path());
    let plan = Plan::load(&path).map_err(|e| TidyError::Config(format!("Cannot load plan {:?}: {}", path, e)))?;

    let mut executor = Executor::new().with_progress_interval(ctx.progress_interval());
    let conflicts = executor.dry_run(&plan, &CancellationToken::new())?;

    if !conflicts.is_empty() && !ctx.json {
        println!("{} conflict(s):", conflicts.len());
        for conflict in &conflicts {
            println!("  {}: {}", conflict.reason, conflict.destination.display());
        }
    }
    if dry_run {
        return ctx.print(&conflicts, || {
            println!("Dry run: {} actions, {} conflicts", plan.action_count(), conflicts.len());
        });
    }

    let resolutions = ConflictResolution::for_all(&conflicts, on_conflict.into());
    let job_plan = plan.clone();
    let report = run_blocking(ctx.quiet, move |sink, cancel| {
        Ok(executor.execute(&job_plan, &resolutions, sink, cancel))
    })
    .await?;

    let snapshot_path = if report.snapshot.is_empty() {
        None
    } else {
        Some(SnapshotStore::new(ctx.config.snapshots_dir()).save(&report.snapshot)?)
    };

    ctx.print(&report, || {
        println!(
            "{}: {} moved, {} linked, {} copied, {} folders removed, {} skipped, {} errors",
            if report.cancelled { "Cancelled" } else { "Applied" },
            report.moved,
            report.linked,
            report.copied,
            report.directories_removed,
            report.skipped,
            report.errors
        );
        for failure in &report.failures {
            println!("  failed: {} ({})", failure.path.display(), failure.message);
        }
        if snapshot_path.is_some() {
            println!("Snapshot {} recorded. Undo with `tidyfs revert {}`", report.snapshot.id, report.snapshot.id);
        }
    })?;

    if commit && !report.cancelled {
        match HttpPlanner::from_config(&ctx.config.planner) {
            Ok(planner) => {
                if let Err(e) = planner.commit(&plan).await {
                    warn!("Commit to planner failed: {}", e);
                }
            }
            Err(e) => warn!("Planner unavailable: {}", e),
        }
    }
    Ok(())
}

async fn run_revert(ctx: &Ctx, id: &str) -> Result<()> {
    let snapshot = SnapshotStore::new(ctx.config.snapshots_dir()).get(id)?;
    let mut executor = Executor::new().with_progress_interval(ctx.progress_interval());
    let report = run_blocking(ctx.quiet, move |sink, cancel| Ok(executor.revert(&snapshot, sink, cancel))).await?;

    ctx.print(&report, || {
        println!(
            "Reverted: {} restored, {} links removed, {} folders removed, {} failures",
            report.restored,
            report.links_removed,
            report.directories_removed,
            report.failures.len()
        );
        for failure in &report.failures {
            println!("  failed: {} ({})", failure.path.display(), failure.message);
        }
    })
}

fn run_snapshots(ctx: &Ctx, limit: usize) -> Result<()> {
    let mut snapshots = SnapshotStore::new(ctx.config.snapshots_dir()).list()?;
    snapshots.truncate(limit);
    ctx.print(&snapshots, || {
        if snapshots.is_empty() {
            println!("No snapshots recorded");
        }
        for s in &snapshots {
            println!(
                "  {}  {}  {} moves, {} links, {} folders",
                s.timestamp.format("%Y-%m-%d %H:%M"),
                s.id,
                s.reverse_moves.len(),
                s.created_hardlinks.len(),
                s.created_directories.len()
            );
        }
    })
}

fn run_search(ctx: &Ctx, query: &str, limit: usize) -> Result<()> {
    let index = IndexStore::open(ctx.config.index_path())?;
    let results = index.search(query, limit)?;
    ctx.print(&results, || {
        println!("Search results for '{}':", query);
        for file in &results {
            println!("  {:<14} {:>10}  {}", file.category, human_bytes(file.size_bytes), file.path.display());
        }
    })
}

fn run_config_command(ctx: &Ctx, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(&ctx.config)?);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            ctx.denylist()?;
            let rules = RuleStore::new(ctx.config.rules_path()).try_load()?;
            rules.validate()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Roots: {:?}", ctx.config.roots);
            println!("  Planner: {}", ctx.config.planner.url);
            println!("  Rules: {}", rules.rules.len());
            println!("  Data dir: {}", ctx.config.storage.data_dir);
        }
    }
    Ok(())
}

async fn run_status(ctx: &Ctx) -> Result<()> {
    println!("tidyfs v{} Status", env!("CARGO_PKG_VERSION"));
    println!("==================");

    match HttpPlanner::from_config(&ctx.config.planner) {
        Ok(planner) => match planner.health_check().await {
            Ok(()) => println!("Planner: Running ({})", planner.base_url()),
            Err(e) => println!("Planner: Error - {}", e),
        },
        Err(e) => println!("Planner: Error - {}", e),
    }

    match IndexStore::open(ctx.config.index_path()) {
        Ok(index) => {
            let stats = index.stats()?;
            println!("\nIndex ({:?}):", ctx.config.index_path());
            println!("  Files: {}", stats.file_count);
            println!("  Size: {}", human_bytes(stats.total_bytes.max(0) as u64));
            println!("  Duplicate groups: {} ({} reclaimable)", stats.duplicate_groups, human_bytes(stats.wasted_bytes.max(0) as u64));
            match stats.last_scan {
                Some(at) => println!(
                    "  Last scan: {}{}",
                    at.format("%Y-%m-%d %H:%M"),
                    if stats.last_scan_truncated { " (truncated)" } else { "" }
                ),
                None => println!("  Last scan: never"),
            }
        }
        Err(e) => println!("\nIndex: Error - {}", e),
    }

    let snapshots = SnapshotStore::new(ctx.config.snapshots_dir()).list()?;
    let rules = RuleStore::new(ctx.config.rules_path()).load();
    println!("\nSnapshots: {}", snapshots.len());
    println!("Rules: {} ({} enabled)", rules.rules.len(), rules.rules.iter().filter(|r| r.enabled).count());
    println!("Roots: {:?}", ctx.config.roots);
    Ok(())
}

fn run_init(dir: Option<PathBuf>, force: bool) -> Result<()> {
    let target = dir.unwrap_or_else(|| PathBuf::from("."));
    let config_path = target.join("tidyfs.json");

    if config_path.exists() && !force {
        return Err(TidyError::Config(
            "tidyfs.json already exists. Use --force to overwrite".to_string(),
        ));
    }

    let data_dir = target.join(".tidyfs");
    std::fs::create_dir_all(data_dir.join("snapshots"))?;

    let mut config = AppConfig::default();
    config.roots = vec![target.to_string_lossy().into_owned()];
    config.storage.data_dir = data_dir.to_string_lossy().into_owned();
    config.save(&config_path)?;

    let rules = RuleStore::new(config.rules_path());
    if !rules.path().exists() {
        let mut example = Rule::move_to("PDFs by year", "*.pdf", target.join("Documents"));
        example.group_by_year = true;
        example.enabled = false;
        rules.save(&rules::RuleSet { rules: vec![example] })?;
    }

    println!("tidyfs initialized in {:?}", target);
    println!("\nCreated:");
    println!("  - tidyfs.json");
    println!("  - .tidyfs/rules.json");
    println!("  - .tidyfs/snapshots/");
    println!("\nNext steps:");
    println!("  1. Scan: tidyfs scan --dupes");
    println!("  2. Plan: tidyfs plan");
    println!("  3. Apply: tidyfs apply");

    Ok(())
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
