// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! User-authored classification rules
//!
//! Enabled rules are tried in ascending priority order; the first rule that
//! matches a file decides what happens to it. Directories are only recursed
//! into, never matched.

pub mod glob;
pub mod store;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::guard::{absolute, is_under};
use crate::plan::MoveOp;
use crate::tree::FileTreeNode;
use crate::{Result, TidyError};

pub use self::glob::GlobMatcher;
pub use self::store::RuleStore;

/// What a matching rule does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleAction {
    MoveToFolder,
    Ignore,
}

/// A single classification rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default = "default_rule_name")]
    pub name: String,
    /// Glob on the file name, or on the full path with `match_full_path`
    pub pattern: String,
    #[serde(default)]
    pub match_full_path: bool,
    #[serde(default = "default_action")]
    pub action: RuleAction,
    /// Required for `MoveToFolder`
    #[serde(default)]
    pub destination: Option<PathBuf>,
    /// Adds a `yyyy` subfolder
    #[serde(default)]
    pub group_by_year: bool,
    /// Adds `yyyy/yyyy-MM` subfolders; wins over `group_by_year`
    #[serde(default)]
    pub group_by_year_month: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lower runs first
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Roots this rule is limited to; empty means everywhere
    #[serde(default)]
    pub scopes: Vec<PathBuf>,
}

fn default_rule_name() -> String { "New Rule".to_string() }
fn default_action() -> RuleAction { RuleAction::MoveToFolder }
fn default_true() -> bool { true }
fn default_priority() -> i32 { 100 }

impl Rule {
    pub fn move_to(name: &str, pattern: &str, destination: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            match_full_path: false,
            action: RuleAction::MoveToFolder,
            destination: Some(destination.into()),
            group_by_year: false,
            group_by_year_month: false,
            enabled: true,
            priority: default_priority(),
            scopes: Vec::new(),
        }
    }

    pub fn ignore(name: &str, pattern: &str) -> Self {
        Self {
            action: RuleAction::Ignore,
            destination: None,
            ..Self::move_to(name, pattern, PathBuf::new())
        }
    }

    pub fn validate(&self) -> Result<()> {
        GlobMatcher::new(&self.pattern)?;
        if self.action == RuleAction::MoveToFolder
            && self.destination.as_ref().map_or(true, |d| d.as_os_str().is_empty())
        {
            return Err(TidyError::InvalidRule(format!(
                "rule '{}' moves files but has no destination",
                self.name
            )));
        }
        Ok(())
    }

    /// Destination folder plus optional date subfolders and the file name
    fn destination_for(&self, file: &FileTreeNode) -> Option<PathBuf> {
        let mut dest = self.destination.clone()?;
        if self.group_by_year_month {
            dest.push(file.created_utc.format("%Y").to_string());
            dest.push(file.created_utc.format("%Y-%m").to_string());
        } else if self.group_by_year {
            dest.push(file.created_utc.format("%Y").to_string());
        }
        dest.push(&file.name);
        Some(dest)
    }
}

/// An ordered collection of rules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn validate(&self) -> Result<()> {
        self.rules.iter().try_for_each(Rule::validate)
    }
}

/// Result of running a rule set over a tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleEvaluation {
    pub moves: Vec<MoveOp>,
    /// Lower-cased source paths consumed by a rule
    pub claimed: HashSet<String>,
    pub ignored: Vec<PathBuf>,
}

impl RuleEvaluation {
    pub fn record_move(&mut self, op: MoveOp) {
        self.claimed.insert(claim_key(&op.source));
        self.moves.push(op);
    }

    pub fn record_ignore(&mut self, source: PathBuf) {
        self.claimed.insert(claim_key(&source));
        self.ignored.push(source);
    }

    pub fn is_claimed(&self, source: &Path) -> bool {
        self.claimed.contains(&claim_key(source))
    }
}

/// Case-folded absolute form, so relative and absolute spellings of one file collide
fn claim_key(path: &Path) -> String {
    absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_lowercase()
}

/// A rule with its compiled pattern and absolute scopes
struct CompiledRule<'a> {
    rule: &'a Rule,
    matcher: GlobMatcher,
    scopes: Vec<PathBuf>,
}

impl<'a> CompiledRule<'a> {
    fn new(rule: &'a Rule, matcher: GlobMatcher) -> Self {
        let scopes = rule
            .scopes
            .iter()
            .map(|scope| absolute(scope).unwrap_or_else(|_| scope.clone()))
            .collect();
        Self { rule, matcher, scopes }
    }

    fn in_scope(&self, path: &Path) -> bool {
        self.scopes.is_empty() || self.scopes.iter().any(|scope| is_under(path, scope))
    }

    fn matches(&self, file: &FileTreeNode) -> bool {
        if !self.in_scope(&file.path) {
            return false;
        }
        if self.rule.match_full_path {
            self.matcher.is_match(&file.path.to_string_lossy())
        } else {
            self.matcher.is_match(&file.name)
        }
    }
}

/// Evaluate `rules` over every file below `root`
pub fn evaluate(rules: &RuleSet, root: &FileTreeNode) -> RuleEvaluation {
    let mut active: Vec<&Rule> = rules.rules.iter().filter(|r| r.enabled).collect();
    active.sort_by_key(|r| r.priority);

    let compiled: Vec<CompiledRule> = active
        .into_iter()
        .filter_map(|rule| match rule.validate().and_then(|_| GlobMatcher::new(&rule.pattern)) {
            Ok(matcher) => Some(CompiledRule::new(rule, matcher)),
            Err(e) => {
                warn!("Skipping rule '{}': {}", rule.name, e);
                None
            }
        })
        .collect();

    let mut eval = RuleEvaluation::default();
    walk(root, &compiled, &mut eval);
    debug!(
        "Rules claimed {} files ({} moves, {} ignored)",
        eval.claimed.len(),
        eval.moves.len(),
        eval.ignored.len()
    );
    eval
}

fn walk(node: &FileTreeNode, rules: &[CompiledRule], eval: &mut RuleEvaluation) {
    for child in &node.children {
        if child.is_directory {
            walk(child, rules, eval);
            continue;
        }

        let Some(rule) = rules.iter().find(|r| r.matches(child)) else {
            continue;
        };
        match rule.rule.action {
            RuleAction::Ignore => eval.record_ignore(child.path.clone()),
            RuleAction::MoveToFolder => {
                if let Some(dest) = rule.rule.destination_for(child) {
                    eval.record_move(MoveOp::new(child.path.clone(), dest));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn tree(files: &[(&str, i32, u32)]) -> FileTreeNode {
        let mut dir = FileTreeNode::directory(PathBuf::from("/home/me"), Utc::now());
        for (path, year, month) in files {
            let created = Utc.with_ymd_and_hms(*year, *month, 15, 12, 0, 0).unwrap();
            dir.children.push(FileTreeNode::file(PathBuf::from(path), 1, created));
        }
        let mut root = FileTreeNode::root();
        root.children.push(dir);
        root
    }

    #[test]
    fn test_group_by_year() {
        let mut rule = Rule::move_to("pdfs", "*.pdf", "Docs");
        rule.group_by_year = true;
        let rules = RuleSet { rules: vec![rule] };

        let eval = evaluate(&rules, &tree(&[("/home/me/report.pdf", 2023, 4)]));
        assert_eq!(eval.moves.len(), 1);
        assert_eq!(eval.moves[0].destination, PathBuf::from("Docs/2023/report.pdf"));
        assert!(eval.is_claimed(Path::new("/HOME/ME/REPORT.PDF")));
    }

    #[test]
    fn test_year_month_wins_over_year() {
        let mut rule = Rule::move_to("pdfs", "*.pdf", "Docs");
        rule.group_by_year = true;
        rule.group_by_year_month = true;
        let rules = RuleSet { rules: vec![rule] };

        let eval = evaluate(&rules, &tree(&[("/home/me/report.pdf", 2023, 4)]));
        assert_eq!(eval.moves[0].destination, PathBuf::from("Docs/2023/2023-04/report.pdf"));
    }

    #[test]
    fn test_lowest_priority_wins() {
        let mut late = Rule::move_to("late", "*.pdf", "Late");
        late.priority = 50;
        let mut early = Rule::move_to("early", "report*", "Early");
        early.priority = 10;
        let rules = RuleSet { rules: vec![late, early] };

        let eval = evaluate(&rules, &tree(&[("/home/me/report.pdf", 2023, 1)]));
        assert_eq!(eval.moves.len(), 1);
        assert_eq!(eval.moves[0].destination, PathBuf::from("Early/report.pdf"));
    }

    #[test]
    fn test_ignore_claims_without_moving() {
        let mut ignore = Rule::ignore("keep", "*.txt");
        ignore.priority = 1;
        let rules = RuleSet { rules: vec![ignore, Rule::move_to("all", "*", "Misc")] };

        let eval = evaluate(&rules, &tree(&[("/home/me/a.txt", 2023, 1), ("/home/me/b.jpg", 2023, 1)]));
        assert_eq!(eval.ignored, vec![PathBuf::from("/home/me/a.txt")]);
        assert_eq!(eval.moves.len(), 1);
        assert_eq!(eval.claimed.len(), 2);
    }

    #[test]
    fn test_disabled_and_out_of_scope_rules_skipped() {
        let mut disabled = Rule::move_to("off", "*", "Off");
        disabled.enabled = false;
        let mut scoped = Rule::move_to("scoped", "*", "Scoped");
        scoped.scopes = vec![PathBuf::from("/elsewhere")];
        let rules = RuleSet { rules: vec![disabled, scoped] };

        let eval = evaluate(&rules, &tree(&[("/home/me/a.txt", 2023, 1)]));
        assert!(eval.moves.is_empty());
        assert!(eval.claimed.is_empty());
    }

    #[test]
    fn test_full_path_matching() {
        let mut rule = Rule::move_to("invoices", "**/invoices/*", "Finance");
        rule.match_full_path = true;
        let rules = RuleSet { rules: vec![rule] };

        let eval = evaluate(
            &rules,
            &tree(&[("/home/me/invoices/jan.pdf", 2023, 1), ("/home/me/jan.pdf", 2023, 1)]),
        );
        assert_eq!(eval.moves.len(), 1);
        assert_eq!(eval.moves[0].source, PathBuf::from("/home/me/invoices/jan.pdf"));
    }

    #[test]
    fn test_directories_never_matched() {
        let mut root = FileTreeNode::root();
        let mut dir = FileTreeNode::directory(PathBuf::from("/home/me/project.pdf"), Utc::now());
        dir.children.push(FileTreeNode::file(PathBuf::from("/home/me/project.pdf/inner.pdf"), 1, Utc::now()));
        root.children.push(dir);

        let eval = evaluate(&RuleSet { rules: vec![Rule::move_to("pdfs", "*.pdf", "Docs")] }, &root);
        assert_eq!(eval.moves.len(), 1);
        assert_eq!(eval.moves[0].source, PathBuf::from("/home/me/project.pdf/inner.pdf"));
    }

    #[test]
    fn test_move_rule_without_destination_is_invalid() {
        let mut rule = Rule::move_to("bad", "*.pdf", "");
        assert!(rule.validate().is_err());
        rule.destination = None;
        assert!(rule.validate().is_err());
        assert!(Rule::ignore("ok", "*.tmp").validate().is_ok());
    }
}
