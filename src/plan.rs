// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Reorganization plans and the merge of rule, planner and dedupe output

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::dedupe::DedupeResolution;
use crate::rules::RuleEvaluation;

/// Move a file from `source` to `destination`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveOp {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl MoveOp {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

/// Replace `link_path` with a hardlink to the existing `target`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardlinkOp {
    pub link_path: PathBuf,
    pub target: PathBuf,
}

/// An ordered set of filesystem changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub scope: String,
    #[serde(default)]
    pub moves: Vec<MoveOp>,
    #[serde(default)]
    pub delete_empty: Vec<PathBuf>,
    #[serde(default)]
    pub hardlinks: Vec<HardlinkOp>,
}

impl Plan {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            scope: scope.into(),
            moves: Vec::new(),
            delete_empty: Vec::new(),
            hardlinks: Vec::new(),
        }
    }

    pub fn action_count(&self) -> usize {
        self.moves.len() + self.hardlinks.len() + self.delete_empty.len()
    }

    pub fn is_empty(&self) -> bool {
        self.action_count() == 0
    }

    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> crate::Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Combine rule moves, external planner moves and approved dedupe actions.
///
/// Rule moves are taken unconditionally. Planner moves whose source was
/// claimed by a rule (compared case-insensitively) are dropped, so rules
/// always take precedence over the external planner.
pub fn merge(
    scope: &str,
    rules: &RuleEvaluation,
    external: Option<&Plan>,
    dedupe: Option<&DedupeResolution>,
) -> Plan {
    let mut plan = Plan::new(scope);
    plan.moves.extend(rules.moves.iter().cloned());

    if let Some(external) = external {
        let before = external.moves.len();
        plan.moves.extend(
            external
                .moves
                .iter()
                .filter(|m| !rules.is_claimed(&m.source))
                .cloned(),
        );
        let dropped = before - (plan.moves.len() - rules.moves.len());
        if dropped > 0 {
            debug!("Dropped {} planner moves for rule-claimed sources", dropped);
        }
        plan.delete_empty.extend(external.delete_empty.iter().cloned());
        plan.hardlinks.extend(external.hardlinks.iter().cloned());
        if !external.scope.is_empty() {
            plan.scope = external.scope.clone();
        }
    }

    if let Some(dedupe) = dedupe {
        plan.moves.extend(dedupe.moves.iter().cloned());
        plan.hardlinks.extend(dedupe.hardlinks.iter().cloned());
    }

    info!(
        "Merged plan: {} moves, {} hardlinks, {} empty-dir deletions",
        plan.moves.len(),
        plan.hardlinks.len(),
        plan.delete_empty.len()
    );
    plan
}

/// Reserve `desired` within `seen`, appending `" (n)"` before the extension
/// until the name is free. Comparison is case-insensitive.
pub fn unique_in_batch(seen: &mut HashSet<String>, desired: PathBuf) -> PathBuf {
    if seen.insert(key(&desired)) {
        return desired;
    }
    let mut n = 1;
    loop {
        let candidate = numbered(&desired, n);
        if seen.insert(key(&candidate)) {
            return candidate;
        }
        n += 1;
    }
}

/// `dir/name (n).ext`
pub fn numbered(path: &Path, n: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{} ({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{} ({})", stem, n),
    };
    path.with_file_name(name)
}

fn key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluation() -> RuleEvaluation {
        let mut eval = RuleEvaluation::default();
        eval.record_move(MoveOp::new("/home/me/Report.pdf", "/home/me/Docs/Report.pdf"));
        eval.record_ignore(PathBuf::from("/home/me/keep.txt"));
        eval
    }

    #[test]
    fn test_rules_take_precedence_over_planner() {
        let mut external = Plan::new("organize");
        external.moves.push(MoveOp::new("/home/me/report.PDF", "/home/me/Other/report.pdf"));
        external.moves.push(MoveOp::new("/home/me/KEEP.txt", "/home/me/Text/keep.txt"));
        external.moves.push(MoveOp::new("/home/me/photo.jpg", "/home/me/Images/photo.jpg"));
        external.delete_empty.push(PathBuf::from("/home/me/old"));

        let plan = merge("organize", &evaluation(), Some(&external), None);

        let sources: Vec<_> = plan.moves.iter().map(|m| m.source.clone()).collect();
        assert_eq!(
            sources,
            vec![PathBuf::from("/home/me/Report.pdf"), PathBuf::from("/home/me/photo.jpg")]
        );
        assert_eq!(plan.delete_empty, vec![PathBuf::from("/home/me/old")]);
    }

    #[test]
    fn test_merge_without_planner_keeps_rule_moves() {
        let plan = merge("organize", &evaluation(), None, None);
        assert_eq!(plan.moves.len(), 1);
        assert!(plan.hardlinks.is_empty());
    }

    #[test]
    fn test_dedupe_actions_folded_in() {
        let dedupe = DedupeResolution {
            moves: vec![MoveOp::new("/d/b.txt", "/archive/b.txt")],
            hardlinks: vec![HardlinkOp { link_path: "/d/c.txt".into(), target: "/d/a.txt".into() }],
        };
        let plan = merge("organize", &RuleEvaluation::default(), None, Some(&dedupe));
        assert_eq!(plan.moves.len(), 1);
        assert_eq!(plan.hardlinks.len(), 1);
        assert_eq!(plan.action_count(), 2);
    }

    #[test]
    fn test_numbered_names() {
        assert_eq!(numbered(Path::new("/d/x.txt"), 1), PathBuf::from("/d/x (1).txt"));
        assert_eq!(numbered(Path::new("/d/Makefile"), 2), PathBuf::from("/d/Makefile (2)"));
        assert_eq!(numbered(Path::new("/d/a.tar.gz"), 1), PathBuf::from("/d/a.tar (1).gz"));
    }

    #[test]
    fn test_unique_in_batch_is_case_insensitive() {
        let mut seen = HashSet::new();
        assert_eq!(unique_in_batch(&mut seen, "/d/A.txt".into()), PathBuf::from("/d/A.txt"));
        assert_eq!(unique_in_batch(&mut seen, "/d/a.TXT".into()), PathBuf::from("/d/a (1).TXT"));
    }
}
