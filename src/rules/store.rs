// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Persistence for the rule set

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{Rule, RuleSet};
use crate::{Result, TidyError};

/// Rule set stored as a single pretty-printed JSON document
pub struct RuleStore {
    path: PathBuf,
}

impl RuleStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load the rule set. A missing or unreadable file yields an empty set.
    pub fn load(&self) -> RuleSet {
        match self.try_load() {
            Ok(set) => set,
            Err(e) => {
                tracing::warn!("Failed to read rules from {:?}: {}", self.path, e);
                RuleSet::default()
            }
        }
    }

    /// Load the rule set, failing on anything but a missing file
    pub fn try_load(&self) -> Result<RuleSet> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RuleSet::default()),
            Err(e) => return Err(TidyError::at(&self.path, e)),
        };
        serde_json::from_str(&content).map_err(|e| {
            TidyError::InvalidRule(format!("{:?} is not a valid rule file: {}", self.path, e))
        })
    }

    pub fn save(&self, rules: &RuleSet) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_string_pretty(rules)?)?;
        Ok(())
    }

    /// Validate and append a rule. An unreadable rule file is left untouched.
    pub fn add(&self, rule: Rule) -> Result<RuleSet> {
        rule.validate()?;
        let mut set = self.try_load()?;
        set.rules.push(rule);
        self.save(&set)?;
        Ok(set)
    }

    /// Remove every rule called `name`; returns how many were removed
    pub fn remove(&self, name: &str) -> Result<usize> {
        let mut set = self.try_load()?;
        let before = set.rules.len();
        set.rules.retain(|r| r.name != name);
        let removed = before - set.rules.len();
        if removed > 0 {
            self.save(&set)?;
        }
        Ok(removed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuleStore::new(dir.path().join("rules.json"));
        assert!(store.load().rules.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        fs::write(&path, "[[[").unwrap();
        assert!(RuleStore::new(path).load().rules.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        let hand_edited = r#"{"rules": [
            {"name": "a", "pattern": "*.pdf", "destination": "Docs"},
            {"name": "b", "pattern": "*.jpg", "destination": "Pictures"},
        ]}"#;
        fs::write(&path, hand_edited).unwrap();
        let store = RuleStore::new(path.clone());

        assert!(matches!(store.try_load(), Err(TidyError::InvalidRule(_))));
        assert!(store.add(Rule::move_to("c", "*.mp3", "Music")).is_err());
        assert!(store.remove("a").is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), hand_edited);
    }

    #[test]
    fn test_try_load_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuleStore::new(dir.path().join("rules.json"));
        assert!(store.try_load().unwrap().rules.is_empty());
    }

    #[test]
    fn test_add_remove_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuleStore::new(dir.path().join("nested").join("rules.json"));

        store.add(Rule::move_to("pdfs", "*.pdf", "Docs")).unwrap();
        store.add(Rule::ignore("tmp", "*.tmp")).unwrap();
        assert_eq!(store.load().rules.len(), 2);

        assert_eq!(store.remove("pdfs").unwrap(), 1);
        assert_eq!(store.remove("pdfs").unwrap(), 0);
        let rules = store.load().rules;
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "tmp");
    }

    #[test]
    fn test_add_rejects_invalid_rule() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuleStore::new(dir.path().join("rules.json"));
        let mut rule = Rule::move_to("bad", "*.pdf", "Docs");
        rule.destination = None;
        assert!(store.add(rule).is_err());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_minimal_json_gets_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        fs::write(&path, r#"{"rules": [{"pattern": "*.jpg", "destination": "Pictures"}]}"#).unwrap();

        let rules = RuleStore::new(path).load().rules;
        assert_eq!(rules[0].name, "New Rule");
        assert_eq!(rules[0].priority, 100);
        assert!(rules[0].enabled);
    }
}
