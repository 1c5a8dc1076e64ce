// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for tidyfs

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::guard::{absolute, SystemDenylist};
use crate::planner::PlanPreferences;
use crate::scanner::ScanOptions;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Default roots to scan
    #[serde(default)]
    pub roots: Vec<String>,

    /// Scanner limits
    #[serde(default)]
    pub scan: ScanConfig,

    /// Protected paths and exclusion patterns
    #[serde(default)]
    pub guard: GuardConfig,

    /// External planner settings
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Duplicate detection settings
    #[serde(default)]
    pub dedupe: DedupeConfig,

    /// Executor settings
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Where rules, snapshots and the index live
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GuardConfig {
    #[serde(default = "default_system_paths")]
    pub system_paths: Vec<String>,
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlannerConfig {
    #[serde(default = "default_planner_url")]
    pub url: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default)]
    pub preferences: PlanPreferences,
    /// Destination root used by the local fallback classifier
    #[serde(default)]
    pub fallback_root: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DedupeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_partial_bytes")]
    pub partial_bytes: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExecutorConfig {
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

// Default value functions
fn default_max_depth() -> usize { 6 }
fn default_max_items() -> usize { 50_000 }
fn default_max_file_size() -> u64 { 2 * 1024 * 1024 * 1024 }
fn default_planner_url() -> String { "http://localhost:5080".to_string() }
fn default_scope() -> String { "organize".to_string() }
fn default_timeout() -> u64 { 120 }
fn default_retries() -> u32 { 3 }
fn default_true() -> bool { true }
fn default_partial_bytes() -> u64 { crate::dedupe::PARTIAL_HASH_BYTES }
fn default_progress_interval() -> u64 { 100 }
fn default_data_dir() -> String { ".tidyfs".to_string() }

fn default_system_paths() -> Vec<String> {
    [
        "/System/", "/Library/", "/bin/", "/sbin/", "/usr/", "/etc/", "/private/",
        "/proc/", "/sys/", "/dev/",
        "C:/Windows", "C:/Program Files", "C:/Program Files (x86)",
        "C:/Users/All Users", "C:/ProgramData",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_exclude_patterns() -> Vec<String> {
    [
        "*.tmp", "*.part", "*.crdownload", "*.partial", "*.download",
        "desktop.ini", "thumbs.db", ".ds_store",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            scan: ScanConfig::default(),
            guard: GuardConfig::default(),
            planner: PlannerConfig::default(),
            dedupe: DedupeConfig::default(),
            executor: ExecutorConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_items: default_max_items(),
            include_hidden: false,
            follow_symlinks: false,
            max_file_size_bytes: default_max_file_size(),
        }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            system_paths: default_system_paths(),
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            url: default_planner_url(),
            scope: default_scope(),
            timeout_secs: default_timeout(),
            retries: default_retries(),
            preferences: PlanPreferences::default(),
            fallback_root: None,
        }
    }
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            partial_bytes: default_partial_bytes(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: default_progress_interval(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::TidyError::Config(format!("Failed to parse config: {}", e)))?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Build the injected denylist from the guard section
    pub fn denylist(&self) -> crate::Result<SystemDenylist> {
        SystemDenylist::new(&self.guard.system_paths, &self.guard.exclude_patterns)
    }

    /// The denylist plus the config file and data directory themselves, so a
    /// plan never moves the files tidyfs reads and writes
    pub fn workspace_denylist(&self, config_path: &Path) -> crate::Result<SystemDenylist> {
        let mut denylist = self.denylist()?;
        for own in [config_path.to_path_buf(), self.data_dir()] {
            denylist.protect(&absolute(&own)?);
        }
        Ok(denylist)
    }

    /// Scan options for the given roots, or the configured defaults if empty
    pub fn scan_options(&self, roots: &[PathBuf]) -> ScanOptions {
        let roots = if roots.is_empty() {
            self.roots.iter().map(PathBuf::from).collect()
        } else {
            roots.to_vec()
        };
        ScanOptions {
            roots,
            max_depth: self.scan.max_depth,
            max_items: self.scan.max_items,
            include_hidden: self.scan.include_hidden,
            follow_symlinks: self.scan.follow_symlinks,
            max_file_size_bytes: self.scan.max_file_size_bytes,
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.data_dir)
    }

    pub fn rules_path(&self) -> PathBuf {
        self.data_dir().join("rules.json")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir().join("snapshots")
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir().join("index.db")
    }

    /// Default location of the last generated plan
    pub fn plan_path(&self) -> PathBuf {
        self.data_dir().join("plan.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.scan.max_depth, 6);
        assert_eq!(config.scan.max_items, 50_000);
        assert_eq!(config.dedupe.partial_bytes, 256 * 1024);
        assert!(config.planner.preferences.group_by_type);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"roots": ["/home/me"], "scan": {"max_depth": 2}}"#).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.roots, vec!["/home/me".to_string()]);
        assert_eq!(config.scan.max_depth, 2);
        assert_eq!(config.scan.max_items, 50_000);
        assert!(!config.guard.system_paths.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.planner.url = "http://planner.local".to_string();
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.planner.url, "http://planner.local");
    }

    #[test]
    fn test_workspace_files_are_never_scanned() {
        use crate::progress::SilentSink;
        use crate::scanner::Scanner;
        use tokio_util::sync::CancellationToken;

        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tidyfs.json");
        let mut config = AppConfig::default();
        config.storage.data_dir = dir.path().join(".tidyfs").to_string_lossy().into_owned();
        config.scan.include_hidden = true;
        config.save(&config_path).unwrap();
        std::fs::create_dir_all(config.snapshots_dir()).unwrap();
        std::fs::write(config.plan_path(), "{}").unwrap();
        std::fs::write(dir.path().join("photo.jpg"), b"jpg").unwrap();

        let denylist = config.workspace_denylist(&config_path).unwrap();
        let result = Scanner::new(denylist)
            .scan(
                &config.scan_options(&[dir.path().to_path_buf()]),
                &SilentSink,
                &CancellationToken::new(),
            )
            .unwrap();

        let files: Vec<_> = result.root_tree.files().iter().map(|f| f.name.clone()).collect();
        assert_eq!(files, vec!["photo.jpg".to_string()]);
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(crate::TidyError::Config(_))));
    }
}
