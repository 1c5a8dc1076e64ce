// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! External planner client and the offline fallback classifier

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::categories::category_for;
use crate::config::PlannerConfig;
use crate::plan::{unique_in_batch, HardlinkOp, MoveOp, Plan};
use crate::tree::DigestNode;
use crate::{Result, TidyError};

/// Layout hints passed to the planner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanPreferences {
    #[serde(default = "default_true")]
    pub group_by_type: bool,
    #[serde(default)]
    pub group_by_date: bool,
    #[serde(default)]
    pub group_by_project: bool,
    #[serde(default = "default_true")]
    pub keep_folder_names: bool,
    #[serde(default = "default_true")]
    pub flatten_small_folders: bool,
}

fn default_true() -> bool { true }

impl Default for PlanPreferences {
    fn default() -> Self {
        Self {
            group_by_type: true,
            group_by_date: false,
            group_by_project: false,
            keep_folder_names: true,
            flatten_small_folders: true,
        }
    }
}

/// A plan plus the planner's explanation of it
#[derive(Debug, Clone)]
pub struct PlannerOutput {
    pub plan: Plan,
    pub summary: String,
    pub rationale: HashMap<String, String>,
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        digest: &DigestNode,
        scope: &str,
        preferences: &PlanPreferences,
    ) -> Result<PlannerOutput>;
}

#[derive(Serialize)]
struct PlanRequest<'a> {
    roots: Vec<&'a DigestNode>,
    scope: &'a str,
    preferences: &'a PlanPreferences,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanResponse {
    plan_id: Option<String>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    moves: Vec<MoveDto>,
    #[serde(default)]
    delete_empty: Vec<String>,
    #[serde(default)]
    rationale_by_path: Option<HashMap<String, String>>,
    #[serde(default)]
    hardlinks: Option<Vec<HardlinkDto>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MoveDto {
    source: String,
    destination: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardlinkDto {
    link_path: String,
    target_existing_path: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommitRequest<'a> {
    plan_id: &'a str,
    summary: &'a str,
    moves: Vec<MoveDto>,
    delete_empty: Vec<String>,
    hardlinks: Vec<HardlinkDto>,
}

impl PlanResponse {
    fn into_output(self, scope: &str) -> PlannerOutput {
        let mut plan = Plan::new(if self.summary.trim().is_empty() { scope } else { self.summary.as_str() });
        if let Some(id) = self.plan_id {
            plan.id = id;
        }
        plan.moves = self
            .moves
            .into_iter()
            .map(|m| MoveOp::new(m.source, m.destination))
            .collect();
        plan.delete_empty = self.delete_empty.into_iter().map(PathBuf::from).collect();
        plan.hardlinks = self
            .hardlinks
            .unwrap_or_default()
            .into_iter()
            .map(|h| HardlinkOp {
                link_path: h.link_path.into(),
                target: h.target_existing_path.into(),
            })
            .collect();

        PlannerOutput {
            plan,
            summary: self.summary,
            rationale: self.rationale_by_path.unwrap_or_default(),
        }
    }
}

/// Remote planner reached over HTTP
pub struct HttpPlanner {
    client: Client,
    base_url: String,
    retries: u32,
    backoff: Duration,
}

impl HttpPlanner {
    pub fn new(base_url: &str, timeout: Duration, retries: u32) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retries,
            backoff: Duration::from_secs(1),
        })
    }

    pub fn from_config(config: &PlannerConfig) -> Result<Self> {
        Self::new(&config.url, Duration::from_secs(config.timeout_secs), config.retries)
    }

    /// Base delay before the first retry; doubles on each further attempt
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                TidyError::Planner(format!("Cannot connect to planner at {}: {}", self.base_url, e))
            })?;

        if !response.status().is_success() {
            return Err(TidyError::Planner(format!(
                "Planner health check returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn request_plan(&self, request: &PlanRequest<'_>) -> Result<PlanResponse> {
        let url = format!("{}/plan", self.base_url);
        debug!("Requesting plan from {}", url);

        let response = self.client.post(&url).json(request).send().await?;
        if !response.status().is_success() {
            return Err(TidyError::Planner(format!(
                "Planner returned status {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    /// Report the plan that was finally applied
    pub async fn commit(&self, plan: &Plan) -> Result<()> {
        let url = format!("{}/commit", self.base_url);
        let request = CommitRequest {
            plan_id: &plan.id,
            summary: &plan.scope,
            moves: plan
                .moves
                .iter()
                .map(|m| MoveDto {
                    source: m.source.to_string_lossy().into_owned(),
                    destination: m.destination.to_string_lossy().into_owned(),
                })
                .collect(),
            delete_empty: plan
                .delete_empty
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
            hardlinks: plan
                .hardlinks
                .iter()
                .map(|h| HardlinkDto {
                    link_path: h.link_path.to_string_lossy().into_owned(),
                    target_existing_path: h.target.to_string_lossy().into_owned(),
                })
                .collect(),
        };

        let response = self.client.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(TidyError::Planner(format!(
                "Commit returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Planner for HttpPlanner {
    async fn plan(
        &self,
        digest: &DigestNode,
        scope: &str,
        preferences: &PlanPreferences,
    ) -> Result<PlannerOutput> {
        let request = PlanRequest { roots: vec![digest], scope, preferences };
        let mut last_error = None;

        for attempt in 0..=self.retries {
            if attempt > 0 {
                let delay = self.backoff * 2u32.pow(attempt - 1);
                warn!("Retrying planner request in {:?} (attempt {})", delay, attempt + 1);
                tokio::time::sleep(delay).await;
            }

            match self.request_plan(&request).await {
                Ok(response) => {
                    let output = response.into_output(scope);
                    info!("Planner proposed {} moves", output.plan.moves.len());
                    return Ok(output);
                }
                Err(e) => {
                    debug!("Planner attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| TidyError::Planner("Unknown error".to_string())))
    }
}

/// Degraded local classification: one folder per extension category
pub struct FallbackPlanner {
    root: PathBuf,
}

impl FallbackPlanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn classify(
        &self,
        digest: &DigestNode,
        scope: &str,
        preferences: &PlanPreferences,
    ) -> PlannerOutput {
        let mut files = Vec::new();
        collect_files(digest, &mut files);

        let mut plan = Plan::new(scope);
        let mut rationale = HashMap::new();
        let mut seen = HashSet::new();
        let mut folders = HashSet::new();

        for file in files {
            let source = PathBuf::from(&file.path);
            let category = category_for(Path::new(&file.name));

            let mut folder = self.root.clone();
            if preferences.group_by_type {
                folder.push(category.as_str());
            }
            if preferences.group_by_date {
                folder.push(file.created_utc.format("%Y").to_string());
                folder.push(file.created_utc.format("%Y-%m").to_string());
            }
            let desired = folder.join(&file.name);
            if desired == source {
                continue;
            }

            let destination = unique_in_batch(&mut seen, desired);
            folders.insert(folder);
            rationale.insert(file.path.clone(), format!("Grouped as {}", category));
            plan.moves.push(MoveOp::new(source, destination));
        }

        let summary = format!(
            "Offline plan: {} files into {} folders",
            plan.moves.len(),
            folders.len()
        );
        PlannerOutput { plan, summary, rationale }
    }
}

#[async_trait]
impl Planner for FallbackPlanner {
    async fn plan(
        &self,
        digest: &DigestNode,
        scope: &str,
        preferences: &PlanPreferences,
    ) -> Result<PlannerOutput> {
        Ok(self.classify(digest, scope, preferences))
    }
}

fn collect_files<'a>(node: &'a DigestNode, out: &mut Vec<&'a DigestNode>) {
    match &node.children {
        Some(children) => children.iter().for_each(|c| collect_files(c, out)),
        None => out.push(node),
    }
}
