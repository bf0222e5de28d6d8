use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// JSON blob on the first `#` line of a run submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub team_id: Option<String>,
    pub system_id: Option<String>,
    pub task_id: Option<String>,
    pub poc_email: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifestEntry {
    pub run_name: String,
    pub team_id: String,
    pub system_id: String,
    pub path: String,
    pub sha256: String,
    pub status: RunStatus,
    pub scored_assertions: usize,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Scored,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub task: String,
    pub description: String,
    pub truth_path: String,
    pub truth_sha256: String,
    pub cutoff_step: u32,
    pub inclusion: String,
    pub reports: Vec<String>,
    pub runs: Vec<RunManifestEntry>,
}
