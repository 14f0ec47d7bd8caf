// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_max_concurrent_runs() -> usize {
    16
}

fn default_run_timeout_sec() -> u64 {
    7200
}

fn default_inactivity_timeout_sec() -> u64 {
    600
}

fn default_stuck_threshold_sec() -> u64 {
    1800
}

fn default_workspace_root() -> String {
    "./workspaces".into()
}

fn default_http_bind() -> String {
    "127.0.0.1:8080".into()
}

fn default_data_dir() -> String {
    "./data".into()
}

fn default_agent_program() -> String {
    "claude".into()
}

/// A named prompt-plus-policy template that a run can reference by
/// `workflow_name`. Loaded once at startup from the merged configuration.
///
/// ```yaml
/// workflows:
///   builder:
///     system_prompt: "prompts/builder.md"
///     allow_external_repo: true
///     default_persistent: false
///   guardian:
///     system_prompt: "prompts/guardian.md"
///     default_persistent: true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub system_prompt: String,
    #[serde(default)]
    pub default_tools: Vec<String>,
    #[serde(default)]
    pub allow_external_repo: bool,
    #[serde(default)]
    pub default_persistent: bool,
}

/// The merged, typed configuration consumed by every orchestrator component.
///
/// Every field carries a `#[serde(default)]` fallback so a config-file-free
/// deployment still runs with documented defaults; see `default_*` above.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    #[serde(default = "default_run_timeout_sec")]
    pub run_default_timeout_sec: u64,

    #[serde(default = "default_inactivity_timeout_sec")]
    pub inactivity_timeout_sec: u64,

    #[serde(default = "default_stuck_threshold_sec")]
    pub stuck_threshold_sec: u64,

    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,

    #[serde(default = "default_true")]
    pub auto_commit_enabled: bool,

    #[serde(default = "default_http_bind")]
    pub http_bind: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Base git repository all persistent/internal workspaces are worktrees of.
    #[serde(default)]
    pub base_repository_path: Option<String>,

    /// Path (or bare name, resolved via `PATH`) of the agent CLI binary spawned per run.
    #[serde(default = "default_agent_program")]
    pub agent_program: String,

    #[serde(default)]
    pub workflows: HashMap<String, WorkflowDefinition>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        // Deserializing an empty mapping exercises the same `#[serde(default)]`
        // fields used for any config-file-free deployment.
        serde_yaml::from_str("{}").expect("empty mapping always deserializes")
    }
}
