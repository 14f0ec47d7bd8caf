// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    Text,
    StreamJson,
}

impl Default for InputFormat {
    fn default() -> Self {
        InputFormat::Text
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartRunRequest {
    pub workflow_name: String,
    pub message: String,
    pub max_turns: Option<u32>,
    pub session_id: Option<Uuid>,
    pub session_name: Option<String>,
    pub user_id: Option<String>,
    pub git_branch: Option<String>,
    pub repository_url: Option<String>,
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub input_format: InputFormat,
    #[serde(default)]
    pub create_pr_on_success: bool,
    pub pr_title: Option<String>,
    pub pr_body: Option<String>,
    #[serde(default = "default_true")]
    pub persistent: bool,
    #[serde(default)]
    pub temp_workspace: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct StartRunResponse {
    pub run_id: Uuid,
    pub session_id: Uuid,
    pub status: wfo_registry::RunStatus,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KillResult {
    pub acknowledged: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageReceipt {
    pub message_id: Uuid,
    pub injected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub run_id: Uuid,
    pub workflow_name: String,
    pub status: wfo_registry::RunStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub turns: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_created_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost_usd: f64,
    pub tools_used: Vec<String>,
    pub completion_percentage: u8,
    pub final_result: Option<wfo_registry::FinalResult>,
    pub error: Option<wfo_registry::ErrorInfo>,
    pub detail: Option<StatusDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusDetail {
    pub phase: wfo_stream::Phase,
    pub last_parse_error: Option<String>,
    pub recent_stdout: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ListFilterRequest {
    pub status: Option<wfo_registry::RunStatus>,
    pub workflow_name: Option<String>,
    pub session_name: Option<String>,
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    pub until: Option<chrono::DateTime<chrono::Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
