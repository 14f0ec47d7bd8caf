// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use wfo_orchestrator::{KillResult, ListFilterRequest, Orchestrator, OrchestratorError, StartRunRequest};

use crate::error_response::ApiError;

#[derive(Debug, Deserialize)]
pub struct StartRunQuery {
    pub persistent: Option<bool>,
    pub temp_workspace: Option<bool>,
    #[serde(default)]
    pub auto_merge: bool,
}

pub async fn start_run(
    State(orch): State<Arc<Orchestrator>>,
    Query(query): Query<StartRunQuery>,
    Json(mut body): Json<StartRunRequest>,
) -> Result<Response, ApiError> {
    if let Some(persistent) = query.persistent {
        body.persistent = persistent;
    }
    if let Some(temp_workspace) = query.temp_workspace {
        body.temp_workspace = temp_workspace;
    }
    if query.auto_merge {
        tracing::debug!("auto_merge requested; PR automation is not implemented by this service");
    }

    let resp = orch.start_run(body).await?;
    Ok((StatusCode::ACCEPTED, Json(resp)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub detailed: bool,
}

pub async fn get_status(State(orch): State<Arc<Orchestrator>>, Path(run_id): Path<Uuid>, Query(query): Query<StatusQuery>) -> Result<Response, ApiError> {
    let view = orch.status(run_id, query.detailed).await?;
    Ok(Json(view).into_response())
}

pub async fn cancel(State(orch): State<Arc<Orchestrator>>, Path(run_id): Path<Uuid>) -> Response {
    match orch.cancel(run_id).await {
        Ok(result) => (StatusCode::ACCEPTED, Json(result)).into_response(),
        Err(OrchestratorError::AlreadyDone) => Json(KillResult { acknowledged: true }).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct InjectMessageBody {
    pub message: String,
}

pub async fn inject_message(
    State(orch): State<Arc<Orchestrator>>,
    Path(run_id): Path<Uuid>,
    Json(body): Json<InjectMessageBody>,
) -> Result<Response, ApiError> {
    let receipt = orch.inject_message(run_id, body.message).await?;
    Ok(Json(receipt).into_response())
}

pub async fn list_runs(State(orch): State<Arc<Orchestrator>>, Query(filter): Query<ListFilterRequest>) -> Result<Response, ApiError> {
    let runs = orch.list(filter).await?;
    Ok(Json(runs).into_response())
}

pub async fn healthz(State(orch): State<Arc<Orchestrator>>) -> Response {
    Json(json!({ "status": "ok", "active_runs": orch.active_run_count() })).into_response()
}
