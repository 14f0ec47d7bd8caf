// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use wfo_orchestrator::OrchestratorError;

/// The one place an `OrchestratorError` becomes an HTTP status + JSON body.
/// No route handler maps status codes itself.
pub struct ApiError(pub OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            OrchestratorError::ValidationError(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            OrchestratorError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            OrchestratorError::WorkspaceBusy(_) => (StatusCode::CONFLICT, "workspace_busy"),
            OrchestratorError::WorkspaceError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "workspace_error"),
            OrchestratorError::SpawnError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "spawn_error"),
            OrchestratorError::Timeout(_) => (StatusCode::INTERNAL_SERVER_ERROR, "timeout"),
            OrchestratorError::KilledByUser(_) => (StatusCode::INTERNAL_SERVER_ERROR, "killed_by_user"),
            OrchestratorError::NonzeroExit(_) => (StatusCode::INTERNAL_SERVER_ERROR, "nonzero_exit"),
            OrchestratorError::Unkillable => (StatusCode::INTERNAL_SERVER_ERROR, "unkillable"),
            OrchestratorError::ParseError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "parse_error"),
            OrchestratorError::Orphaned(_) => (StatusCode::CONFLICT, "orphaned"),
            OrchestratorError::WorkspaceNotReady(_) => (StatusCode::REQUEST_TIMEOUT, "workspace_not_ready"),
            OrchestratorError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
            OrchestratorError::PersistenceError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "persistence_error"),
            OrchestratorError::AlreadyDone => (StatusCode::OK, "already_done"),
        };
        let body = Json(json!({ "error": kind, "message": self.0.to_string() }));
        (status, body).into_response()
    }
}
