// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use wfo_orchestrator::Orchestrator;

use crate::handlers;

/// Builds the full external HTTP surface over a shared orchestrator.
pub fn build_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/runs", post(handlers::start_run).get(handlers::list_runs))
        .route("/runs/:run_id/status", get(handlers::get_status))
        .route("/runs/:run_id/cancel", post(handlers::cancel))
        .route("/runs/:run_id/messages", post(handlers::inject_message))
        .route("/healthz", get(handlers::healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}
