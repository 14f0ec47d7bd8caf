// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Receives a run request, allocates a workspace, spawns and supervises the
//! agent process, and reconciles its live output with the persisted run
//! registry. The orchestrator is the one entry point external callers use.

mod active;
mod error;
mod orchestrator;
mod reaper;
mod request;

pub use error::OrchestratorError;
pub use orchestrator::Orchestrator;
pub use reaper::spawn_reaper;
pub use request::{
    InputFormat, KillResult, ListFilterRequest, MessageReceipt, StartRunRequest, StartRunResponse, StatusDetail, StatusView,
};
