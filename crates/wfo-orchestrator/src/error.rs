// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("validation failed: {0}")]
    ValidationError(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("workspace busy: {0}")]
    WorkspaceBusy(String),
    #[error("workspace error: {0}")]
    WorkspaceError(wfo_workspace::WorkspaceError),
    #[error("failed to start child process: {0}")]
    SpawnError(#[from] wfo_supervisor::SpawnError),
    #[error("run {0} timed out")]
    Timeout(Uuid),
    #[error("run {0} was killed by user request")]
    KilledByUser(Uuid),
    #[error("child exited with nonzero status without a result event")]
    NonzeroExit(i32),
    #[error("child did not exit after forceful termination")]
    Unkillable,
    #[error("malformed child output: {0}")]
    ParseError(String),
    #[error("run {0} found active after restart with no supervising process")]
    Orphaned(Uuid),
    #[error("run {0} is not yet ready to receive input")]
    WorkspaceNotReady(Uuid),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("persistence error: {0}")]
    PersistenceError(wfo_registry::RegistryError),
    #[error("run already done")]
    AlreadyDone,
}

impl From<wfo_workspace::WorkspaceError> for OrchestratorError {
    fn from(e: wfo_workspace::WorkspaceError) -> Self {
        match e {
            wfo_workspace::WorkspaceError::Busy(path) => OrchestratorError::WorkspaceBusy(path),
            other => OrchestratorError::WorkspaceError(other),
        }
    }
}

impl From<wfo_registry::RegistryError> for OrchestratorError {
    fn from(e: wfo_registry::RegistryError) -> Self {
        match e {
            wfo_registry::RegistryError::NotFound(id) => OrchestratorError::NotFound(id.to_string()),
            other => OrchestratorError::PersistenceError(other),
        }
    }
}
