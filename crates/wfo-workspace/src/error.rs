// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("base path is not a git repository: {0}")]
    NotARepo(String),
    #[error("worktree already exists at a conflicting path: {0}")]
    WorktreeConflict(String),
    #[error("cloning external repository failed: {0}")]
    CloneFailed(String),
    #[error("checking out branch {branch} failed: {reason}")]
    BranchCheckoutFailed { branch: String, reason: String },
    #[error("filesystem error preparing workspace: {0}")]
    DiskFull(String),
    #[error("git operation failed: {0}")]
    GitOperationFailed(String),
    #[error("persistent workspace for workflow '{0}' is already leased by another run")]
    Busy(String),
}

impl From<git2::Error> for WorkspaceError {
    fn from(e: git2::Error) -> Self {
        WorkspaceError::GitOperationFailed(e.to_string())
    }
}

impl From<std::io::Error> for WorkspaceError {
    fn from(e: std::io::Error) -> Self {
        WorkspaceError::DiskFull(e.to_string())
    }
}
