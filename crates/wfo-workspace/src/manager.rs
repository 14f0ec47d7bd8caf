// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use git2::{BranchType, IndexAddOption, Repository, WorktreeAddOptions};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::WorkspaceError;
use crate::repo_guard::{fetch_opts, RepoGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceKind {
    PersistentMain,
    PersistentWorkflow,
    Ephemeral,
    ExternalClone,
}

#[derive(Debug, Clone)]
pub struct Workspace {
    pub path: PathBuf,
    pub branch: String,
    pub kind: WorkspaceKind,
    pub persistent: bool,
}

#[derive(Debug, Clone, Default)]
pub struct WorkspaceRequest {
    pub workflow_name: String,
    pub git_branch: Option<String>,
    pub repository_url: Option<String>,
    pub temp_workspace: bool,
    pub persistent: bool,
}

/// Allocates git-worktree-backed workspaces out of a single base repository.
///
/// Persistent workspaces (one per workflow, or the shared main worktree) are
/// exclusively leased: two concurrently `running` runs must never hold the
/// same non-ephemeral path.
pub struct WorkspaceManager {
    workspace_root: PathBuf,
    repo: Arc<Mutex<RepoGuard>>,
    leases: Arc<Mutex<HashMap<PathBuf, Uuid>>>,
}

impl std::fmt::Debug for WorkspaceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceManager")
            .field("workspace_root", &self.workspace_root)
            .finish_non_exhaustive()
    }
}

impl WorkspaceManager {
    pub fn open(base_repo_path: impl Into<PathBuf>, workspace_root: impl Into<PathBuf>) -> Result<Self, WorkspaceError> {
        let base_repo_path = base_repo_path.into();
        let repo = Repository::open(&base_repo_path)
            .map_err(|_| WorkspaceError::NotARepo(base_repo_path.display().to_string()))?;
        Ok(Self {
            workspace_root: workspace_root.into(),
            repo: Arc::new(Mutex::new(RepoGuard(repo))),
            leases: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub async fn acquire(&self, run_id: Uuid, req: WorkspaceRequest) -> Result<Workspace, WorkspaceError> {
        if req.temp_workspace && (req.repository_url.is_some() || req.git_branch.is_some()) {
            // Caller should have rejected this combination at validation time;
            // defensively fall back to treating it as ephemeral-wins.
            debug!("temp_workspace requested alongside git parameters; ignoring git parameters");
        }

        if req.temp_workspace {
            return self.acquire_ephemeral().await;
        }
        if let Some(url) = req.repository_url.clone() {
            return self.acquire_external_clone(url, req.git_branch.unwrap_or_else(|| "main".into())).await;
        }

        let (kind, path, branch) = if req.persistent {
            let branch = req.git_branch.unwrap_or_else(|| format!("workspace/{}", req.workflow_name));
            let path = self.workspace_root.join(format!("{}_persistent", req.workflow_name));
            (WorkspaceKind::PersistentWorkflow, path, branch)
        } else {
            let path = self.workspace_root.join("main_persistent");
            (WorkspaceKind::PersistentMain, path, "main".to_string())
        };

        self.lease(&path, run_id)?;

        let repo = self.repo.clone();
        let wt_name = sanitize_worktree_name(&path);
        let path_for_git = path.clone();
        let branch_for_git = branch.clone();
        let result = tokio::task::spawn_blocking(move || {
            let guard = repo.lock().expect("workspace repo mutex poisoned");
            ensure_worktree(&guard.0, &wt_name, &path_for_git, &branch_for_git)
        })
        .await
        .expect("worktree task panicked");

        if let Err(e) = result {
            self.release_lease(&path);
            return Err(e);
        }

        info!(path = %path.display(), branch, "workspace acquired");
        Ok(Workspace { path, branch, kind, persistent: true })
    }

    async fn acquire_ephemeral(&self) -> Result<Workspace, WorkspaceError> {
        let path = self.workspace_root.join("ephemeral").join(Uuid::new_v4().to_string());
        let p = path.clone();
        tokio::task::spawn_blocking(move || std::fs::create_dir_all(&p))
            .await
            .expect("mkdir task panicked")?;
        Ok(Workspace { path, branch: "HEAD".into(), kind: WorkspaceKind::Ephemeral, persistent: false })
    }

    async fn acquire_external_clone(&self, url: String, branch: String) -> Result<Workspace, WorkspaceError> {
        let path = self.workspace_root.join("external").join(Uuid::new_v4().to_string());
        let p = path.clone();
        let b = branch.clone();
        tokio::task::spawn_blocking(move || clone_external(&url, &b, &p))
            .await
            .expect("clone task panicked")?;
        Ok(Workspace { path, branch, kind: WorkspaceKind::ExternalClone, persistent: false })
    }

    /// Releases a workspace. Persistent workspaces are kept on disk (and
    /// optionally auto-committed); ephemeral/external ones are deleted.
    pub async fn release(&self, workspace: &Workspace, auto_commit: bool) -> Result<(), WorkspaceError> {
        match workspace.kind {
            WorkspaceKind::PersistentMain | WorkspaceKind::PersistentWorkflow => {
                self.release_lease(&workspace.path);
                if auto_commit {
                    let path = workspace.path.clone();
                    tokio::task::spawn_blocking(move || auto_commit_changes(&path))
                        .await
                        .expect("commit task panicked")?;
                }
                Ok(())
            }
            WorkspaceKind::Ephemeral | WorkspaceKind::ExternalClone => {
                let path = workspace.path.clone();
                tokio::task::spawn_blocking(move || {
                    if path.exists() {
                        std::fs::remove_dir_all(&path)?;
                    }
                    Ok::<(), std::io::Error>(())
                })
                .await
                .expect("cleanup task panicked")?;
                Ok(())
            }
        }
    }

    fn lease(&self, path: &Path, run_id: Uuid) -> Result<(), WorkspaceError> {
        let mut leases = self.leases.lock().expect("lease map mutex poisoned");
        if leases.contains_key(path) {
            return Err(WorkspaceError::Busy(path.display().to_string()));
        }
        leases.insert(path.to_path_buf(), run_id);
        Ok(())
    }

    fn release_lease(&self, path: &Path) {
        self.leases.lock().expect("lease map mutex poisoned").remove(path);
    }
}

/// Files with pending changes and commits made since `since`, for reporting
/// what a run actually produced. A workspace with no `.git` (ephemeral)
/// simply reports nothing.
pub fn snapshot_changes(path: &Path, since: chrono::DateTime<chrono::Utc>) -> (Vec<String>, Vec<String>) {
    let repo = match Repository::open(path) {
        Ok(r) => r,
        Err(_) => return (Vec::new(), Vec::new()),
    };

    let files_created = repo
        .statuses(None)
        .map(|statuses| statuses.iter().filter_map(|e| e.path().map(str::to_string)).collect())
        .unwrap_or_default();

    (files_created, commits_since(&repo, since))
}

fn commits_since(repo: &Repository, since: chrono::DateTime<chrono::Utc>) -> Vec<String> {
    let mut commits = Vec::new();
    let mut revwalk = match repo.revwalk() {
        Ok(r) => r,
        Err(_) => return commits,
    };
    if revwalk.push_head().is_err() {
        return commits;
    }
    let cutoff = since.timestamp();
    for oid in revwalk.flatten() {
        let Ok(commit) = repo.find_commit(oid) else { continue };
        if commit.time().seconds() < cutoff {
            break;
        }
        commits.push(format!("{} {}", &oid.to_string()[..7], commit.summary().unwrap_or_default()));
    }
    commits
}

fn sanitize_worktree_name(path: &Path) -> String {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("workspace").to_string()
}

fn ensure_worktree(repo: &Repository, wt_name: &str, path: &Path, branch_name: &str) -> Result<(), WorkspaceError> {
    if path.is_dir() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let branch_ref = match repo.find_branch(branch_name, BranchType::Local) {
        Ok(b) => b.into_reference(),
        Err(_) => {
            let head_commit = repo.head()?.peel_to_commit()?;
            repo.branch(branch_name, &head_commit, false)?.into_reference()
        }
    };

    let mut opts = WorktreeAddOptions::new();
    opts.reference(Some(&branch_ref));
    repo.worktree(wt_name, path, Some(&opts))
        .map_err(|e| WorkspaceError::WorktreeConflict(e.to_string()))?;
    Ok(())
}

fn clone_external(url: &str, branch: &str, dest: &Path) -> Result<(), WorkspaceError> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut builder = git2::build::RepoBuilder::new();
    builder.fetch_options(fetch_opts());
    builder.branch(branch);
    builder
        .clone(url, dest)
        .map_err(|e| WorkspaceError::CloneFailed(e.to_string()))?;
    Ok(())
}

/// Commits any pending changes in a persistent workspace with a conventional
/// message. No-op when the working tree is clean.
fn auto_commit_changes(path: &Path) -> Result<(), WorkspaceError> {
    let repo = Repository::open(path)?;
    let statuses = repo.statuses(None)?;
    if statuses.is_empty() {
        return Ok(());
    }

    let mut index = repo.index()?;
    index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
    index.write()?;
    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;
    let sig = repo
        .signature()
        .unwrap_or_else(|_| git2::Signature::now("workflow-orchestrator", "orchestrator@localhost").unwrap());

    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    let message = "Auto-commit: workflow run changes\n\nCo-Authored-By: workflow-orchestrator <orchestrator@localhost>";
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn init_base_repo() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let file_path = dir.path().join("README.md");
        std::fs::File::create(&file_path).unwrap().write_all(b"hello").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
        let repo_path = dir.path().to_path_buf();
        (dir, repo_path)
    }

    #[tokio::test]
    async fn acquires_persistent_workflow_workspace_as_a_real_worktree() {
        let (base_dir, base_path) = init_base_repo();
        let workspace_root = base_dir.path().join("workspaces");
        let mgr = WorkspaceManager::open(&base_path, &workspace_root).unwrap();

        let ws = mgr
            .acquire(Uuid::new_v4(), WorkspaceRequest { workflow_name: "builder".into(), persistent: true, ..Default::default() })
            .await
            .unwrap();

        assert!(ws.path.join(".git").exists());
        assert_eq!(ws.kind, WorkspaceKind::PersistentWorkflow);
    }

    #[tokio::test]
    async fn second_concurrent_lease_on_same_persistent_workspace_is_busy() {
        let (base_dir, base_path) = init_base_repo();
        let workspace_root = base_dir.path().join("workspaces");
        let mgr = WorkspaceManager::open(&base_path, &workspace_root).unwrap();

        let req = WorkspaceRequest { workflow_name: "builder".into(), persistent: true, ..Default::default() };
        let _first = mgr.acquire(Uuid::new_v4(), req.clone()).await.unwrap();
        let second = mgr.acquire(Uuid::new_v4(), req).await;

        assert!(matches!(second, Err(WorkspaceError::Busy(_))));
    }

    #[tokio::test]
    async fn releasing_a_lease_allows_reacquisition() {
        let (base_dir, base_path) = init_base_repo();
        let workspace_root = base_dir.path().join("workspaces");
        let mgr = WorkspaceManager::open(&base_path, &workspace_root).unwrap();

        let req = WorkspaceRequest { workflow_name: "builder".into(), persistent: true, ..Default::default() };
        let ws = mgr.acquire(Uuid::new_v4(), req.clone()).await.unwrap();
        mgr.release(&ws, false).await.unwrap();

        let reacquired = mgr.acquire(Uuid::new_v4(), req).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn ephemeral_workspace_is_a_plain_directory_not_a_worktree() {
        let (base_dir, base_path) = init_base_repo();
        let workspace_root = base_dir.path().join("workspaces");
        let mgr = WorkspaceManager::open(&base_path, &workspace_root).unwrap();

        let ws = mgr
            .acquire(Uuid::new_v4(), WorkspaceRequest { temp_workspace: true, ..Default::default() })
            .await
            .unwrap();

        assert!(!ws.path.join(".git").exists());
        assert_eq!(ws.kind, WorkspaceKind::Ephemeral);
    }

    #[tokio::test]
    async fn releasing_ephemeral_workspace_deletes_the_directory() {
        let (base_dir, base_path) = init_base_repo();
        let workspace_root = base_dir.path().join("workspaces");
        let mgr = WorkspaceManager::open(&base_path, &workspace_root).unwrap();

        let ws = mgr
            .acquire(Uuid::new_v4(), WorkspaceRequest { temp_workspace: true, ..Default::default() })
            .await
            .unwrap();
        let path = ws.path.clone();
        mgr.release(&ws, false).await.unwrap();

        assert!(!path.exists());
    }

    #[test]
    fn opening_a_non_repo_path_is_not_a_repo_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = WorkspaceManager::open(dir.path(), dir.path().join("ws")).unwrap_err();
        assert!(matches!(err, WorkspaceError::NotARepo(_)));
    }

    #[tokio::test]
    async fn snapshot_changes_reports_untracked_files() {
        let (base_dir, base_path) = init_base_repo();
        let workspace_root = base_dir.path().join("workspaces");
        let mgr = WorkspaceManager::open(&base_path, &workspace_root).unwrap();

        let since = chrono::Utc::now();
        let ws = mgr
            .acquire(Uuid::new_v4(), WorkspaceRequest { workflow_name: "builder".into(), persistent: true, ..Default::default() })
            .await
            .unwrap();
        std::fs::write(ws.path.join("hello.py"), "print('hi')\n").unwrap();

        let (files_created, _git_commits) = snapshot_changes(&ws.path, since);
        assert_eq!(files_created, vec!["hello.py".to_string()]);
    }

    #[tokio::test]
    async fn snapshot_changes_on_ephemeral_workspace_is_empty() {
        let (base_dir, base_path) = init_base_repo();
        let workspace_root = base_dir.path().join("workspaces");
        let mgr = WorkspaceManager::open(&base_path, &workspace_root).unwrap();

        let ws = mgr
            .acquire(Uuid::new_v4(), WorkspaceRequest { temp_workspace: true, ..Default::default() })
            .await
            .unwrap();

        let (files_created, git_commits) = snapshot_changes(&ws.path, chrono::Utc::now());
        assert!(files_created.is_empty());
        assert!(git_commits.is_empty());
    }
}
