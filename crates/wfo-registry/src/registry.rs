// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db;
use crate::run::{ErrorInfo, FinalResult, Run, RunStatus};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("run {0} not found")]
    NotFound(Uuid),
    #[error("illegal status transition for run {run_id}: {from:?} -> {to:?}")]
    IllegalTransition { run_id: Uuid, from: RunStatus, to: RunStatus },
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<RunStatus>,
    pub workflow_name: Option<String>,
    pub session_name: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

/// The durable view of all runs. Every mutation is persisted before it is
/// acknowledged; the connection is driven from blocking tasks since
/// `rusqlite::Connection` does its I/O synchronously.
pub struct Registry {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl Registry {
    /// Opens (and migrates) the database, then marks any run left `pending`
    /// or `running` from a previous process as `failed{error.kind=orphaned}` —
    /// its child process is gone and cannot be re-attached.
    pub async fn open(path: impl AsRef<Path> + Send + 'static) -> Result<Self, RegistryError> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<rusqlite::Connection, RegistryError> {
            let conn = db::open(&path)?;
            let orphaned = db::mark_orphaned_on_startup(&conn)?;
            if orphaned > 0 {
                warn!(count = orphaned, "marked runs orphaned after restart");
            }
            Ok(conn)
        })
        .await
        .expect("registry open task panicked")?;

        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, RegistryError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, RegistryError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("registry connection mutex poisoned");
            f(&conn)
        })
        .await
        .expect("registry task panicked")
    }

    pub async fn create(&self, run: Run) -> Result<Uuid, RegistryError> {
        let run_id = run.run_id;
        self.with_conn(move |conn| Ok(db::insert(conn, &run)?)).await?;
        info!(%run_id, "run created");
        Ok(run_id)
    }

    pub async fn read(&self, run_id: Uuid) -> Result<Run, RegistryError> {
        self.with_conn(move |conn| db::find(conn, run_id)?.ok_or(RegistryError::NotFound(run_id))).await
    }

    pub async fn find_by_session(&self, session_id: Uuid) -> Result<Option<Run>, RegistryError> {
        self.with_conn(move |conn| Ok(db::find_by_session(conn, session_id)?)).await
    }

    pub async fn list(&self, filter: ListFilter) -> Result<Vec<Run>, RegistryError> {
        let limit = if filter.limit <= 0 { 50 } else { filter.limit };
        let offset = filter.offset;
        let q = db::ListQuery {
            status: filter.status,
            workflow_name: filter.workflow_name,
            session_name: filter.session_name,
            since: filter.since,
            until: filter.until,
        };
        self.with_conn(move |conn| Ok(db::list(conn, &q, limit, offset)?)).await
    }

    /// `pending -> running`, `running -> {completed, failed, killed}`. Any
    /// other transition is rejected; repeating an already-applied terminal
    /// transition is idempotent.
    pub async fn transition(&self, run_id: Uuid, to: RunStatus, at: DateTime<Utc>) -> Result<(), RegistryError> {
        self.with_conn(move |conn| {
            let mut run = db::find(conn, run_id)?.ok_or(RegistryError::NotFound(run_id))?;
            if run.status == to {
                return Ok(());
            }
            let legal = matches!(
                (run.status, to),
                (RunStatus::Pending, RunStatus::Running)
                    | (RunStatus::Running, RunStatus::Completed)
                    | (RunStatus::Running, RunStatus::Failed)
                    | (RunStatus::Running, RunStatus::Killed)
            );
            if !legal {
                return Err(RegistryError::IllegalTransition { run_id, from: run.status, to });
            }
            run.status = to;
            match to {
                RunStatus::Running => run.started_at = Some(at),
                RunStatus::Completed | RunStatus::Failed | RunStatus::Killed => run.completed_at = Some(at),
                RunStatus::Pending => {}
            }
            Ok(db::update(conn, &run)?)
        })
        .await
    }

    pub async fn set_workspace(&self, run_id: Uuid, path: String) -> Result<(), RegistryError> {
        self.with_conn(move |conn| {
            let mut run = db::find(conn, run_id)?.ok_or(RegistryError::NotFound(run_id))?;
            run.workspace_path = Some(path);
            Ok(db::update(conn, &run)?)
        })
        .await
    }

    pub async fn set_final_result(&self, run_id: Uuid, result: FinalResult) -> Result<(), RegistryError> {
        self.with_conn(move |conn| {
            let mut run = db::find(conn, run_id)?.ok_or(RegistryError::NotFound(run_id))?;
            run.final_result = Some(result);
            Ok(db::update(conn, &run)?)
        })
        .await
    }

    pub async fn set_error(&self, run_id: Uuid, error: ErrorInfo) -> Result<(), RegistryError> {
        self.with_conn(move |conn| {
            let mut run = db::find(conn, run_id)?.ok_or(RegistryError::NotFound(run_id))?;
            run.error = Some(error);
            Ok(db::update(conn, &run)?)
        })
        .await
    }

    /// Token counters only ever move forward — a lossy later event must not
    /// erase a larger value observed earlier.
    pub async fn update_metrics(&self, run_id: Uuid, snapshot: wfo_stream::Snapshot) -> Result<(), RegistryError> {
        self.with_conn(move |conn| {
            let mut run = db::find(conn, run_id)?.ok_or(RegistryError::NotFound(run_id))?;
            run.turns = run.turns.max(snapshot.turns);
            run.input_tokens = run.input_tokens.max(snapshot.input_tokens);
            run.output_tokens = run.output_tokens.max(snapshot.output_tokens);
            run.cache_created_tokens = run.cache_created_tokens.max(snapshot.cache_created_tokens);
            run.cache_read_tokens = run.cache_read_tokens.max(snapshot.cache_read_tokens);
            run.cost_usd = run.cost_usd.max(snapshot.cost_usd);
            for tool in snapshot.tools_used {
                if !run.tools_used.contains(&tool) {
                    run.tools_used.push(tool);
                }
            }
            Ok(db::update(conn, &run)?)
        })
        .await
    }

    pub async fn update_heartbeat(&self, run_id: Uuid, at: DateTime<Utc>) -> Result<(), RegistryError> {
        self.with_conn(move |conn| {
            let mut run = db::find(conn, run_id)?.ok_or(RegistryError::NotFound(run_id))?;
            run.last_heartbeat = at;
            Ok(db::update(conn, &run)?)
        })
        .await
    }

    pub async fn find_stuck(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> Result<Vec<Uuid>, RegistryError> {
        let cutoff = now - threshold;
        self.with_conn(move |conn| Ok(db::find_stuck(conn, cutoff)?)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_run(workflow_name: &str) -> Run {
        let now = Utc::now();
        Run {
            run_id: Uuid::new_v4(),
            workflow_name: workflow_name.into(),
            session_id: Uuid::new_v4(),
            session_name: None,
            user_id: None,
            status: RunStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            workspace_path: None,
            workspace_persistent: false,
            git_branch: None,
            repository_url: None,
            max_turns: None,
            timeout_seconds: 7200,
            create_pr_on_success: false,
            pr_url: None,
            turns: 0,
            input_tokens: 0,
            output_tokens: 0,
            cache_created_tokens: 0,
            cache_read_tokens: 0,
            cost_usd: 0.0,
            tools_used: Vec::new(),
            last_heartbeat: now,
            final_result: None,
            error: None,
        }
    }

    async fn open_test_registry() -> (Registry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let reg = Registry::open(dir.path().join("wfo.db")).await.unwrap();
        (reg, dir)
    }

    #[tokio::test]
    async fn created_run_round_trips_through_read() {
        let (reg, _dir) = open_test_registry().await;
        let run = new_run("review-pr");
        let id = run.run_id;
        reg.create(run).await.unwrap();
        let read_back = reg.read(id).await.unwrap();
        assert_eq!(read_back.workflow_name, "review-pr");
        assert_eq!(read_back.status, RunStatus::Pending);
    }

    #[tokio::test]
    async fn reading_an_unknown_run_is_not_found() {
        let (reg, _dir) = open_test_registry().await;
        let err = reg.read(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn pending_to_running_to_completed_is_legal() {
        let (reg, _dir) = open_test_registry().await;
        let run = new_run("review-pr");
        let id = run.run_id;
        reg.create(run).await.unwrap();
        reg.transition(id, RunStatus::Running, Utc::now()).await.unwrap();
        reg.transition(id, RunStatus::Completed, Utc::now()).await.unwrap();
        let run = reg.read(id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.started_at.is_some());
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn pending_to_completed_directly_is_illegal() {
        let (reg, _dir) = open_test_registry().await;
        let run = new_run("review-pr");
        let id = run.run_id;
        reg.create(run).await.unwrap();
        let err = reg.transition(id, RunStatus::Completed, Utc::now()).await.unwrap_err();
        assert!(matches!(err, RegistryError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn repeating_a_terminal_transition_is_idempotent() {
        let (reg, _dir) = open_test_registry().await;
        let run = new_run("review-pr");
        let id = run.run_id;
        reg.create(run).await.unwrap();
        reg.transition(id, RunStatus::Running, Utc::now()).await.unwrap();
        reg.transition(id, RunStatus::Failed, Utc::now()).await.unwrap();
        reg.transition(id, RunStatus::Failed, Utc::now()).await.unwrap();
    }

    #[tokio::test]
    async fn metrics_never_regress_below_a_previously_observed_value() {
        let (reg, _dir) = open_test_registry().await;
        let run = new_run("review-pr");
        let id = run.run_id;
        reg.create(run).await.unwrap();

        let (mut proc, rx) = wfo_stream::StreamProcessor::new();
        proc.apply(&wfo_events::Event::Init { session_id: "s".into(), model: "m".into(), tools: vec![] });
        reg.update_metrics(id, rx.borrow().clone()).await.unwrap();

        let lossy = wfo_stream::StreamProcessor::new().1.borrow().clone();
        reg.update_metrics(id, lossy).await.unwrap();

        let run = reg.read(id).await.unwrap();
        assert_eq!(run.turns, 0);
    }

    #[tokio::test]
    async fn list_filters_by_status_and_workflow_name() {
        let (reg, _dir) = open_test_registry().await;
        let mut a = new_run("review-pr");
        a.status = RunStatus::Running;
        let mut b = new_run("triage-issue");
        b.status = RunStatus::Pending;
        reg.create(a).await.unwrap();
        reg.create(b).await.unwrap();

        let running = reg.list(ListFilter { status: Some(RunStatus::Running), ..Default::default() }).await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].workflow_name, "review-pr");

        let triage = reg.list(ListFilter { workflow_name: Some("triage-issue".into()), ..Default::default() }).await.unwrap();
        assert_eq!(triage.len(), 1);
    }

    #[tokio::test]
    async fn find_stuck_returns_only_running_runs_past_the_cutoff() {
        let (reg, _dir) = open_test_registry().await;
        let mut stale = new_run("review-pr");
        stale.status = RunStatus::Running;
        stale.last_heartbeat = Utc::now() - chrono::Duration::hours(2);
        let stale_id = stale.run_id;
        reg.create(stale).await.unwrap();

        let mut fresh = new_run("review-pr");
        fresh.status = RunStatus::Running;
        reg.create(fresh).await.unwrap();

        let stuck = reg.find_stuck(Utc::now(), chrono::Duration::minutes(30)).await.unwrap();
        assert_eq!(stuck, vec![stale_id]);
    }

    #[tokio::test]
    async fn find_by_session_returns_the_most_recent_run_for_that_session() {
        let (reg, _dir) = open_test_registry().await;
        let session_id = Uuid::new_v4();
        let mut run = new_run("review-pr");
        run.session_id = session_id;
        reg.create(run).await.unwrap();

        let found = reg.find_by_session(session_id).await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().session_id, session_id);
        assert!(reg.find_by_session(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reopening_the_database_marks_unfinished_runs_as_orphaned_failures() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("wfo.db");
        let run_id;
        {
            let reg = Registry::open(db_path.clone()).await.unwrap();
            let run = new_run("review-pr");
            run_id = run.run_id;
            reg.create(run).await.unwrap();
            reg.transition(run_id, RunStatus::Running, Utc::now()).await.unwrap();
        }
        let reg = Registry::open(db_path.clone()).await.unwrap();
        let run = reg.read(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.unwrap().kind, "orphaned");
    }
}
