// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Plain versioned SQL migrations and row (de)serialization. Everything here
//! is synchronous; callers run it through `spawn_blocking`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::run::{ErrorInfo, FinalResult, Run, RunStatus};

pub fn open(path: &std::path::Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let conn = Connection::open(path)?;
    migrate(&conn)?;
    Ok(conn)
}

fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            run_id                  TEXT PRIMARY KEY,
            workflow_name           TEXT NOT NULL,
            session_id              TEXT NOT NULL,
            session_name            TEXT,
            user_id                 TEXT,
            status                  TEXT NOT NULL,
            created_at              TEXT NOT NULL,
            started_at              TEXT,
            completed_at            TEXT,
            workspace_path          TEXT,
            workspace_persistent    INTEGER NOT NULL DEFAULT 0,
            git_branch              TEXT,
            repository_url          TEXT,
            max_turns               INTEGER,
            timeout_seconds         INTEGER NOT NULL,
            create_pr_on_success    INTEGER NOT NULL DEFAULT 0,
            pr_url                  TEXT,
            turns                   INTEGER NOT NULL DEFAULT 0,
            input_tokens            INTEGER NOT NULL DEFAULT 0,
            output_tokens           INTEGER NOT NULL DEFAULT 0,
            cache_created_tokens    INTEGER NOT NULL DEFAULT 0,
            cache_read_tokens       INTEGER NOT NULL DEFAULT 0,
            cost_usd                REAL NOT NULL DEFAULT 0.0,
            tools_used              TEXT NOT NULL DEFAULT '[]',
            last_heartbeat          TEXT NOT NULL,
            final_result            TEXT,
            error                   TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);
        CREATE INDEX IF NOT EXISTS idx_runs_session_name ON runs(session_name);
        "#,
    )
}

pub fn insert(conn: &Connection, run: &Run) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO runs (
            run_id, workflow_name, session_id, session_name, user_id, status,
            created_at, started_at, completed_at, workspace_path, workspace_persistent,
            git_branch, repository_url, max_turns, timeout_seconds, create_pr_on_success,
            pr_url, turns, input_tokens, output_tokens, cache_created_tokens, cache_read_tokens,
            cost_usd, tools_used, last_heartbeat, final_result, error
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24,?25,?26,?27)",
        params![
            run.run_id.to_string(),
            run.workflow_name,
            run.session_id.to_string(),
            run.session_name,
            run.user_id,
            run.status.as_str(),
            run.created_at.to_rfc3339(),
            run.started_at.map(|t| t.to_rfc3339()),
            run.completed_at.map(|t| t.to_rfc3339()),
            run.workspace_path,
            run.workspace_persistent as i64,
            run.git_branch,
            run.repository_url,
            run.max_turns,
            run.timeout_seconds as i64,
            run.create_pr_on_success as i64,
            run.pr_url,
            run.turns,
            run.input_tokens as i64,
            run.output_tokens as i64,
            run.cache_created_tokens as i64,
            run.cache_read_tokens as i64,
            run.cost_usd,
            serde_json::to_string(&run.tools_used).unwrap(),
            run.last_heartbeat.to_rfc3339(),
            run.final_result.as_ref().map(|f| serde_json::to_string(f).unwrap()),
            run.error.as_ref().map(|e| serde_json::to_string(e).unwrap()),
        ],
    )?;
    Ok(())
}

pub fn update(conn: &Connection, run: &Run) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE runs SET status=?2, started_at=?3, completed_at=?4, workspace_path=?5,
            turns=?6, input_tokens=?7, output_tokens=?8, cache_created_tokens=?9, cache_read_tokens=?10,
            cost_usd=?11, tools_used=?12, last_heartbeat=?13, final_result=?14, error=?15, pr_url=?16
         WHERE run_id=?1",
        params![
            run.run_id.to_string(),
            run.status.as_str(),
            run.started_at.map(|t| t.to_rfc3339()),
            run.completed_at.map(|t| t.to_rfc3339()),
            run.workspace_path,
            run.turns,
            run.input_tokens as i64,
            run.output_tokens as i64,
            run.cache_created_tokens as i64,
            run.cache_read_tokens as i64,
            run.cost_usd,
            serde_json::to_string(&run.tools_used).unwrap(),
            run.last_heartbeat.to_rfc3339(),
            run.final_result.as_ref().map(|f| serde_json::to_string(f).unwrap()),
            run.error.as_ref().map(|e| serde_json::to_string(e).unwrap()),
            run.pr_url,
        ],
    )?;
    Ok(())
}

pub fn find(conn: &Connection, run_id: Uuid) -> rusqlite::Result<Option<Run>> {
    conn.query_row("SELECT * FROM runs WHERE run_id = ?1", params![run_id.to_string()], row_to_run)
        .optional()
}

pub fn find_by_session(conn: &Connection, session_id: Uuid) -> rusqlite::Result<Option<Run>> {
    conn.query_row(
        "SELECT * FROM runs WHERE session_id = ?1 ORDER BY created_at DESC LIMIT 1",
        params![session_id.to_string()],
        row_to_run,
    )
    .optional()
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub status: Option<RunStatus>,
    pub workflow_name: Option<String>,
    pub session_name: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

pub fn list(conn: &Connection, q: &ListQuery, limit: i64, offset: i64) -> rusqlite::Result<Vec<Run>> {
    let mut sql = "SELECT * FROM runs WHERE 1=1".to_string();
    let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some(s) = q.status {
        sql.push_str(" AND status = ?");
        bound.push(Box::new(s.as_str().to_string()));
    }
    if let Some(w) = &q.workflow_name {
        sql.push_str(" AND workflow_name = ?");
        bound.push(Box::new(w.clone()));
    }
    if let Some(n) = &q.session_name {
        sql.push_str(" AND session_name = ?");
        bound.push(Box::new(n.clone()));
    }
    if let Some(since) = q.since {
        sql.push_str(" AND created_at >= ?");
        bound.push(Box::new(since.to_rfc3339()));
    }
    if let Some(until) = q.until {
        sql.push_str(" AND created_at <= ?");
        bound.push(Box::new(until.to_rfc3339()));
    }
    sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");
    bound.push(Box::new(limit));
    bound.push(Box::new(offset));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(bound.iter().map(|b| b.as_ref())), row_to_run)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn find_stuck(conn: &Connection, cutoff: DateTime<Utc>) -> rusqlite::Result<Vec<Uuid>> {
    let mut stmt = conn.prepare("SELECT run_id FROM runs WHERE status = 'running' AND last_heartbeat < ?1")?;
    let rows = stmt.query_map(params![cutoff.to_rfc3339()], |r| r.get::<_, String>(0))?;
    let mut out = Vec::new();
    for r in rows {
        if let Ok(id) = Uuid::parse_str(&r?) {
            out.push(id);
        }
    }
    Ok(out)
}

pub fn mark_orphaned_on_startup(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE runs SET status = 'failed', completed_at = ?1, error = ?2
         WHERE status IN ('pending', 'running')",
        params![
            Utc::now().to_rfc3339(),
            serde_json::to_string(&ErrorInfo { kind: "orphaned".into(), message: "orchestrator restarted while run was active".into(), phase: None }).unwrap(),
        ],
    )
}

fn row_to_run(row: &Row) -> rusqlite::Result<Run> {
    let parse_dt = |s: Option<String>| s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc));

    Ok(Run {
        run_id: Uuid::parse_str(&row.get::<_, String>("run_id")?).unwrap_or_default(),
        workflow_name: row.get("workflow_name")?,
        session_id: Uuid::parse_str(&row.get::<_, String>("session_id")?).unwrap_or_default(),
        session_name: row.get("session_name")?,
        user_id: row.get("user_id")?,
        status: RunStatus::parse(&row.get::<_, String>("status")?).unwrap_or(RunStatus::Failed),
        created_at: parse_dt(row.get("created_at")?).unwrap_or_else(Utc::now),
        started_at: parse_dt(row.get("started_at")?),
        completed_at: parse_dt(row.get("completed_at")?),
        workspace_path: row.get("workspace_path")?,
        workspace_persistent: row.get::<_, i64>("workspace_persistent")? != 0,
        git_branch: row.get("git_branch")?,
        repository_url: row.get("repository_url")?,
        max_turns: row.get::<_, Option<i64>>("max_turns")?.map(|v| v as u32),
        timeout_seconds: row.get::<_, i64>("timeout_seconds")? as u64,
        create_pr_on_success: row.get::<_, i64>("create_pr_on_success")? != 0,
        pr_url: row.get("pr_url")?,
        turns: row.get("turns")?,
        input_tokens: row.get::<_, i64>("input_tokens")? as u64,
        output_tokens: row.get::<_, i64>("output_tokens")? as u64,
        cache_created_tokens: row.get::<_, i64>("cache_created_tokens")? as u64,
        cache_read_tokens: row.get::<_, i64>("cache_read_tokens")? as u64,
        cost_usd: row.get("cost_usd")?,
        tools_used: serde_json::from_str(&row.get::<_, String>("tools_used")?).unwrap_or_default(),
        last_heartbeat: parse_dt(row.get("last_heartbeat")?).unwrap_or_else(Utc::now),
        final_result: row
            .get::<_, Option<String>>("final_result")?
            .and_then(|s| serde_json::from_str::<FinalResult>(&s).ok()),
        error: row.get::<_, Option<String>>("error")?.and_then(|s| serde_json::from_str::<ErrorInfo>(&s).ok()),
    })
}
