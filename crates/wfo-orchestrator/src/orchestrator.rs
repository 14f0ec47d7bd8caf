// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};
use uuid::Uuid;

use wfo_config::OrchestratorConfig;
use wfo_events::ParseError;
use wfo_registry::{ErrorInfo, FinalResult, ListFilter, Registry, Run, RunStatus};
use wfo_stream::StreamProcessor;
use wfo_supervisor::{Supervision, SpawnSpec, TerminationOutcome};
use wfo_workspace::{snapshot_changes, WorkspaceManager, WorkspaceRequest};

use crate::active::{push_recent, ActiveRun};
use crate::error::OrchestratorError;
use crate::request::{
    InputFormat, KillResult, ListFilterRequest, MessageReceipt, StartRunRequest, StartRunResponse, StatusDetail, StatusView,
};

const MIN_MAX_TURNS: u32 = 1;
const MAX_MAX_TURNS: u32 = 200;
const MIN_TIMEOUT_SECONDS: u64 = 60;
const MAX_TIMEOUT_SECONDS: u64 = 14400;
const STDIN_ACQUIRE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Glues together the workspace manager, process supervisor, stream
/// processor and registry into the one entry point external callers use.
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    registry: Arc<Registry>,
    workspaces: Arc<WorkspaceManager>,
    active: Arc<Mutex<HashMap<Uuid, ActiveRun>>>,
    concurrency: Arc<Semaphore>,
    agent_program: String,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, registry: Arc<Registry>, workspaces: Arc<WorkspaceManager>, agent_program: String) -> Self {
        let concurrency = Arc::new(Semaphore::new(config.max_concurrent_runs));
        Self {
            config: Arc::new(config),
            registry,
            workspaces,
            active: Arc::new(Mutex::new(HashMap::new())),
            concurrency,
            agent_program,
        }
    }

    pub fn active_run_count(&self) -> usize {
        self.active.lock().expect("active run map mutex poisoned").len()
    }

    pub async fn start_run(&self, req: StartRunRequest) -> Result<StartRunResponse, OrchestratorError> {
        let workflow = self
            .config
            .workflows
            .get(&req.workflow_name)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(format!("unknown workflow '{}'", req.workflow_name)))?;

        if let Some(mt) = req.max_turns {
            if !(MIN_MAX_TURNS..=MAX_MAX_TURNS).contains(&mt) {
                return Err(OrchestratorError::ValidationError(format!("max_turns must be in [{MIN_MAX_TURNS}, {MAX_MAX_TURNS}]")));
            }
        }
        let timeout_seconds = req.timeout_seconds.unwrap_or(self.config.run_default_timeout_sec);
        if !(MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(&timeout_seconds) {
            return Err(OrchestratorError::ValidationError(format!(
                "timeout_seconds must be in [{MIN_TIMEOUT_SECONDS}, {MAX_TIMEOUT_SECONDS}]"
            )));
        }
        if req.temp_workspace && (req.repository_url.is_some() || req.git_branch.is_some()) {
            return Err(OrchestratorError::ValidationError(
                "temp_workspace cannot be combined with git_branch or repository_url".into(),
            ));
        }
        if !workflow.allow_external_repo && req.repository_url.is_some() {
            return Err(OrchestratorError::ValidationError(format!("workflow '{}' does not allow an external repository", req.workflow_name)));
        }

        let session_id = match req.session_id {
            Some(id) => {
                self.registry
                    .find_by_session(id)
                    .await?
                    .ok_or_else(|| OrchestratorError::NotFound(format!("no prior run for session {id}")))?;
                id
            }
            None => Uuid::new_v4(),
        };

        let run_id = Uuid::new_v4();
        let now = Utc::now();
        let run = Run {
            run_id,
            workflow_name: req.workflow_name.clone(),
            session_id,
            session_name: req.session_name.clone(),
            user_id: req.user_id.clone(),
            status: RunStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            workspace_path: None,
            workspace_persistent: req.persistent && !req.temp_workspace,
            git_branch: req.git_branch.clone(),
            repository_url: req.repository_url.clone(),
            max_turns: req.max_turns,
            timeout_seconds,
            create_pr_on_success: req.create_pr_on_success,
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
        };
        self.registry.create(run).await?;

        let workspace = match self
            .workspaces
            .acquire(
                run_id,
                WorkspaceRequest {
                    workflow_name: req.workflow_name.clone(),
                    git_branch: req.git_branch.clone(),
                    repository_url: req.repository_url.clone(),
                    temp_workspace: req.temp_workspace,
                    persistent: req.persistent && !req.temp_workspace,
                },
            )
            .await
        {
            Ok(ws) => ws,
            Err(e) => {
                let orch_err: OrchestratorError = e.into();
                self.registry
                    .set_error(run_id, ErrorInfo { kind: "workspace_error".into(), message: orch_err.to_string(), phase: Some("acquire".into()) })
                    .await?;
                self.registry.transition(run_id, RunStatus::Failed, Utc::now()).await?;
                return Err(orch_err);
            }
        };
        self.registry.set_workspace(run_id, workspace.path.display().to_string()).await?;

        let spec = SpawnSpec {
            program: self.agent_program.clone(),
            args: build_args(&req, &workflow.system_prompt),
            cwd: workspace.path.clone(),
            env: Vec::new(),
        };

        let (supervision, stdout_lines) = match Supervision::spawn(spec) {
            Ok(pair) => pair,
            Err(e) => {
                let _ = self.workspaces.release(&workspace, false).await;
                self.registry
                    .set_error(run_id, ErrorInfo { kind: "spawn_error".into(), message: e.to_string(), phase: Some("spawn".into()) })
                    .await?;
                self.registry.transition(run_id, RunStatus::Failed, Utc::now()).await?;
                return Err(e.into());
            }
        };

        self.registry.transition(run_id, RunStatus::Running, Utc::now()).await?;

        let (processor, snapshot_rx) = StreamProcessor::new();
        let supervision = Arc::new(tokio::sync::Mutex::new(supervision));
        let recent_stdout = Arc::new(Mutex::new(VecDeque::with_capacity(crate::active::RECENT_STDOUT_CAP)));
        let cancelled = Arc::new(AtomicBool::new(false));

        self.active.lock().expect("active run map mutex poisoned").insert(
            run_id,
            ActiveRun {
                supervision: supervision.clone(),
                snapshot_rx,
                workspace: workspace.clone(),
                input_format: req.input_format,
                recent_stdout: recent_stdout.clone(),
                cancelled: cancelled.clone(),
            },
        );

        let permit = self.concurrency.clone().acquire_owned().await.expect("semaphore never closed");
        self.spawn_completion_handler(run_id, supervision, stdout_lines, processor, recent_stdout, cancelled, workspace, now, timeout_seconds, permit);

        Ok(StartRunResponse { run_id, session_id, status: RunStatus::Running, started_at: Some(now) })
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_completion_handler(
        &self,
        run_id: Uuid,
        supervision: Arc<tokio::sync::Mutex<Supervision>>,
        mut stdout_lines: mpsc::Receiver<Result<String, ParseError>>,
        mut processor: StreamProcessor,
        recent_stdout: Arc<Mutex<VecDeque<String>>>,
        cancelled: Arc<AtomicBool>,
        workspace: wfo_workspace::Workspace,
        started_at: DateTime<Utc>,
        timeout_seconds: u64,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) {
        let registry = self.registry.clone();
        let workspaces = self.workspaces.clone();
        let active = self.active.clone();
        let auto_commit_enabled = self.config.auto_commit_enabled;

        tokio::spawn(async move {
            let _permit = permit;
            let deadline = tokio::time::sleep(std::time::Duration::from_secs(timeout_seconds));
            tokio::pin!(deadline);

            // `stdout_lines` is owned by this task alone, never behind the
            // `supervision` lock, so `cancel()`/`inject_message()` can always
            // take that lock promptly instead of waiting on the next line.
            let outcome = loop {
                tokio::select! {
                    biased;
                    _ = &mut deadline => {
                        supervision.lock().await.terminate().await;
                        break CompletionOutcome::TimedOut;
                    }
                    line = stdout_lines.recv() => {
                        match line {
                            Some(Ok(raw)) => {
                                push_recent(&recent_stdout, raw.clone());
                                match wfo_events::parse_line(&raw) {
                                    Ok(event) => {
                                        processor.apply(&event);
                                        let snapshot = processor.snapshot();
                                        if let Err(e) = registry.update_metrics(run_id, snapshot).await {
                                            warn!(%run_id, error = %e, "failed to persist metrics");
                                        }
                                    }
                                    Err(e) => {
                                        processor.record_parse_error(e.to_string());
                                        warn!(%run_id, error = %e, "malformed event line");
                                    }
                                }
                                if let Err(e) = registry.update_heartbeat(run_id, Utc::now()).await {
                                    warn!(%run_id, error = %e, "failed to persist heartbeat");
                                }
                            }
                            Some(Err(e)) => {
                                processor.record_parse_error(e.to_string());
                                warn!(%run_id, error = %e, "oversize event line discarded");
                            }
                            None => {
                                let status = supervision.lock().await.wait().await;
                                break CompletionOutcome::Exited(status);
                            }
                        }
                    }
                }
            };

            active.lock().expect("active run map mutex poisoned").remove(&run_id);

            let snapshot = processor.snapshot();
            let was_cancelled = cancelled.load(std::sync::atomic::Ordering::SeqCst);
            let final_status = match (&outcome, was_cancelled) {
                (_, true) => RunStatus::Killed,
                (CompletionOutcome::TimedOut, false) => RunStatus::Failed,
                (CompletionOutcome::Exited(Ok(status)), false) if status.success() && snapshot.final_success == Some(true) => RunStatus::Completed,
                (CompletionOutcome::Exited(_), false) => RunStatus::Failed,
            };

            if final_status == RunStatus::Completed {
                let workspace_path = workspace.path.clone();
                let (files_created, git_commits) =
                    tokio::task::spawn_blocking(move || snapshot_changes(&workspace_path, started_at)).await.unwrap_or_default();
                if let Err(e) = registry
                    .set_final_result(
                        run_id,
                        FinalResult { success: true, result_text: snapshot.final_result_text.clone(), files_created, git_commits },
                    )
                    .await
                {
                    warn!(%run_id, error = %e, "failed to persist final result");
                }
            } else {
                let (kind, message) = match &outcome {
                    CompletionOutcome::TimedOut => ("timeout".to_string(), "run exceeded its wall-clock timeout".to_string()),
                    CompletionOutcome::Exited(Ok(status)) if was_cancelled => ("killed_by_user".to_string(), format!("terminated by user request (exit {status})")),
                    CompletionOutcome::Exited(Ok(status)) => ("nonzero_exit".to_string(), format!("child exited without a result event (exit {status})")),
                    CompletionOutcome::Exited(Err(e)) => ("wait_failed".to_string(), e.to_string()),
                };
                if let Err(e) = registry.set_error(run_id, ErrorInfo { kind, message, phase: Some("execution".into()) }).await {
                    warn!(%run_id, error = %e, "failed to persist error");
                }
            }

            if let Err(e) = registry.transition(run_id, final_status, Utc::now()).await {
                error!(%run_id, error = %e, "failed to finalize run status");
            }

            let auto_commit = auto_commit_enabled && workspace.persistent && final_status == RunStatus::Completed;
            if let Err(e) = workspaces.release(&workspace, auto_commit).await {
                warn!(%run_id, error = %e, "failed to release workspace");
            }

            info!(%run_id, status = final_status.as_str(), "run finished");
        });
    }

    pub async fn cancel(&self, run_id: Uuid) -> Result<KillResult, OrchestratorError> {
        let supervision = {
            let active = self.active.lock().expect("active run map mutex poisoned");
            active.get(&run_id).map(|a| (a.supervision.clone(), a.cancelled.clone()))
        };

        match supervision {
            Some((supervision, cancelled)) => {
                cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
                let mut sup = supervision.lock().await;
                match sup.terminate().await {
                    TerminationOutcome::Exited(_) => {}
                    TerminationOutcome::Unkillable => {
                        warn!(%run_id, "process survived forceful termination");
                    }
                }
                Ok(KillResult { acknowledged: true })
            }
            None => {
                let run = self.registry.read(run_id).await?;
                if run.status.is_terminal() {
                    Err(OrchestratorError::AlreadyDone)
                } else {
                    self.registry
                        .set_error(run_id, ErrorInfo { kind: "orphaned".into(), message: "run has no supervising process".into(), phase: None })
                        .await?;
                    self.registry.transition(run_id, RunStatus::Failed, Utc::now()).await?;
                    Err(OrchestratorError::Orphaned(run_id))
                }
            }
        }
    }

    pub async fn inject_message(&self, run_id: Uuid, text: String) -> Result<MessageReceipt, OrchestratorError> {
        let (supervision, input_format) = {
            let active = self.active.lock().expect("active run map mutex poisoned");
            let entry = active.get(&run_id).ok_or(OrchestratorError::InvalidState("run is not active".into()))?;
            (entry.supervision.clone(), entry.input_format)
        };

        if input_format != InputFormat::StreamJson {
            return Err(OrchestratorError::InvalidState("run was not started with input_format=stream-json".into()));
        }

        let line = serde_json::json!({ "type": "user", "message": text }).to_string() + "\n";
        let write = async {
            let sup = supervision.lock().await;
            let mut stdin_guard = sup.stdin.lock().await;
            let stdin = stdin_guard.as_mut().ok_or_else(|| OrchestratorError::WorkspaceNotReady(run_id))?;
            stdin.write_all(line.as_bytes()).await.map_err(|e| OrchestratorError::ValidationError(e.to_string()))?;
            Ok::<(), OrchestratorError>(())
        };

        tokio::time::timeout(STDIN_ACQUIRE_TIMEOUT, write)
            .await
            .map_err(|_| OrchestratorError::WorkspaceNotReady(run_id))??;

        Ok(MessageReceipt { message_id: Uuid::new_v4(), injected_at: Utc::now() })
    }

    pub async fn status(&self, run_id: Uuid, detailed: bool) -> Result<StatusView, OrchestratorError> {
        let run = self.registry.read(run_id).await?;
        let live = {
            let active = self.active.lock().expect("active run map mutex poisoned");
            active.get(&run_id).map(|a| (a.snapshot_rx.borrow().clone(), a.recent_stdout.clone()))
        };

        let (turns, input_tokens, output_tokens, cache_created_tokens, cache_read_tokens, cost_usd, tools_used, completion_percentage, detail) =
            match &live {
                Some((snapshot, recent_stdout)) if !run.status.is_terminal() => {
                    let detail = if detailed {
                        Some(StatusDetail {
                            phase: snapshot.phase,
                            last_parse_error: snapshot.last_parse_error.clone(),
                            recent_stdout: recent_stdout.lock().expect("recent stdout mutex poisoned").iter().cloned().collect(),
                        })
                    } else {
                        None
                    };
                    (
                        run.turns.max(snapshot.turns),
                        run.input_tokens.max(snapshot.input_tokens),
                        run.output_tokens.max(snapshot.output_tokens),
                        run.cache_created_tokens.max(snapshot.cache_created_tokens),
                        run.cache_read_tokens.max(snapshot.cache_read_tokens),
                        run.cost_usd.max(snapshot.cost_usd),
                        snapshot.tools_used.clone(),
                        snapshot.completion_percentage(run.max_turns),
                        detail,
                    )
                }
                _ => (
                    run.turns,
                    run.input_tokens,
                    run.output_tokens,
                    run.cache_created_tokens,
                    run.cache_read_tokens,
                    run.cost_usd,
                    run.tools_used.clone(),
                    if run.status.is_terminal() { 100 } else { 0 },
                    None,
                ),
            };

        Ok(StatusView {
            run_id: run.run_id,
            workflow_name: run.workflow_name,
            status: run.status,
            created_at: run.created_at,
            started_at: run.started_at,
            completed_at: run.completed_at,
            turns,
            input_tokens,
            output_tokens,
            cache_created_tokens,
            cache_read_tokens,
            cost_usd,
            tools_used,
            completion_percentage,
            final_result: run.final_result,
            error: run.error,
            detail,
        })
    }

    pub async fn list(&self, filter: ListFilterRequest) -> Result<Vec<Run>, OrchestratorError> {
        Ok(self
            .registry
            .list(ListFilter {
                status: filter.status,
                workflow_name: filter.workflow_name,
                session_name: filter.session_name,
                since: filter.since,
                until: filter.until,
                limit: filter.limit.unwrap_or(50),
                offset: filter.offset.unwrap_or(0),
            })
            .await?)
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub(crate) fn active_ids(&self) -> Vec<Uuid> {
        self.active.lock().expect("active run map mutex poisoned").keys().copied().collect()
    }

    pub(crate) fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Used by the reaper to kill a run whose heartbeat went silent.
    pub(crate) async fn cancel_stuck(&self, run_id: Uuid) {
        if let Err(e) = self.cancel(run_id).await {
            warn!(%run_id, error = %e, "failed to cancel stuck run");
        }
    }
}

enum CompletionOutcome {
    TimedOut,
    Exited(std::io::Result<std::process::ExitStatus>),
}

fn build_args(req: &StartRunRequest, system_prompt_path: &str) -> Vec<String> {
    let mut args = vec!["--system-prompt-file".to_string(), system_prompt_path.to_string(), "--print".to_string(), req.message.clone()];
    if let Some(max_turns) = req.max_turns {
        args.push("--max-turns".to_string());
        args.push(max_turns.to_string());
    }
    if req.input_format == InputFormat::StreamJson {
        args.push("--input-format=stream-json".to_string());
        args.push("--output-format=stream-json".to_string());
    } else {
        args.push("--output-format=stream-json".to_string());
    }
    args
}
