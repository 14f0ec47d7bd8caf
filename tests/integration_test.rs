// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Exercises the assembled service (registry + workspace manager + orchestrator
//! + HTTP router) end to end against a fake agent CLI, rather than a single module.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use wfo_config::{OrchestratorConfig, WorkflowDefinition};
use wfo_orchestrator::Orchestrator;
use wfo_registry::Registry;
use wfo_workspace::WorkspaceManager;

fn write_agent_script(dir: &std::path::Path) -> String {
    let path = dir.join("fake-agent.sh");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "#!/bin/sh").unwrap();
    writeln!(
        f,
        r#"cat <<'EOF'
{{"type":"system","subtype":"init","session_id":"s","model":"m","tools":[]}}
{{"type":"assistant","message":{{"content":[{{"type":"text","text":"working on it"}}]}}}}
{{"type":"result","success":true,"total_cost_usd":0.02,"num_turns":2,"duration_ms":10,"usage":{{"input_tokens":10,"output_tokens":6,"cache_creation_input_tokens":0,"cache_read_input_tokens":0}},"result":"done"}}
EOF
"#
    )
    .unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path.display().to_string()
}

fn init_repo(dir: &std::path::Path) {
    let repo = git2::Repository::init(dir).unwrap();
    std::fs::write(dir.join("README.md"), "hello").unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(std::path::Path::new("README.md")).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = git2::Signature::now("test", "test@example.com").unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn a_run_submitted_over_http_streams_through_to_a_completed_status() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().join("base");
    std::fs::create_dir_all(&base).unwrap();
    init_repo(&base);
    let agent_program = write_agent_script(tmp.path());

    let mut config = OrchestratorConfig::default();
    config.workflows.insert(
        "triage".into(),
        WorkflowDefinition { system_prompt: "prompts/triage.md".into(), default_tools: Vec::new(), allow_external_repo: false, default_persistent: false },
    );

    let registry = Arc::new(Registry::open(tmp.path().join("wfo.db")).await.unwrap());
    let workspaces = Arc::new(WorkspaceManager::open(&base, &tmp.path().join("workspaces")).unwrap());
    let orchestrator = Arc::new(Orchestrator::new(config, registry, workspaces, agent_program));
    let _reaper = wfo_orchestrator::spawn_reaper(orchestrator.clone());
    let app = wfo_http::build_router(orchestrator);

    let start_req = Request::builder()
        .method("POST")
        .uri("/runs")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "workflow_name": "triage",
                "message": "look into this failure",
                "temp_workspace": true,
                "persistent": false,
            })
            .to_string(),
        ))
        .unwrap();
    let resp = app.clone().oneshot(start_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let started = body_json(resp).await;
    let run_id = started["run_id"].as_str().unwrap().to_string();

    for _ in 0..150 {
        let status_req = Request::builder().method("GET").uri(format!("/runs/{run_id}/status")).body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(status_req).await.unwrap();
        let status = body_json(resp).await;
        if status["status"] == "completed" {
            assert_eq!(status["turns"], 2);
            assert_eq!(status["input_tokens"], 10);
            assert_eq!(status["final_result"]["success"], true);

            let list_req = Request::builder().method("GET").uri("/runs?workflow_name=triage").body(Body::empty()).unwrap();
            let resp = app.oneshot(list_req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            let runs = body_json(resp).await;
            assert_eq!(runs.as_array().unwrap().len(), 1);
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("run did not reach completed status in time");
}
