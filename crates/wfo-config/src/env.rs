// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Environment-variable overlay applied on top of the merged YAML layers.
//! This is the final, highest-priority layer: every variable has a safe
//! default, so a deployment with no config files and no env vars still runs.

use std::env;

use crate::OrchestratorConfig;

fn parse_env<T: std::str::FromStr>(name: &str, into: &mut T) {
    if let Ok(raw) = env::var(name) {
        if let Ok(v) = raw.parse() {
            *into = v;
        }
    }
}

pub fn apply_env_overrides(config: &mut OrchestratorConfig) {
    parse_env("MAX_CONCURRENT_RUNS", &mut config.max_concurrent_runs);
    parse_env("RUN_DEFAULT_TIMEOUT_SEC", &mut config.run_default_timeout_sec);
    parse_env("INACTIVITY_TIMEOUT_SEC", &mut config.inactivity_timeout_sec);
    parse_env("STUCK_THRESHOLD_SEC", &mut config.stuck_threshold_sec);
    if let Ok(root) = env::var("WORKSPACE_ROOT") {
        config.workspace_root = root;
    }
    parse_env("AUTO_COMMIT_ENABLED", &mut config.auto_commit_enabled);
    if let Ok(bind) = env::var("ORCHESTRATOR_HTTP_BIND") {
        config.http_bind = bind;
    }
    if let Ok(dir) = env::var("ORCHESTRATOR_DATA_DIR") {
        config.data_dir = dir;
    }
}
