// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use wfo_registry::{ErrorInfo, RunStatus};

use crate::orchestrator::Orchestrator;

const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Spawns the background task that finds runs whose heartbeat has gone
/// silent and either cancels their live process or, if none is tracked
/// (a true orphan, e.g. after a restart race), marks them failed directly.
/// Never touches a run already in a terminal state.
pub fn spawn_reaper(orchestrator: Arc<Orchestrator>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            interval.tick().await;
            let threshold = chrono::Duration::seconds(orchestrator.config().stuck_threshold_sec as i64);
            let stuck = match orchestrator.registry().find_stuck(Utc::now(), threshold).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(error = %e, "reaper failed to query stuck runs");
                    continue;
                }
            };
            if stuck.is_empty() {
                continue;
            }

            let active_ids = orchestrator.active_ids();
            for run_id in stuck {
                if active_ids.contains(&run_id) {
                    info!(%run_id, "reaper cancelling stuck run");
                    orchestrator.cancel_stuck(run_id).await;
                } else {
                    info!(%run_id, "reaper marking orphaned stuck run as failed");
                    if let Err(e) = orchestrator
                        .registry()
                        .set_error(run_id, ErrorInfo { kind: "stuck".into(), message: "heartbeat stopped and no process is tracking this run".into(), phase: None })
                        .await
                    {
                        warn!(%run_id, error = %e, "failed to record stuck error");
                        continue;
                    }
                    if let Err(e) = orchestrator.registry().transition(run_id, RunStatus::Failed, Utc::now()).await {
                        warn!(%run_id, error = %e, "failed to mark stuck run as failed");
                    }
                }
            }
        }
    })
}
