// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use wfo_stream::Snapshot;
use wfo_supervisor::Supervision;
use wfo_workspace::Workspace;

use crate::request::InputFormat;

pub const RECENT_STDOUT_CAP: usize = 50;

/// Everything the orchestrator needs to reach a run that is currently
/// executing. Lives in the active index only while its child process runs.
pub struct ActiveRun {
    pub supervision: Arc<tokio::sync::Mutex<Supervision>>,
    pub snapshot_rx: watch::Receiver<Snapshot>,
    pub workspace: Workspace,
    pub input_format: InputFormat,
    pub recent_stdout: Arc<Mutex<VecDeque<String>>>,
    /// Set by [`Cancel`](crate::orchestrator::Orchestrator::cancel) before
    /// terminating, so the completion handler knows the exit wasn't natural.
    pub cancelled: Arc<AtomicBool>,
}

impl ActiveRun {
    pub fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub fn push_recent(buf: &Arc<Mutex<VecDeque<String>>>, line: String) {
    let mut buf = buf.lock().expect("recent stdout buffer mutex poisoned");
    if buf.len() >= RECENT_STDOUT_CAP {
        buf.pop_front();
    }
    buf.push_back(line);
}
