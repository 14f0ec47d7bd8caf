// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::debug;
use wfo_events::ParseError;

const LINE_BUFFER_CAP: usize = 1024 * 1024;
const STDERR_TAIL_CAP_BYTES: usize = 10 * 1024 * 1024;
const STDOUT_CHANNEL_CAP: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn child process: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

/// A spawned child and the pipes/tasks that drain it.
///
/// The stdout line stream is returned separately from `spawn()` rather than
/// stored here: `Supervision` is typically shared behind a lock so `stdin`
/// writes and `terminate()` can reach it from another task, and a `Receiver`
/// held behind that same lock would make every `recv().await` block that
/// task's stdin/terminate callers for as long as the child stays quiet.
pub struct Supervision {
    child: Child,
    pub pgid: i32,
    pub stdin: Arc<tokio::sync::Mutex<Option<ChildStdin>>>,
    pub stderr_tail: Arc<Mutex<Vec<String>>>,
}

impl Supervision {
    /// Spawns `spec` in its own process group so the whole subtree (shells,
    /// language runtimes the child forks) can be signalled as one unit.
    /// Returns the supervision handle plus the stdout line stream, owned
    /// separately so a caller can keep the latter off any shared lock.
    pub fn spawn(spec: SpawnSpec) -> Result<(Self, mpsc::Receiver<Result<String, ParseError>>), SpawnError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(spec.env.iter().cloned())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .process_group(0);

        let mut child = cmd.spawn()?;
        let pgid = child.id().expect("spawned child always has a pid before reaping") as i32;

        let stdin = child.stdin.take().expect("stdin was piped");
        let mut stdout = child.stdout.take().expect("stdout was piped");
        let mut stderr = child.stderr.take().expect("stderr was piped");

        let (tx, rx) = mpsc::channel(STDOUT_CHANNEL_CAP);
        tokio::spawn(async move {
            let mut acc = wfo_events::LineAccumulator::new(LINE_BUFFER_CAP);
            let mut buf = [0u8; 8192];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]);
                        for line in acc.feed(&chunk) {
                            if tx.send(line).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        let stderr_tail = Arc::new(Mutex::new(Vec::new()));
        let tail_for_task = stderr_tail.clone();
        tokio::spawn(async move {
            let mut acc = wfo_events::LineAccumulator::new(LINE_BUFFER_CAP);
            let mut buf = [0u8; 8192];
            let mut total = 0usize;
            loop {
                match stderr.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]);
                        for line in acc.feed(&chunk) {
                            if let Ok(line) = line {
                                total += line.len();
                                let mut tail = tail_for_task.lock().expect("stderr tail mutex poisoned");
                                tail.push(line);
                                while total > STDERR_TAIL_CAP_BYTES && !tail.is_empty() {
                                    total -= tail.remove(0).len();
                                }
                            }
                        }
                    }
                }
            }
        });

        debug!(pgid, program = %spec.program, "child process spawned");

        let supervision = Supervision { child, pgid, stdin: Arc::new(tokio::sync::Mutex::new(Some(stdin))), stderr_tail };
        Ok((supervision, rx))
    }

    /// Awaits natural exit without signalling anything.
    pub async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }

    pub(crate) fn inner_child(&mut self) -> &mut Child {
        &mut self.child
    }
}
