// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use crate::spawn::Supervision;

const GRACE_PERIOD: Duration = Duration::from_secs(10);
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum TerminationOutcome {
    Exited(std::process::ExitStatus),
    Unkillable,
}

impl Supervision {
    /// Close stdin, SIGTERM the process group, wait, SIGKILL, wait again.
    /// Sends a final SIGKILL after the kill-grace window regardless, to
    /// catch any survivor that ignored the first one.
    pub async fn terminate(&mut self) -> TerminationOutcome {
        self.stdin.lock().await.take();

        unsafe {
            libc::kill(-self.pgid, libc::SIGTERM);
        }

        if let Ok(Ok(status)) = tokio::time::timeout(GRACE_PERIOD, self.wait()).await {
            return TerminationOutcome::Exited(status);
        }

        unsafe {
            libc::kill(-self.pgid, libc::SIGKILL);
        }

        match tokio::time::timeout(KILL_GRACE_PERIOD, self.wait()).await {
            Ok(Ok(status)) => TerminationOutcome::Exited(status),
            _ => {
                unsafe {
                    libc::kill(-self.pgid, libc::SIGKILL);
                }
                TerminationOutcome::Unkillable
            }
        }
    }
}
