// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

#[derive(Parser, Debug)]
#[command(
    name = "wfo",
    about = "HTTP service that launches, supervises, and reports on autonomous coding-agent workflow runs",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file (overrides auto-discovery)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP service.
    Serve {
        /// Address to bind the HTTP listener to.
        #[arg(long, env = "WFO_BIND")]
        bind: Option<String>,

        /// Base repository path runs are cloned/worktreed from.
        #[arg(long, env = "WFO_BASE_REPO")]
        base_repo: Option<PathBuf>,

        /// Path to the SQLite registry database.
        #[arg(long, env = "WFO_DB_PATH")]
        db_path: Option<PathBuf>,

        /// Path to the agent CLI binary to spawn for each run.
        #[arg(long, env = "WFO_AGENT_PROGRAM")]
        agent_program: Option<String>,
    },

    /// Print the effective merged configuration and exit.
    ShowConfig,

    /// Generate a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "wfo", &mut std::io::stdout());
}
