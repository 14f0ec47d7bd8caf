// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use wfo_http::build_router;
use wfo_orchestrator::{spawn_reaper, Orchestrator};
use wfo_registry::Registry;
use wfo_workspace::WorkspaceManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::ShowConfig => {
            let config = wfo_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Commands::Completions { shell } => {
            cli::print_completions(*shell);
            Ok(())
        }
        Commands::Serve { bind, base_repo, db_path, agent_program } => {
            serve(&cli, bind.clone(), base_repo.clone(), db_path.clone(), agent_program.clone()).await
        }
    }
}

/// Assembles the registry, workspace manager, orchestrator and reaper, then
/// binds the HTTP listener and blocks until SIGINT/SIGTERM.
///
/// All decisions live in the `wfo-*` crates; this function only wires
/// constructors together in the order they depend on each other.
async fn serve(
    cli: &Cli,
    bind_override: Option<String>,
    base_repo_override: Option<std::path::PathBuf>,
    db_path_override: Option<std::path::PathBuf>,
    agent_program_override: Option<String>,
) -> anyhow::Result<()> {
    let mut config = wfo_config::load(cli.config.as_deref())?;
    if let Some(bind) = bind_override {
        config.http_bind = bind;
    }
    if let Some(agent_program) = agent_program_override {
        config.agent_program = agent_program;
    }

    let data_dir = std::path::PathBuf::from(&config.data_dir);
    std::fs::create_dir_all(&data_dir).with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let base_repo = base_repo_override
        .or_else(|| config.base_repository_path.as_ref().map(std::path::PathBuf::from))
        .context("base repository path not configured: set base_repository_path or pass --base-repo")?;
    let workspace_root = data_dir.join("workspaces");
    let db_path = db_path_override.unwrap_or_else(|| data_dir.join("wfo.db"));

    let registry = Arc::new(Registry::open(db_path).await.context("opening run registry")?);
    let workspaces = Arc::new(WorkspaceManager::open(&base_repo, &workspace_root).context("opening workspace manager")?);
    let agent_program = config.agent_program.clone();
    let orchestrator = Arc::new(Orchestrator::new(config.clone(), registry, workspaces, agent_program));
    let _reaper = spawn_reaper(orchestrator.clone());

    let router = build_router(orchestrator);
    let listener = tokio::net::TcpListener::bind(&config.http_bind)
        .await
        .with_context(|| format!("binding {}", config.http_bind))?;
    info!(bind = %config.http_bind, "starting workflow orchestrator");

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async { tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler") };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry().with(fmt::layer().with_target(false)).with(filter).try_init();
}
