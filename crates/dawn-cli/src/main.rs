//! CLI entry point for DAWN.
//!
//! Provides the `dawn` command with the `serve` subcommand (the assistant
//! server), an interactive `chat` loop, and one-shot maintenance
//! subcommands (`vacuum`, `audit`).
//!
//! Exit codes: 0 clean shutdown, 1 configuration error, 2 unrecoverable
//! runtime error.

mod chat;
mod cli;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dawn_agent::tools::register_builtin_tools;
use dawn_agent::{Orchestrator, SessionManager};
use dawn_bus::MqttBridge;
use dawn_command::{CancelToken, CommandExecutor, CommandRouter, ToolRegistry};
use dawn_config::DawnConfig;
use dawn_store::{ConversationStore, Database, UserStore};

use crate::cli::{Cli, Commands};

/// How often the store maintenance pass runs while serving.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if missing).
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let config = match DawnConfig::load(&cli.config) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!(error = %e, path = %cli.config.display(), "configuration error");
            return ExitCode::from(1);
        }
    };

    let result = match cli.command {
        Commands::Serve => cmd_serve(&cli, config).await,
        Commands::Chat => cmd_chat(&cli, config).await,
        Commands::Vacuum => cmd_vacuum(&cli, config).await,
        Commands::Audit { limit } => cmd_audit(&cli, config, limit).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal runtime error");
            ExitCode::from(2)
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

fn db_path(cli: &Cli, config: &DawnConfig) -> std::path::PathBuf {
    config
        .store
        .path
        .clone()
        .unwrap_or_else(|| cli.data_dir.join("dawn.db"))
}

// ---------------------------------------------------------------------------
// Runtime assembly
// ---------------------------------------------------------------------------

/// Everything a running DAWN instance is made of.
struct Runtime {
    db: Database,
    sessions: Arc<SessionManager>,
    registry: Arc<ToolRegistry>,
    executor: Arc<CommandExecutor>,
    shutdown: CancelToken,
}

/// Assemble the full stack: store, sessions, registry with built-in tools,
/// message-bus bridge, and executor.
async fn build_runtime(cli: &Cli, config: &Arc<DawnConfig>) -> Result<Runtime> {
    let db = Database::open_and_migrate(db_path(cli, config))
        .await
        .context("failed to open conversation store")?;

    let sessions = Arc::new(SessionManager::new());
    let registry = Arc::new(ToolRegistry::new());
    let shutdown = CancelToken::new();

    register_builtin_tools(&registry, &sessions, config, &shutdown)
        .context("failed to register built-in tools")?;
    registry.refresh(config);

    let router = Arc::new(CommandRouter::new());
    let bridge = MqttBridge::connect(config, Arc::clone(&router))
        .await
        .context("failed to start the message-bus bridge")?;

    let executor = Arc::new(CommandExecutor::new(
        Arc::clone(&registry),
        router,
        Arc::new(bridge.clone()),
        Arc::clone(config),
    ));
    bridge.enable_remote_dispatch(Arc::clone(&executor));

    Ok(Runtime {
        db,
        sessions,
        registry,
        executor,
        shutdown,
    })
}

// ---------------------------------------------------------------------------
// Subcommand: serve
// ---------------------------------------------------------------------------

async fn cmd_serve(cli: &Cli, config: Arc<DawnConfig>) -> Result<()> {
    info!("starting DAWN server");
    let runtime = build_runtime(cli, &config).await?;

    // Background maintenance, never on the request path.
    let maintenance_db = runtime.db.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
        ticker.tick().await; // the first tick fires immediately, skip it
        loop {
            ticker.tick().await;
            match dawn_store::run_maintenance(&maintenance_db).await {
                Ok(report) => info!(
                    login_attempts = report.login_attempts_purged,
                    audit_rows = report.audit_rows_purged,
                    auth_sessions = report.auth_sessions_purged,
                    "maintenance pass done"
                ),
                Err(e) => warn!(error = %e, "maintenance pass failed"),
            }
        }
    });

    info!(tools = runtime.registry.len(), "DAWN server running");

    tokio::select! {
        _ = runtime.shutdown.cancelled() => {
            info!("shutdown tool fired, exiting");
        }
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            info!("interrupt received, exiting");
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: chat
// ---------------------------------------------------------------------------

async fn cmd_chat(cli: &Cli, config: Arc<DawnConfig>) -> Result<()> {
    let runtime = build_runtime(cli, &config).await?;
    let quota = config.store.max_conversations_per_user;

    let ctx = chat::ChatContext {
        config,
        orchestrator: Orchestrator::new(Arc::clone(&runtime.executor)),
        sessions: Arc::clone(&runtime.sessions),
        conversations: ConversationStore::new(runtime.db.clone(), quota),
        users: UserStore::new(runtime.db.clone()),
    };

    chat::run(ctx).await
}

// ---------------------------------------------------------------------------
// Subcommand: vacuum
// ---------------------------------------------------------------------------

async fn cmd_vacuum(cli: &Cli, config: Arc<DawnConfig>) -> Result<()> {
    let db = Database::open_and_migrate(db_path(cli, &config))
        .await
        .context("failed to open conversation store")?;

    match dawn_store::vacuum(&db).await {
        Ok(()) => {
            info!("store compacted");
            Ok(())
        }
        Err(e @ dawn_store::StoreError::RateLimited { .. }) => {
            warn!("{e}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Subcommand: audit
// ---------------------------------------------------------------------------

async fn cmd_audit(cli: &Cli, config: Arc<DawnConfig>, limit: u32) -> Result<()> {
    let db = Database::open_and_migrate(db_path(cli, &config))
        .await
        .context("failed to open conversation store")?;

    let rows = dawn_store::dump_audit(&db, limit).await?;
    for row in rows {
        println!("{}", serde_json::to_string(&row)?);
    }
    Ok(())
}
