//! CLI argument definitions for DAWN.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// DAWN -- self-hosted voice/chat assistant server.
#[derive(Parser)]
#[command(
    name = "dawn",
    version,
    about = "DAWN -- self-hosted voice/chat assistant server",
    long_about = "Routes user utterances through language models, dispatches the tools they \
                  invoke to local handlers and satellite devices, and keeps durable per-user \
                  conversation history."
)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, short, global = true, default_value = "dawn.toml")]
    pub config: PathBuf,

    /// Data directory for the conversation store.
    #[arg(long, global = true, default_value = "data")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the assistant server (message-bus bridge, sessions, store).
    Serve,

    /// Chat interactively against the configured backend.
    Chat,

    /// Compact the conversation store (rate-limited to once per day).
    Vacuum,

    /// Dump recent audit-log rows as JSON lines.
    Audit {
        /// Maximum number of rows to print, newest first.
        #[arg(long, short, default_value_t = 100)]
        limit: u32,
    },
}
