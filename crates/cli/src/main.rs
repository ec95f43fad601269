// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! codemachine: thin CLI over the agent pipeline core.
//!
//! Argument parsing and bootstrap only; everything of substance lives in
//! the library crates.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "codemachine", about = "Run AI coding agents with fallback across providers")]
struct Cli {
    /// Project directory (defaults to the current directory).
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single agent step headless.
    Run {
        /// Agent id (drives tier and preset lookups).
        agent: String,
        /// Prompt text.
        prompt: String,
        /// Explicit engine for this step.
        #[arg(long)]
        engine: Option<String>,
        /// Model override.
        #[arg(long)]
        model: Option<String>,
        /// Preset name (built-in or from engine-config.json).
        #[arg(long)]
        preset: Option<String>,
        /// Disable falling back to other engines.
        #[arg(long)]
        no_fallback: bool,
        /// Abort the step after this many seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// List registered engines and their authentication state.
    Engines,
    /// Show active rate-limit cooldowns.
    Limits,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = std::env::var("CODEMACHINE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let project = match cli.project {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    match cli.command {
        Command::Run {
            agent,
            prompt,
            engine,
            model,
            preset,
            no_fallback,
            timeout_secs,
        } => {
            commands::run(commands::RunArgs {
                project,
                agent,
                prompt,
                engine,
                model,
                preset,
                no_fallback,
                timeout_secs,
            })
            .await
        }
        Command::Engines => commands::engines(project).await,
        Command::Limits => commands::limits(project),
    }
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
