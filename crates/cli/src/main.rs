mod cli;
mod commands;
mod repl;
mod terminal;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use bunseki_core::config::load_dotenv;
use bunseki_core::{AppConfig, HttpAnalyticsClient, SessionContext};

use crate::cli::{CliArgs, Command};
use crate::terminal::Terminal;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    load_dotenv();
    let args = CliArgs::parse();
    let terminal = Terminal::new();

    // Load config: file, then env, then flags
    let mut config = AppConfig::load(args.config.as_deref().map(Path::new))
        .context("failed to load configuration")?;
    args.apply_overrides(&mut config);
    config.log_summary();

    // Templates are local files; no project or token needed.
    let command = match args.command.unwrap_or(Command::Chat) {
        Command::Templates { action } => return commands::templates(&terminal, &config, action),
        other => other,
    };

    let client = HttpAnalyticsClient::from_config(&config).context("failed to create API client")?;
    let mut ctx =
        SessionContext::new(Arc::new(client), config).context("failed to start session")?;
    info!(parent = %ctx.parent(), "session started");

    match command {
        Command::Chat => repl::run(&mut ctx, &terminal).await,
        Command::Agents { action } => commands::agents(&mut ctx, &terminal, action).await,
        Command::Templates { .. } => Ok(()),
    }
}
