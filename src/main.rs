use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

mod actions;
mod app;
mod cli;
mod config;
mod console;
mod error;
mod executor;
mod history;
mod models;
mod ssh_service;

use actions::CommandBuilder;
use cli::{Cli, Runner};
use config::ConfigManager;
use console::{Console, TerminalConsole};
use executor::ProcessExecutor;

const LOG_ENV_VAR: &str = "OPS_LOG";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            1
        }
    };

    // a pending stdin read would otherwise keep the runtime alive
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let manager = ConfigManager::new()?;

    if let Err(err) = init_logging(&manager.log_dir()) {
        eprintln!("Warning: file logging disabled: {:#}", err);
    }
    debug!("Starting with config {:?}", manager.get_config_path());

    let builder = CommandBuilder::new().context("Action registry is inconsistent")?;
    let console: Arc<dyn Console> = Arc::new(TerminalConsole::new());
    let executor = Arc::new(ProcessExecutor::new(console.clone()));

    Runner::new(manager, builder, console, executor)
        .run(cli.command)
        .await
}

/// One append-only log file per day under `log_dir`.
fn init_logging(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create {}", log_dir.display()))?;

    let log_file = log_dir.join(format!("ops_{}.log", Local::now().format("%Y%m%d")));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("Failed to open {}", log_file.display()))?;

    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(format!("{}=info", env!("CARGO_CRATE_NAME"))));

    fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(file)
        .try_init()
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    Ok(())
}
