//! rmk - incremental build orchestrator
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use rmk::cli::{Cli, Commands};
use rmk::config::ConfigManager;
use rmk::error::RmkResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> RmkResult<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging: 0 = warn, 1 = info (cache traffic), 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("rmk=warn"),
        1 => EnvFilter::new("rmk=info"),
        _ => EnvFilter::new("rmk=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };
    let config = config_manager.load().await?;

    match cli.command {
        Commands::Build(args) => {
            let status = rmk::cli::commands::build(args, &config, cli.verbose > 0).await?;
            Ok(if status.is_ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Config(args) => {
            rmk::cli::commands::config(args, &config_manager, &config).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
