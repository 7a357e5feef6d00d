//! Hangar - worker volume, cache and artifact manager
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use hangar::cli::{Cli, Commands};
use hangar::config::ConfigManager;
use hangar::error::HangarResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> HangarResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    // 0 = warn, 1 = info, 2+ = debug; general.verbose acts as -v
    let level = match cli.verbose.max(u8::from(config.general.verbose)) {
        0 => "hangar=warn",
        1 => "hangar=info",
        _ => "hangar=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if config.general.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .init();
    }

    debug!("Using config at {}", config_manager.path().display());

    match cli.command {
        Commands::Serve(args) => hangar::cli::commands::serve(args, &config).await,
        Commands::Sweep(args) => hangar::cli::commands::sweep(args, &config).await,
        Commands::Status(args) => hangar::cli::commands::status(args, &config).await,
        Commands::Config(args) => {
            hangar::cli::commands::config(args, &config, &config_manager).await
        }
    }
}
