//! netenrich - Registry enrichment for scanner network ranges
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use netenrich::cli::{Cli, Commands};
use netenrich::config::{Config, ConfigManager};
use netenrich::error::EnrichResult;
use std::process::ExitCode;
use tracing::warn;
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

async fn run() -> EnrichResult<()> {
    let cli = Cli::parse();

    let manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    // The config command must stay usable when the file is broken
    let (config, load_error) = match manager.load().await {
        Ok(config) => (config, None),
        Err(e) if matches!(cli.command, Commands::Config(_)) => (Config::default(), Some(e)),
        Err(e) => return Err(e),
    };

    init_logging(cli.verbose, &config.general.log_format);
    if let Some(e) = load_error {
        warn!("{}; showing defaults", e);
    }

    match cli.command {
        Commands::Enrich(args) => netenrich::cli::commands::enrich(args, &config).await,
        Commands::Progress(args) => netenrich::cli::commands::progress(args, &config).await,
        Commands::Cache(args) => netenrich::cli::commands::cache(args, &config).await,
        Commands::Config(args) => netenrich::cli::commands::config(args, &config, &manager).await,
    }
}

/// 0 = warn, 1 = info, 2+ = debug; logs go to stderr so stdout stays data
fn init_logging(verbose: u8, format: &str) {
    let filter = match verbose {
        0 => EnvFilter::new("netenrich=warn"),
        1 => EnvFilter::new("netenrich=info"),
        _ => EnvFilter::new("netenrich=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
