//! leafcache - node-local compute cache for the LeafScan pipeline
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use leafcache::cli::{commands, Cli, Commands};
use leafcache::config::{Config, ConfigManager};
use leafcache::error::LeafResult;
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

async fn run() -> LeafResult<()> {
    let cli = Cli::parse();

    let manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = manager.load().await?;

    init_logging(cli.verbose, &config);
    debug!(path = %manager.path().display(), "Configuration loaded");

    match cli.command {
        Commands::Run(args) => commands::run(args, &config).await,
        Commands::Status(args) => commands::status(args, &config).await,
        Commands::Fetch(args) => commands::fetch(args, &config).await,
        Commands::Gc => commands::gc(&config).await,
        Commands::Reset(args) => commands::reset(args, &config).await,
        Commands::Clear(args) => commands::clear(args, &config).await,
        Commands::Config(args) => commands::config(args, &manager, &config).await,
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `RUST_LOG` wins when set
fn init_logging(verbose: u8, config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("leafcache=warn"),
        1 => EnvFilter::new("leafcache=info"),
        _ => EnvFilter::new("leafcache=debug"),
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
