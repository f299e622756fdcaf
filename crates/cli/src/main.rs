//! Chattermill CLI — the main entry point.
//!
//! Commands:
//! - `onboard` — Write a default configuration file
//! - `chat`    — Run the full pipeline against stdin/stdout
//! - `probe`   — Health-check the configured model backend

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "chattermill",
    about = "Chattermill — adaptive-batching chat mediator",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file (defaults to ~/.chattermill/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Onboard,

    /// Chat through the full pipeline on stdin/stdout
    Chat,

    /// Health-check the configured model backend
    Probe,
}

fn load_config(path: &Option<PathBuf>) -> Result<chattermill_config::AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => chattermill_config::AppConfig::load_path(path)?,
        None => chattermill_config::AppConfig::load()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run(&cli.config).await?,
        Commands::Chat => commands::chat::run(load_config(&cli.config)?).await?,
        Commands::Probe => commands::probe::run(load_config(&cli.config)?).await?,
    }

    Ok(())
}
