use clap::{Parser, Subcommand};
use std::path::PathBuf;
use survey_sync_core::LocalStore;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{ConfigCommand, ImagesCommand, RecordsCommand, SyncCommand};
use config::Config;

#[derive(Parser)]
#[command(name = "survey-sync")]
#[command(version)]
#[command(about = "Inspect and sync the local survey cache", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect cached records
    Records(RecordsCommand),

    /// Pull from and push to the remote API
    Sync(SyncCommand),

    /// Manage survey images
    Images(ImagesCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = Config::load(cli.config)?;
    init_tracing(&config.log_level.value);

    match cli.command {
        Some(Commands::Records(cmd)) => {
            let store = open_store(&config).await?;
            cmd.run(&store).await?;
        }
        Some(Commands::Sync(cmd)) => {
            let store = open_store(&config).await?;
            cmd.run(&store, &config).await?;
        }
        Some(Commands::Images(cmd)) => {
            let store = open_store(&config).await?;
            cmd.run(&store, &config).await?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}

async fn open_store(config: &Config) -> Result<LocalStore, Box<dyn std::error::Error>> {
    tracing::debug!("Opening cache at {}", config.database_path.value.display());
    Ok(LocalStore::open(&config.database_path.value).await?)
}

/// RUST_LOG wins over the configured level.
fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}
