//! pi_mood - Raspberry Pi Mood Buttons Binary
//!
//! Runs the button daemon until SIGINT or SIGTERM.

use anyhow::Context;
use clap::{Parser, Subcommand};
use pi_mood::{lifecycle, Config, DefaultPinController, InfluxClient, DEFAULT_CONFIG_PATH};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "pi_mood")]
#[command(about = "Record mood button presses to InfluxDB and flash an LED")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Austin Couch")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the YAML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "debug")]
    quiet: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Watch the buttons (default)
    Run,

    /// Validate the configuration, print it and exit
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli)?;

    match &cli.command {
        Some(Commands::Check) => check_command(&cli),
        Some(Commands::Run) | None => run_command(&cli).await,
    }
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = if cli.debug {
        Level::DEBUG
    } else if cli.quiet {
        Level::WARN
    } else {
        Level::INFO
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    Config::from_file(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))
}

fn check_command(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

async fn run_command(cli: &Cli) -> anyhow::Result<()> {
    info!("Starting pi_mood {}", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli)?;

    let store = InfluxClient::connect(&config.influxdb)
        .await
        .context("Failed to prepare the InfluxDB database")?;

    let shutdown = lifecycle::shutdown_signal().context("Failed to install signal handlers")?;
    let controller = DefaultPinController::new().context("Failed to open GPIO")?;

    #[cfg(not(feature = "gpio"))]
    tracing::warn!("GPIO support not compiled in; using the in-memory controller");

    let stats = lifecycle::serve(
        controller,
        &config,
        Arc::new(store),
        shutdown,
    )
    .await
    .context("Failed to start button monitoring")?;

    if let Some(stats) = stats {
        info!(
            "Stopped after {} presses ({} bounces ignored, {} unmapped edges)",
            stats.accepted, stats.debounced, stats.unmapped
        );
    }

    Ok(())
}
