//! Dedicated-server availability sniper - Entry Point

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use snipe_bot::{AppConfig, Application};

/// Watches a dedicated-server plan and orders it when it becomes available.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via SNIPE_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, Default)]
enum Command {
    /// Start the control server and, if configured, monitoring (default)
    #[default]
    Run,
    /// Run one signed availability check and print the result
    Check,
    /// Print the offset between the local and the vendor clock
    Time,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    snipe_telemetry::init_logging()?;

    info!("Starting snipe-bot v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > SNIPE_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("SNIPE_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = AppConfig::load(&config_path)?;
    info!(resource = %config.resource, endpoint = %config.credentials.endpoint, "Configuration loaded");

    let app = Application::new(config)?;

    match args.command.unwrap_or_default() {
        Command::Run => app.run().await?,
        Command::Check => {
            let entries = app.check_once().await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Command::Time => {
            let offset = app.time_offset().await?;
            println!("vendor clock offset: {offset:+}s");
        }
    }

    Ok(())
}
