//! isoreach command-line entrypoint.

use clap::Parser;
use std::path::PathBuf;

mod collaborators;
mod commands;
mod config;
mod handlers;
mod pipeline;
mod telemetry;

use commands::{Commands, EngineCommands};
use config::{DEFAULT_CONFIG_PATH, Settings};

#[derive(Parser)]
#[command(name = "isoreach")]
#[command(author, version, about = "Isochrone and population reach batch pipeline", long_about = None)]
struct Cli {
    /// Settings file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Overrides the configured log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)?;
    let level = cli.log_level.as_deref().unwrap_or(&settings.log_level);
    telemetry::init_tracing(level, settings.log_format);

    match cli.command {
        Commands::Run {
            city,
            force_calibration,
        } => handlers::run(settings, city, force_calibration).await?,
        Commands::Status { city } => handlers::status(settings, city).await?,
        Commands::Reach { city } => handlers::reach(settings, city).await?,
        Commands::Engine { command } => match command {
            EngineCommands::Stop => handlers::engine_stop(&settings).await?,
        },
    }

    Ok(())
}
