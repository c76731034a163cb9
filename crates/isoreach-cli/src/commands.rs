//! CLI command definitions.

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Build engines, calibrate and fetch isochrones for each city
    Run {
        /// Only this city
        #[arg(long)]
        city: Option<String>,

        /// Calibrate again even if cached factors exist
        #[arg(long)]
        force_calibration: bool,
    },

    /// Show cached completeness per city without fetching
    Status {
        /// Only this city
        #[arg(long)]
        city: Option<String>,
    },

    /// Aggregate reachable population for completed cities
    Reach {
        /// Only this city
        #[arg(long)]
        city: Option<String>,
    },

    /// Manage the routing engine
    Engine {
        #[command(subcommand)]
        command: EngineCommands,
    },
}

#[derive(Subcommand)]
pub enum EngineCommands {
    /// Remove engine containers and the build lock
    Stop,
}
