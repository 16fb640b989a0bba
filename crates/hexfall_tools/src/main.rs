//! Hexfall - Development Tools

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hexfall-tools")]
#[command(about = "Development tools for Hexfall")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate era and terrain data files
    Validate {
        /// Era RON files to check
        #[arg(required = true)]
        eras: Vec<PathBuf>,

        /// Optional terrain table RON file
        #[arg(long)]
        terrain: Option<PathBuf>,
    },
}

fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { eras, terrain } => {
            let era_refs: Vec<&Path> = eras.iter().map(PathBuf::as_path).collect();
            tracing::info!("Validating {} era file(s)", era_refs.len());
            match hexfall_tools::validate::validate_data(&era_refs, terrain.as_deref()) {
                Ok(()) => tracing::info!("Validation passed"),
                Err(e) => {
                    tracing::error!("Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}
