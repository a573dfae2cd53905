//! docbuilder CLI.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "docbuilder")]
#[command(about = "Aggregate documentation from many repositories into one site", long_about = None)]
struct Cli {
    /// Path to the build configuration
    #[arg(long, env = "DOCBUILDER_CONFIG", default_value = "docbuilder.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one build
    Build {
        /// Output directory
        #[arg(long, env = "DOCBUILDER_OUTPUT", default_value = "site")]
        output: PathBuf,
        /// Reuse existing checkouts instead of cloning fresh
        #[arg(long)]
        incremental: bool,
        /// Skip the build when nothing relevant changed
        #[arg(long)]
        skip_unchanged: bool,
    },
    /// Validate the build configuration
    Validate,
    /// Rebuild on an interval until interrupted
    Watch {
        /// Output directory
        #[arg(long, env = "DOCBUILDER_OUTPUT", default_value = "site")]
        output: PathBuf,
        /// Seconds between scheduled builds
        #[arg(long, default_value_t = 300)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Build {
            output,
            incremental,
            skip_unchanged,
        } => commands::build(&cli.config, output, incremental, skip_unchanged).await?,
        Commands::Validate => commands::validate(&cli.config)?,
        Commands::Watch { output, interval } => {
            commands::watch(&cli.config, output, interval).await?
        }
    };
    std::process::exit(code);
}
