//! framecast CLI
//!
//! Drives capture sessions against the simulated platform and manages
//! configuration.
//!
//! # Usage
//!
//! ```bash
//! # Capture 120 simulated frames, resizing halfway through
//! framecast simulate --frames 120 --resize-at 60 --resize 1280x720
//!
//! # Show the effective configuration
//! framecast config --show
//!
//! # List supported pixel formats
//! framecast formats
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// framecast - screen-capture frame pooling playground
#[derive(Parser)]
#[command(name = "framecast")]
#[command(version)]
#[command(about = "Screen-capture frame buffer pooling on a simulated platform", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a capture session against the simulated platform
    #[command(alias = "sim")]
    Simulate(commands::SimulateArgs),

    /// Manage the configuration file
    Config(commands::ConfigArgs),

    /// List pixel formats and their fallbacks
    Formats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(format!("framecast={}", level).parse()?),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Simulate(args) => commands::simulate(args).await?,
        Commands::Config(args) => commands::config(args).await?,
        Commands::Formats => commands::formats().await?,
    }

    Ok(())
}
