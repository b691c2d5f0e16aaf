//! Config command - manage configuration files

use anyhow::{Context, Result};
use clap::Args;
use framecast_core::config::{sample_config, CaptureConfig, ConfigFile};

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Show the current configuration (default)
    #[arg(long, conflicts_with_all = ["init", "path"])]
    pub show: bool,

    /// Generate a default config file
    #[arg(long, conflicts_with = "path")]
    pub init: bool,

    /// Overwrite an existing file with --init
    #[arg(short, long, requires = "init")]
    pub force: bool,

    /// Show the path to the config file
    #[arg(long)]
    pub path: bool,
}

/// Run config command
pub async fn config(args: ConfigArgs) -> Result<()> {
    if args.path {
        let path = ConfigFile::default_path();
        println!("{}", path.display());
        if path.exists() {
            println!("(file exists)");
        } else {
            println!("(file does not exist)");
        }
    } else if args.init {
        init(args.force)?;
    } else {
        show()?;
    }

    Ok(())
}

fn init(force: bool) -> Result<()> {
    let path = ConfigFile::default_path();

    if path.exists() && !force {
        println!("Configuration file already exists: {}", path.display());
        println!();
        println!("Use --force to overwrite, or edit the existing file.");
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
    }

    // Sample keeps the comments that `ConfigFile::save` would drop
    std::fs::write(&path, sample_config()).context("Failed to write config file")?;

    println!("Created configuration file: {}", path.display());
    println!();
    println!("Edit this file to customize framecast settings.");
    Ok(())
}

fn show() -> Result<()> {
    let path = ConfigFile::default_path();
    let file = ConfigFile::load().context("Failed to load config file")?;

    if path.exists() {
        println!("Configuration file: {}\n", path.display());
    } else {
        println!("No configuration file found at: {}", path.display());
        println!("Showing defaults. Create a config file with:");
        println!("  framecast config --init\n");
    }

    let rendered = toml::to_string_pretty(&file).context("Failed to render configuration")?;
    println!("{}", rendered);

    let capture = CaptureConfig::from_file(&file);
    if let Err(e) = capture.validate_strict() {
        println!("Error: {}", e);
    }
    for warning in capture.validate() {
        println!("Warning: {}", warning);
    }

    Ok(())
}
