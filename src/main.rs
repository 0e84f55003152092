//! Stemsync CLI
//!
//! Command-line interface for the stemsync playback core.

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::info;

use stemsync::cli::{commands, Cli, Commands};
use stemsync::EngineConfig;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    info!("Stemsync v{}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Some(cmd) => handle_command(cmd, &config),
        None => {
            println!("Stemsync v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands, config: &EngineConfig) -> anyhow::Result<()> {
    match cmd {
        Commands::Snap { time, grid } => commands::snap(time, grid)?,
        Commands::Grid { start, end, grid } => commands::grid(start, end, grid)?,
        Commands::Chord { frame } => commands::chord(&frame)
            .with_context(|| format!("chord detection failed for {}", frame.display()))?,
        Commands::Cache { dir, action } => commands::cache(config, dir, action)?,
        #[cfg(feature = "http")]
        Commands::Prefetch { urls, dir } => commands::prefetch(config, dir, &urls)?,
        Commands::Simulate {
            stems,
            seconds,
            duration,
            drift,
            fps,
        } => commands::simulate(config, &stems, seconds, duration, drift, fps)?,
    }
    Ok(())
}
