//! CLI Module
//!
//! Command-line front end for grid math, chord classification, cache
//! maintenance and transport simulation.

pub mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Stemsync - synchronized stem playback core
#[derive(Parser, Debug)]
#[command(name = "stemsync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Grid parameters shared by `snap` and `grid`
#[derive(Args, Debug, Clone, Copy)]
pub struct GridArgs {
    /// Tempo in beats per minute
    #[arg(long, default_value_t = 120.0)]
    pub bpm: f64,

    /// Grid subdivision of a whole note (4 = quarter notes)
    #[arg(long, default_value_t = 4)]
    pub division: u32,

    /// Beats per measure
    #[arg(long, default_value_t = 4)]
    pub signature: u32,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Snap a time to the nearest grid position
    #[command(name = "snap")]
    Snap {
        /// Time in seconds
        time: f64,

        #[command(flatten)]
        grid: GridArgs,
    },

    /// List grid lines in [start, end)
    #[command(name = "grid")]
    Grid {
        /// Window start in seconds
        start: f64,

        /// Window end in seconds
        end: f64,

        #[command(flatten)]
        grid: GridArgs,
    },

    /// Classify the chord in a spectral frame (JSON file)
    #[command(name = "chord")]
    Chord {
        /// Path to a JSON spectral frame
        frame: PathBuf,
    },

    /// Inspect or maintain the persistent stem cache
    #[command(name = "cache")]
    Cache {
        /// Cache directory (overrides the config file)
        #[arg(short, long, global = true)]
        dir: Option<PathBuf>,

        #[command(subcommand)]
        action: CacheAction,
    },

    /// Download stems into the cache
    #[cfg(feature = "http")]
    #[command(name = "prefetch")]
    Prefetch {
        /// Stem URLs
        #[arg(required = true)]
        urls: Vec<String>,

        /// Cache directory (overrides the config file)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Play simulated stems and report drift corrections
    #[command(name = "simulate")]
    Simulate {
        /// Comma-separated instrument labels
        #[arg(long, value_delimiter = ',', default_value = "vocals,bass,drums,guitar")]
        stems: Vec<String>,

        /// Seconds of playback to simulate
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,

        /// Stem length in seconds
        #[arg(long, default_value_t = 30.0)]
        duration: f64,

        /// Per-stem playback rate error, applied as 1 + i * drift
        #[arg(long, default_value_t = 0.004)]
        drift: f64,

        /// Simulated display refresh rate
        #[arg(long, default_value_t = 60.0)]
        fps: f64,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum CacheAction {
    /// Show entry counts and size
    Stats,
    /// Delete entries older than the TTL
    ClearExpired,
    /// Delete everything
    Clear,
    /// Delete payload files missing from the index
    Prune,
}
