// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "kinect-camera")]
#[command(about = "Driver for Kinect-class structured-light depth cameras")]
#[command(version)]
struct Cli {
    /// Settings file (default: ~/.config/kinect-camera/settings.json)
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream from a sensor and publish until Ctrl+C
    Run {
        /// Use physical sensors through libfreenect instead of the simulated one
        #[arg(long)]
        hardware: bool,

        /// Number of simulated sensors attached
        #[arg(long, default_value = "1")]
        devices: usize,

        /// Stop after this many polling steps
        #[arg(short, long)]
        frames: Option<u64>,

        /// Polling rate of the driver
        #[arg(long, default_value = "30")]
        fps: u32,

        /// Alternate color and infrared for intrinsic calibration
        #[arg(long)]
        calibration_mode: bool,

        /// Write PNG snapshots of published images into this directory
        #[arg(long)]
        snapshot_dir: Option<PathBuf>,

        /// Write a snapshot every N frames of each image channel
        #[arg(long, default_value = "30")]
        snapshot_every: u64,
    },

    /// List attached sensors
    List {
        /// Use physical sensors through libfreenect instead of the simulated one
        #[arg(long)]
        hardware: bool,

        /// Number of simulated sensors attached
        #[arg(long, default_value = "1")]
        devices: usize,
    },

    /// Show the calibration in use, optionally writing the factory defaults
    Calibration {
        /// Calibration file (default: ~/.config/kinect-camera/calibration.json)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Write the factory calibration to the file
        #[arg(short, long)]
        write: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=kinect_camera=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            hardware,
            devices,
            frames,
            fps,
            calibration_mode,
            snapshot_dir,
            snapshot_every,
        } => cli::run(cli::RunOptions {
            settings: cli.settings,
            hardware,
            devices,
            frames,
            fps,
            calibration_mode,
            snapshot_dir,
            snapshot_every,
        }),
        Commands::List { hardware, devices } => {
            cli::list_devices(cli.settings, hardware, devices)
        }
        Commands::Calibration { file, write } => cli::calibration(cli.settings, file, write),
    }
}
