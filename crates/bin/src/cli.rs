//! CLI argument definitions for the Trellis binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Trellis collaborative document server
#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(about = "Trellis: collaborative document server and storage tools")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the room storage server
    Serve(ServeArgs),
    /// Heal a persisted room file in place
    Repair(RepairArgs),
    /// Show the structure of a persisted room file
    Inspect(InspectArgs),
    /// Check health of a running Trellis server
    Health(HealthArgs),
}

/// Arguments for the serve command
#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(short, long, default_value_t = 3000, env = "TRELLIS_PORT")]
    pub port: u16,

    /// Bind address
    #[arg(long, default_value = "0.0.0.0", env = "TRELLIS_HOST")]
    pub host: String,

    /// Directory holding one `<room>.json` file per room
    #[arg(short = 'D', long, default_value = ".", env = "TRELLIS_DATA_DIR")]
    pub data_dir: PathBuf,
}

/// Arguments for the repair command
#[derive(clap::Args, Debug)]
pub struct RepairArgs {
    /// Room file to repair
    pub path: PathBuf,

    /// Report the repairs without writing the file
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the inspect command
#[derive(clap::Args, Debug)]
pub struct InspectArgs {
    /// Room file to inspect
    pub path: PathBuf,

    /// Print machine-readable JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the health command
#[derive(clap::Args, Debug)]
pub struct HealthArgs {
    /// Base URL of the server to check
    #[arg(default_value = "http://127.0.0.1:3000", env = "TRELLIS_URL")]
    pub url: String,

    /// Timeout in seconds
    #[arg(short, long, default_value_t = 5)]
    pub timeout: u64,
}
