use clap::{Parser, Subcommand};

mod commands;
pub use commands::*;

#[derive(Parser)]
#[command(name = "tidal-mpris")]
#[command(about = "MPRIS bridge for the Tidal-Chrome web API")]
#[command(version)]
pub struct Cli {
    /// Base URL of the Tidal-Chrome web API
    #[arg(long, global = true, env = "TIDAL_MPRIS_HOST")]
    pub host: Option<String>,

    /// Poll interval in milliseconds
    #[arg(long, global = true)]
    pub interval: Option<u64>,

    /// Per-request timeout in milliseconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bridge (default)
    Run,

    /// Show what the remote player is currently playing
    Status,

    /// Check that the remote web API is reachable
    Check,
}
