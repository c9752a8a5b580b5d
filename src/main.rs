mod bridge;
mod cli;
mod config;
mod models;
mod remote;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use config::Config;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?.with_overrides(&cli);

    // mpris_server::Player is !Send, so the bridge runs on a
    // current-thread runtime inside a LocalSet.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => local.block_on(&runtime, bridge::run(config)),
        Commands::Status => runtime.block_on(cli::status(&config)),
        Commands::Check => runtime.block_on(cli::check(&config)),
    }
}
