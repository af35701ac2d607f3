//! fiscal-sync - operator CLI for the fiscal document offline queue
//!
//! Inspects and maintains a file-backed operation queue and replays it
//! against the fiscal API.

mod cli;
mod commands;
mod output;
mod utils;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls crypto provider (required for rustls 0.23+)
    // This must be done before any TLS operations
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let ctx = utils::Context::from_cli(&cli)?;
    match cli.command {
        Commands::Queue(cmd) => commands::queue::run(cmd, &ctx).await,
        Commands::Sync(args) => commands::sync::run(args, &ctx).await,
        Commands::Config(cmd) => commands::config::run(cmd, &ctx),
    }
}

/// Initialize tracing with appropriate verbosity
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}
