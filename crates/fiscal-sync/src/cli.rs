//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

/// fiscal-sync - inspect and replay the offline fiscal document queue
#[derive(Parser, Debug)]
#[command(name = "fiscal-sync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration directory (defaults to ~/.fiscal-sync)
    #[arg(long, global = true, env = "FISCAL_SYNC_CONFIG_DIR")]
    pub config_dir: Option<Utf8PathBuf>,

    /// Queue storage directory (defaults to <config-dir>/queue)
    #[arg(long, global = true, env = "FISCAL_SYNC_QUEUE_DIR")]
    pub queue_dir: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect and maintain the operation queue
    #[command(subcommand)]
    Queue(QueueCommands),

    /// Replay pending operations against the API
    Sync(SyncArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

// Queue commands
#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// Show counts by status
    Stats(QueueStatsArgs),

    /// List queued operations in processing order
    List(QueueListArgs),

    /// Remove operations from the queue
    Clear(QueueClearArgs),

    /// Remove a single operation
    Remove(QueueRemoveArgs),
}

#[derive(Args, Debug)]
pub struct QueueStatsArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct QueueListArgs {
    /// Only show operations with this status (pending, processing, completed, failed, conflict)
    #[arg(long)]
    pub status: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct QueueClearArgs {
    /// Only remove completed operations
    #[arg(long, conflicts_with = "failed")]
    pub completed: bool,

    /// Only remove failed operations
    #[arg(long)]
    pub failed: bool,
}

#[derive(Args, Debug)]
pub struct QueueRemoveArgs {
    /// Operation id
    pub id: String,
}

// Sync command
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// API base URL (overrides configuration)
    #[arg(long, env = "FISCAL_SYNC_BASE_URL")]
    pub base_url: Option<String>,

    /// Health endpoint probed before syncing
    #[arg(long, default_value = "/health")]
    pub health_path: String,

    /// Maximum number of passes to run
    #[arg(long, default_value_t = 100)]
    pub max_passes: usize,

    /// Output the summary as JSON
    #[arg(long)]
    pub json: bool,
}

// Config commands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show(ConfigShowArgs),

    /// Print the configuration and queue directories
    Path,
}

#[derive(Args, Debug)]
pub struct ConfigShowArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
