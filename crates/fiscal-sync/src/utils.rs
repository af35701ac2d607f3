//! Shared command helpers

use anyhow::{Context as _, Result};
use camino::Utf8PathBuf;
use fiscal_core::config::HierarchicalConfigLoader;
use fiscal_core::types::{QueueConfig, ResilienceConfig};
use fiscal_offline::{FileStorage, OperationQueue};
use std::sync::Arc;

use crate::cli::Cli;

/// Directories resolved from global flags
#[derive(Debug, Clone)]
pub struct Context {
    pub config_dir: Utf8PathBuf,
    pub queue_dir: Utf8PathBuf,
}

impl Context {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        Self::resolve(cli.config_dir.clone(), cli.queue_dir.clone())
    }

    fn resolve(config_dir: Option<Utf8PathBuf>, queue_dir: Option<Utf8PathBuf>) -> Result<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir,
            None => HierarchicalConfigLoader::default_config_dir()
                .context("Failed to determine configuration directory")?,
        };
        let queue_dir = queue_dir.unwrap_or_else(|| config_dir.join("queue"));
        Ok(Self {
            config_dir,
            queue_dir,
        })
    }

    pub fn load_config(&self) -> Result<ResilienceConfig> {
        HierarchicalConfigLoader::with_dir(self.config_dir.clone())
            .load()
            .context("Failed to load configuration")
    }

    /// Open the file-backed queue
    pub async fn open_queue(&self, config: &QueueConfig) -> Result<OperationQueue> {
        let storage = Arc::new(FileStorage::new(self.queue_dir.clone()));
        OperationQueue::open(config.clone(), storage)
            .await
            .with_context(|| format!("Failed to open queue in {}", self.queue_dir))
    }
}

/// First eight characters of an id
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
