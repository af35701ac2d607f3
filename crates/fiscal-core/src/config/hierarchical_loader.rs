//! Hierarchical configuration loader with precedence
//!
//! Loads configuration from multiple sources with the following precedence (low to high):
//! 1. Embedded defaults (built into the binary)
//! 2. Global config (~/.fiscal-sync/config.yaml)
//! 3. Environment variables (FISCAL_SYNC_* prefix)
//! 4. CLI flags (handled by caller)

use crate::error::{Error, Result};
use crate::types::{ConflictStrategyKind, JitterStrategy, ResilienceConfig};
use camino::{Utf8Path, Utf8PathBuf};
use rust_embed::RustEmbed;
use serde_yaml_ng::Value;
use std::env;
use std::fs;
use std::str::FromStr;

/// Name of the user configuration file inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Embedded configuration files
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/embedded/config/"]
#[prefix = ""]
struct EmbeddedConfigs;

/// Configuration hierarchy loader
pub struct HierarchicalConfigLoader {
    /// Base directory for configuration files
    config_dir: Utf8PathBuf,
}

impl HierarchicalConfigLoader {
    /// Create a loader rooted at the standard config directory
    pub fn new() -> Result<Self> {
        let config_dir = Self::default_config_dir()?;
        Ok(Self { config_dir })
    }

    /// Create a loader with a custom config directory
    pub fn with_dir(config_dir: Utf8PathBuf) -> Self {
        Self { config_dir }
    }

    /// Get the standard config directory (~/.fiscal-sync)
    pub fn default_config_dir() -> Result<Utf8PathBuf> {
        let home = env::var("HOME")
            .ok()
            .map(std::path::PathBuf::from)
            .or_else(dirs::home_dir)
            .ok_or_else(|| Error::invalid_config("Could not determine home directory"))?;

        Utf8PathBuf::from_path_buf(home.join(".fiscal-sync")).map_err(|p| {
            Error::invalid_config(format!("Non UTF-8 home directory: {}", p.display()))
        })
    }

    /// Load the resilience configuration with hierarchical precedence
    pub fn load(&self) -> Result<ResilienceConfig> {
        let mut merged = Self::load_embedded_value("resilience-defaults.yaml")?;

        let user_config_path = self.config_dir.join(CONFIG_FILE_NAME);
        if user_config_path.exists() {
            let overlay = self.load_yaml_value(&user_config_path)?;
            merge_values(&mut merged, overlay);
        }

        let config: ResilienceConfig = serde_yaml_ng::from_value(merged)?;
        let config = self.apply_env_overrides(config)?;
        validate(&config)?;

        tracing::debug!(config_dir = %self.config_dir, "loaded resilience configuration");
        Ok(config)
    }

    /// Load an embedded configuration file as a raw YAML value
    fn load_embedded_value(filename: &str) -> Result<Value> {
        let embedded_file = EmbeddedConfigs::get(filename).ok_or_else(|| {
            Error::config_not_found(format!("Embedded config not found: {}", filename))
        })?;

        let content = std::str::from_utf8(&embedded_file.data).map_err(|_| {
            Error::invalid_config(format!("Invalid UTF-8 in embedded config: {}", filename))
        })?;

        serde_yaml_ng::from_str(content).map_err(|e| {
            Error::invalid_config(format!(
                "Failed to parse embedded config {}: {}",
                filename, e
            ))
        })
    }

    /// Load a YAML file as a raw value
    fn load_yaml_value(&self, path: &Utf8Path) -> Result<Value> {
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_yaml_ng::from_str(&content)
            .map_err(|e| Error::invalid_config(format!("Failed to parse {}: {}", path, e)))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, mut config: ResilienceConfig) -> Result<ResilienceConfig> {
        if let Some(val) = env_parse::<u32>("FISCAL_SYNC_FAILURE_THRESHOLD")? {
            config.circuit_breaker.failure_threshold = val;
        }
        if let Some(val) = env_parse::<u32>("FISCAL_SYNC_SUCCESS_THRESHOLD")? {
            config.circuit_breaker.success_threshold = val;
        }
        if let Some(val) = env_parse::<u64>("FISCAL_SYNC_RESET_TIMEOUT_MS")? {
            config.circuit_breaker.reset_timeout_ms = val;
        }
        if let Some(val) = env_parse::<u32>("FISCAL_SYNC_MAX_ATTEMPTS")? {
            config.retry.max_attempts = val;
        }
        if let Some(val) = env_parse::<u64>("FISCAL_SYNC_BASE_DELAY_MS")? {
            config.retry.base_delay_ms = val;
        }
        if let Some(val) = env_parse::<u64>("FISCAL_SYNC_MAX_DELAY_MS")? {
            config.retry.max_delay_ms = val;
        }
        if let Ok(val) = env::var("FISCAL_SYNC_JITTER") {
            config.retry.jitter = parse_kebab::<JitterStrategy>(&val, "FISCAL_SYNC_JITTER")?;
        }
        if let Some(val) = env_parse::<usize>("FISCAL_SYNC_QUEUE_MAX_SIZE")? {
            config.queue.max_size = val;
        }
        if let Some(val) = env_parse::<usize>("FISCAL_SYNC_BATCH_SIZE")? {
            config.queue.batch_size = val;
        }
        if let Some(val) = env_parse::<bool>("FISCAL_SYNC_DEDUPLICATE")? {
            config.queue.deduplicate = val;
        }
        if let Some(val) = env_parse::<u32>("FISCAL_SYNC_MAX_RETRIES")? {
            config.queue.max_retries = val;
        }
        if let Some(val) = env_parse::<u64>("FISCAL_SYNC_PROCESSING_INTERVAL_MS")? {
            config.sync.processing_interval_ms = val;
        }
        if let Ok(val) = env::var("FISCAL_SYNC_CONFLICT_STRATEGY") {
            config.sync.conflict_strategy =
                parse_kebab::<ConflictStrategyKind>(&val, "FISCAL_SYNC_CONFLICT_STRATEGY")?;
        }
        if let Ok(val) = env::var("FISCAL_SYNC_BASE_URL") {
            config.http.base_url = val;
        }
        if let Some(val) = env_parse::<u64>("FISCAL_SYNC_HTTP_TIMEOUT_SECS")? {
            config.http.timeout_secs = val;
        }

        Ok(config)
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}

/// Recursively overlay `overlay` onto `base`; mappings merge key by key,
/// anything else replaces.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::invalid_config(format!("{} has an invalid value: {}", name, val))),
        Err(_) => Ok(None),
    }
}

fn parse_kebab<T: serde::de::DeserializeOwned>(val: &str, name: &str) -> Result<T> {
    serde_yaml_ng::from_value(Value::String(val.trim().to_lowercase()))
        .map_err(|_| Error::invalid_config(format!("{} has an invalid value: {}", name, val)))
}

/// Reject configurations the resilience core cannot operate with
fn validate(config: &ResilienceConfig) -> Result<()> {
    if config.circuit_breaker.failure_threshold == 0 {
        return Err(Error::invalid_config(
            "circuit-breaker.failure-threshold must be at least 1",
        ));
    }
    if config.circuit_breaker.success_threshold == 0 {
        return Err(Error::invalid_config(
            "circuit-breaker.success-threshold must be at least 1",
        ));
    }
    if config.retry.max_attempts == 0 {
        return Err(Error::invalid_config("retry.max-attempts must be at least 1"));
    }
    if config.retry.backoff_multiplier < 1.0 {
        return Err(Error::invalid_config(
            "retry.backoff-multiplier must be at least 1.0",
        ));
    }
    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        return Err(Error::invalid_config(
            "retry.base-delay-ms must not exceed retry.max-delay-ms",
        ));
    }
    if config.queue.max_size == 0 || config.queue.batch_size == 0 {
        return Err(Error::invalid_config(
            "queue.max-size and queue.batch-size must be at least 1",
        ));
    }
    Ok(())
}
