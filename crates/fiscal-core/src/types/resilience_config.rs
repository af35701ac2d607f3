//! Runtime configuration types for the resilience core
//!
//! These types control circuit breaking, retries, the offline queue, sync
//! scheduling and the HTTP transport. Every field has a default so partial
//! YAML files and environment overrides can be layered on top.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Complete resilience configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResilienceConfig {
    /// Circuit breaker thresholds and windows
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Intra-call retry policy
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Offline queue limits and cross-pass retry budget
    #[serde(default)]
    pub queue: QueueConfig,

    /// Sync scheduling
    #[serde(default)]
    pub sync: SyncConfig,

    /// HTTP transport settings
    #[serde(default)]
    pub http: HttpConfig,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close the circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Per-call timeout in milliseconds
    #[serde(default = "default_call_timeout")]
    pub timeout_ms: u64,

    /// How long the circuit stays open before probing, in milliseconds
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_ms: u64,

    /// Background health-check tick in milliseconds (disabled when unset)
    #[serde(default)]
    pub health_check_interval_ms: Option<u64>,
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Option<Duration> {
        self.health_check_interval_ms.map(Duration::from_millis)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_ms: default_call_timeout(),
            reset_timeout_ms: default_reset_timeout(),
            health_check_interval_ms: None,
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_success_threshold() -> u32 {
    2
}
fn default_call_timeout() -> u64 {
    10_000 // 10 seconds
}
fn default_reset_timeout() -> u64 {
    60_000 // 1 minute
}

/// Retry policy for a single call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound for any single delay in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Growth factor applied after each failed attempt
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Randomisation applied to each delay
    #[serde(default)]
    pub jitter: JitterStrategy,

    /// HTTP status codes worth retrying
    #[serde(default = "default_retryable_status_codes")]
    pub retryable_status_codes: BTreeSet<u16>,

    /// Error codes worth retrying
    #[serde(default = "default_retryable_error_codes")]
    pub retryable_error_codes: BTreeSet<String>,

    /// Optional time box for each attempt in milliseconds
    #[serde(default)]
    pub attempt_timeout_ms: Option<u64>,
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: JitterStrategy::default(),
            retryable_status_codes: default_retryable_status_codes(),
            retryable_error_codes: default_retryable_error_codes(),
            attempt_timeout_ms: None,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_retryable_status_codes() -> BTreeSet<u16> {
    [408, 425, 429, 500, 502, 503, 504].into_iter().collect()
}
fn default_retryable_error_codes() -> BTreeSet<String> {
    crate::error::TRANSIENT_NETWORK_CODES
        .iter()
        .map(|code| code.to_string())
        .collect()
}

/// Jitter strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum JitterStrategy {
    /// Use the computed delay as is
    None,

    /// Uniform between zero and the delay (default)
    #[default]
    Full,

    /// Half the delay plus a uniform share of the other half
    Equal,

    /// Uniform between the base delay and three times the previous delay
    Decorrelated,
}

/// Offline queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QueueConfig {
    /// Maximum number of operations held
    #[serde(default = "default_max_queue_size")]
    pub max_size: usize,

    /// Operations drained per sync pass
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Reject semantically identical pending operations
    #[serde(default = "default_deduplicate")]
    pub deduplicate: bool,

    /// Sync passes an operation may fail before it is evicted
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First cross-pass retry delay in milliseconds
    #[serde(default = "default_queue_retry_base")]
    pub retry_base_delay_ms: u64,

    /// Cap on the cross-pass retry delay in milliseconds
    #[serde(default = "default_queue_retry_max")]
    pub retry_max_delay_ms: u64,

    /// Storage key the queue snapshot is written under
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
}

impl QueueConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_queue_size(),
            batch_size: default_batch_size(),
            deduplicate: default_deduplicate(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_queue_retry_base(),
            retry_max_delay_ms: default_queue_retry_max(),
            storage_key: default_storage_key(),
        }
    }
}

fn default_max_queue_size() -> usize {
    1000
}
fn default_batch_size() -> usize {
    10
}
fn default_deduplicate() -> bool {
    true
}
fn default_max_retries() -> u32 {
    5
}
fn default_queue_retry_base() -> u64 {
    5_000
}
fn default_queue_retry_max() -> u64 {
    300_000 // 5 minutes
}
fn default_storage_key() -> String {
    "offline_queue".to_string()
}

/// Sync scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SyncConfig {
    /// Periodic sync interval in milliseconds
    #[serde(default = "default_processing_interval")]
    pub processing_interval_ms: u64,

    /// Connectivity poll interval in milliseconds
    #[serde(default = "default_network_check_interval")]
    pub network_check_interval_ms: u64,

    /// Delay between going online and starting a pass, in milliseconds
    #[serde(default = "default_online_debounce")]
    pub online_debounce_ms: u64,

    /// How write conflicts are reconciled
    #[serde(default)]
    pub conflict_strategy: ConflictStrategyKind,
}

impl SyncConfig {
    pub fn processing_interval(&self) -> Duration {
        Duration::from_millis(self.processing_interval_ms)
    }

    pub fn network_check_interval(&self) -> Duration {
        Duration::from_millis(self.network_check_interval_ms)
    }

    pub fn online_debounce(&self) -> Duration {
        Duration::from_millis(self.online_debounce_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            processing_interval_ms: default_processing_interval(),
            network_check_interval_ms: default_network_check_interval(),
            online_debounce_ms: default_online_debounce(),
            conflict_strategy: ConflictStrategyKind::default(),
        }
    }
}

fn default_processing_interval() -> u64 {
    30_000
}
fn default_network_check_interval() -> u64 {
    5_000
}
fn default_online_debounce() -> u64 {
    1_000
}

/// Conflict reconciliation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategyKind {
    /// Resubmit the local change with a force-override marker
    ClientWins,

    /// Drop the local change and accept the remote state (default)
    #[default]
    ServerWins,

    /// Combine local and remote state with a caller-supplied function
    Merge,

    /// Park the operation until resolved externally
    Manual,
}

impl std::fmt::Display for ConflictStrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ClientWins => "client-wins",
            Self::ServerWins => "server-wins",
            Self::Merge => "merge",
            Self::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// HTTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpConfig {
    /// Base URL of the fiscal API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,

    /// User agent string for HTTP requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_http_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.fiscal.local".to_string()
}
fn default_http_timeout() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!(
        "fiscal-sync/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resilience_config_defaults() {
        let config = ResilienceConfig::default();
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.success_threshold, 2);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.retry.max_delay_ms, 30000);
        assert_eq!(config.retry.backoff_multiplier, 2.0);
        assert_eq!(config.queue.max_size, 1000);
        assert!(config.queue.deduplicate);
        assert_eq!(config.sync.conflict_strategy, ConflictStrategyKind::ServerWins);
    }

    #[test]
    fn test_retry_policy_default_sets() {
        let policy = RetryPolicy::default();
        assert!(policy.retryable_status_codes.contains(&503));
        assert!(!policy.retryable_status_codes.contains(&404));
        assert!(policy.retryable_error_codes.contains("ECONNRESET"));
        assert!(policy.attempt_timeout().is_none());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "retry:\n  max-attempts: 5\n  jitter: decorrelated\nqueue:\n  batch-size: 3\n";
        let config: ResilienceConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.jitter, JitterStrategy::Decorrelated);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.queue.batch_size, 3);
        assert_eq!(config.queue.max_size, 1000);
    }

    #[test]
    fn test_conflict_strategy_serialization() {
        let config = SyncConfig {
            conflict_strategy: ConflictStrategyKind::ClientWins,
            ..Default::default()
        };
        let yaml = serde_yaml_ng::to_string(&config).unwrap();
        assert!(yaml.contains("conflict-strategy: client-wins"));
        assert_eq!(ConflictStrategyKind::Merge.to_string(), "merge");
    }
}
