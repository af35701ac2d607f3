//! Error types for fiscal-core
//!
//! Two families live here: [`Error`] for configuration loading, and
//! [`ApiError`] for everything that can go wrong while talking to the fiscal
//! API or deferring work for later replay.

use std::time::Duration;

use thiserror::Error;

use crate::circuit::CircuitState;

/// Result type alias using fiscal-core's configuration Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for API calls and queue mutations
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Configuration and IO errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {message}")]
    InvalidConfig { message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

/// Error codes that identify transient network failures
pub const TRANSIENT_NETWORK_CODES: &[&str] = &[
    "ECONNRESET",
    "ETIMEDOUT",
    "ECONNREFUSED",
    "ENOTFOUND",
    "EAI_AGAIN",
    "EPIPE",
    "NETWORK_ERROR",
];

/// Failures surfaced by the resilient API pipeline and the offline queue
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// The request never reached the server or the connection dropped
    #[error("network error ({code}): {message}")]
    Network { code: String, message: String },

    /// A call or attempt exceeded its time budget
    #[error("{operation} timed out after {}ms", timeout.as_millis())]
    Timeout { operation: String, timeout: Duration },

    /// The circuit breaker rejected the call without invoking it
    #[error("circuit '{name}' is {state}; retry after {}ms", retry_after.as_millis())]
    CircuitOpen {
        name: String,
        state: CircuitState,
        retry_after: Duration,
    },

    /// The request was rejected as malformed
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// The server holds a conflicting version of the resource
    #[error("conflict: {message}")]
    Conflict {
        message: String,
        server_version: Option<serde_json::Value>,
    },

    /// Any other non-success HTTP response
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        code: Option<String>,
        retryable: Option<bool>,
    },

    /// The offline queue is at capacity
    #[error("operation queue is full (max {max_size} operations)")]
    QueueFull { max_size: usize },

    /// A semantically identical operation is already pending
    #[error("duplicate of pending operation {existing_id}")]
    DuplicateOperation { existing_id: String },

    /// Reading or writing the queue snapshot failed
    #[error("queue persistence failed: {message}")]
    Persistence { message: String },

    /// No processor is registered for a queued operation
    #[error("no processor registered for {resource}/{operation_type}")]
    ProcessorNotFound {
        resource: String,
        operation_type: String,
    },

    /// The referenced operation does not exist in the queue
    #[error("operation not found: {id}")]
    NotFound { id: String },

    /// A status change the queue state machine does not allow
    #[error("operation {id} cannot move from {from} to {to}")]
    InvalidTransition { id: String, from: String, to: String },
}

impl ApiError {
    /// Create a network error
    pub fn network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>, server_version: Option<serde_json::Value>) -> Self {
        Self::Conflict {
            message: message.into(),
            server_version,
        }
    }

    /// Create an HTTP status error
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            code: None,
            retryable: None,
        }
    }

    /// Create a persistence error
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// HTTP status code carried by the error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Conflict { .. } => Some(409),
            Self::Validation { .. } => Some(400),
            Self::Timeout { .. } => Some(408),
            _ => None,
        }
    }

    /// Machine-readable error code, if any
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Network { code, .. } => Some(code),
            Self::Timeout { .. } => Some("ETIMEDOUT"),
            Self::CircuitOpen { .. } => Some("CIRCUIT_OPEN"),
            Self::Http { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Explicit retryable marker, when the error source set one
    pub fn retryable_flag(&self) -> Option<bool> {
        match self {
            Self::Http { retryable, .. } => *retryable,
            // Classified by error code
            Self::Network { .. } | Self::Timeout { .. } => None,
            // Retrying immediately against an open breaker cannot succeed.
            Self::CircuitOpen { .. } => Some(false),
            Self::Validation { .. }
            | Self::Conflict { .. }
            | Self::QueueFull { .. }
            | Self::DuplicateOperation { .. }
            | Self::Persistence { .. }
            | Self::NotFound { .. }
            | Self::InvalidTransition { .. }
            | Self::ProcessorNotFound { .. } => Some(false),
        }
    }

    /// Whether a failed mutating call may be captured for later replay
    pub fn is_queueable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } | Self::CircuitOpen { .. } => true,
            Self::Http {
                status, retryable, ..
            } => retryable.unwrap_or(false) || *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Whether the error says something about the health of the remote
    /// dependency, as opposed to a rejection of this particular request
    pub fn is_dependency_failure(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Whether this is a conflict response
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether the error came from the circuit breaker rejecting the call
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}
