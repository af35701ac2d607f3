//! Queued operation model
//!
//! A [`QueuedOperation`] is a mutating call that could not complete when it
//! was made. The payload is opaque to the queue; encoding the domain object
//! is the caller's business.

use base64::Engine;
use chrono::{DateTime, Utc};
use fiscal_core::types::ConflictStrategyKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Kind of mutation carried by an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
    Batch,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Batch => "batch",
        }
    }

    /// HTTP method used when none is given explicitly
    pub fn default_method(&self) -> HttpMethod {
        match self {
            Self::Create | Self::Batch => HttpMethod::Post,
            Self::Update => HttpMethod::Put,
            Self::Delete => HttpMethod::Delete,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing priority, highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Sort rank; lower is processed first
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        };
        f.write_str(name)
    }
}

/// Lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Conflict,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Conflict => "conflict",
        }
    }

    /// Whether the queue state machine allows moving to `to`
    ///
    /// ```text
    /// pending    -> processing | failed
    /// processing -> pending | completed | failed | conflict
    /// conflict   -> pending | completed | failed
    /// ```
    pub fn can_transition_to(&self, to: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Pending)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Conflict)
                | (Conflict, Pending)
                | (Conflict, Completed)
                | (Conflict, Failed)
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "conflict" => Ok(Self::Conflict),
            other => Err(format!("unknown operation status: {other}")),
        }
    }
}

/// HTTP methods an operation can replay with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Only mutating calls are worth queueing
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Get)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the operation is replayed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub resource: String,
    pub endpoint: String,
    pub method: HttpMethod,
}

/// Bookkeeping fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_attempt: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub next_retry: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub device_id: Option<String>,
}

/// The last error recorded against an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<u16>,
    pub at: DateTime<Utc>,
}

impl OperationError {
    pub fn from_api_error(err: &fiscal_core::ApiError, at: DateTime<Utc>) -> Self {
        Self {
            message: err.to_string(),
            code: err.error_code().map(str::to_string),
            status: err.status_code(),
            at,
        }
    }
}

/// Both sides of a conflict, kept for manual resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictData {
    #[serde(with = "payload_base64")]
    pub local_version: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub server_version: Option<serde_json::Value>,
    pub strategy: ConflictStrategyKind,
}

/// Options for [`OperationQueue::enqueue`](crate::OperationQueue::enqueue)
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: Priority,
    /// Defaults to `/{resource}`
    pub endpoint: Option<String>,
    /// Defaults to the operation type's method
    pub method: Option<HttpMethod>,
    pub user_id: Option<String>,
    pub device_id: Option<String>,
}

impl EnqueueOptions {
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}

/// A deferred mutating call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: String,
    pub operation_type: OperationType,
    pub priority: Priority,
    pub target: Target,
    #[serde(with = "payload_base64")]
    pub payload: Vec<u8>,
    /// SHA-256 of the payload, hex encoded; fixed at creation
    pub checksum: String,
    pub status: OperationStatus,
    pub metadata: OperationMetadata,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<OperationError>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub conflict: Option<ConflictData>,
    /// Resubmit with the force-override marker (client-wins)
    #[serde(default)]
    pub force_override: bool,
    /// Insertion order, breaks ties between equal creation times
    pub sequence: u64,
}

impl QueuedOperation {
    pub(crate) fn new(
        operation_type: OperationType,
        resource: &str,
        payload: Vec<u8>,
        options: EnqueueOptions,
        now: DateTime<Utc>,
        sequence: u64,
    ) -> Self {
        let checksum = checksum(&payload);
        let method = options
            .method
            .unwrap_or_else(|| operation_type.default_method());
        let endpoint = options
            .endpoint
            .unwrap_or_else(|| format!("/{}", resource.trim_start_matches('/')));

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation_type,
            priority: options.priority,
            target: Target {
                resource: resource.to_string(),
                endpoint,
                method,
            },
            payload,
            checksum,
            status: OperationStatus::Pending,
            metadata: OperationMetadata {
                created_at: now,
                updated_at: now,
                attempt_count: 0,
                last_attempt: None,
                next_retry: None,
                user_id: options.user_id,
                device_id: options.device_id,
            },
            error: None,
            conflict: None,
            force_override: false,
            sequence,
        }
    }

    /// Pending and due at `now`
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == OperationStatus::Pending
            && self.metadata.next_retry.is_none_or(|at| at <= now)
    }

    /// Whether the stored payload still matches its creation checksum
    pub fn verify_checksum(&self) -> bool {
        checksum(&self.payload) == self.checksum
    }

    /// Processing order: priority rank, then creation time, then insertion order
    pub(crate) fn order_key(&self) -> (u8, DateTime<Utc>, u64) {
        (self.priority.rank(), self.metadata.created_at, self.sequence)
    }

    /// Identity used for deduplication
    pub(crate) fn dedup_key(&self) -> (OperationType, &str, Vec<u8>) {
        (
            self.operation_type,
            self.target.resource.as_str(),
            canonical_payload(&self.payload),
        )
    }
}

/// SHA-256 of `payload`, hex encoded
pub fn checksum(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    format!("{:x}", hasher.finalize())
}

/// JSON payloads compare by value, so key order and whitespace do not
/// defeat deduplication. Anything else compares byte for byte.
pub(crate) fn canonical_payload(payload: &[u8]) -> Vec<u8> {
    match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(value) => serde_json::to_vec(&value).unwrap_or_else(|_| payload.to_vec()),
        Err(_) => payload.to_vec(),
    }
}

mod payload_base64 {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
