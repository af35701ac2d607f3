//! HTTP execution collaborator
//!
//! [`HttpTransport`] is the seam between the resilience pipeline and the
//! network. [`ReqwestTransport`] is the production implementation; it turns
//! every failure into the shared [`ApiError`] taxonomy so retry
//! classification and queueing decisions work on typed errors.

use async_trait::async_trait;
use fiscal_core::error::{ApiError, ApiResult};
use fiscal_core::types::HttpConfig;
use fiscal_offline::HttpMethod;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Header marking a client-wins resubmission
pub const FORCE_OVERRIDE_HEADER: &str = "X-Force-Override";

/// Header carrying the operation id on queued replays
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// An outgoing request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    /// Path relative to the transport's base URL, or an absolute URL
    pub path: String,
    pub body: Option<Vec<u8>>,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    /// Attach a raw JSON body
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize `value` as the JSON body
    pub fn with_json<T: Serialize + ?Sized>(self, value: &T) -> ApiResult<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| ApiError::validation(format!("request body is not serializable: {e}")))?;
        Ok(self.with_body(body))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First header value with `name`, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// `METHOD path`, used as the operation label in logs and errors
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// A successful (2xx) response
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    /// Header names are lower-cased
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> ApiResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| ApiError::Http {
            status: self.status,
            message: format!("response body is not valid JSON: {e}"),
            code: Some("INVALID_RESPONSE".to_string()),
            retryable: Some(false),
        })
    }

    /// Body as JSON, or `None` when the body is empty
    pub fn json_value(&self) -> ApiResult<Option<serde_json::Value>> {
        if self.body.is_empty() {
            return Ok(None);
        }
        self.json().map(Some)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Executes HTTP requests
///
/// Implementations return `Ok` only for 2xx responses; everything else is
/// an [`ApiError`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> ApiResult<HttpResponse>;
}

/// Error body returned by the fiscal API
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(alias = "error")]
    message: Option<String>,
    code: Option<String>,
    field: Option<String>,
    retryable: Option<bool>,
    #[serde(alias = "current", alias = "server_version")]
    server_version: Option<serde_json::Value>,
}

/// Map a non-2xx response to the error taxonomy
///
/// 409 becomes [`ApiError::Conflict`] carrying the server's version,
/// 400 and 422 become [`ApiError::Validation`], anything else
/// [`ApiError::Http`] with the body's code and retryable marker.
pub fn error_for_status(status: u16, status_text: &str, body: &[u8]) -> ApiError {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    let message = parsed
        .message
        .clone()
        .unwrap_or_else(|| status_text.to_string());

    match status {
        409 => ApiError::Conflict {
            message,
            server_version: parsed
                .server_version
                .or_else(|| serde_json::from_slice(body).ok()),
        },
        400 | 422 => ApiError::Validation {
            message,
            field: parsed.field,
        },
        _ => ApiError::Http {
            status,
            message,
            code: parsed.code,
            retryable: parsed.retryable,
        },
    }
}

/// [`HttpTransport`] over `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(config: &HttpConfig) -> ApiResult<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ApiError::network("CLIENT_INIT", e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        }
    }

    fn map_send_error(&self, label: &str, err: reqwest::Error) -> ApiError {
        if err.is_timeout() {
            ApiError::timeout(label, self.timeout)
        } else if err.is_connect() {
            ApiError::network("ECONNREFUSED", err.to_string())
        } else {
            ApiError::network("NETWORK_ERROR", err.to_string())
        }
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> ApiResult<HttpResponse> {
        let label = request.label();
        let url = self.url(&request.path);

        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), &url)
            .header("Accept", "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.header("Content-Type", "application/json").body(body);
        }

        tracing::debug!(method = %request.method, url = %url, "sending request");
        let response = builder
            .send()
            .await
            .map_err(|e| self.map_send_error(&label, e))?;

        let status = response.status();
        let status_text = status.canonical_reason().unwrap_or("").to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_send_error(&label, e))?
            .to_vec();

        if !status.is_success() {
            let err = error_for_status(status.as_u16(), &status_text, &body);
            tracing::debug!(url = %url, status = status.as_u16(), error = %err, "request rejected");
            return Err(err);
        }

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text,
            headers,
            body,
        })
    }
}
