use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use strum::Display;

use super::dto::ProviderErrorEnvelope;
use super::retry::parse_retry_after;
use super::transport::{TransportError, TransportResponse};

/// Longest slice of a raw body quoted in an error message.
const MAX_BODY_EXCERPT: usize = 500;

/// Markers in a provider's 400 that mean "structured output mode not supported".
const SCHEMA_MODE_MARKERS: &[&str] = &["response_format", "json_schema", "schema"];

/// Stable classification of everything that can go wrong talking to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum CompletionErrorKind {
    #[strum(serialize = "ConfigError")]
    #[serde(rename = "ConfigError")]
    Config,
    BadRequest,
    #[strum(serialize = "ValidationError")]
    #[serde(rename = "ValidationError")]
    Validation,
    RateLimited,
    #[strum(serialize = "UpstreamError")]
    #[serde(rename = "UpstreamError")]
    Upstream,
    Timeout,
    #[strum(serialize = "NetworkError")]
    #[serde(rename = "NetworkError")]
    Network,
    InvalidResponse,
    #[strum(serialize = "UnknownError")]
    #[serde(rename = "UnknownError")]
    Unknown,
}

impl CompletionErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            CompletionErrorKind::RateLimited
                | CompletionErrorKind::Upstream
                | CompletionErrorKind::Network
        )
    }
}

/// Classified failure of a completion call.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CompletionError {
    pub kind: CompletionErrorKind,
    pub message: String,
    pub status_code: Option<u16>,
    pub request_id: Option<String>,
    pub retry_after: Option<Duration>,
    pub details: Option<serde_json::Value>,
}

impl CompletionError {
    pub fn new(kind: CompletionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            request_id: None,
            retry_after: None,
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(CompletionErrorKind::BadRequest, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(CompletionErrorKind::Validation, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(CompletionErrorKind::InvalidResponse, message)
    }

    pub fn timed_out(after: Duration) -> Self {
        Self::new(
            CompletionErrorKind::Timeout,
            format!("request timed out after {}ms", after.as_millis()),
        )
    }

    /// Cancelled through the caller's token.
    pub fn aborted() -> Self {
        Self::new(CompletionErrorKind::Timeout, "request aborted")
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Whether a `BadRequest` looks like the provider refusing schema-constrained output.
    ///
    /// Substring heuristic over provider text; providers do not standardize this.
    pub fn mentions_schema_mode(&self) -> bool {
        if self.kind != CompletionErrorKind::BadRequest {
            return false;
        }
        let message = self.message.to_ascii_lowercase();
        let metadata = self
            .details
            .as_ref()
            .map(|d| d.to_string().to_ascii_lowercase())
            .unwrap_or_default();
        SCHEMA_MODE_MARKERS
            .iter()
            .any(|marker| message.contains(marker) || metadata.contains(marker))
    }

    /// Diagnostic summary persisted alongside a failed job.
    pub fn to_details(&self) -> serde_json::Value {
        json!({
            "type": self.kind,
            "statusCode": self.status_code,
            "requestId": self.request_id,
            "retryable": self.is_retryable(),
        })
    }
}

impl From<TransportError> for CompletionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => {
                CompletionError::new(CompletionErrorKind::Timeout, err.to_string())
            }
            TransportError::Connect(_) | TransportError::Other(_) => {
                CompletionError::new(CompletionErrorKind::Network, err.to_string())
            }
        }
    }
}

/// Classify a non-success HTTP response.
pub fn classify_status(response: &TransportResponse) -> CompletionError {
    let envelope = serde_json::from_str::<ProviderErrorEnvelope>(&response.body).ok();
    classify(response.status, envelope.as_ref(), response)
}

/// Classify an error envelope that arrived with a 2xx status.
///
/// Uses the envelope's own code; without one the failure is treated as upstream.
pub fn classify_embedded(envelope: &ProviderErrorEnvelope, response: &TransportResponse) -> CompletionError {
    let status = envelope.error.status_code().unwrap_or(502);
    classify(status, Some(envelope), response)
}

fn classify(
    status: u16,
    envelope: Option<&ProviderErrorEnvelope>,
    response: &TransportResponse,
) -> CompletionError {
    let kind = match status {
        400 | 404 | 422 => CompletionErrorKind::BadRequest,
        401 | 403 => CompletionErrorKind::Config,
        408 => CompletionErrorKind::Timeout,
        409 | 429 => CompletionErrorKind::RateLimited,
        500..=599 => CompletionErrorKind::Upstream,
        _ => CompletionErrorKind::Unknown,
    };

    let message = envelope
        .and_then(|env| env.error.message.clone())
        .filter(|m| !m.trim().is_empty())
        .or_else(|| body_excerpt(&response.body))
        .unwrap_or_else(|| format!("provider returned HTTP {status}"));

    let mut err = CompletionError::new(kind, message);
    err.status_code = Some(status);
    err.request_id = response.header("x-request-id").map(str::to_string);
    err.details = envelope.and_then(|env| env.error.metadata.clone());
    if kind == CompletionErrorKind::RateLimited {
        err.retry_after = response
            .header("retry-after")
            .and_then(|value| parse_retry_after(value, Utc::now()));
    }
    err
}

fn body_excerpt(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_BODY_EXCERPT).collect())
}
