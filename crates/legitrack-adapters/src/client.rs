//! One JSON-over-HTTP client for both upstream APIs.

use async_trait::async_trait;
use legitrack_core::SourceKind;
use legitrack_storage::{FetchError, HttpFetcher};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("{upstream} transport error: {message}")]
    Transport {
        upstream: SourceKind,
        message: String,
        timeout: bool,
    },
    #[error("{upstream} returned http {status}: {message}")]
    HttpStatus {
        upstream: SourceKind,
        status: u16,
        message: String,
    },
    #[error("{upstream} returned invalid JSON: {message}")]
    InvalidJson { upstream: SourceKind, message: String },
    #[error("{upstream} API error: {message}")]
    Api { upstream: SourceKind, message: String },
}

impl UpstreamError {
    pub fn upstream(&self) -> SourceKind {
        match self {
            UpstreamError::Transport { upstream, .. }
            | UpstreamError::HttpStatus { upstream, .. }
            | UpstreamError::InvalidJson { upstream, .. }
            | UpstreamError::Api { upstream, .. } => *upstream,
        }
    }

    fn from_fetch(upstream: SourceKind, err: FetchError) -> Self {
        match err {
            FetchError::HttpStatus { status, body, .. } => {
                let message = serde_json::from_str::<JsonValue>(&body)
                    .ok()
                    .and_then(|v| application_error(&v))
                    .unwrap_or(body);
                UpstreamError::HttpStatus {
                    upstream,
                    status,
                    message,
                }
            }
            other => UpstreamError::Transport {
                upstream,
                timeout: other.is_timeout(),
                message: other.to_string(),
            },
        }
    }
}

/// Fetches one upstream operation and returns the parsed body.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    fn source(&self) -> SourceKind;

    async fn fetch(&self, operation: &str, params: &[(String, String)]) -> Result<JsonValue, UpstreamError>;
}

/// How requests are addressed for each upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStyle {
    /// `GET {base}?key=..&op={operation}&...`
    LegiScan,
    /// `GET {base}/{operation}?...`
    FederalRegister,
}

impl ApiStyle {
    pub fn source(&self) -> SourceKind {
        match self {
            ApiStyle::LegiScan => SourceKind::Legiscan,
            ApiStyle::FederalRegister => SourceKind::FederalRegister,
        }
    }
}

#[derive(Debug)]
pub struct JsonApiClient {
    style: ApiStyle,
    base_url: String,
    api_key: Option<String>,
    http: HttpFetcher,
}

impl JsonApiClient {
    pub fn legiscan(base_url: impl Into<String>, api_key: impl Into<String>, http: HttpFetcher) -> Self {
        Self {
            style: ApiStyle::LegiScan,
            base_url: base_url.into(),
            api_key: Some(api_key.into()),
            http,
        }
    }

    pub fn federal_register(base_url: impl Into<String>, http: HttpFetcher) -> Self {
        Self {
            style: ApiStyle::FederalRegister,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            http,
        }
    }

    pub fn style(&self) -> ApiStyle {
        self.style
    }

    fn request_parts(&self, operation: &str, params: &[(String, String)]) -> (String, Vec<(String, String)>) {
        match self.style {
            ApiStyle::LegiScan => {
                let mut query = Vec::with_capacity(params.len() + 2);
                if let Some(key) = &self.api_key {
                    query.push(("key".to_string(), key.clone()));
                }
                query.push(("op".to_string(), operation.to_string()));
                query.extend(params.iter().cloned());
                (self.base_url.clone(), query)
            }
            ApiStyle::FederalRegister => (
                format!("{}/{}", self.base_url, operation.trim_start_matches('/')),
                params.to_vec(),
            ),
        }
    }
}

#[async_trait]
impl UpstreamClient for JsonApiClient {
    fn source(&self) -> SourceKind {
        self.style.source()
    }

    async fn fetch(&self, operation: &str, params: &[(String, String)]) -> Result<JsonValue, UpstreamError> {
        let upstream = self.source();
        let (url, query) = self.request_parts(operation, params);
        debug!(%upstream, operation, params = params.len(), "calling upstream");

        let response = self
            .http
            .get(&url, &query)
            .await
            .map_err(|e| UpstreamError::from_fetch(upstream, e))?;
        parse_body(upstream, &response.body)
    }
}

/// Parse a 200 body and reject application-level error envelopes.
pub fn parse_body(upstream: SourceKind, body: &[u8]) -> Result<JsonValue, UpstreamError> {
    let value: JsonValue = serde_json::from_slice(body).map_err(|e| UpstreamError::InvalidJson {
        upstream,
        message: e.to_string(),
    })?;
    if let Some(message) = application_error(&value) {
        return Err(UpstreamError::Api { upstream, message });
    }
    Ok(value)
}

/// LegiScan signals failures with `"status": "ERROR"` plus `alert.message`; the
/// Federal Register returns a top-level `errors` member.
pub fn application_error(body: &JsonValue) -> Option<String> {
    let status_is_error = body
        .get("status")
        .and_then(JsonValue::as_str)
        .is_some_and(|s| s.eq_ignore_ascii_case("error"));
    let errors = body.get("errors").filter(|e| !e.is_null());

    if !status_is_error && errors.is_none() {
        return None;
    }

    let message = body
        .pointer("/alert/message")
        .and_then(JsonValue::as_str)
        .map(ToString::to_string)
        .or_else(|| errors.map(render_errors))
        .or_else(|| body.get("message").and_then(JsonValue::as_str).map(ToString::to_string))
        .unwrap_or_else(|| "upstream reported an error without a message".to_string());
    Some(message)
}

fn render_errors(errors: &JsonValue) -> String {
    match errors {
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(items) => items
            .iter()
            .map(render_errors)
            .collect::<Vec<_>>()
            .join("; "),
        JsonValue::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{k}: {}", render_errors(v)))
            .collect::<Vec<_>>()
            .join("; "),
        other => other.to_string(),
    }
}
