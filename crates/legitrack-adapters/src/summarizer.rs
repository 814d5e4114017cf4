use async_trait::async_trait;
use legitrack_core::{AiSummaryFields, LegislativeRecord, SourceKind};
use legitrack_storage::HttpFetcher;
use serde_json::{json, Value as JsonValue};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SummarizerError {
    #[error("summarizer request failed: {0}")]
    Request(String),
    #[error("summarizer returned an unusable payload: {0}")]
    Payload(String),
}

/// External text-in, fields-out summarization boundary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<AiSummaryFields, SummarizerError>;
}

#[derive(Debug)]
pub struct HttpSummarizer {
    endpoint: String,
    api_key: Option<String>,
    http: HttpFetcher,
}

impl HttpSummarizer {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, http: HttpFetcher) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            http,
        }
    }
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    async fn summarize(&self, text: &str) -> Result<AiSummaryFields, SummarizerError> {
        let response = self
            .http
            .post_json(&self.endpoint, &json!({ "text": text }), self.api_key.as_deref())
            .await
            .map_err(|e| SummarizerError::Request(e.to_string()))?;
        parse_summary(&response.body)
    }
}

/// Accepts the fields at the top level or wrapped in `summary_fields` / `result`.
pub(crate) fn parse_summary(body: &[u8]) -> Result<AiSummaryFields, SummarizerError> {
    let value: JsonValue = serde_json::from_slice(body).map_err(|e| SummarizerError::Payload(e.to_string()))?;
    let fields = ["summary_fields", "result"]
        .iter()
        .find_map(|k| value.get(*k).filter(|v| v.is_object()))
        .unwrap_or(&value);
    if !fields.is_object() {
        return Err(SummarizerError::Payload("expected a JSON object".to_string()));
    }
    serde_json::from_value(fields.clone()).map_err(|e| SummarizerError::Payload(e.to_string()))
}

/// Text blob sent to the summarizer for one record.
pub fn summary_input(record: &LegislativeRecord) -> String {
    let kind = match record.source {
        SourceKind::Legiscan => "Bill",
        SourceKind::FederalRegister => "Executive Order",
    };
    let mut out = format!(
        "{kind}: {} ({})\nTitle: {}\nStatus: {}\n",
        record.display_number, record.jurisdiction, record.title, record.status
    );
    if let Some(date) = record.last_action_at {
        out.push_str(&format!("Last action: {date}\n"));
    }
    if !record.description.trim().is_empty() {
        out.push_str(&format!("Description: {}\n", record.description.trim()));
    }
    out
}
