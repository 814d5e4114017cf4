//! Core domain model for legitrack: canonical records, session cursors, categories.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const CRATE_NAME: &str = "legitrack-core";

/// Jurisdiction label used for federal executive orders.
pub const FEDERAL_JURISDICTION: &str = "federal";

/// Upstream API a record was fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Legiscan,
    FederalRegister,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Legiscan => "legiscan",
            SourceKind::FederalRegister => "federal_register",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} label: {value}")]
pub struct ParseLabelError {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for SourceKind {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legiscan" => Ok(SourceKind::Legiscan),
            "federal_register" | "federal-register" => Ok(SourceKind::FederalRegister),
            _ => Err(ParseLabelError {
                kind: "source",
                value: s.to_string(),
            }),
        }
    }
}

/// Practice-area label assigned by the categorizer. Never empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Healthcare,
    Education,
    Engineering,
    Civic,
    Environment,
    #[default]
    Unclassified,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Healthcare,
        Category::Education,
        Category::Engineering,
        Category::Civic,
        Category::Environment,
        Category::Unclassified,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Healthcare => "healthcare",
            Category::Education => "education",
            Category::Engineering => "engineering",
            Category::Civic => "civic",
            Category::Environment => "environment",
            Category::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| ParseLabelError {
                kind: "category",
                value: s.to_string(),
            })
    }
}

/// Links to the canonical record page and to the full document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SourceUrls {
    pub primary: Option<String>,
    pub document: Option<String>,
}

/// Fields produced by the external summarizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AiSummaryFields {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub talking_points: Vec<String>,
    #[serde(default)]
    pub business_impact: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl AiSummaryFields {
    pub fn is_empty(&self) -> bool {
        self.summary.trim().is_empty()
            && self.business_impact.trim().is_empty()
            && self.talking_points.iter().all(|p| p.trim().is_empty())
            && self.extra.is_empty()
    }
}

/// Upsert key of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub jurisdiction: String,
    pub natural_key: String,
}

impl RecordKey {
    pub fn new(jurisdiction: impl Into<String>, natural_key: impl Into<String>) -> Self {
        Self {
            jurisdiction: jurisdiction.into(),
            natural_key: natural_key.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.jurisdiction, self.natural_key)
    }
}

/// Canonical bill / executive order after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegislativeRecord {
    pub natural_key: String,
    pub source: SourceKind,
    pub session_id: Option<String>,
    pub display_number: String,
    pub title: String,
    pub description: String,
    pub jurisdiction: String,
    pub status: String,
    pub introduced_at: Option<NaiveDate>,
    pub last_action_at: Option<NaiveDate>,
    pub category: Category,
    pub source_urls: SourceUrls,
    pub ai_summary: Option<AiSummaryFields>,
    pub ai_attempts: u32,
    pub fetched_at: DateTime<Utc>,
    pub needs_ai_processing: bool,
}

impl LegislativeRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.jurisdiction.clone(), self.natural_key.clone())
    }

    /// Hash over the upstream-visible fields. Fetch time, AI output and the
    /// processing flag do not contribute.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        let date = |d: Option<NaiveDate>| d.map(|d| d.to_string()).unwrap_or_default();
        for part in [
            self.display_number.as_str(),
            self.title.as_str(),
            self.description.as_str(),
            self.status.as_str(),
            date(self.introduced_at).as_str(),
            date(self.last_action_at).as_str(),
            self.source_urls.primary.as_deref().unwrap_or_default(),
            self.source_urls.document.as_deref().unwrap_or_default(),
            self.category.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }
        hex::encode(hasher.finalize())
    }

    /// Fold `incoming` over `self`, keeping a populated summary when the incoming
    /// version carries none.
    pub fn merged_with(&self, incoming: &LegislativeRecord) -> LegislativeRecord {
        let mut merged = incoming.clone();
        let incoming_has_summary = incoming
            .ai_summary
            .as_ref()
            .is_some_and(|s| !s.is_empty());
        if !incoming_has_summary {
            merged.ai_summary = self.ai_summary.clone();
        }
        merged.needs_ai_processing = incoming.needs_ai_processing || self.needs_ai_processing;
        merged
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CursorStatus {
    #[default]
    Idle,
    Running,
    Failed,
}

impl CursorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CursorStatus::Idle => "idle",
            CursorStatus::Running => "running",
            CursorStatus::Failed => "failed",
        }
    }
}

impl FromStr for CursorStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(CursorStatus::Idle),
            "running" => Ok(CursorStatus::Running),
            "failed" => Ok(CursorStatus::Failed),
            other => Err(ParseLabelError {
                kind: "cursor status",
                value: other.to_string(),
            }),
        }
    }
}

/// Incremental-fetch bookkeeping for one legislative session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCursor {
    pub session_id: String,
    pub jurisdiction: String,
    pub last_successful_fetch_at: Option<DateTime<Utc>>,
    pub status: CursorStatus,
    pub run_started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SessionCursor {
    pub fn new(session_id: impl Into<String>, jurisdiction: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            jurisdiction: jurisdiction.into(),
            last_successful_fetch_at: None,
            status: CursorStatus::Idle,
            run_started_at: None,
            last_error: None,
            updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == CursorStatus::Running
    }

    /// A running cursor whose run began longer ago than `stale_after` is treated
    /// as abandoned by a crashed process.
    pub fn is_stale_run(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        self.is_running()
            && self
                .run_started_at
                .map_or(true, |started| now - started > stale_after)
    }

    pub fn is_update_due(&self, now: DateTime<Utc>, min_interval: Duration) -> bool {
        match self.last_successful_fetch_at {
            None => true,
            Some(last) => now - last >= min_interval,
        }
    }

    pub fn begin_run(&mut self, now: DateTime<Utc>) {
        self.status = CursorStatus::Running;
        self.run_started_at = Some(now);
        self.updated_at = now;
    }

    pub fn finish_success(&mut self, now: DateTime<Utc>) {
        self.status = CursorStatus::Idle;
        self.last_successful_fetch_at = Some(now);
        self.last_error = None;
        self.updated_at = now;
    }

    /// `last_successful_fetch_at` is left alone so the next run retries the same window.
    pub fn finish_failure(&mut self, now: DateTime<Utc>, error: impl Into<String>) {
        self.status = CursorStatus::Failed;
        self.last_error = Some(error.into());
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, 0, 0).single().unwrap()
    }

    fn record(key: &str) -> LegislativeRecord {
        LegislativeRecord {
            natural_key: key.to_string(),
            source: SourceKind::Legiscan,
            session_id: Some("2199".into()),
            display_number: "HB34".into(),
            title: "Healthcare Reform Act".into(),
            description: String::new(),
            jurisdiction: "TX".into(),
            status: "Introduced".into(),
            introduced_at: NaiveDate::from_ymd_opt(2026, 1, 12),
            last_action_at: None,
            category: Category::Healthcare,
            source_urls: SourceUrls::default(),
            ai_summary: None,
            ai_attempts: 0,
            fetched_at: ts(1),
            needs_ai_processing: true,
        }
    }

    #[test]
    fn category_labels_round_trip_through_from_str() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
        assert!("".parse::<Category>().is_err());
        assert_eq!(
            serde_json::to_string(&Category::Unclassified).unwrap(),
            "\"unclassified\""
        );
    }

    #[test]
    fn fingerprint_ignores_fetch_time_and_ai_state() {
        let a = record("A1");
        let mut b = a.clone();
        b.fetched_at = ts(9);
        b.needs_ai_processing = false;
        b.ai_summary = Some(AiSummaryFields {
            summary: "s".into(),
            ..Default::default()
        });
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.status = "Passed".into();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn merge_keeps_existing_summary_when_incoming_is_blank() {
        let mut stored = record("A1");
        stored.ai_summary = Some(AiSummaryFields {
            summary: "Expands coverage.".into(),
            talking_points: vec!["coverage".into()],
            ..Default::default()
        });
        stored.needs_ai_processing = false;

        let mut incoming = record("A1");
        incoming.needs_ai_processing = false;
        incoming.ai_summary = Some(AiSummaryFields::default());

        let merged = stored.merged_with(&incoming);
        assert_eq!(merged.ai_summary, stored.ai_summary);
        assert!(!merged.needs_ai_processing);
    }

    #[test]
    fn cursor_failure_keeps_last_success() {
        let mut cursor = SessionCursor::new("2199", "TX", ts(0));
        cursor.begin_run(ts(1));
        cursor.finish_success(ts(2));
        cursor.begin_run(ts(3));
        cursor.finish_failure(ts(4), "upstream down");

        assert_eq!(cursor.status, CursorStatus::Failed);
        assert_eq!(cursor.last_successful_fetch_at, Some(ts(2)));
        assert_eq!(cursor.last_error.as_deref(), Some("upstream down"));
    }

    #[test]
    fn stale_and_due_checks() {
        let mut cursor = SessionCursor::new("2199", "TX", ts(0));
        assert!(cursor.is_update_due(ts(1), Duration::hours(12)));
        cursor.begin_run(ts(1));
        assert!(!cursor.is_stale_run(ts(2), Duration::hours(2)));
        assert!(cursor.is_stale_run(ts(5), Duration::hours(2)));
        cursor.finish_success(ts(5));
        assert!(!cursor.is_update_due(ts(6), Duration::hours(12)));
        assert!(!cursor.is_stale_run(ts(9), Duration::hours(2)));
    }
}
