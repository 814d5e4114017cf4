//! Table-driven mapping from upstream JSON to [`LegislativeRecord`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use legitrack_core::{Category, LegislativeRecord, SourceKind, SourceUrls};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const UNKNOWN_STATUS: &str = "Unknown";

/// Canonical fields a [`FieldMap`] can resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalField {
    NaturalKey,
    DisplayNumber,
    Title,
    Description,
    StatusText,
    History,
    IntroducedAt,
    LastActionAt,
    PrimaryUrl,
    DocumentUrl,
    SessionId,
}

impl CanonicalField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::NaturalKey => "natural_key",
            CanonicalField::DisplayNumber => "display_number",
            CanonicalField::Title => "title",
            CanonicalField::Description => "description",
            CanonicalField::StatusText => "status",
            CanonicalField::History => "history",
            CanonicalField::IntroducedAt => "introduced_at",
            CanonicalField::LastActionAt => "last_action_at",
            CanonicalField::PrimaryUrl => "primary_url",
            CanonicalField::DocumentUrl => "document_url",
            CanonicalField::SessionId => "session_id",
        }
    }
}

/// Ordered candidate source paths per canonical field. Paths are dotted and a
/// numeric segment indexes into an array (`texts.0.url`).
#[derive(Debug, Clone, Copy)]
pub struct FieldMap {
    pub source: SourceKind,
    /// Prepended to the display number unless it already starts with it.
    pub display_prefix: Option<&'static str>,
    pub fields: &'static [(CanonicalField, &'static [&'static str])],
}

impl FieldMap {
    pub fn candidates(&self, field: CanonicalField) -> &'static [&'static str] {
        self.fields
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, paths)| *paths)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationWarning {
    #[error("raw record is not a JSON object")]
    NotAnObject,
    #[error("could not parse {field} value {value:?} as a date")]
    UnparseableDate { field: &'static str, value: String },
    #[error("no natural key present; synthesized {key}")]
    SynthesizedKey { key: String },
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
];

/// Accepts ISO dates, US `MM/DD/YYYY`, naive timestamps and RFC 3339.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.date_naive()))
}

pub fn lookup_path<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path.split('.') {
        cur = match cur {
            JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            other => other.get(segment)?,
        };
    }
    Some(cur)
}

/// Strings are trimmed, numbers stringified; blank and null count as missing.
fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn first_text(raw: &JsonValue, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .find_map(|path| lookup_path(raw, path).and_then(scalar_text))
}

/// LegiScan numeric progress codes.
pub fn legiscan_status_label(code: u64) -> Option<&'static str> {
    match code {
        1 => Some("Introduced"),
        2 => Some("Engrossed"),
        3 => Some("Enrolled"),
        4 => Some("Passed"),
        5 => Some("Vetoed"),
        6 => Some("Failed"),
        _ => None,
    }
}

fn status_text(value: &JsonValue) -> Option<String> {
    let text = scalar_text(value)?;
    match text.parse::<u64>() {
        Ok(code) => legiscan_status_label(code).map(ToString::to_string),
        Err(_) => Some(text),
    }
}

fn history_entries<'a>(raw: &'a JsonValue, map: &FieldMap) -> &'a [JsonValue] {
    map.candidates(CanonicalField::History)
        .iter()
        .find_map(|path| {
            lookup_path(raw, path)
                .and_then(JsonValue::as_array)
                .filter(|a| !a.is_empty())
        })
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn history_action(entry: &JsonValue) -> Option<String> {
    match entry {
        JsonValue::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        other => first_text(other, &["action", "description", "text"]),
    }
}

fn history_date(entry: &JsonValue) -> Option<NaiveDate> {
    first_text(entry, &["date", "action_date"]).and_then(|d| parse_date(&d))
}

/// The latest history action wins over the status field. History is assumed
/// chronological.
fn derive_status(raw: &JsonValue, map: &FieldMap, history: &[JsonValue]) -> String {
    history
        .last()
        .and_then(history_action)
        .or_else(|| {
            map.candidates(CanonicalField::StatusText)
                .iter()
                .find_map(|path| lookup_path(raw, path).and_then(status_text))
        })
        .unwrap_or_else(|| UNKNOWN_STATUS.to_string())
}

fn extract_date(
    raw: &JsonValue,
    field: CanonicalField,
    map: &FieldMap,
    warnings: &mut Vec<NormalizationWarning>,
) -> Option<NaiveDate> {
    for path in map.candidates(field) {
        let Some(text) = lookup_path(raw, path).and_then(scalar_text) else {
            continue;
        };
        match parse_date(&text) {
            Some(date) => return Some(date),
            None => warnings.push(NormalizationWarning::UnparseableDate {
                field: field.as_str(),
                value: text,
            }),
        }
    }
    None
}

fn synthesize_key(jurisdiction: &str, display_number: &str, title: &str, primary_url: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [jurisdiction, display_number, title, primary_url] {
        hasher.update(part.as_bytes());
        hasher.update(b"|");
    }
    let digest = hex::encode(hasher.finalize());
    format!("synth-{}", &digest[..16])
}

fn apply_prefix(prefix: Option<&str>, number: String) -> String {
    match prefix {
        Some(prefix) if !number.to_ascii_uppercase().starts_with(&prefix.trim().to_ascii_uppercase()) => {
            format!("{prefix}{number}")
        }
        _ => number,
    }
}

/// Map one upstream item to a canonical record.
///
/// Never fails: missing fields become empty or `None`, unparseable dates become
/// `None` with a warning, and a missing natural key is synthesized from stable
/// content.
pub fn normalize_with_warnings(
    raw: &JsonValue,
    jurisdiction: &str,
    map: &FieldMap,
    fetched_at: DateTime<Utc>,
) -> (LegislativeRecord, Vec<NormalizationWarning>) {
    let mut warnings = Vec::new();
    if !raw.is_object() {
        warnings.push(NormalizationWarning::NotAnObject);
    }

    let text = |field| first_text(raw, map.candidates(field));
    let history = history_entries(raw, map);

    let natural_key = text(CanonicalField::NaturalKey);
    let title = text(CanonicalField::Title).unwrap_or_default();
    let description = text(CanonicalField::Description).unwrap_or_default();
    let primary = text(CanonicalField::PrimaryUrl);
    let document = text(CanonicalField::DocumentUrl);
    let display_number = text(CanonicalField::DisplayNumber)
        .map(|n| apply_prefix(map.display_prefix, n))
        .or_else(|| natural_key.clone())
        .unwrap_or_default();

    let natural_key = natural_key.unwrap_or_else(|| {
        let key = synthesize_key(
            jurisdiction,
            &display_number,
            &title,
            primary.as_deref().unwrap_or_default(),
        );
        warnings.push(NormalizationWarning::SynthesizedKey { key: key.clone() });
        key
    });

    let introduced_at = extract_date(raw, CanonicalField::IntroducedAt, map, &mut warnings)
        .or_else(|| history.first().and_then(history_date));
    let last_action_at = extract_date(raw, CanonicalField::LastActionAt, map, &mut warnings)
        .or_else(|| history.last().and_then(history_date));

    let record = LegislativeRecord {
        natural_key,
        source: map.source,
        session_id: text(CanonicalField::SessionId),
        display_number,
        title,
        description,
        jurisdiction: jurisdiction.to_string(),
        status: derive_status(raw, map, history),
        introduced_at,
        last_action_at,
        category: Category::Unclassified,
        source_urls: SourceUrls { primary, document },
        ai_summary: None,
        ai_attempts: 0,
        fetched_at,
        needs_ai_processing: false,
    };
    (record, warnings)
}

pub fn normalize(raw: &JsonValue, jurisdiction: &str, map: &FieldMap, fetched_at: DateTime<Utc>) -> LegislativeRecord {
    normalize_with_warnings(raw, jurisdiction, map, fetched_at).0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    static TEST_MAP: FieldMap = FieldMap {
        source: SourceKind::Legiscan,
        display_prefix: None,
        fields: &[
            (CanonicalField::NaturalKey, &["bill_id"]),
            (CanonicalField::DisplayNumber, &["bill_number", "number"]),
            (CanonicalField::Title, &["title"]),
            (CanonicalField::StatusText, &["status"]),
            (CanonicalField::History, &["history"]),
            (CanonicalField::IntroducedAt, &["introduced_date"]),
            (CanonicalField::LastActionAt, &["last_action_date"]),
            (CanonicalField::PrimaryUrl, &["url"]),
            (CanonicalField::DocumentUrl, &["texts.0.url"]),
        ],
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).single().unwrap()
    }

    #[test]
    fn parses_every_supported_date_shape() {
        let expected = NaiveDate::from_ymd_opt(2025, 5, 1);
        for input in [
            "2025-05-01",
            "05/01/2025",
            "2025-05-01 13:45:00",
            "2025-05-01T13:45:00",
            "2025-05-01T13:45:00.250",
            "2025-05-01T13:45:00-05:00",
            "05/01/2025 13:45:00",
        ] {
            assert_eq!(parse_date(input), expected, "input {input}");
        }
        assert_eq!(parse_date("0000-00-00"), None);
        assert_eq!(parse_date("yesterday"), None);
        assert_eq!(parse_date("  "), None);
    }

    #[test]
    fn candidates_fall_through_in_order_and_numbers_become_text() {
        let raw = json!({"bill_id": 1234567, "number": "SB 9", "title": "  Water Rights  ",
            "texts": [{"url": "https://example.test/sb9.pdf"}]});
        let record = normalize(&raw, "TX", &TEST_MAP, now());
        assert_eq!(record.natural_key, "1234567");
        assert_eq!(record.display_number, "SB 9");
        assert_eq!(record.title, "Water Rights");
        assert_eq!(record.source_urls.document.as_deref(), Some("https://example.test/sb9.pdf"));
        assert_eq!(record.category, Category::Unclassified);
    }

    #[test]
    fn latest_history_action_wins_over_status_field() {
        let raw = json!({"bill_id": "1", "status": 1, "history": [
            {"date": "2026-01-10", "action": "Filed"},
            {"date": "2026-02-20", "action": "Passed the Senate"}
        ]});
        let record = normalize(&raw, "TX", &TEST_MAP, now());
        assert_eq!(record.status, "Passed the Senate");
        assert_eq!(record.introduced_at, NaiveDate::from_ymd_opt(2026, 1, 10));
        assert_eq!(record.last_action_at, NaiveDate::from_ymd_opt(2026, 2, 20));
    }

    #[test]
    fn status_code_and_unknown_fallback() {
        let coded = normalize(&json!({"bill_id": "1", "status": 5}), "TX", &TEST_MAP, now());
        assert_eq!(coded.status, "Vetoed");
        let bare = normalize(&json!({"bill_id": "1"}), "TX", &TEST_MAP, now());
        assert_eq!(bare.status, UNKNOWN_STATUS);
    }

    #[test]
    fn unparseable_date_is_null_with_warning() {
        let raw = json!({"bill_id": "1", "introduced_date": "sometime in May"});
        let (record, warnings) = normalize_with_warnings(&raw, "TX", &TEST_MAP, now());
        assert_eq!(record.introduced_at, None);
        assert_eq!(
            warnings,
            vec![NormalizationWarning::UnparseableDate {
                field: "introduced_at",
                value: "sometime in May".into(),
            }]
        );
    }

    #[test]
    fn missing_key_is_synthesized_deterministically() {
        let raw = json!({"bill_number": "HB 1", "title": "Broadband Access", "url": "https://example.test/hb1"});
        let (a, warnings) = normalize_with_warnings(&raw, "TX", &TEST_MAP, now());
        let b = normalize(&raw, "TX", &TEST_MAP, now());
        assert!(a.natural_key.starts_with("synth-"));
        assert_eq!(a.natural_key.len(), "synth-".len() + 16);
        assert_eq!(a.natural_key, b.natural_key);
        assert!(matches!(warnings.as_slice(), [NormalizationWarning::SynthesizedKey { .. }]));

        let other = normalize(&raw, "OK", &TEST_MAP, now());
        assert_ne!(a.natural_key, other.natural_key);
    }

    #[test]
    fn non_object_input_yields_empty_record() {
        let (record, warnings) = normalize_with_warnings(&json!("oops"), "TX", &TEST_MAP, now());
        assert_eq!(record.title, "");
        assert_eq!(record.status, UNKNOWN_STATUS);
        assert_eq!(warnings.first(), Some(&NormalizationWarning::NotAnObject));
    }

    #[test]
    fn display_prefix_is_applied_once() {
        assert_eq!(apply_prefix(Some("EO "), "14295".into()), "EO 14295");
        assert_eq!(apply_prefix(Some("EO "), "EO 14295".into()), "EO 14295");
        assert_eq!(apply_prefix(None, "HB 1".into()), "HB 1");
    }
}
