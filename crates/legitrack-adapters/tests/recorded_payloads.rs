use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use legitrack_adapters::{
    collect_candidates, normalize, parse_body, FederalRegisterAdapter, LegiScanAdapter, SessionTarget, SourceAdapter,
    UpstreamClient, UpstreamError,
};
use legitrack_core::{LegislativeRecord, SourceKind};
use serde::Deserialize;
use serde_json::Value as JsonValue;

#[derive(Debug, PartialEq, Deserialize)]
struct GoldenRecord {
    natural_key: String,
    display_number: String,
    title: String,
    status: String,
    introduced_at: Option<NaiveDate>,
    last_action_at: Option<NaiveDate>,
    primary_url: Option<String>,
    document_url: Option<String>,
}

impl From<&LegislativeRecord> for GoldenRecord {
    fn from(r: &LegislativeRecord) -> Self {
        Self {
            natural_key: r.natural_key.clone(),
            display_number: r.display_number.clone(),
            title: r.title.clone(),
            status: r.status.clone(),
            introduced_at: r.introduced_at,
            last_action_at: r.last_action_at,
            primary_url: r.source_urls.primary.clone(),
            document_url: r.source_urls.document.clone(),
        }
    }
}

fn fixture_path(rel: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(rel)
}

fn read_fixture(rel: &str) -> Vec<u8> {
    fs::read(fixture_path(rel)).expect("read fixture")
}

fn read_json(rel: &str) -> JsonValue {
    serde_json::from_slice(&read_fixture(rel)).expect("parse fixture")
}

fn normalized_page(adapter: &dyn SourceAdapter, jurisdiction: &str, rel: &str) -> Vec<GoldenRecord> {
    let fetched_at = Utc.with_ymd_and_hms(2025, 6, 2, 2, 0, 0).single().unwrap();
    adapter
        .parse_page(&read_json(rel))
        .records
        .iter()
        .filter(|raw| adapter.accepts(raw))
        .map(|raw| GoldenRecord::from(&normalize(raw, jurisdiction, adapter.field_map(), fetched_at)))
        .collect()
}

fn read_snapshot(rel: &str) -> Vec<GoldenRecord> {
    serde_json::from_slice(&read_fixture(rel)).expect("parse snapshot")
}

#[test]
fn legiscan_search_page_matches_snapshot() {
    let actual = normalized_page(&LegiScanAdapter, "TX", "legiscan/search_hospital_page1.json");
    let expected = read_snapshot("legiscan/search_hospital_page1.snapshot.json");
    assert_eq!(actual, expected);
}

#[test]
fn federal_register_page_matches_snapshot() {
    let actual = normalized_page(&FederalRegisterAdapter, "federal", "federal_register/documents_page1.json");
    let expected = read_snapshot("federal_register/documents_page1.snapshot.json");
    assert_eq!(actual, expected);
}

#[test]
fn masterlist_status_code_used_when_last_action_blank() {
    let actual = normalized_page(&LegiScanAdapter, "TX", "legiscan/masterlist_2199.json");
    assert_eq!(actual.len(), 2);
    assert_eq!(actual[0].status, "Referred to Public Health");
    assert_eq!(actual[1].display_number, "HB 2001");
    assert_eq!(actual[1].status, "Passed");
}

#[test]
fn recorded_error_envelope_is_rejected() {
    let err = parse_body(SourceKind::Legiscan, &read_fixture("legiscan/error_unknown_session.json")).unwrap_err();
    assert!(matches!(err, UpstreamError::Api { ref message, .. } if message == "Unknown session id"));
}

/// Replays recorded LegiScan payloads by operation.
struct ReplayClient {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl UpstreamClient for ReplayClient {
    fn source(&self) -> SourceKind {
        SourceKind::Legiscan
    }

    async fn fetch(&self, operation: &str, _params: &[(String, String)]) -> Result<JsonValue, UpstreamError> {
        self.calls.lock().unwrap().push(operation.to_string());
        let rel = match operation {
            "getMasterList" => "legiscan/masterlist_2199.json",
            "getSearch" => "legiscan/search_hospital_page1.json",
            other => panic!("unexpected operation {other}"),
        };
        parse_body(SourceKind::Legiscan, &read_fixture(rel))
    }
}

#[tokio::test]
async fn legiscan_strategies_pool_masterlist_and_search_results() {
    let client = ReplayClient {
        calls: Mutex::new(Vec::new()),
    };
    let target = SessionTarget {
        session_id: "2199".into(),
        jurisdiction: "TX".into(),
        search_terms: vec!["hospital".into()],
        start_date: None,
    };

    let pool = collect_candidates(&client, &LegiScanAdapter, &target, None, 5)
        .await
        .unwrap();

    assert_eq!(pool.records.len(), 5);
    assert_eq!(
        pool.strategy_counts,
        vec![("masterlist".to_string(), 2), ("term:hospital".to_string(), 3)]
    );
    // page_total of 1 stops the search after its first page
    assert_eq!(*client.calls.lock().unwrap(), vec!["getMasterList", "getSearch"]);
}
