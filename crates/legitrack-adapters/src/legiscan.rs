use chrono::NaiveDate;
use legitrack_core::SourceKind;
use serde_json::Value as JsonValue;

use crate::normalize::{CanonicalField as F, FieldMap};
use crate::{params, SearchPage, SearchStrategy, SessionTarget, SourceAdapter};

pub static LEGISCAN_FIELDS: FieldMap = FieldMap {
    source: SourceKind::Legiscan,
    display_prefix: None,
    fields: &[
        (F::NaturalKey, &["bill_id"]),
        (F::DisplayNumber, &["bill_number", "number"]),
        (F::Title, &["title"]),
        (F::Description, &["description"]),
        (F::StatusText, &["last_action", "status_desc", "status"]),
        (F::History, &["history"]),
        (F::IntroducedAt, &["introduced_date"]),
        (F::LastActionAt, &["last_action_date", "status_date"]),
        (F::PrimaryUrl, &["state_link", "url", "research_url"]),
        (F::DocumentUrl, &["text_url", "texts.0.state_link", "texts.0.url"]),
        (F::SessionId, &["session.session_id", "session_id"]),
    ],
};

/// `year=2` limits keyword searches to the current session year.
const SEARCH_YEAR_CURRENT: &str = "2";

#[derive(Debug, Clone, Copy, Default)]
pub struct LegiScanAdapter;

impl SourceAdapter for LegiScanAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::Legiscan
    }

    fn field_map(&self) -> &'static FieldMap {
        &LEGISCAN_FIELDS
    }

    /// LegiScan has no modified-since filter; unchanged bills are caught later by
    /// fingerprint comparison.
    fn search_strategies(&self, target: &SessionTarget, _since: Option<NaiveDate>) -> Vec<SearchStrategy> {
        let mut strategies = vec![SearchStrategy::single(
            "masterlist",
            "getMasterList",
            params([("id", target.session_id.as_str())]),
        )];
        for term in target.search_terms.iter().filter(|t| !t.trim().is_empty()) {
            strategies.push(SearchStrategy::paged(
                format!("term:{}", term.trim()),
                "getSearch",
                params([
                    ("state", target.jurisdiction.as_str()),
                    ("query", term.trim()),
                    ("year", SEARCH_YEAR_CURRENT),
                ]),
            ));
        }
        strategies
    }

    fn parse_page(&self, body: &JsonValue) -> SearchPage {
        let Some(listing) = body
            .get("searchresult")
            .or_else(|| body.get("masterlist"))
            .and_then(JsonValue::as_object)
        else {
            return SearchPage::default();
        };

        // Items sit under numeric keys next to `summary` / `session` metadata.
        let mut numbered = listing
            .iter()
            .filter_map(|(k, v)| k.parse::<usize>().ok().map(|idx| (idx, v)))
            .collect::<Vec<_>>();
        numbered.sort_by_key(|(idx, _)| *idx);

        let page_total = listing
            .get("summary")
            .and_then(|s| s.get("page_total"))
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .and_then(|n| u32::try_from(n).ok());

        SearchPage {
            records: numbered.into_iter().map(|(_, v)| v.clone()).collect(),
            page_total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn target(terms: &[&str]) -> SessionTarget {
        SessionTarget {
            session_id: "2199".into(),
            jurisdiction: "TX".into(),
            search_terms: terms.iter().map(|t| t.to_string()).collect(),
            start_date: None,
        }
    }

    #[test]
    fn one_masterlist_plus_one_search_per_term() {
        let strategies = LegiScanAdapter.search_strategies(&target(&["hospital", " ", "school"]), None);
        let names = strategies.iter().map(|s| s.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["masterlist", "term:hospital", "term:school"]);
        assert!(!strategies[0].paginated);
        assert!(strategies[1].paginated);
        assert_eq!(strategies[0].params, vec![("id".to_string(), "2199".to_string())]);
        assert!(strategies[2]
            .params
            .contains(&("query".to_string(), "school".to_string())));
    }

    #[test]
    fn numbered_entries_are_read_in_numeric_order() {
        let body = json!({"status": "OK", "searchresult": {
            "summary": {"page": "1 of 3", "page_total": 3},
            "10": {"bill_id": 10},
            "2": {"bill_id": 2},
            "0": {"bill_id": 0}
        }});
        let page = LegiScanAdapter.parse_page(&body);
        let ids = page
            .records
            .iter()
            .map(|r| r["bill_id"].as_u64().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![0, 2, 10]);
        assert_eq!(page.page_total, Some(3));
    }

    #[test]
    fn masterlist_skips_session_metadata() {
        let body = json!({"status": "OK", "masterlist": {
            "session": {"session_id": 2199, "session_name": "89th Legislature"},
            "0": {"bill_id": 1, "number": "HB1"}
        }});
        let page = LegiScanAdapter.parse_page(&body);
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.page_total, None);
        assert_eq!(LegiScanAdapter.parse_page(&json!({"status": "OK"})), SearchPage::default());
    }
}
