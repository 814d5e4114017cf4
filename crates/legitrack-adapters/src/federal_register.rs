use chrono::NaiveDate;
use legitrack_core::SourceKind;
use serde_json::Value as JsonValue;

use crate::normalize::{first_text, CanonicalField as F, FieldMap};
use crate::{SearchPage, SearchStrategy, SessionTarget, SourceAdapter};

pub static FEDERAL_REGISTER_FIELDS: FieldMap = FieldMap {
    source: SourceKind::FederalRegister,
    display_prefix: Some("EO "),
    fields: &[
        (F::NaturalKey, &["document_number"]),
        (F::DisplayNumber, &["executive_order_number"]),
        (F::Title, &["title"]),
        (F::Description, &["abstract", "summary"]),
        (F::StatusText, &["status"]),
        (F::IntroducedAt, &["signing_date"]),
        (F::LastActionAt, &["publication_date", "signing_date"]),
        (F::PrimaryUrl, &["html_url"]),
        (F::DocumentUrl, &["pdf_url", "full_text_xml_url"]),
    ],
};

const DOCUMENTS_OPERATION: &str = "documents.json";
const PER_PAGE: &str = "100";

const REQUESTED_FIELDS: &[&str] = &[
    "document_number",
    "executive_order_number",
    "title",
    "abstract",
    "signing_date",
    "publication_date",
    "html_url",
    "pdf_url",
    "type",
    "subtype",
    "presidential_document_type",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct FederalRegisterAdapter;

fn base_params() -> Vec<(String, String)> {
    let mut out = vec![
        ("per_page".to_string(), PER_PAGE.to_string()),
        ("order".to_string(), "newest".to_string()),
    ];
    out.extend(
        REQUESTED_FIELDS
            .iter()
            .map(|f| ("fields[]".to_string(), (*f).to_string())),
    );
    out
}

fn with_conditions(conditions: &[(&str, String)]) -> Vec<(String, String)> {
    let mut out = base_params();
    out.extend(
        conditions
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone())),
    );
    out
}

fn ymd(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

impl SourceAdapter for FederalRegisterAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::FederalRegister
    }

    fn field_map(&self) -> &'static FieldMap {
        &FEDERAL_REGISTER_FIELDS
    }

    fn search_strategies(&self, target: &SessionTarget, since: Option<NaiveDate>) -> Vec<SearchStrategy> {
        let presdocu = ("conditions[type][]", "PRESDOCU".to_string());

        let mut typed = vec![
            presdocu.clone(),
            ("conditions[presidential_document_type][]", "executive_order".to_string()),
        ];
        if let Some(since) = since {
            typed.push(("conditions[signing_date][gte]", ymd(since)));
        }

        let mut termed = vec![presdocu.clone(), ("conditions[term]", "executive order".to_string())];
        if let Some(since) = since {
            termed.push(("conditions[publication_date][gte]", ymd(since)));
        }

        let mut strategies = vec![
            SearchStrategy::paged("type-filtered", DOCUMENTS_OPERATION, with_conditions(&typed)),
            SearchStrategy::paged("term-filtered", DOCUMENTS_OPERATION, with_conditions(&termed)),
        ];

        if let Some(floor) = since.or(target.start_date) {
            let ranged = [presdocu, ("conditions[publication_date][gte]", ymd(floor))];
            strategies.push(SearchStrategy::paged(
                "date-range",
                DOCUMENTS_OPERATION,
                with_conditions(&ranged),
            ));
        }
        strategies
    }

    fn parse_page(&self, body: &JsonValue) -> SearchPage {
        SearchPage {
            records: body
                .get("results")
                .and_then(JsonValue::as_array)
                .cloned()
                .unwrap_or_default(),
            page_total: body
                .get("total_pages")
                .and_then(JsonValue::as_u64)
                .and_then(|n| u32::try_from(n).ok()),
        }
    }

    /// Keeps executive orders; other presidential documents (proclamations,
    /// memoranda) come back from the broader strategies and are dropped.
    fn accepts(&self, raw: &JsonValue) -> bool {
        let typed_eo = first_text(raw, &["presidential_document_type", "subtype"])
            .map(|t| t.to_ascii_lowercase().replace(' ', "_"))
            .is_some_and(|t| t == "executive_order");
        typed_eo || first_text(raw, &["executive_order_number"]).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn target(start: Option<NaiveDate>) -> SessionTarget {
        SessionTarget {
            session_id: "federal-executive-orders".into(),
            jurisdiction: "federal".into(),
            search_terms: Vec::new(),
            start_date: start,
        }
    }

    fn has(strategy: &SearchStrategy, key: &str, value: &str) -> bool {
        strategy.params.iter().any(|(k, v)| k == key && v == value)
    }

    #[test]
    fn first_run_without_floor_skips_date_range() {
        let strategies = FederalRegisterAdapter.search_strategies(&target(None), None);
        let names = strategies.iter().map(|s| s.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["type-filtered", "term-filtered"]);
        assert!(strategies.iter().all(|s| s.paginated && s.operation == "documents.json"));
        assert!(!strategies[0].params.iter().any(|(k, _)| k.contains("signing_date")));
    }

    #[test]
    fn incremental_run_filters_every_strategy_by_since() {
        let since = NaiveDate::from_ymd_opt(2026, 2, 1);
        let strategies = FederalRegisterAdapter.search_strategies(&target(NaiveDate::from_ymd_opt(2025, 1, 20)), since);
        assert_eq!(strategies.len(), 3);
        assert!(has(&strategies[0], "conditions[signing_date][gte]", "2026-02-01"));
        assert!(has(&strategies[0], "conditions[presidential_document_type][]", "executive_order"));
        assert!(has(&strategies[1], "conditions[term]", "executive order"));
        assert!(has(&strategies[1], "conditions[publication_date][gte]", "2026-02-01"));
        assert!(has(&strategies[2], "conditions[publication_date][gte]", "2026-02-01"));
        assert!(has(&strategies[2], "conditions[type][]", "PRESDOCU"));

        let field_params = strategies[0].params.iter().filter(|(k, _)| k == "fields[]").count();
        assert_eq!(field_params, REQUESTED_FIELDS.len());
    }

    #[test]
    fn date_range_falls_back_to_session_start() {
        let strategies = FederalRegisterAdapter.search_strategies(&target(NaiveDate::from_ymd_opt(2025, 1, 20)), None);
        assert_eq!(strategies[2].name, "date-range");
        assert!(has(&strategies[2], "conditions[publication_date][gte]", "2025-01-20"));
    }

    #[test]
    fn accepts_only_executive_orders() {
        assert!(FederalRegisterAdapter.accepts(&json!({"presidential_document_type": "executive_order"})));
        assert!(FederalRegisterAdapter.accepts(&json!({"subtype": "Executive Order"})));
        assert!(FederalRegisterAdapter.accepts(&json!({"executive_order_number": 14295})));
        assert!(!FederalRegisterAdapter.accepts(&json!({"presidential_document_type": "proclamation"})));
        assert!(!FederalRegisterAdapter.accepts(&json!({"type": "Rule"})));
    }

    #[test]
    fn results_and_total_pages() {
        let page = FederalRegisterAdapter.parse_page(&json!({"count": 0, "total_pages": 0}));
        assert!(page.records.is_empty());
        assert_eq!(page.page_total, Some(0));
    }
}
