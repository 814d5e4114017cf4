//! Upstream clients, field normalization and per-source search strategies.

use chrono::NaiveDate;
use legitrack_core::SourceKind;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

mod client;
mod federal_register;
mod legiscan;
mod normalize;
mod summarizer;

pub use client::{application_error, parse_body, ApiStyle, JsonApiClient, UpstreamClient, UpstreamError};
pub use federal_register::{FederalRegisterAdapter, FEDERAL_REGISTER_FIELDS};
pub use legiscan::{LegiScanAdapter, LEGISCAN_FIELDS};
pub use normalize::{
    first_text, legiscan_status_label, lookup_path, normalize, normalize_with_warnings, parse_date, CanonicalField,
    FieldMap, NormalizationWarning, UNKNOWN_STATUS,
};
pub use summarizer::{summary_input, HttpSummarizer, Summarizer, SummarizerError};

pub const CRATE_NAME: &str = "legitrack-adapters";

/// What one update run searches for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTarget {
    pub session_id: String,
    pub jurisdiction: String,
    #[serde(default)]
    pub search_terms: Vec<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
}

/// One upstream query; candidates from every strategy are pooled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchStrategy {
    pub name: String,
    pub operation: String,
    pub params: Vec<(String, String)>,
    pub paginated: bool,
}

impl SearchStrategy {
    pub fn single(name: impl Into<String>, operation: impl Into<String>, params: Vec<(String, String)>) -> Self {
        Self {
            name: name.into(),
            operation: operation.into(),
            params,
            paginated: false,
        }
    }

    pub fn paged(name: impl Into<String>, operation: impl Into<String>, params: Vec<(String, String)>) -> Self {
        Self {
            paginated: true,
            ..Self::single(name, operation, params)
        }
    }
}

/// Builds query pairs from string literals.
pub(crate) fn params<const N: usize>(pairs: [(&str, &str); N]) -> Vec<(String, String)> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub records: Vec<JsonValue>,
    pub page_total: Option<u32>,
}

/// Per-upstream knowledge: which queries to run, how to read a result page, and
/// how to map an item onto the canonical record.
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> SourceKind;

    fn field_map(&self) -> &'static FieldMap;

    fn search_strategies(&self, target: &SessionTarget, since: Option<NaiveDate>) -> Vec<SearchStrategy>;

    fn parse_page(&self, body: &JsonValue) -> SearchPage;

    /// Items failing this check are dropped before normalization.
    fn accepts(&self, _raw: &JsonValue) -> bool {
        true
    }
}

pub fn adapter_for_source(source: SourceKind) -> Box<dyn SourceAdapter> {
    match source {
        SourceKind::Legiscan => Box::new(LegiScanAdapter),
        SourceKind::FederalRegister => Box::new(FederalRegisterAdapter),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidatePool {
    pub records: Vec<JsonValue>,
    /// Accepted item count per strategy name, in execution order.
    pub strategy_counts: Vec<(String, usize)>,
    pub rejected: usize,
    pub pages_fetched: usize,
}

/// Run every search strategy of `adapter` and pool the raw items.
///
/// Pagination stops at the reported page total, an empty page, or `max_pages`.
/// Any upstream error aborts the whole collection; partially pooled items are
/// discarded with it.
pub async fn collect_candidates(
    client: &dyn UpstreamClient,
    adapter: &dyn SourceAdapter,
    target: &SessionTarget,
    since: Option<NaiveDate>,
    max_pages: u32,
) -> Result<CandidatePool, UpstreamError> {
    let max_pages = max_pages.max(1);
    let mut pool = CandidatePool::default();

    for strategy in adapter.search_strategies(target, since) {
        let mut accepted = 0usize;
        let mut page = 1u32;
        loop {
            let mut query = strategy.params.clone();
            if strategy.paginated {
                query.push(("page".to_string(), page.to_string()));
            }
            let body = client.fetch(&strategy.operation, &query).await?;
            let parsed = adapter.parse_page(&body);
            pool.pages_fetched += 1;

            let fetched = parsed.records.len();
            for raw in parsed.records {
                if adapter.accepts(&raw) {
                    accepted += 1;
                    pool.records.push(raw);
                } else {
                    pool.rejected += 1;
                }
            }

            if !strategy.paginated || fetched == 0 {
                break;
            }
            if parsed.page_total.is_some_and(|total| page >= total) {
                break;
            }
            if page >= max_pages {
                debug!(strategy = %strategy.name, page, "page cap reached");
                break;
            }
            page += 1;
        }
        info!(strategy = %strategy.name, accepted, "search strategy finished");
        pool.strategy_counts.push((strategy.name, accepted));
    }

    Ok(pool)
}
