use std::collections::HashSet;

use legitrack_core::LegislativeRecord;

const TITLE_PREFIX_CHARS: usize = 80;

/// Lowercase, keep alphanumerics, collapse everything else to single spaces.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn identities(record: &LegislativeRecord) -> Vec<String> {
    let mut ids = vec![format!("key:{}", record.natural_key)];
    if let Some(url) = record.source_urls.primary.as_deref().filter(|u| !u.trim().is_empty()) {
        ids.push(format!("url:{}", url.trim().to_lowercase()));
    }
    let title = normalize_title(&record.title);
    if let (Some(date), false) = (record.last_action_at, title.is_empty()) {
        let prefix = title.chars().take(TITLE_PREFIX_CHARS).collect::<String>();
        ids.push(format!("dt:{date}|{prefix}"));
    }
    ids
}

/// Drop records that share any identity with an earlier record; first one wins.
pub fn deduplicate(records: Vec<LegislativeRecord>) -> Vec<LegislativeRecord> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(records.len());
    for record in records {
        let ids = identities(&record);
        if ids.iter().any(|id| seen.contains(id)) {
            continue;
        }
        seen.extend(ids);
        out.push(record);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use legitrack_core::{Category, SourceKind, SourceUrls};

    fn record(key: &str, title: &str, url: Option<&str>, date: Option<(i32, u32, u32)>) -> LegislativeRecord {
        LegislativeRecord {
            natural_key: key.into(),
            source: SourceKind::Legiscan,
            session_id: None,
            display_number: key.into(),
            title: title.into(),
            description: String::new(),
            jurisdiction: "TX".into(),
            status: "Introduced".into(),
            introduced_at: None,
            last_action_at: date.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
            category: Category::Unclassified,
            source_urls: SourceUrls {
                primary: url.map(ToString::to_string),
                document: None,
            },
            ai_summary: None,
            ai_attempts: 0,
            fetched_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap(),
            needs_ai_processing: false,
        }
    }

    fn keys(records: &[LegislativeRecord]) -> Vec<&str> {
        records.iter().map(|r| r.natural_key.as_str()).collect()
    }

    #[test]
    fn repeated_key_keeps_first_occurrence() {
        let out = deduplicate(vec![
            record("A1", "Healthcare Reform Act", None, None),
            record("A2", "Widget", None, None),
            record("A1", "Healthcare Reform Act (engrossed)", None, None),
        ]);
        assert_eq!(keys(&out), vec!["A1", "A2"]);
        assert_eq!(out[0].title, "Healthcare Reform Act");
    }

    #[test]
    fn url_match_is_case_insensitive() {
        let out = deduplicate(vec![
            record("1", "One", Some("https://LegiScan.com/TX/bill/HB1/2025"), None),
            record("2", "Two", Some("https://legiscan.com/tx/bill/hb1/2025"), None),
        ]);
        assert_eq!(keys(&out), vec!["1"]);
    }

    #[test]
    fn date_and_title_prefix_collapse_cross_strategy_duplicates() {
        let out = deduplicate(vec![
            record("2025-08123", "Strengthening Hospital Price Transparency", None, Some((2025, 5, 1))),
            record("synth-aaaa", "strengthening hospital price-transparency!", None, Some((2025, 5, 1))),
            record("synth-bbbb", "Strengthening Hospital Price Transparency", None, Some((2025, 5, 2))),
            record("synth-cccc", "Strengthening Hospital Price Transparency", None, None),
        ]);
        assert_eq!(keys(&out), vec!["2025-08123", "synth-bbbb", "synth-cccc"]);
    }

    #[test]
    fn empty_input_and_title_normalization() {
        assert!(deduplicate(Vec::new()).is_empty());
        assert_eq!(normalize_title("  H.B. 34 -- Health\tCare  "), "h b 34 health care");
    }
}
