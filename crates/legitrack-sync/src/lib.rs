//! Session update orchestration: fetch, normalize, dedup, categorize, persist.

mod ai;
mod categorize;
mod config;
mod dedup;
mod jobs;
mod notify;
mod report;
mod runtime;
mod scheduler;
mod updater;

use std::fmt::Write as _;

use legitrack_core::SessionCursor;

pub use ai::{AiPolicy, AiProcessor, AiRunSummary};
pub use categorize::{CategoryRule, CategoryTable, Categorizer};
pub use config::{LegitrackConfig, SessionConfig, SessionRegistry};
pub use dedup::{deduplicate, normalize_title};
pub use jobs::{JobRecord, JobRegistry, JobState};
pub use notify::LogNotificationSink;
pub use report::{ReportManifest, ReportManifestFile, ReportWriter};
pub use runtime::{LegitrackRuntime, StoreBackend};
pub use scheduler::build_scheduler;
pub use updater::{
    is_significant_change, RunOutcome, SessionRun, SessionUpdater, SourceBinding, UpdateError, UpdateSummary,
    UpdaterSettings, SIGNIFICANT_STATUS_KEYWORDS,
};

pub const CRATE_NAME: &str = "legitrack-sync";

/// Markdown table of registered sessions and their cursor state.
pub fn render_status_markdown(rows: &[(SessionConfig, Option<SessionCursor>)]) -> String {
    let mut out = String::from("# Session status\n\n");
    out.push_str("| Session | Source | Jurisdiction | Enabled | Status | Last success | Last error |\n");
    out.push_str("|---|---|---|---|---|---|---|\n");
    for (session, cursor) in rows {
        let (status, last_success, last_error) = match cursor {
            Some(c) => (
                c.status.as_str().to_string(),
                c.last_successful_fetch_at
                    .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_else(|| "never".to_string()),
                c.last_error.clone().unwrap_or_default(),
            ),
            None => ("never run".to_string(), "never".to_string(), String::new()),
        };
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} | {} |",
            session.session_id,
            session.source,
            session.jurisdiction,
            if session.enabled { "yes" } else { "no" },
            status,
            last_success,
            last_error.replace('|', "/"),
        );
    }
    out
}

/// One-line outcome per session for terminal output.
pub fn describe_run(run: &SessionRun) -> String {
    match run {
        SessionRun::Updated(summary) if summary.is_completed() => format!(
            "{}: {} new, {} updated ({} significant), {} unchanged, {} errored",
            summary.session_id,
            summary.bills_added,
            summary.bills_updated,
            summary.significant_updates,
            summary.bills_unchanged,
            summary.errored
        ),
        SessionRun::Updated(summary) => format!(
            "{}: failed: {}",
            summary.session_id,
            summary.failure.as_deref().unwrap_or("unknown error")
        ),
        SessionRun::NotDue { session_id, last_success } => format!(
            "{session_id}: skipped, last success {}",
            last_success
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        ),
        SessionRun::Rejected { session_id, error } => format!("{session_id}: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use legitrack_core::SourceKind;

    fn session(id: &str, enabled: bool) -> SessionConfig {
        SessionConfig {
            session_id: id.into(),
            source: SourceKind::Legiscan,
            jurisdiction: "TX".into(),
            display_name: String::new(),
            enabled,
            search_terms: Vec::new(),
            start_date: None,
        }
    }

    #[test]
    fn status_markdown_lists_every_session() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).single().unwrap();
        let mut failed = SessionCursor::new("2199", "TX", now);
        failed.finish_failure(now, "upstream said no | twice");
        let md = render_status_markdown(&[(session("2199", true), Some(failed)), (session("2173", false), None)]);

        assert!(md.starts_with("# Session status"));
        assert!(md.contains("| 2199 | legiscan | TX | yes | failed | never | upstream said no / twice |"));
        assert!(md.contains("| 2173 | legiscan | TX | no | never run | never |  |"));
    }

    #[test]
    fn describe_run_reports_conflicts_plainly() {
        let run = SessionRun::Rejected {
            session_id: "2199".into(),
            error: UpdateError::ConcurrentUpdateConflict {
                session_id: "2199".into(),
            },
        };
        assert_eq!(describe_run(&run), "2199: update already in progress");
    }
}
