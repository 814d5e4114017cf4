//! Incremental per-session update runs.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use legitrack_adapters::{collect_candidates, normalize_with_warnings, SourceAdapter, UpstreamClient, UpstreamError};
use legitrack_core::{LegislativeRecord, SessionCursor, SourceKind};
use legitrack_storage::{NotificationSink, Persistence, PersistenceError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::categorize::Categorizer;
use crate::config::SessionConfig;
use crate::dedup::deduplicate;
use crate::report::ReportWriter;

/// A status change into one of these marks the record for AI re-analysis.
pub const SIGNIFICANT_STATUS_KEYWORDS: &[&str] = &["passed", "vetoed", "enrolled", "signed", "failed"];

pub fn is_significant_change(previous: &str, current: &str) -> bool {
    if previous.trim().eq_ignore_ascii_case(current.trim()) {
        return false;
    }
    let current = current.to_lowercase();
    SIGNIFICANT_STATUS_KEYWORDS.iter().any(|k| current.contains(k))
}

#[derive(Debug, Clone)]
pub struct UpdaterSettings {
    pub batch_timeout: Duration,
    pub max_pages: u32,
    /// Notify when `added + significant_updates` exceeds this.
    pub notification_threshold: usize,
    pub stale_run_after: chrono::Duration,
    pub min_update_interval: chrono::Duration,
}

impl Default for UpdaterSettings {
    fn default() -> Self {
        Self {
            batch_timeout: Duration::from_secs(30 * 60),
            max_pages: 10,
            notification_threshold: 0,
            stale_run_after: chrono::Duration::hours(2),
            min_update_interval: chrono::Duration::hours(12),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateSummary {
    pub run_id: Uuid,
    pub session_id: String,
    pub jurisdiction: String,
    pub source: SourceKind,
    pub forced: bool,
    pub since: Option<DateTime<Utc>>,
    pub outcome: RunOutcome,
    pub failure: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub strategy_counts: Vec<(String, usize)>,
    pub candidates: usize,
    pub deduplicated: usize,
    pub bills_added: usize,
    pub bills_updated: usize,
    pub bills_unchanged: usize,
    pub significant_updates: usize,
    pub errored: usize,
    pub errors: Vec<String>,
    pub notified: bool,
    pub report_dir: Option<String>,
}

impl UpdateSummary {
    fn start(session: &SessionConfig, forced: bool, since: Option<DateTime<Utc>>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            session_id: session.session_id.clone(),
            jurisdiction: session.jurisdiction.clone(),
            source: session.source,
            forced,
            since,
            outcome: RunOutcome::Completed,
            failure: None,
            started_at,
            finished_at: started_at,
            strategy_counts: Vec::new(),
            candidates: 0,
            deduplicated: 0,
            bills_added: 0,
            bills_updated: 0,
            bills_unchanged: 0,
            significant_updates: 0,
            errored: 0,
            errors: Vec::new(),
            notified: false,
            report_dir: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("update already in progress")]
    ConcurrentUpdateConflict { session_id: String },
    #[error("no upstream client configured for {upstream} (session {session_id})")]
    UnknownSource { session_id: String, upstream: SourceKind },
    #[error("session {0} is not in the registry")]
    UnknownSession(String),
    #[error("cursor for session {session_id} could not be claimed: {source}")]
    Persistence {
        session_id: String,
        source: PersistenceError,
    },
}

impl UpdateError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, UpdateError::ConcurrentUpdateConflict { .. })
    }
}

/// Errors that end a batch early; the run is recorded as failed.
#[derive(Debug, Error)]
enum BatchError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Persistence(PersistenceError),
}

/// Result of one session inside [`SessionUpdater::update_all`].
#[derive(Debug)]
pub enum SessionRun {
    Updated(UpdateSummary),
    NotDue {
        session_id: String,
        last_success: Option<DateTime<Utc>>,
    },
    Rejected {
        session_id: String,
        error: UpdateError,
    },
}

impl SessionRun {
    pub fn session_id(&self) -> &str {
        match self {
            SessionRun::Updated(summary) => &summary.session_id,
            SessionRun::NotDue { session_id, .. } | SessionRun::Rejected { session_id, .. } => session_id,
        }
    }
}

pub struct SourceBinding {
    pub client: Arc<dyn UpstreamClient>,
    pub adapter: Arc<dyn SourceAdapter>,
}

/// Removes the in-process claim when the run ends, however it ends.
struct Claim<'a> {
    claims: &'a Mutex<HashSet<String>>,
    session_id: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.session_id);
    }
}

pub struct SessionUpdater {
    store: Arc<dyn Persistence>,
    notifier: Arc<dyn NotificationSink>,
    categorizer: Categorizer,
    sources: HashMap<SourceKind, SourceBinding>,
    sessions: Vec<SessionConfig>,
    reports: Option<ReportWriter>,
    settings: UpdaterSettings,
    claims: Mutex<HashSet<String>>,
}

impl SessionUpdater {
    pub fn new(
        store: Arc<dyn Persistence>,
        notifier: Arc<dyn NotificationSink>,
        categorizer: Categorizer,
        settings: UpdaterSettings,
    ) -> Self {
        Self {
            store,
            notifier,
            categorizer,
            sources: HashMap::new(),
            sessions: Vec::new(),
            reports: None,
            settings,
            claims: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_source(mut self, client: Arc<dyn UpstreamClient>, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.sources.insert(adapter.source(), SourceBinding { client, adapter });
        self
    }

    pub fn with_sessions(mut self, sessions: Vec<SessionConfig>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_reports(mut self, reports: ReportWriter) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn sessions(&self) -> &[SessionConfig] {
        &self.sessions
    }

    pub fn settings(&self) -> &UpdaterSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn Persistence> {
        &self.store
    }

    fn claim(&self, session_id: &str) -> Result<Claim<'_>, UpdateError> {
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        if !claims.insert(session_id.to_string()) {
            return Err(UpdateError::ConcurrentUpdateConflict {
                session_id: session_id.to_string(),
            });
        }
        Ok(Claim {
            claims: &self.claims,
            session_id: session_id.to_string(),
        })
    }

    pub async fn update_session_by_id(&self, session_id: &str, force: bool) -> Result<UpdateSummary, UpdateError> {
        let session = self
            .sessions
            .iter()
            .find(|s| s.session_id == session_id)
            .ok_or_else(|| UpdateError::UnknownSession(session_id.to_string()))?;
        self.update_session(session, force).await
    }

    /// Run one incremental update for `session`.
    ///
    /// `Err` means the run never started (conflict, unknown source, cursor not
    /// claimable). Once started, failures are reported through
    /// [`UpdateSummary::outcome`] and the cursor is marked failed, leaving its
    /// last successful fetch time untouched.
    pub async fn update_session(&self, session: &SessionConfig, force: bool) -> Result<UpdateSummary, UpdateError> {
        let span = info_span!(
            "session_update",
            session_id = %session.session_id,
            source = %session.source,
            force
        );
        self.run_session(session, force).instrument(span).await
    }

    async fn run_session(&self, session: &SessionConfig, force: bool) -> Result<UpdateSummary, UpdateError> {
        let _claim = self.claim(&session.session_id)?;
        let binding = self
            .sources
            .get(&session.source)
            .ok_or_else(|| UpdateError::UnknownSource {
                session_id: session.session_id.clone(),
                upstream: session.source,
            })?;
        let persist = |source| UpdateError::Persistence {
            session_id: session.session_id.clone(),
            source,
        };

        let started_at = Utc::now();
        let mut cursor = self
            .store
            .get_cursor(&session.session_id)
            .await
            .map_err(persist)?
            .unwrap_or_else(|| SessionCursor::new(&session.session_id, &session.jurisdiction, started_at));

        if cursor.is_running() {
            if !cursor.is_stale_run(started_at, self.settings.stale_run_after) {
                info!(run_started_at = ?cursor.run_started_at, "session already running elsewhere");
                return Err(UpdateError::ConcurrentUpdateConflict {
                    session_id: session.session_id.clone(),
                });
            }
            warn!(run_started_at = ?cursor.run_started_at, "taking over stale running cursor");
        }

        let since = if force { None } else { cursor.last_successful_fetch_at };
        cursor.begin_run(started_at);
        self.store.save_cursor(&cursor).await.map_err(persist)?;
        info!(since = ?since, "session update started");

        let mut summary = UpdateSummary::start(session, force, since, started_at);
        let mut changed = Vec::new();
        let batch = tokio::time::timeout(
            self.settings.batch_timeout,
            self.run_batch(session, binding, since, &mut summary, &mut changed),
        )
        .await;

        let failure = match batch {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(_) => Some(format!(
                "batch timed out after {}s",
                self.settings.batch_timeout.as_secs()
            )),
        };

        let finished_at = Utc::now();
        summary.finished_at = finished_at;
        match &failure {
            None => {
                // The next window starts where this run started, so upstream
                // changes made mid-run are picked up again.
                cursor.finish_success(started_at);
                cursor.updated_at = finished_at;
            }
            Some(message) => {
                error!(error = %message, "session update failed");
                cursor.finish_failure(finished_at, message.clone());
                summary.outcome = RunOutcome::Failed;
                summary.failure = Some(message.clone());
            }
        }
        if let Err(err) = self.store.save_cursor(&cursor).await {
            error!(error = %err, "could not save cursor after run");
            summary.errors.push(format!("cursor not saved: {err}"));
        }

        let notable = summary.bills_added + summary.significant_updates;
        if notable > self.settings.notification_threshold {
            match self
                .notifier
                .emit(&session.session_id, summary.bills_added, summary.significant_updates)
                .await
            {
                Ok(()) => summary.notified = true,
                Err(err) => {
                    warn!(error = %err, "could not emit update notification");
                    summary.errors.push(format!("notification not emitted: {err}"));
                }
            }
        }

        if let Some(reports) = &self.reports {
            match reports.write(&summary, &changed).await {
                Ok(dir) => summary.report_dir = Some(dir.display().to_string()),
                Err(err) => warn!(error = %err, "could not write run report"),
            }
        }

        info!(
            outcome = ?summary.outcome,
            candidates = summary.candidates,
            added = summary.bills_added,
            updated = summary.bills_updated,
            unchanged = summary.bills_unchanged,
            significant = summary.significant_updates,
            errored = summary.errored,
            "session update finished"
        );
        Ok(summary)
    }

    async fn run_batch(
        &self,
        session: &SessionConfig,
        binding: &SourceBinding,
        since: Option<DateTime<Utc>>,
        summary: &mut UpdateSummary,
        changed: &mut Vec<LegislativeRecord>,
    ) -> Result<(), BatchError> {
        let since_date = since.map(|s| s.date_naive());
        let pool = collect_candidates(
            binding.client.as_ref(),
            binding.adapter.as_ref(),
            &session.target(),
            since_date,
            self.settings.max_pages,
        )
        .await?;
        summary.candidates = pool.records.len();
        summary.strategy_counts = pool.strategy_counts;

        let fetched_at = Utc::now();
        let map = binding.adapter.field_map();
        let mut normalized = Vec::with_capacity(pool.records.len());
        for raw in &pool.records {
            if !raw.is_object() {
                summary.errored += 1;
                summary.errors.push("skipped non-object candidate".to_string());
                continue;
            }
            let (mut record, warnings) = normalize_with_warnings(raw, &session.jurisdiction, map, fetched_at);
            for warning in &warnings {
                debug!(natural_key = %record.natural_key, %warning, "normalization warning");
            }
            record.session_id = Some(session.session_id.clone());
            normalized.push(record);
        }

        let before = normalized.len();
        let unique = deduplicate(normalized);
        summary.deduplicated = before - unique.len();

        for mut record in unique {
            // No date cutoff here: upstream back-dates late-posted actions, and
            // unchanged records are already skipped by fingerprint.
            record.category = self.categorizer.categorize(&record.title, &record.description);

            let key = record.key();
            match self.apply_record(record, summary).await {
                Ok(Some(stored)) => changed.push(stored),
                Ok(None) => {}
                Err(err) if err.is_fatal() => return Err(BatchError::Persistence(err)),
                Err(err) => {
                    warn!(record = %key, error = %err, "record not persisted");
                    summary.errored += 1;
                    summary.errors.push(format!("{key}: {err}"));
                }
            }
        }
        Ok(())
    }

    /// Returns the written record, or `None` when it was unchanged.
    async fn apply_record(
        &self,
        mut record: LegislativeRecord,
        summary: &mut UpdateSummary,
    ) -> Result<Option<LegislativeRecord>, PersistenceError> {
        let existing = self.store.get_record(&record.key()).await?;
        let Some(existing) = existing else {
            record.needs_ai_processing = true;
            self.store.upsert(&record).await?;
            summary.bills_added += 1;
            return Ok(Some(record));
        };

        if existing.fingerprint() == record.fingerprint() {
            summary.bills_unchanged += 1;
            return Ok(None);
        }

        let significant = is_significant_change(&existing.status, &record.status);
        record.needs_ai_processing = significant || existing.needs_ai_processing;
        record.ai_attempts = if significant { 0 } else { existing.ai_attempts };
        self.store.upsert(&record).await?;

        summary.bills_updated += 1;
        if significant {
            summary.significant_updates += 1;
            debug!(record = %record.key(), from = %existing.status, to = %record.status, "significant status change");
        }
        Ok(Some(record))
    }

    /// Update every enabled session in registry order. Unless `force`, sessions
    /// updated successfully within `min_update_interval` are skipped.
    pub async fn update_all(&self, force: bool) -> Vec<SessionRun> {
        let mut runs = Vec::new();
        for session in self.sessions.iter().filter(|s| s.enabled) {
            if !force {
                match self.store.get_cursor(&session.session_id).await {
                    Ok(Some(cursor)) if !cursor.is_update_due(Utc::now(), self.settings.min_update_interval) => {
                        info!(session_id = %session.session_id, "update not due; skipping");
                        runs.push(SessionRun::NotDue {
                            session_id: session.session_id.clone(),
                            last_success: cursor.last_successful_fetch_at,
                        });
                        continue;
                    }
                    Ok(_) => {}
                    Err(source) => {
                        runs.push(SessionRun::Rejected {
                            session_id: session.session_id.clone(),
                            error: UpdateError::Persistence {
                                session_id: session.session_id.clone(),
                                source,
                            },
                        });
                        continue;
                    }
                }
            }

            let run = match self.update_session(session, force).await {
                Ok(summary) => SessionRun::Updated(summary),
                Err(error) => {
                    warn!(session_id = %session.session_id, %error, "session update not started");
                    SessionRun::Rejected {
                        session_id: session.session_id.clone(),
                        error,
                    }
                }
            };
            runs.push(run);
        }
        runs
    }

    /// Registered sessions with their persisted cursors.
    pub async fn session_status(&self) -> Result<Vec<(SessionConfig, Option<SessionCursor>)>, PersistenceError> {
        let mut cursors = self
            .store
            .list_cursors()
            .await?
            .into_iter()
            .map(|c| (c.session_id.clone(), c))
            .collect::<HashMap<_, _>>();
        Ok(self
            .sessions
            .iter()
            .map(|s| (s.clone(), cursors.remove(&s.session_id)))
            .collect())
    }
}
