use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::updater::{SessionUpdater, UpdateError, UpdateSummary};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Running,
    Completed { summary: UpdateSummary },
    Failed { message: String },
    AlreadyInProgress,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobState::Running)
    }

    /// Text for whoever asked for the refresh. A conflict is not reported as a failure.
    pub fn user_message(&self) -> String {
        match self {
            JobState::Running => "update running".to_string(),
            JobState::Completed { summary } if summary.is_completed() => format!(
                "update finished: {} new, {} updated, {} unchanged",
                summary.bills_added, summary.bills_updated, summary.bills_unchanged
            ),
            JobState::Completed { summary } => format!(
                "update failed: {}",
                summary.failure.as_deref().unwrap_or("unknown error")
            ),
            JobState::Failed { message } => format!("update failed: {message}"),
            JobState::AlreadyInProgress => "update already in progress".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub session_id: String,
    pub forced: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: JobState,
}

const DEFAULT_RETENTION_HOURS: i64 = 24;

/// Shared view of background update jobs. Cloning shares the same table.
///
/// Finished jobs older than the retention window are dropped whenever another
/// job finishes, so a long-running scheduler keeps a bounded table.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<Uuid, JobRecord>>>,
    retention: Duration,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_retention(Duration::hours(DEFAULT_RETENTION_HOURS))
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            jobs: Arc::default(),
            retention,
        }
    }

    fn with_jobs<T>(&self, f: impl FnOnce(&mut HashMap<Uuid, JobRecord>) -> T) -> T {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut jobs)
    }

    pub fn start(&self, session_id: &str, forced: bool) -> Uuid {
        let job_id = Uuid::new_v4();
        let record = JobRecord {
            job_id,
            session_id: session_id.to_string(),
            forced,
            started_at: Utc::now(),
            finished_at: None,
            state: JobState::Running,
        };
        self.with_jobs(|jobs| jobs.insert(job_id, record));
        job_id
    }

    pub fn finish(&self, job_id: Uuid, result: Result<UpdateSummary, UpdateError>) {
        let state = match result {
            Ok(summary) => JobState::Completed { summary },
            Err(err) if err.is_conflict() => JobState::AlreadyInProgress,
            Err(err) => JobState::Failed {
                message: err.to_string(),
            },
        };
        info!(%job_id, message = %state.user_message(), "job finished");
        let pruned = self.prune_finished(self.retention);
        if pruned > 0 {
            debug!(pruned, "expired jobs dropped");
        }
        self.with_jobs(|jobs| match jobs.get_mut(&job_id) {
            Some(job) => {
                job.finished_at = Some(Utc::now());
                job.state = state;
            }
            None => warn!(%job_id, "finished job was not registered"),
        });
    }

    /// Start an update on a background task and return its job id immediately.
    pub fn spawn_session_update(&self, updater: Arc<SessionUpdater>, session_id: &str, force: bool) -> Uuid {
        let job_id = self.start(session_id, force);
        let registry = self.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            let result = updater.update_session_by_id(&session_id, force).await;
            registry.finish(job_id, result);
        });
        job_id
    }

    pub fn get(&self, job_id: Uuid) -> Option<JobRecord> {
        self.with_jobs(|jobs| jobs.get(&job_id).cloned())
    }

    /// Newest first.
    pub fn list(&self) -> Vec<JobRecord> {
        let mut out = self.with_jobs(|jobs| jobs.values().cloned().collect::<Vec<_>>());
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        out
    }

    /// Drop finished jobs older than `older_than`; returns how many were removed.
    pub fn prune_finished(&self, older_than: Duration) -> usize {
        let cutoff = Utc::now() - older_than;
        self.with_jobs(|jobs| {
            let before = jobs.len();
            jobs.retain(|_, job| !(job.state.is_finished() && job.finished_at.is_some_and(|at| at < cutoff)));
            before - jobs.len()
        })
    }
}
