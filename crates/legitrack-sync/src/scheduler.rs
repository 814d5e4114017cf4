use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::ai::AiProcessor;
use crate::jobs::JobRegistry;
use crate::updater::{SessionRun, SessionUpdater};

/// Build the cron scheduler, or `None` when scheduling is disabled.
///
/// The update job runs `update_all(false)`, so sessions refreshed recently are
/// skipped. The AI job drains one batch of the summarization queue.
pub async fn build_scheduler(
    enabled: bool,
    update_cron: &str,
    ai_cron: &str,
    updater: Arc<SessionUpdater>,
    ai: Option<Arc<AiProcessor>>,
    jobs: JobRegistry,
) -> Result<Option<JobScheduler>> {
    if !enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;

    let update_job = Job::new_async(update_cron, move |_uuid, _l| {
        let updater = updater.clone();
        let jobs = jobs.clone();
        Box::pin(async move {
            info!("scheduled update triggered");
            for run in updater.update_all(false).await {
                record_run(&jobs, run);
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {update_cron}"))?;
    sched.add(update_job).await.context("adding update job")?;

    match ai {
        Some(ai) => {
            let ai_job = Job::new_async(ai_cron, move |_uuid, _l| {
                let ai = ai.clone();
                Box::pin(async move {
                    match ai.process_pending().await {
                        Ok(summary) if summary.attempted > 0 => info!(
                            summarized = summary.summarized,
                            abandoned = summary.abandoned,
                            "scheduled ai pass finished"
                        ),
                        Ok(_) => {}
                        Err(err) => error!(error = %err, "scheduled ai pass could not load queue"),
                    }
                })
            })
            .with_context(|| format!("creating scheduler job for cron {ai_cron}"))?;
            sched.add(ai_job).await.context("adding ai job")?;
        }
        None => warn!("no summarizer configured; ai queue will not be scheduled"),
    }

    Ok(Some(sched))
}

/// Scheduled runs show up in the job table next to on-demand ones; each
/// finish drops jobs past the registry's retention.
fn record_run(jobs: &JobRegistry, run: SessionRun) {
    match run {
        SessionRun::Updated(summary) => {
            let id = jobs.start(&summary.session_id, summary.forced);
            jobs.finish(id, Ok(summary));
        }
        SessionRun::Rejected { session_id, error } => {
            let id = jobs.start(&session_id, false);
            jobs.finish(id, Err(error));
        }
        SessionRun::NotDue { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categorize::Categorizer;
    use crate::updater::{UpdateError, UpdaterSettings};
    use legitrack_storage::MemoryStore;

    fn updater() -> Arc<SessionUpdater> {
        let store = Arc::new(MemoryStore::new());
        Arc::new(SessionUpdater::new(
            store.clone(),
            store,
            Categorizer::builtin().unwrap(),
            UpdaterSettings::default(),
        ))
    }

    #[tokio::test]
    async fn disabled_scheduler_is_not_built() {
        let sched = build_scheduler(false, "0 0 2 * * *", "0 30 * * * *", updater(), None, JobRegistry::new())
            .await
            .unwrap();
        assert!(sched.is_none());
    }

    #[tokio::test]
    async fn invalid_cron_is_rejected() {
        let result = build_scheduler(true, "not a cron", "0 30 * * * *", updater(), None, JobRegistry::new()).await;
        assert!(result.is_err());
    }

    #[test]
    fn rejected_runs_are_recorded_and_skips_are_not() {
        let jobs = JobRegistry::new();
        record_run(
            &jobs,
            SessionRun::NotDue {
                session_id: "2199".into(),
                last_success: None,
            },
        );
        assert!(jobs.list().is_empty());

        record_run(
            &jobs,
            SessionRun::Rejected {
                session_id: "2199".into(),
                error: UpdateError::ConcurrentUpdateConflict {
                    session_id: "2199".into(),
                },
            },
        );
        let listed = jobs.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].state.user_message(), "update already in progress");
    }

    #[test]
    fn repeated_scheduled_runs_keep_the_job_table_bounded() {
        let jobs = JobRegistry::with_retention(chrono::Duration::zero());
        for _ in 0..5 {
            record_run(
                &jobs,
                SessionRun::Rejected {
                    session_id: "2199".into(),
                    error: UpdateError::UnknownSession("2199".into()),
                },
            );
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert_eq!(jobs.list().len(), 1);
    }
}
