use std::sync::Arc;

use futures::stream::{self, StreamExt};
use legitrack_adapters::{summary_input, Summarizer, SummarizerError};
use legitrack_core::{AiSummaryFields, LegislativeRecord, RecordKey};
use legitrack_storage::{AiUpdate, Persistence, PersistenceError};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AiPolicy {
    pub concurrency: usize,
    pub batch_size: usize,
    /// 0 keeps the single best-effort attempt per flagged change.
    pub max_ai_retries: u32,
}

impl Default for AiPolicy {
    fn default() -> Self {
        Self {
            concurrency: 3,
            batch_size: 50,
            max_ai_retries: 0,
        }
    }
}

impl AiPolicy {
    /// Decide what a failed call does to the record's queue state.
    pub fn on_failure(&self, previous_attempts: u32) -> AiUpdate {
        let attempts = previous_attempts.saturating_add(1);
        AiUpdate::Failed {
            attempts,
            requeue: attempts <= self.max_ai_retries,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AiRunSummary {
    pub attempted: usize,
    pub summarized: usize,
    pub requeued: usize,
    pub abandoned: usize,
    /// Records that changed upstream while their summary was being generated.
    /// They stay queued for the next pass.
    pub superseded: usize,
    pub errors: Vec<String>,
}

pub struct AiProcessor {
    store: Arc<dyn Persistence>,
    summarizer: Arc<dyn Summarizer>,
    policy: AiPolicy,
}

enum Outcome {
    Summarized,
    Requeued(String),
    Abandoned(String),
    Superseded,
    NotApplied(String),
}

fn non_empty(fields: AiSummaryFields) -> Result<AiSummaryFields, SummarizerError> {
    if fields.is_empty() {
        Err(SummarizerError::Payload("empty summary".to_string()))
    } else {
        Ok(fields)
    }
}

impl AiProcessor {
    pub fn new(store: Arc<dyn Persistence>, summarizer: Arc<dyn Summarizer>, policy: AiPolicy) -> Self {
        Self {
            store,
            summarizer,
            policy,
        }
    }

    pub fn policy(&self) -> AiPolicy {
        self.policy
    }

    /// Summarize up to `batch_size` flagged records, `concurrency` calls at a time.
    ///
    /// Only loading the queue can fail; per-record summarizer and store errors are
    /// reported in the returned summary.
    pub async fn process_pending(&self) -> Result<AiRunSummary, PersistenceError> {
        let pending = self.store.records_needing_ai(self.policy.batch_size).await?;
        let mut summary = AiRunSummary {
            attempted: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            return Ok(summary);
        }

        let span = info_span!("ai_queue", records = pending.len(), concurrency = self.policy.concurrency);
        let outcomes = stream::iter(pending)
            .map(|record| self.process_one(record))
            .buffer_unordered(self.policy.concurrency.max(1))
            .collect::<Vec<_>>()
            .instrument(span)
            .await;

        for outcome in outcomes {
            match outcome {
                Outcome::Summarized => summary.summarized += 1,
                Outcome::Requeued(err) => {
                    summary.requeued += 1;
                    summary.errors.push(err);
                }
                Outcome::Abandoned(err) => {
                    summary.abandoned += 1;
                    summary.errors.push(err);
                }
                Outcome::Superseded => summary.superseded += 1,
                Outcome::NotApplied(err) => summary.errors.push(err),
            }
        }

        info!(
            attempted = summary.attempted,
            summarized = summary.summarized,
            requeued = summary.requeued,
            abandoned = summary.abandoned,
            superseded = summary.superseded,
            "ai queue pass finished"
        );
        Ok(summary)
    }

    async fn process_one(&self, record: LegislativeRecord) -> Outcome {
        let key: RecordKey = record.key();
        let fingerprint = record.fingerprint();
        let result = self
            .summarizer
            .summarize(&summary_input(&record))
            .await
            .and_then(non_empty);

        let (update, outcome) = match result {
            Ok(fields) => (AiUpdate::Summarized(fields), Outcome::Summarized),
            Err(err) => {
                let update = self.policy.on_failure(record.ai_attempts);
                let message = format!("{key}: {err}");
                warn!(record = %key, error = %err, "summarizer call failed");
                let outcome = match update {
                    AiUpdate::Failed { requeue: true, .. } => Outcome::Requeued(message),
                    _ => Outcome::Abandoned(message),
                };
                (update, outcome)
            }
        };

        match self.store.apply_ai_update(&key, &fingerprint, &update).await {
            Ok(true) => outcome,
            Ok(false) => {
                info!(record = %key, "record changed during summarization; left queued");
                Outcome::Superseded
            }
            Err(err) => {
                warn!(record = %key, error = %err, "could not store ai result");
                Outcome::NotApplied(format!("{key}: {err}"))
            }
        }
    }
}
