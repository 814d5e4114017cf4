use async_trait::async_trait;
use legitrack_core::{AiSummaryFields, LegislativeRecord, RecordKey, SessionCursor};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("persistence backend unavailable: {0}")]
    Unavailable(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("could not decode stored row: {0}")]
    Decode(String),
    #[error("record not found: {0}")]
    NotFound(String),
}

impl PersistenceError {
    /// Fatal errors abort the whole batch; anything else only skips one record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PersistenceError::Unavailable(_))
    }
}

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Configuration(_) => PersistenceError::Unavailable(err.to_string()),
            sqlx::Error::RowNotFound => PersistenceError::NotFound(err.to_string()),
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. } => PersistenceError::Decode(err.to_string()),
            other => PersistenceError::Query(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertResult {
    pub created: bool,
}

/// Outcome of one summarizer call, applied to the stored record.
#[derive(Debug, Clone, PartialEq)]
pub enum AiUpdate {
    /// Store the fields (ignored when empty), clear the flag, reset attempts.
    Summarized(AiSummaryFields),
    /// Record the attempt count; `requeue` keeps the record in the queue.
    Failed { attempts: u32, requeue: bool },
}

/// Upsert-by-natural-key storage used by the update pipeline.
///
/// `upsert` must be atomic per record and must never replace a stored non-empty
/// `ai_summary` with an empty or missing one.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn get_record(&self, key: &RecordKey) -> Result<Option<LegislativeRecord>, PersistenceError>;

    async fn upsert(&self, record: &LegislativeRecord) -> Result<UpsertResult, PersistenceError>;

    async fn get_cursor(&self, session_id: &str) -> Result<Option<SessionCursor>, PersistenceError>;

    async fn save_cursor(&self, cursor: &SessionCursor) -> Result<(), PersistenceError>;

    async fn list_cursors(&self) -> Result<Vec<SessionCursor>, PersistenceError>;

    async fn records_needing_ai(&self, limit: usize) -> Result<Vec<LegislativeRecord>, PersistenceError>;

    /// Apply `update` only if the stored fingerprint still equals
    /// `expected_fingerprint`. Returns `false` and leaves the record untouched
    /// when it changed after it was dequeued.
    async fn apply_ai_update(
        &self,
        key: &RecordKey,
        expected_fingerprint: &str,
        update: &AiUpdate,
    ) -> Result<bool, PersistenceError>;
}

/// User-facing "new activity" notices emitted after an update run.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn emit(&self, session_id: &str, new_count: usize, updated_count: usize) -> Result<(), PersistenceError>;
}
