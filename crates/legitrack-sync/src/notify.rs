use async_trait::async_trait;
use legitrack_storage::{NotificationSink, PersistenceError};
use tracing::info;

/// Sink for runs without a database; the notice only goes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn emit(&self, session_id: &str, new_count: usize, updated_count: usize) -> Result<(), PersistenceError> {
        info!(session_id, new_count, updated_count, "new legislative activity");
        Ok(())
    }
}
