use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use legitrack_core::{LegislativeRecord, RecordKey, SessionCursor};
use tokio::sync::Mutex;

use crate::store::{AiUpdate, NotificationSink, Persistence, PersistenceError, UpsertResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredNotification {
    pub session_id: String,
    pub new_count: usize,
    pub updated_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Process-local store used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<RecordKey, LegislativeRecord>>,
    cursors: Mutex<BTreeMap<String, SessionCursor>>,
    notifications: Mutex<Vec<StoredNotification>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<LegislativeRecord> {
        self.records.lock().await.values().cloned().collect()
    }

    pub async fn notifications(&self) -> Vec<StoredNotification> {
        self.notifications.lock().await.clone()
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn get_record(&self, key: &RecordKey) -> Result<Option<LegislativeRecord>, PersistenceError> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn upsert(&self, record: &LegislativeRecord) -> Result<UpsertResult, PersistenceError> {
        let mut records = self.records.lock().await;
        let key = record.key();
        match records.get(&key) {
            Some(existing) => {
                let merged = existing.merged_with(record);
                records.insert(key, merged);
                Ok(UpsertResult { created: false })
            }
            None => {
                records.insert(key, record.clone());
                Ok(UpsertResult { created: true })
            }
        }
    }

    async fn get_cursor(&self, session_id: &str) -> Result<Option<SessionCursor>, PersistenceError> {
        Ok(self.cursors.lock().await.get(session_id).cloned())
    }

    async fn save_cursor(&self, cursor: &SessionCursor) -> Result<(), PersistenceError> {
        self.cursors
            .lock()
            .await
            .insert(cursor.session_id.clone(), cursor.clone());
        Ok(())
    }

    async fn list_cursors(&self) -> Result<Vec<SessionCursor>, PersistenceError> {
        Ok(self.cursors.lock().await.values().cloned().collect())
    }

    async fn records_needing_ai(&self, limit: usize) -> Result<Vec<LegislativeRecord>, PersistenceError> {
        let records = self.records.lock().await;
        let mut pending = records
            .values()
            .filter(|r| r.needs_ai_processing)
            .cloned()
            .collect::<Vec<_>>();
        pending.sort_by_key(|r| r.fetched_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn apply_ai_update(
        &self,
        key: &RecordKey,
        expected_fingerprint: &str,
        update: &AiUpdate,
    ) -> Result<bool, PersistenceError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(key)
            .ok_or_else(|| PersistenceError::NotFound(key.to_string()))?;
        if record.fingerprint() != expected_fingerprint {
            return Ok(false);
        }
        match update {
            AiUpdate::Summarized(fields) => {
                if !fields.is_empty() {
                    record.ai_summary = Some(fields.clone());
                }
                record.needs_ai_processing = false;
                record.ai_attempts = 0;
            }
            AiUpdate::Failed { attempts, requeue } => {
                record.ai_attempts = *attempts;
                record.needs_ai_processing = *requeue;
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl NotificationSink for MemoryStore {
    async fn emit(&self, session_id: &str, new_count: usize, updated_count: usize) -> Result<(), PersistenceError> {
        self.notifications.lock().await.push(StoredNotification {
            session_id: session_id.to_string(),
            new_count,
            updated_count,
            created_at: Utc::now(),
        });
        Ok(())
    }
}
