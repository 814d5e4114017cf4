//! Postgres-backed persistence (sqlx, runtime-checked queries).

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use legitrack_core::{
    AiSummaryFields, Category, CursorStatus, LegislativeRecord, RecordKey, SessionCursor, SourceKind,
    SourceUrls,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use crate::store::{AiUpdate, NotificationSink, Persistence, PersistenceError, UpsertResult};

const RECORD_COLUMNS: &str = "jurisdiction, natural_key, source, session_id, display_number, title, \
     description, status, introduced_at, last_action_at, category, primary_url, document_url, \
     ai_summary, ai_attempts, fetched_at, needs_ai_processing";

const CURSOR_COLUMNS: &str =
    "session_id, jurisdiction, last_successful_fetch_at, status, run_started_at, last_error, updated_at";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("running migrations")?;
        info!("database migrations applied");
        Ok(())
    }
}

fn decode_err(what: &str, err: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Decode(format!("{what}: {err}"))
}

fn record_from_row(row: &PgRow) -> Result<LegislativeRecord, PersistenceError> {
    let source: String = row.try_get("source")?;
    let category: String = row.try_get("category")?;
    let ai_summary: Option<Json<AiSummaryFields>> = row.try_get("ai_summary")?;
    let ai_attempts: i32 = row.try_get("ai_attempts")?;

    Ok(LegislativeRecord {
        natural_key: row.try_get("natural_key")?,
        source: source.parse::<SourceKind>().map_err(|e| decode_err("source", e))?,
        session_id: row.try_get("session_id")?,
        display_number: row.try_get("display_number")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        jurisdiction: row.try_get("jurisdiction")?,
        status: row.try_get("status")?,
        introduced_at: row.try_get::<Option<NaiveDate>, _>("introduced_at")?,
        last_action_at: row.try_get::<Option<NaiveDate>, _>("last_action_at")?,
        category: category.parse::<Category>().map_err(|e| decode_err("category", e))?,
        source_urls: SourceUrls {
            primary: row.try_get("primary_url")?,
            document: row.try_get("document_url")?,
        },
        ai_summary: ai_summary.map(|Json(fields)| fields),
        ai_attempts: u32::try_from(ai_attempts).unwrap_or_default(),
        fetched_at: row.try_get::<DateTime<Utc>, _>("fetched_at")?,
        needs_ai_processing: row.try_get("needs_ai_processing")?,
    })
}

fn cursor_from_row(row: &PgRow) -> Result<SessionCursor, PersistenceError> {
    let status: String = row.try_get("status")?;
    Ok(SessionCursor {
        session_id: row.try_get("session_id")?,
        jurisdiction: row.try_get("jurisdiction")?,
        last_successful_fetch_at: row.try_get("last_successful_fetch_at")?,
        status: status.parse::<CursorStatus>().map_err(|e| decode_err("status", e))?,
        run_started_at: row.try_get("run_started_at")?,
        last_error: row.try_get("last_error")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn non_empty_summary(record: &LegislativeRecord) -> Option<Json<AiSummaryFields>> {
    record
        .ai_summary
        .as_ref()
        .filter(|s| !s.is_empty())
        .cloned()
        .map(Json)
}

#[async_trait]
impl Persistence for PgStore {
    async fn get_record(&self, key: &RecordKey) -> Result<Option<LegislativeRecord>, PersistenceError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM legislative_records WHERE jurisdiction = $1 AND natural_key = $2"
        );
        let row = sqlx::query(&sql)
            .bind(&key.jurisdiction)
            .bind(&key.natural_key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn upsert(&self, record: &LegislativeRecord) -> Result<UpsertResult, PersistenceError> {
        // COALESCE keeps a stored summary when the incoming version has none.
        let row = sqlx::query(
            r#"
            INSERT INTO legislative_records (
                jurisdiction, natural_key, source, session_id, display_number, title,
                description, status, introduced_at, last_action_at, category, primary_url,
                document_url, ai_summary, ai_attempts, fingerprint, fetched_at,
                needs_ai_processing, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
                NOW(), NOW()
            )
            ON CONFLICT (jurisdiction, natural_key) DO UPDATE SET
                source = EXCLUDED.source,
                session_id = COALESCE(EXCLUDED.session_id, legislative_records.session_id),
                display_number = EXCLUDED.display_number,
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                status = EXCLUDED.status,
                introduced_at = EXCLUDED.introduced_at,
                last_action_at = EXCLUDED.last_action_at,
                category = EXCLUDED.category,
                primary_url = EXCLUDED.primary_url,
                document_url = EXCLUDED.document_url,
                ai_summary = COALESCE(EXCLUDED.ai_summary, legislative_records.ai_summary),
                ai_attempts = EXCLUDED.ai_attempts,
                fingerprint = EXCLUDED.fingerprint,
                fetched_at = EXCLUDED.fetched_at,
                needs_ai_processing = EXCLUDED.needs_ai_processing
                    OR legislative_records.needs_ai_processing,
                updated_at = NOW()
            RETURNING (xmax = 0) AS created
            "#,
        )
        .bind(&record.jurisdiction)
        .bind(&record.natural_key)
        .bind(record.source.as_str())
        .bind(&record.session_id)
        .bind(&record.display_number)
        .bind(&record.title)
        .bind(&record.description)
        .bind(&record.status)
        .bind(record.introduced_at)
        .bind(record.last_action_at)
        .bind(record.category.as_str())
        .bind(&record.source_urls.primary)
        .bind(&record.source_urls.document)
        .bind(non_empty_summary(record))
        .bind(i32::try_from(record.ai_attempts).unwrap_or(i32::MAX))
        .bind(record.fingerprint())
        .bind(record.fetched_at)
        .bind(record.needs_ai_processing)
        .fetch_one(&self.pool)
        .await?;

        Ok(UpsertResult {
            created: row.try_get("created")?,
        })
    }

    async fn get_cursor(&self, session_id: &str) -> Result<Option<SessionCursor>, PersistenceError> {
        let sql = format!("SELECT {CURSOR_COLUMNS} FROM session_cursors WHERE session_id = $1");
        let row = sqlx::query(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(cursor_from_row).transpose()
    }

    async fn save_cursor(&self, cursor: &SessionCursor) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO session_cursors (
                session_id, jurisdiction, last_successful_fetch_at, status, run_started_at,
                last_error, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (session_id) DO UPDATE SET
                jurisdiction = EXCLUDED.jurisdiction,
                last_successful_fetch_at = EXCLUDED.last_successful_fetch_at,
                status = EXCLUDED.status,
                run_started_at = EXCLUDED.run_started_at,
                last_error = EXCLUDED.last_error,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&cursor.session_id)
        .bind(&cursor.jurisdiction)
        .bind(cursor.last_successful_fetch_at)
        .bind(cursor.status.as_str())
        .bind(cursor.run_started_at)
        .bind(&cursor.last_error)
        .bind(cursor.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_cursors(&self) -> Result<Vec<SessionCursor>, PersistenceError> {
        let sql = format!("SELECT {CURSOR_COLUMNS} FROM session_cursors ORDER BY session_id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(cursor_from_row).collect()
    }

    async fn records_needing_ai(&self, limit: usize) -> Result<Vec<LegislativeRecord>, PersistenceError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM legislative_records \
             WHERE needs_ai_processing ORDER BY fetched_at ASC LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn apply_ai_update(
        &self,
        key: &RecordKey,
        expected_fingerprint: &str,
        update: &AiUpdate,
    ) -> Result<bool, PersistenceError> {
        let result = match update {
            AiUpdate::Summarized(fields) => {
                let summary = Some(fields.clone()).filter(|f| !f.is_empty()).map(Json);
                sqlx::query(
                    r#"
                    UPDATE legislative_records SET
                        ai_summary = COALESCE($3, ai_summary),
                        needs_ai_processing = FALSE,
                        ai_attempts = 0,
                        updated_at = NOW()
                    WHERE jurisdiction = $1 AND natural_key = $2 AND fingerprint = $4
                    "#,
                )
                .bind(&key.jurisdiction)
                .bind(&key.natural_key)
                .bind(summary)
                .bind(expected_fingerprint)
                .execute(&self.pool)
                .await?
            }
            AiUpdate::Failed { attempts, requeue } => {
                sqlx::query(
                    r#"
                    UPDATE legislative_records SET
                        ai_attempts = $3,
                        needs_ai_processing = $4,
                        updated_at = NOW()
                    WHERE jurisdiction = $1 AND natural_key = $2 AND fingerprint = $5
                    "#,
                )
                .bind(&key.jurisdiction)
                .bind(&key.natural_key)
                .bind(i32::try_from(*attempts).unwrap_or(i32::MAX))
                .bind(*requeue)
                .bind(expected_fingerprint)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        let exists = sqlx::query("SELECT 1 FROM legislative_records WHERE jurisdiction = $1 AND natural_key = $2")
            .bind(&key.jurisdiction)
            .bind(&key.natural_key)
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(PersistenceError::NotFound(key.to_string())),
        }
    }
}

#[async_trait]
impl NotificationSink for PgStore {
    async fn emit(&self, session_id: &str, new_count: usize, updated_count: usize) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO update_notifications (id, session_id, new_count, updated_count, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(i32::try_from(new_count).unwrap_or(i32::MAX))
        .bind(i32::try_from(updated_count).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
