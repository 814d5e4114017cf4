use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{BooleanArray, RecordBatch, StringArray, UInt32Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use legitrack_core::LegislativeRecord;
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::updater::UpdateSummary;

#[derive(Debug, Clone, Serialize)]
pub struct ReportManifest {
    pub schema_version: u32,
    pub run_id: String,
    pub files: Vec<ReportManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Writes `<root>/<run_id>/` with the run summary, the changed records as
/// Parquet, and a checksum manifest.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    root: PathBuf,
}

impl ReportWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn write(&self, summary: &UpdateSummary, changed: &[LegislativeRecord]) -> Result<PathBuf> {
        let run_dir = self.root.join(summary.run_id.to_string());
        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("creating {}", run_dir.display()))?;

        let summary_path = run_dir.join("update_summary.json");
        let bytes = serde_json::to_vec_pretty(summary).context("serializing update summary")?;
        fs::write(&summary_path, bytes)
            .await
            .with_context(|| format!("writing {}", summary_path.display()))?;

        let records_path = run_dir.join("records.parquet");
        write_records_parquet(&records_path, changed)?;

        let manifest = ReportManifest {
            schema_version: 1,
            run_id: summary.run_id.to_string(),
            files: vec![
                manifest_entry("update_summary", &run_dir, &summary_path)?,
                manifest_entry("records", &run_dir, &records_path)?,
            ],
        };
        let manifest_path = run_dir.join("manifest.json");
        let bytes = serde_json::to_vec_pretty(&manifest).context("serializing report manifest")?;
        fs::write(&manifest_path, bytes)
            .await
            .with_context(|| format!("writing {}", manifest_path.display()))?;

        Ok(run_dir)
    }
}

fn text_column(records: &[LegislativeRecord], field: impl Fn(&LegislativeRecord) -> &str) -> StringArray {
    StringArray::from(records.iter().map(field).collect::<Vec<_>>())
}

fn write_records_parquet(path: &Path, records: &[LegislativeRecord]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("jurisdiction", DataType::Utf8, false),
        ArrowField::new("natural_key", DataType::Utf8, false),
        ArrowField::new("display_number", DataType::Utf8, false),
        ArrowField::new("title", DataType::Utf8, false),
        ArrowField::new("status", DataType::Utf8, false),
        ArrowField::new("category", DataType::Utf8, false),
        ArrowField::new("last_action_at", DataType::Utf8, true),
        ArrowField::new("needs_ai_processing", DataType::Boolean, false),
        ArrowField::new("ai_attempts", DataType::UInt32, false),
    ]));

    let last_action = StringArray::from(
        records
            .iter()
            .map(|r| r.last_action_at.map(|d| d.to_string()))
            .collect::<Vec<_>>(),
    );
    let needs_ai = BooleanArray::from(records.iter().map(|r| r.needs_ai_processing).collect::<Vec<_>>());
    let attempts = UInt32Array::from(records.iter().map(|r| r.ai_attempts).collect::<Vec<_>>());

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(text_column(records, |r| r.jurisdiction.as_str())),
            Arc::new(text_column(records, |r| r.natural_key.as_str())),
            Arc::new(text_column(records, |r| r.display_number.as_str())),
            Arc::new(text_column(records, |r| r.title.as_str())),
            Arc::new(text_column(records, |r| r.status.as_str())),
            Arc::new(text_column(records, |r| r.category.as_str())),
            Arc::new(last_action),
            Arc::new(needs_ai),
            Arc::new(attempts),
        ],
    )
    .context("building records batch")?;

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn manifest_entry(name: &str, run_dir: &Path, path: &Path) -> Result<ReportManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let sha256 = hex::encode(Sha256::digest(&bytes));
    let rel = path.strip_prefix(run_dir).unwrap_or(path).display().to_string();
    Ok(ReportManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::updater::RunOutcome;
    use chrono::{NaiveDate, TimeZone, Utc};
    use legitrack_core::{Category, SourceKind, SourceUrls};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use uuid::Uuid;

    fn summary() -> UpdateSummary {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).single().unwrap();
        UpdateSummary {
            run_id: Uuid::new_v4(),
            session_id: "2199".into(),
            jurisdiction: "TX".into(),
            source: SourceKind::Legiscan,
            forced: false,
            since: None,
            outcome: RunOutcome::Completed,
            failure: None,
            started_at: at,
            finished_at: at,
            strategy_counts: vec![("masterlist".into(), 2)],
            candidates: 2,
            deduplicated: 0,
            bills_added: 2,
            bills_updated: 0,
            bills_unchanged: 0,
            significant_updates: 0,
            errored: 0,
            errors: Vec::new(),
            notified: true,
            report_dir: None,
        }
    }

    fn record(key: &str, last_action: Option<NaiveDate>) -> LegislativeRecord {
        LegislativeRecord {
            natural_key: key.into(),
            source: SourceKind::Legiscan,
            session_id: Some("2199".into()),
            display_number: format!("HB{key}"),
            title: "Relating to hospital price transparency.".into(),
            description: String::new(),
            jurisdiction: "TX".into(),
            status: "Introduced".into(),
            introduced_at: None,
            last_action_at: last_action,
            category: Category::Healthcare,
            source_urls: SourceUrls::default(),
            ai_summary: None,
            ai_attempts: 0,
            fetched_at: Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).single().unwrap(),
            needs_ai_processing: true,
        }
    }

    #[tokio::test]
    async fn writes_summary_parquet_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path());
        let summary = summary();
        let records = vec![record("1", NaiveDate::from_ymd_opt(2025, 3, 14)), record("2", None)];

        let run_dir = writer.write(&summary, &records).await.unwrap();
        assert_eq!(run_dir, dir.path().join(summary.run_id.to_string()));

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(run_dir.join("update_summary.json")).unwrap()).unwrap();
        assert_eq!(written["bills_added"], 2);
        assert_eq!(written["outcome"], "completed");

        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(run_dir.join("records.parquet")).unwrap())
            .unwrap()
            .build()
            .unwrap();
        let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
        assert_eq!(rows, 2);

        let manifest: serde_json::Value =
            serde_json::from_slice(&std::fs::read(run_dir.join("manifest.json")).unwrap()).unwrap();
        let files = manifest["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        let parquet_bytes = std::fs::read(run_dir.join("records.parquet")).unwrap();
        assert_eq!(files[1]["path"], "records.parquet");
        assert_eq!(files[1]["sha256"], hex::encode(Sha256::digest(&parquet_bytes)));
    }

    #[tokio::test]
    async fn empty_change_set_still_writes_a_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = ReportWriter::new(dir.path()).write(&summary(), &[]).await.unwrap();
        assert!(run_dir.join("records.parquet").exists());
        assert!(run_dir.join("manifest.json").exists());
    }
}
