use std::sync::Arc;

use anyhow::{Context, Result};
use legitrack_adapters::{adapter_for_source, HttpSummarizer, JsonApiClient};
use legitrack_core::SourceKind;
use legitrack_storage::{HttpClientConfig, HttpFetcher, MemoryStore, NotificationSink, Persistence, PgStore};
use tracing::{info, warn};

use crate::ai::AiProcessor;
use crate::categorize::Categorizer;
use crate::config::{LegitrackConfig, SessionRegistry};
use crate::jobs::JobRegistry;
use crate::notify::LogNotificationSink;
use crate::report::ReportWriter;
use crate::updater::SessionUpdater;

const DB_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Nothing survives the process; notifications only go to the log.
    Memory,
}

/// Everything a process needs to run updates: store, wired updater, optional
/// AI processor and the background job table.
pub struct LegitrackRuntime {
    pub config: LegitrackConfig,
    pub store: Arc<dyn Persistence>,
    /// Set for the Postgres backend.
    pub pg: Option<Arc<PgStore>>,
    pub updater: Arc<SessionUpdater>,
    pub ai: Option<Arc<AiProcessor>>,
    pub jobs: JobRegistry,
}

fn fetcher(config: &LegitrackConfig, min_interval: std::time::Duration) -> Result<HttpFetcher> {
    HttpFetcher::new(HttpClientConfig {
        timeout: config.http_timeout,
        user_agent: Some(config.user_agent.clone()),
        min_interval: Some(min_interval),
    })
}

impl LegitrackRuntime {
    pub async fn from_config(config: LegitrackConfig, backend: StoreBackend) -> Result<Self> {
        let pg = match backend {
            StoreBackend::Postgres => Some(Arc::new(PgStore::connect(&config.database_url, DB_MAX_CONNECTIONS).await?)),
            StoreBackend::Memory => None,
        };
        let store: Arc<dyn Persistence> = match &pg {
            Some(pg) => pg.clone(),
            None => Arc::new(MemoryStore::new()),
        };
        let notifier: Arc<dyn NotificationSink> = match &pg {
            Some(pg) => pg.clone(),
            None => Arc::new(LogNotificationSink),
        };
        let registry = SessionRegistry::load(&config.sessions_path())?;
        let categorizer = Categorizer::from_workspace_root(&config.workspace_root)?;
        info!(
            sessions = registry.sessions.len(),
            rules_version = categorizer.version(),
            "runtime configuration loaded"
        );

        let mut updater = SessionUpdater::new(store.clone(), notifier, categorizer, config.updater_settings()?)
            .with_sessions(registry.sessions.clone())
            .with_reports(ReportWriter::new(&config.reports_dir));

        let federal = JsonApiClient::federal_register(
            &config.federal_register_base_url,
            fetcher(&config, config.federal_register_min_interval)?,
        );
        updater = updater.with_source(
            Arc::new(federal),
            Arc::from(adapter_for_source(SourceKind::FederalRegister)),
        );

        match &config.legiscan_api_key {
            Some(key) => {
                let legiscan =
                    JsonApiClient::legiscan(&config.legiscan_base_url, key, fetcher(&config, config.legiscan_min_interval)?);
                updater = updater.with_source(Arc::new(legiscan), Arc::from(adapter_for_source(SourceKind::Legiscan)));
            }
            None if registry
                .sessions
                .iter()
                .any(|s| s.enabled && s.source == SourceKind::Legiscan) =>
            {
                warn!("LEGISCAN_API_KEY is not set; legiscan sessions will be rejected");
            }
            None => {}
        }

        let ai = match &config.summarizer_url {
            Some(url) => {
                let http = HttpFetcher::new(HttpClientConfig {
                    timeout: config.http_timeout,
                    user_agent: Some(config.user_agent.clone()),
                    min_interval: None,
                })
                .context("building summarizer client")?;
                let summarizer = HttpSummarizer::new(url, config.summarizer_api_key.clone(), http);
                Some(Arc::new(AiProcessor::new(
                    store.clone(),
                    Arc::new(summarizer),
                    config.ai_policy(),
                )))
            }
            None => None,
        };

        let jobs = JobRegistry::with_retention(config.job_retention()?);
        Ok(Self {
            config,
            store,
            pg,
            updater: Arc::new(updater),
            ai,
            jobs,
        })
    }

    pub async fn from_env(backend: StoreBackend) -> Result<Self> {
        Self::from_config(LegitrackConfig::from_env(), backend).await
    }

    pub fn require_pg(&self) -> Result<&Arc<PgStore>> {
        self.pg.as_ref().context("this command needs the postgres backend")
    }

    pub fn require_ai(&self) -> Result<&Arc<AiProcessor>> {
        self.ai
            .as_ref()
            .context("SUMMARIZER_URL is not set; AI processing is unavailable")
    }
}
