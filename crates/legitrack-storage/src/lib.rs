//! Persistence contracts + rate-limited HTTP fetch utilities for legitrack.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info_span, Instrument};

mod memory;
mod postgres;
mod store;

pub use memory::{MemoryStore, StoredNotification};
pub use postgres::PgStore;
pub use store::{AiUpdate, NotificationSink, Persistence, PersistenceError, UpsertResult};

pub const CRATE_NAME: &str = "legitrack-storage";

/// Enforces a minimum delay between consecutive calls to one upstream API.
///
/// The lock is held across the sleep; concurrent callers queue behind it.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_return: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_return: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        let mut last = self.last_return.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub min_interval: Option<Duration>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            min_interval: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Request(err) if err.is_timeout())
    }
}

/// HTTP client shared by every call to one upstream; each request waits on the
/// limiter first. Retries are left to the caller.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    limiter: Option<Arc<RateLimiter>>,
}

const ERROR_BODY_EXCERPT: usize = 512;

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        let limiter = config.min_interval.map(|d| Arc::new(RateLimiter::new(d)));

        Ok(Self { client, limiter })
    }

    pub async fn get(&self, url: &str, query: &[(String, String)]) -> Result<FetchedResponse, FetchError> {
        let request = self.client.get(url).query(query);
        self.send(request, url, "GET").await
    }

    pub async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        bearer: Option<&str>,
    ) -> Result<FetchedResponse, FetchError> {
        let mut request = self.client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        self.send(request, url, "POST").await
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
        method: &'static str,
    ) -> Result<FetchedResponse, FetchError> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }

        // The query string can carry API keys, so only the bare URL is traced.
        let span = info_span!("http_fetch", method, url);
        async move {
            let resp = request.send().await?;
            let status = resp.status();
            let mut final_url = resp.url().clone();
            final_url.set_query(None);
            let final_url = final_url.to_string();
            let body = resp.bytes().await?.to_vec();
            debug!(status = status.as_u16(), bytes = body.len(), "upstream responded");

            if status != StatusCode::OK {
                let excerpt = String::from_utf8_lossy(&body)
                    .chars()
                    .take(ERROR_BODY_EXCERPT)
                    .collect::<String>();
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                    body: excerpt,
                });
            }

            Ok(FetchedResponse {
                status,
                final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn limiter_spaces_consecutive_calls() {
        let limiter = RateLimiter::new(Duration::from_millis(750));
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(1));
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_does_not_wait_when_interval_already_elapsed() {
        let limiter = RateLimiter::new(Duration::from_millis(200));
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        let before = Instant::now();
        limiter.acquire().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_are_serialized() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(1)));
        let start = Instant::now();
        let tasks = (0..3)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire().await;
                    Instant::now()
                })
            })
            .collect::<Vec<_>>();
        let mut finished = Vec::new();
        for task in tasks {
            finished.push(task.await.unwrap());
        }
        finished.sort();
        assert!(finished[1] - finished[0] >= Duration::from_secs(1));
        assert!(finished[2] - finished[1] >= Duration::from_secs(1));
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn fetcher_builds_with_zero_interval_limiter() {
        let fetcher = HttpFetcher::new(HttpClientConfig {
            min_interval: Some(Duration::ZERO),
            ..Default::default()
        });
        assert!(fetcher.is_ok());
    }
}
