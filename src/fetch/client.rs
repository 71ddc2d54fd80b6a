// src/fetch/client.rs

use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{parse_payload, DayFetch, DemandSource};
use crate::clock::DayWindow;
use crate::config::ApiConfig;
use crate::error::{IngestError, Result};

/// Upper bound on a single retry delay.
const MAX_BACKOFF_MS: u64 = 60_000;

/// Delay before retry number `attempt` (1-based): `initial * 2^(attempt-1)`,
/// capped at `MAX_BACKOFF_MS`.
fn backoff_delay(initial_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(initial_ms.saturating_mul(factor).min(MAX_BACKOFF_MS))
}

/// Why a single GET did not produce a body.
#[derive(Debug)]
enum AttemptError {
    /// Connect/timeout/body errors. Worth retrying.
    Transient(reqwest::Error),
    /// The server answered, but not with success. Not retried.
    Status(StatusCode),
}

/// HTTP client for the REE real-time demand endpoint.
pub struct ReeClient {
    client: Client,
    endpoint: Url,
    time_trunc: String,
    max_retries: u32,
    initial_backoff_ms: u64,
}

impl ReeClient {
    pub fn new(cfg: &ApiConfig) -> Result<Self> {
        let endpoint = cfg.endpoint_url()?;
        let client = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| IngestError::Config(format!("building HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            time_trunc: cfg.time_trunc.clone(),
            max_retries: cfg.max_retries,
            initial_backoff_ms: cfg.initial_backoff_ms,
        })
    }

    /// `<endpoint>?start_date=..&end_date=..&time_trunc=..`
    pub fn request_url(&self, window: &DayWindow) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("start_date", &window.start_param())
            .append_pair("end_date", &window.end_param())
            .append_pair("time_trunc", &self.time_trunc);
        url
    }

    async fn get_text_core(&self, url: &Url) -> Result<String, AttemptError> {
        debug!(%url, "GET");
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(AttemptError::Transient)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AttemptError::Status(status));
        }
        resp.text().await.map_err(AttemptError::Transient)
    }

    async fn get_text_with_retry(&self, window: &DayWindow, url: &Url) -> Result<String> {
        let mut attempts = 0;
        loop {
            match self.get_text_core(url).await {
                Ok(body) => return Ok(body),
                Err(AttemptError::Transient(e)) if attempts < self.max_retries => {
                    attempts += 1;
                    let backoff = backoff_delay(self.initial_backoff_ms, attempts);
                    warn!(day = %window.day, attempt = attempts, delay_ms = backoff.as_millis() as u64, error = %e, "Retrying");
                    sleep(backoff).await;
                }
                Err(AttemptError::Transient(e)) => {
                    error!(day = %window.day, error = %e, "Exhausted retries");
                    return Err(IngestError::FetchFailure {
                        day: window.day,
                        reason: format!("{e} (after {attempts} retries)"),
                    });
                }
                Err(AttemptError::Status(status)) => {
                    return Err(IngestError::FetchFailure {
                        day: window.day,
                        reason: format!("HTTP {status} from {url}"),
                    });
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl DemandSource for ReeClient {
    async fn fetch_day(&self, window: &DayWindow) -> Result<DayFetch> {
        let url = self.request_url(window);
        info!(day = %window.day, start = %window.start_param(), end = %window.end_param(), "requesting demand");
        let body = self.get_text_with_retry(window, &url).await?;
        let fetch = parse_payload(window.day, &body)?;
        info!(day = %window.day, samples = fetch.len(), "fetched");
        Ok(fetch)
    }
}
