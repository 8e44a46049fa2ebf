//! Open-data CSV downloads: retried GETs with linear backoff and content fingerprints.

use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "bnati-http";

/// Lowercase hex SHA-256 of a payload, used to fingerprint each input of a run.
pub fn content_sha256(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// How many times a dump is requested and how long to wait between tries.
///
/// The wait grows linearly: `step * n` after the n-th failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            step: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn wait_after(&self, failed_attempt: usize) -> Duration {
        self.step
            .saturating_mul(u32::try_from(failed_attempt).unwrap_or(u32::MAX))
    }
}

#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub retry: RetryPolicy,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(90),
            user_agent: "bnati-report/0.1".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered http {status}")]
    Status { url: String, status: StatusCode },
    #[error("giving up on {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: usize,
        last: Box<DownloadError>,
    },
}

impl DownloadError {
    /// Client errors other than timeouts and throttling will not heal on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Transport { .. } => true,
            DownloadError::Status { status, .. } => {
                !status.is_client_error()
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
            }
            DownloadError::Exhausted { .. } => false,
        }
    }
}

/// A fully buffered response body.
#[derive(Debug, Clone)]
pub struct Download {
    pub final_url: String,
    pub body: Vec<u8>,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl Downloader {
    pub fn new(config: DownloaderConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .context("building http client")?;
        Ok(Self {
            client,
            retry: config.retry,
        })
    }

    pub async fn download(
        &self,
        run_id: Uuid,
        dataset: &str,
        url: &str,
    ) -> Result<Download, DownloadError> {
        let span = info_span!("download", %run_id, dataset, url);
        self.download_with_retries(url).instrument(span).await
    }

    async fn download_with_retries(&self, url: &str) -> Result<Download, DownloadError> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match self.attempt(url).await {
                Ok((final_url, body)) => {
                    info!(bytes = body.len(), attempt, "download complete");
                    return Ok(Download {
                        final_url,
                        sha256: content_sha256(&body),
                        body,
                    });
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= attempts {
                return Err(DownloadError::Exhausted {
                    url: url.to_string(),
                    attempts,
                    last: Box::new(err),
                });
            }

            let wait = self.retry.wait_after(attempt);
            warn!(
                attempt,
                attempts,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "download failed; retrying"
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }

    async fn attempt(&self, url: &str) -> Result<(String, Vec<u8>), DownloadError> {
        let transport = |source: reqwest::Error| DownloadError::Transport {
            url: url.to_string(),
            source,
        };
        let mut response = self.client.get(url).send().await.map_err(transport)?;
        let final_url = response.url().to_string();
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: final_url,
                status,
            });
        }

        // Dumps run to tens of megabytes; read them chunk by chunk.
        let mut body = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
        while let Some(chunk) = response.chunk().await.map_err(transport)? {
            body.extend_from_slice(&chunk);
        }
        Ok((final_url, body))
    }
}
