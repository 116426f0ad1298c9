use crate::config::ProvidersConfig;
use anyhow::{Context, Result};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("rate limited (HTTP {0})")]
    RateLimited(u16),

    #[error("HTTP error {0}")]
    Status(u16),

    #[error("request error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl HttpError {
    /// Only throttling and network failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HttpError::RateLimited(_) | HttpError::Transport(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::RateLimited(s) | HttpError::Status(s) => Some(*s),
            _ => None,
        }
    }
}

/// Shared reqwest client with a polite delay before every request and
/// exponential backoff on rate limiting.
pub struct HttpClient {
    inner: reqwest::Client,
    request_delay_ms: u64,
    jitter_ms: u64,
    max_retries: u32,
}

impl HttpClient {
    pub fn new(config: &ProvidersConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Yahoo's crumb is bound to the session cookie
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            request_delay_ms: config.request_delay_ms,
            jitter_ms: config.jitter_ms,
            max_retries: config.max_retries,
        })
    }

    /// Fetch a URL as text with rate-limiting and retry.
    pub async fn get_text(&self, url: &str) -> Result<String, HttpError> {
        self.polite_delay().await;

        let strategy = ExponentialBackoff::from_millis(2)
            .factor(self.request_delay_ms.max(1))
            .max_delay(Duration::from_secs(30))
            .map(jitter)
            .take(self.max_retries as usize);

        let mut attempt = 0u32;
        RetryIf::spawn(
            strategy,
            || {
                attempt += 1;
                self.send_once(url, attempt)
            },
            |e: &HttpError| {
                let retry = e.is_retryable();
                if retry {
                    warn!("{} on {}, backing off", e, url);
                }
                retry
            },
        )
        .await
    }

    /// Hit a page only to collect its cookies. The status is irrelevant;
    /// fc.yahoo.com answers 404 while still setting the session cookie.
    pub async fn prime_cookies(&self, url: &str) -> Result<(), HttpError> {
        self.polite_delay().await;
        debug!("Priming cookies from {}", url);
        let resp = self.inner.get(url).send().await?;
        debug!("Cookie endpoint answered {}", resp.status());
        Ok(())
    }

    async fn send_once(&self, url: &str, attempt: u32) -> Result<String, HttpError> {
        debug!("GET {} (attempt {})", url, attempt);

        let resp = self.inner.get(url).send().await?;
        let status = resp.status();

        if status.is_success() {
            return Ok(resp.text().await?);
        }

        match status.as_u16() {
            429 | 503 => Err(HttpError::RateLimited(status.as_u16())),
            code => Err(HttpError::Status(code)),
        }
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        if self.request_delay_ms == 0 && self.jitter_ms == 0 {
            return;
        }
        let jitter = rand::random::<u64>() % (self.jitter_ms + 1);
        sleep(Duration::from_millis(self.request_delay_ms + jitter)).await;
    }
}
