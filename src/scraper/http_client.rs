use super::PageFetcher;
use crate::config::ScraperConfig;
use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },
}

impl FetchError {
    /// Transient failures worth another attempt after a backoff.
    pub fn is_retriable(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Http { .. } => true,
            FetchError::Status { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            FetchError::Client(_) => false,
        }
    }
}

pub struct HttpClient {
    inner: reqwest::Client,
    config: ScraperConfig,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Accept cookies so session-based pages work
            .cookie_store(true)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            inner,
            config: config.clone(),
        })
    }

    /// Fetch a URL as text with rate-limiting and retry.
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(self.config.request_delay_ms.max(1))
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries as usize);

        let mut attempt = 0u32;
        RetryIf::spawn(
            strategy,
            || {
                attempt += 1;
                self.attempt(url, attempt)
            },
            |e: &FetchError| {
                let retry = e.is_retriable();
                if retry {
                    warn!("{}; retrying", e);
                }
                retry
            },
        )
        .await
    }

    async fn attempt(&self, url: &str, attempt: u32) -> Result<String, FetchError> {
        self.polite_delay().await;
        debug!("GET {} (attempt {})", url, attempt);

        let resp = self.inner.get(url).send().await.map_err(|e| classify(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        resp.text().await.map_err(|e| classify(url, e))
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        let jitter_ms = rand::rng().random_range(0..=self.config.jitter_ms);
        let total = Duration::from_millis(self.config.request_delay_ms + jitter_ms);
        if !total.is_zero() {
            sleep(total).await;
        }
    }
}

fn classify(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout { url: url.to_string() }
    } else {
        FetchError::Http {
            url: url.to_string(),
            source: e,
        }
    }
}

#[async_trait]
impl PageFetcher for HttpClient {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.get_text(url).await
    }
}
