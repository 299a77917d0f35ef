use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{FetchConfig, ProtocolConfig, SourceConfig};
use crate::ingest::clock::Clock;

/// Raw, loosely typed payload returned by the metrics source.
pub type RawMetrics = serde_json::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("metrics source returned HTTP {status}")]
    Http { status: u16 },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Timeouts, 5xx responses and connection failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Connection(_) => true,
            FetchError::Http { status } => *status >= 500,
            FetchError::Malformed(_) => false,
        }
    }
}

/// One attempt at reading a protocol's metrics.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch(&self, protocol: &ProtocolConfig, timeout: Duration) -> Result<RawMetrics, FetchError>;
}

/// Metrics source backed by an HTTP JSON API (`GET {api_base}/{endpoint}/{slug}`)
pub struct HttpMetricsSource {
    client: reqwest::Client,
    api_base: String,
    endpoint: String,
}

impl HttpMetricsSource {
    pub fn new(source: &SourceConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("protomon/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_base: source.api_base.trim_end_matches('/').to_string(),
            endpoint: source.endpoint.trim_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, protocol: &ProtocolConfig) -> String {
        if self.endpoint.is_empty() {
            format!("{}/{}", self.api_base, protocol.slug)
        } else {
            format!("{}/{}/{}", self.api_base, self.endpoint, protocol.slug)
        }
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Connection(error.to_string())
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    async fn fetch(&self, protocol: &ProtocolConfig, timeout: Duration) -> Result<RawMetrics, FetchError> {
        let url = self.url_for(protocol);

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http { status: status.as_u16() });
        }

        let body = response.text().await.map_err(classify_reqwest_error)?;
        serde_json::from_str(&body).map_err(|e| FetchError::Malformed(format!("invalid JSON from {url}: {e}")))
    }
}

/// Retry limits for one protocol fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub request_timeout: Duration,
    /// Wall-clock budget for all attempts and backoff sleeps together
    pub total_budget: Duration,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based): doubles each
    /// time, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

impl From<&FetchConfig> for RetryPolicy {
    fn from(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            total_budget: Duration::from_secs(config.total_budget_secs),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Fetches raw metrics with timeout, bounded retries and exponential backoff.
///
/// Only transient failures are retried. The fetcher holds no mutable state,
/// so one instance serves every protocol concurrently.
pub struct Fetcher {
    source: Arc<dyn MetricsSource>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(source: Arc<dyn MetricsSource>, clock: Arc<dyn Clock>, policy: RetryPolicy) -> Self {
        Self { source, clock, policy }
    }

    fn remaining_budget(&self, started: chrono::DateTime<chrono::Utc>) -> Duration {
        let elapsed = (self.clock.now() - started).to_std().unwrap_or(Duration::ZERO);
        self.policy.total_budget.saturating_sub(elapsed)
    }

    pub async fn fetch(&self, protocol: &ProtocolConfig) -> Result<RawMetrics, FetchError> {
        let started = self.clock.now();
        let mut attempt = 0u32;

        loop {
            let remaining = self.remaining_budget(started);
            if remaining.is_zero() {
                tracing::warn!(protocol = %protocol.name, attempts = attempt, "Fetch budget exhausted");
                return Err(FetchError::Timeout);
            }

            attempt += 1;
            let timeout = self.policy.request_timeout.min(remaining);
            tracing::debug!(
                protocol = %protocol.name,
                attempt,
                max_attempts = self.policy.max_attempts,
                "Fetching metrics"
            );

            let error = match self.source.fetch(protocol, timeout).await {
                Ok(payload) => return Ok(payload),
                Err(error) => error,
            };

            if !error.is_transient() {
                tracing::warn!(protocol = %protocol.name, attempt, error = %error, "Fetch failed, not retrying");
                return Err(error);
            }

            let remaining = self.remaining_budget(started);
            if remaining.is_zero() {
                tracing::warn!(protocol = %protocol.name, attempts = attempt, "Fetch budget exhausted");
                return Err(FetchError::Timeout);
            }

            if attempt >= self.policy.max_attempts {
                tracing::warn!(protocol = %protocol.name, attempts = attempt, error = %error, "Fetch retries exhausted");
                return Err(error);
            }

            let delay = self.policy.backoff(attempt).min(remaining);
            tracing::warn!(
                protocol = %protocol.name,
                attempt,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "Transient fetch failure, backing off"
            );
            self.clock.sleep(delay).await;
        }
    }
}
