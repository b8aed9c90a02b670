//! Probe executor: one bounded-timeout HTTP GET per target.

use std::error::Error as StdError;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::trace;

use crate::database::models::NewCheckResult;
use crate::database::time::now_ms;
use crate::utils::http_client::install_rustls_provider;
use crate::{Error, Result};

/// What a probe observed.
///
/// Any completed response counts as `Response`, whatever its status class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Response { status: u16 },
    Failed { error: String },
}

/// A finished probe, ready to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// Unix epoch milliseconds when the request started.
    pub started_at: i64,
    /// Request start to response headers, or to the failure.
    pub latency: Duration,
    pub outcome: ProbeOutcome,
}

impl ProbeReport {
    pub fn response(started_at: i64, latency: Duration, status: u16) -> Self {
        Self {
            started_at,
            latency,
            outcome: ProbeOutcome::Response { status },
        }
    }

    pub fn failed(started_at: i64, latency: Duration, error: impl Into<String>) -> Self {
        Self {
            started_at,
            latency,
            outcome: ProbeOutcome::Failed {
                error: error.into(),
            },
        }
    }

    pub fn latency_ms(&self) -> u64 {
        self.latency.as_millis().min(u128::from(u64::MAX)) as u64
    }

    /// Convert into the result row for `target_id`.
    pub fn into_result(self, target_id: &str) -> NewCheckResult {
        let latency_ms = self.latency_ms();
        match self.outcome {
            ProbeOutcome::Response { status } => {
                NewCheckResult::status(target_id, self.started_at, status, latency_ms)
            }
            ProbeOutcome::Failed { error } => {
                NewCheckResult::error(target_id, self.started_at, error, latency_ms)
            }
        }
    }
}

/// Runs a single check against a URL.
///
/// Implementations never retry and never return an error: transport
/// failures are part of the report.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeReport;
}

/// [`Prober`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProber {
    /// Build a prober whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(Error::validation("http timeout must be positive"));
        }
        install_rustls_provider();

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str) -> ProbeReport {
        let started_at = now_ms();
        let start = Instant::now();

        // `send` resolves once headers arrive; the body is never read.
        let result = self.client.get(url).send().await;
        let latency = start.elapsed();

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                trace!(url = %url, status, latency = ?latency, "probe completed");
                ProbeReport::response(started_at, latency, status)
            }
            Err(e) => {
                let error = describe_error(&e);
                trace!(url = %url, error = %error, latency = ?latency, "probe failed");
                ProbeReport::failed(started_at, latency, error)
            }
        }
    }
}

/// Flatten a transport error and its source chain into one line.
fn describe_error(err: &reqwest::Error) -> String {
    let kind = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else if err.is_redirect() {
        "redirect"
    } else if err.is_builder() {
        "request"
    } else {
        "transport"
    };

    let mut message = format!("{}: {}", kind, err);
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
