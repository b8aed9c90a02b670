//! Process configuration loaded from environment variables.
//!
//! Every setting has a documented default that applies when the variable is
//! absent or empty. Values that are present but cannot be parsed, or that are
//! not positive, are rejected so the process fails at startup instead of
//! running with a surprising schedule.

use std::fmt;
use std::time::Duration;

use tokio::sync::Semaphore;

pub use crate::checker::{
    CheckerConfig, DEFAULT_CHECK_INTERVAL, DEFAULT_HOST_IDLE_TTL, DEFAULT_LIST_BATCH_SIZE,
    DEFAULT_MAX_CONCURRENCY, DEFAULT_PER_HOST_CONCURRENCY,
};
use crate::{Error, Result};

/// Default SQLite database URL.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:linkwatch.db?mode=rwc";

/// Default timeout for one probe request.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time shutdown waits for in-flight probes.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Application configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// sqlx SQLite connection URL (`DATABASE_URL`).
    pub database_url: String,
    /// Interval between scheduling passes (`CHECK_INTERVAL`).
    pub check_interval: Duration,
    /// Global concurrency cap (`MAX_CONCURRENCY`).
    pub max_concurrency: usize,
    /// Per-host concurrency cap (`PER_HOST_CONCURRENCY`).
    pub per_host_concurrency: usize,
    /// Probe request timeout (`HTTP_TIMEOUT`).
    pub http_timeout: Duration,
    /// Shutdown grace period (`SHUTDOWN_GRACE`).
    pub shutdown_grace: Duration,
    /// Store page size used by the scheduler (`LIST_BATCH_SIZE`).
    pub list_batch_size: usize,
    /// Idle TTL for host limiter entries (`HOST_IDLE_TTL`).
    pub host_idle_ttl: Duration,
    /// Optional directory for rotated log files (`LOG_DIR`).
    pub log_dir: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            check_interval: DEFAULT_CHECK_INTERVAL,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            per_host_concurrency: DEFAULT_PER_HOST_CONCURRENCY,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            list_batch_size: DEFAULT_LIST_BATCH_SIZE,
            host_idle_ttl: DEFAULT_HOST_IDLE_TTL,
            log_dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    ///
    /// Supported env vars:
    /// - `DATABASE_URL` (e.g. "sqlite:linkwatch.db?mode=rwc")
    /// - `CHECK_INTERVAL`, `HTTP_TIMEOUT`, `SHUTDOWN_GRACE`, `HOST_IDLE_TTL` (e.g. "15s", "500ms")
    /// - `MAX_CONCURRENCY`, `PER_HOST_CONCURRENCY`, `LIST_BATCH_SIZE` (positive integers)
    /// - `LOG_DIR` (directory path)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(url) = get("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(raw) = get("CHECK_INTERVAL") {
            config.check_interval = parse_positive_duration("CHECK_INTERVAL", &raw)?;
        }
        if let Some(raw) = get("MAX_CONCURRENCY") {
            config.max_concurrency = parse_concurrency("MAX_CONCURRENCY", &raw)?;
        }
        if let Some(raw) = get("PER_HOST_CONCURRENCY") {
            config.per_host_concurrency = parse_concurrency("PER_HOST_CONCURRENCY", &raw)?;
        }
        if let Some(raw) = get("HTTP_TIMEOUT") {
            config.http_timeout = parse_positive_duration("HTTP_TIMEOUT", &raw)?;
        }
        if let Some(raw) = get("SHUTDOWN_GRACE") {
            config.shutdown_grace = parse_duration("SHUTDOWN_GRACE", &raw)?;
        }
        if let Some(raw) = get("LIST_BATCH_SIZE") {
            config.list_batch_size = parse_positive_usize("LIST_BATCH_SIZE", &raw)?;
        }
        if let Some(raw) = get("HOST_IDLE_TTL") {
            config.host_idle_ttl = parse_positive_duration("HOST_IDLE_TTL", &raw)?;
        }
        config.log_dir = get("LOG_DIR");

        Ok(config)
    }

    /// Scheduler settings derived from this configuration.
    pub fn checker_config(&self) -> CheckerConfig {
        CheckerConfig {
            check_interval: self.check_interval,
            max_concurrency: self.max_concurrency,
            per_host_concurrency: self.per_host_concurrency,
            list_batch_size: self.list_batch_size,
            host_idle_ttl: self.host_idle_ttl,
        }
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_url", &self.database_url)
            .field("check_interval", &humantime::format_duration(self.check_interval))
            .field("max_concurrency", &self.max_concurrency)
            .field("per_host_concurrency", &self.per_host_concurrency)
            .field("http_timeout", &humantime::format_duration(self.http_timeout))
            .field("shutdown_grace", &humantime::format_duration(self.shutdown_grace))
            .field("list_batch_size", &self.list_batch_size)
            .field("host_idle_ttl", &humantime::format_duration(self.host_idle_ttl))
            .field("log_dir", &self.log_dir)
            .finish()
    }
}

fn parse_duration(key: &str, raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw)
        .map_err(|e| Error::config(format!("invalid {key} {raw:?}: {e}")))
}

fn parse_positive_duration(key: &str, raw: &str) -> Result<Duration> {
    let value = parse_duration(key, raw)?;
    if value.is_zero() {
        return Err(Error::config(format!("invalid {key}: must be greater than zero")));
    }
    Ok(value)
}

fn parse_positive_usize(key: &str, raw: &str) -> Result<usize> {
    match raw.parse::<usize>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(Error::config(format!(
            "invalid {key} {raw:?}: must be a positive integer"
        ))),
    }
}

/// A positive integer small enough to size a semaphore.
fn parse_concurrency(key: &str, raw: &str) -> Result<usize> {
    let value = parse_positive_usize(key, raw)?;
    if value > Semaphore::MAX_PERMITS {
        return Err(Error::config(format!(
            "invalid {key} {raw:?}: must not exceed {}",
            Semaphore::MAX_PERMITS
        )));
    }
    Ok(value)
}
