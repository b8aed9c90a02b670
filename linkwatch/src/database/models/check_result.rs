//! Check result database model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::target::clamp_limit;
use crate::database::time::datetime_to_ms;

/// Default number of results returned when no limit is given.
pub const DEFAULT_RESULT_PAGE_LIMIT: usize = 50;

/// Largest number of results a caller may request.
pub const MAX_RESULT_PAGE_LIMIT: usize = 200;

/// The recorded outcome of one probe. Append-only.
///
/// Exactly one of `status_code` and `error` is set.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct CheckResult {
    /// Store-assigned, monotonically increasing.
    pub id: i64,
    pub target_id: String,
    /// Unix epoch milliseconds (UTC) when the probe started.
    pub checked_at: i64,
    pub status_code: Option<i64>,
    pub latency_ms: i64,
    pub error: Option<String>,
}

/// A result waiting to be written; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCheckResult {
    pub target_id: String,
    pub checked_at: i64,
    pub status_code: Option<i64>,
    pub latency_ms: i64,
    pub error: Option<String>,
}

impl NewCheckResult {
    /// A probe that received a response.
    pub fn status(
        target_id: impl Into<String>,
        checked_at: i64,
        status_code: u16,
        latency_ms: u64,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            checked_at,
            status_code: Some(i64::from(status_code)),
            latency_ms: latency_ms.min(i64::MAX as u64) as i64,
            error: None,
        }
    }

    /// A probe that failed at the transport level.
    pub fn error(
        target_id: impl Into<String>,
        checked_at: i64,
        error: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            checked_at,
            status_code: None,
            latency_ms: latency_ms.min(i64::MAX as u64) as i64,
            error: Some(error.into()),
        }
    }

    /// Exactly one of status and error is present and latency is non-negative.
    pub fn is_well_formed(&self) -> bool {
        self.status_code.is_some() != self.error.is_some() && self.latency_ms >= 0
    }
}

/// Filter for a target's result history.
#[derive(Debug, Clone, Default)]
pub struct ResultQuery {
    /// Only results checked at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Requested page size; see [`ResultQuery::limit`].
    pub limit: Option<i64>,
}

impl ResultQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Page size clamped to `1..=200`, defaulting to 50.
    pub fn limit(&self) -> usize {
        clamp_limit(self.limit, DEFAULT_RESULT_PAGE_LIMIT, MAX_RESULT_PAGE_LIMIT)
    }

    pub(crate) fn since_ms(&self) -> Option<i64> {
        self.since.map(datetime_to_ms)
    }
}
