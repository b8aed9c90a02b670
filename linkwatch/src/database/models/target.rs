//! Target database model and listing types.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::{Error, Result};

/// Prefix of every generated target id.
pub const TARGET_ID_PREFIX: &str = "t_";

/// Default page size for target listings requested without a limit.
pub const DEFAULT_TARGET_PAGE_LIMIT: usize = 20;

/// Largest page size a caller may request for target listings.
pub const MAX_TARGET_PAGE_LIMIT: usize = 100;

/// A registered URL that is periodically probed.
///
/// Targets are immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    /// Canonical URL, unique across targets.
    pub url: String,
    /// Lowercase hostname, used as the per-host limiter key.
    pub host: String,
    /// Unix epoch milliseconds (UTC) when created.
    pub created_at: i64,
}

impl Target {
    /// Create a new target with a fresh id and the current timestamp.
    pub fn new(url: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: format!("{}{}", TARGET_ID_PREFIX, uuid::Uuid::new_v4()),
            url: url.into(),
            host: host.into(),
            created_at: crate::database::time::now_ms(),
        }
    }

    /// Cursor positioned just after this target.
    pub fn cursor(&self) -> PageCursor {
        PageCursor {
            created_at: self.created_at,
            id: self.id.clone(),
        }
    }
}

/// Keyset position in the `(created_at, id)` ordering of targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    pub created_at: i64,
    pub id: String,
}

impl PageCursor {
    /// Encode as an opaque, URL-safe page token.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Decode a page token produced by [`PageCursor::encode`].
    ///
    /// An empty token means "start from the beginning".
    pub fn decode(token: &str) -> Result<Option<Self>> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(None);
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(token.as_bytes())
            .map_err(|e| Error::validation(format!("invalid page token: {}", e)))?;
        let cursor = serde_json::from_slice(&bytes)
            .map_err(|e| Error::validation(format!("invalid page token data: {}", e)))?;
        Ok(Some(cursor))
    }
}

/// Filter and position for a target listing.
#[derive(Debug, Clone, Default)]
pub struct TargetQuery {
    /// Only list targets on this host (compared lowercase).
    pub host: Option<String>,
    /// Resume strictly after this position.
    pub after: Option<PageCursor>,
    /// Maximum number of targets to return.
    pub limit: usize,
}

impl TargetQuery {
    /// First page of all targets.
    pub fn new(limit: usize) -> Self {
        Self {
            host: None,
            after: None,
            limit,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into().to_ascii_lowercase());
        self
    }

    pub fn after(mut self, cursor: Option<PageCursor>) -> Self {
        self.after = cursor;
        self
    }

    /// Clamp a caller-supplied page size to `1..=100`, defaulting to 20.
    pub fn page_limit(requested: Option<i64>) -> usize {
        clamp_limit(requested, DEFAULT_TARGET_PAGE_LIMIT, MAX_TARGET_PAGE_LIMIT)
    }
}

/// One page of targets.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TargetPage {
    pub items: Vec<Target>,
    /// Position of the last item; present only when the page was full.
    pub next: Option<PageCursor>,
}

impl TargetPage {
    /// Build a page, deriving `next` from whether `limit` items came back.
    pub fn from_items(items: Vec<Target>, limit: usize) -> Self {
        let next = if limit > 0 && items.len() == limit {
            items.last().map(Target::cursor)
        } else {
            None
        };
        Self { items, next }
    }
}

pub(crate) fn clamp_limit(requested: Option<i64>, default: usize, max: usize) -> usize {
    match requested {
        None => default,
        Some(n) if n < 1 => 1,
        Some(n) => (n as u64).min(max as u64) as usize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_target_id_has_prefix() {
        let target = Target::new("https://example.com/", "example.com");
        assert!(target.id.starts_with(TARGET_ID_PREFIX));
        assert_eq!(target.id.len(), TARGET_ID_PREFIX.len() + 36);
        assert!(target.created_at > 0);
    }

    #[test]
    fn test_cursor_token() {
        let cursor = PageCursor {
            created_at: 1_700_000_000_000,
            id: "t_abc".to_string(),
        };
        let token = cursor.encode().unwrap();
        assert!(!token.contains('+') && !token.contains('/') && !token.contains('='));
        assert_eq!(PageCursor::decode(&token).unwrap(), Some(cursor));
    }

    #[test]
    fn test_cursor_decode_empty_and_garbage() {
        assert_eq!(PageCursor::decode("").unwrap(), None);
        assert!(matches!(
            PageCursor::decode("not base64 !!"),
            Err(Error::Validation(_))
        ));
        let not_json = URL_SAFE_NO_PAD.encode(b"hello");
        assert!(matches!(
            PageCursor::decode(&not_json),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_page_limit_clamps() {
        assert_eq!(TargetQuery::page_limit(None), 20);
        assert_eq!(TargetQuery::page_limit(Some(0)), 1);
        assert_eq!(TargetQuery::page_limit(Some(-5)), 1);
        assert_eq!(TargetQuery::page_limit(Some(50)), 50);
        assert_eq!(TargetQuery::page_limit(Some(1000)), 100);
    }

    #[test]
    fn test_page_next_only_when_full() {
        let a = Target::new("https://a.test/", "a.test");
        let b = Target::new("https://b.test/", "b.test");

        let full = TargetPage::from_items(vec![a.clone(), b.clone()], 2);
        assert_eq!(full.next, Some(b.cursor()));

        let short = TargetPage::from_items(vec![a], 2);
        assert!(short.next.is_none());
    }
}
