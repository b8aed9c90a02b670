//! Target repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{
    CheckResult, NewCheckResult, ResultQuery, Target, TargetPage, TargetQuery,
};
use crate::database::retry::{BusyRetryPolicy, with_busy_retry};
use crate::{Error, Result};

/// Target repository trait.
///
/// Implementations must be safe to call from many probe tasks at once.
#[async_trait]
pub trait TargetRepository: Send + Sync {
    /// Register `url`, or return the existing target for it.
    ///
    /// The boolean is `true` when a new row was created.
    async fn upsert_target_by_url(&self, url: &str, host: &str) -> Result<(Target, bool)>;
    async fn get_target(&self, id: &str) -> Result<Target>;
    /// List targets in `(created_at, id)` order.
    async fn list_targets(&self, query: &TargetQuery) -> Result<TargetPage>;
    /// Append one result; the store assigns its id.
    async fn insert_check_result(&self, result: &NewCheckResult) -> Result<CheckResult>;
    /// A target's results, newest first.
    async fn list_results(
        &self,
        target_id: &str,
        query: &ResultQuery,
    ) -> Result<Vec<CheckResult>>;
}

/// SQLx implementation of TargetRepository.
pub struct SqlxTargetRepository {
    pool: SqlitePool,
    retry: BusyRetryPolicy,
}

impl SqlxTargetRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            retry: BusyRetryPolicy::default(),
        }
    }

    async fn get_target_by_url(&self, url: &str) -> Result<Option<Target>> {
        let target = sqlx::query_as::<_, Target>("SELECT * FROM targets WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(target)
    }
}

#[async_trait]
impl TargetRepository for SqlxTargetRepository {
    async fn upsert_target_by_url(&self, url: &str, host: &str) -> Result<(Target, bool)> {
        if url.is_empty() {
            return Err(Error::validation("target url must not be empty"));
        }
        if host.is_empty() {
            return Err(Error::validation("target host must not be empty"));
        }

        if let Some(existing) = self.get_target_by_url(url).await? {
            return Ok((existing, false));
        }

        let candidate = Target::new(url, host.to_ascii_lowercase());
        let inserted = with_busy_retry("upsert_target", self.retry, || async {
            let result = sqlx::query(
                r#"
                INSERT INTO targets (id, url, host, created_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(url) DO NOTHING
                "#,
            )
            .bind(&candidate.id)
            .bind(&candidate.url)
            .bind(&candidate.host)
            .bind(candidate.created_at)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        })
        .await?;

        if inserted {
            return Ok((candidate, true));
        }

        // Lost a race with a concurrent registration of the same URL.
        let winner = self
            .get_target_by_url(url)
            .await?
            .ok_or_else(|| Error::not_found("Target", url))?;
        Ok((winner, false))
    }

    async fn get_target(&self, id: &str) -> Result<Target> {
        sqlx::query_as::<_, Target>("SELECT * FROM targets WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Target", id))
    }

    async fn list_targets(&self, query: &TargetQuery) -> Result<TargetPage> {
        if query.limit == 0 {
            return Ok(TargetPage::default());
        }

        let mut conditions: Vec<&str> = Vec::new();
        if query.host.is_some() {
            conditions.push("host = ?");
        }
        if query.after.is_some() {
            conditions.push("(created_at > ? OR (created_at = ? AND id > ?))");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT * FROM targets {} ORDER BY created_at, id LIMIT ?",
            where_clause
        );

        let mut q = sqlx::query_as::<_, Target>(&sql);
        if let Some(host) = &query.host {
            q = q.bind(host.to_ascii_lowercase());
        }
        if let Some(after) = &query.after {
            q = q.bind(after.created_at).bind(after.created_at).bind(&after.id);
        }
        q = q.bind(i64::try_from(query.limit).unwrap_or(i64::MAX));

        let items = q.fetch_all(&self.pool).await?;
        Ok(TargetPage::from_items(items, query.limit))
    }

    async fn insert_check_result(&self, result: &NewCheckResult) -> Result<CheckResult> {
        if !result.is_well_formed() {
            return Err(Error::validation(format!(
                "check result for {} must carry exactly one of status_code or error",
                result.target_id
            )));
        }

        with_busy_retry("insert_check_result", self.retry, || async {
            let row = sqlx::query_as::<_, CheckResult>(
                r#"
                INSERT INTO check_results (target_id, checked_at, status_code, latency_ms, error)
                VALUES (?, ?, ?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(&result.target_id)
            .bind(result.checked_at)
            .bind(result.status_code)
            .bind(result.latency_ms)
            .bind(&result.error)
            .fetch_one(&self.pool)
            .await?;
            Ok(row)
        })
        .await
    }

    async fn list_results(
        &self,
        target_id: &str,
        query: &ResultQuery,
    ) -> Result<Vec<CheckResult>> {
        let limit = query.limit() as i64;
        let results = match query.since_ms() {
            Some(since) => {
                sqlx::query_as::<_, CheckResult>(
                    r#"
                    SELECT * FROM check_results
                    WHERE target_id = ? AND checked_at >= ?
                    ORDER BY checked_at DESC, id DESC
                    LIMIT ?
                    "#,
                )
                .bind(target_id)
                .bind(since)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, CheckResult>(
                    r#"
                    SELECT * FROM check_results
                    WHERE target_id = ?
                    ORDER BY checked_at DESC, id DESC
                    LIMIT ?
                    "#,
                )
                .bind(target_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(results)
    }
}
