//! Integration tests for linkwatch.
//!
//! These tests use a real SQLite database (in-memory) and a local HTTP
//! server to drive the checker end to end.

use std::sync::Arc;
use std::time::Duration;

use linkwatch::checker::{Checker, CheckerConfig, HttpProber};
use linkwatch::database::models::{PageCursor, ResultQuery, TargetQuery};
use linkwatch::database::repositories::{SqlxTargetRepository, TargetRepository};
use linkwatch::database::{DbPool, init_pool_with_size, run_migrations};
use linkwatch::utils::url::extract_host;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper to create a test database pool with migrations applied.
///
/// In-memory SQLite is per connection, so the pool holds exactly one.
async fn setup_test_db() -> DbPool {
    let pool = init_pool_with_size("sqlite::memory:", 1)
        .await
        .expect("Failed to create test pool");

    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

async fn register(repo: &SqlxTargetRepository, url: &str) -> linkwatch::database::models::Target {
    let host = extract_host(url).expect("test URL must have a host");
    repo.upsert_target_by_url(url, &host)
        .await
        .expect("Failed to register target")
        .0
}

mod store_tests {
    use super::*;

    #[tokio::test]
    async fn test_foreign_keys_enforced() {
        let pool = setup_test_db().await;
        let repo = SqlxTargetRepository::new(pool);

        let orphan =
            linkwatch::database::models::NewCheckResult::status("t_does_not_exist", 1, 200, 1);
        assert!(repo.insert_check_result(&orphan).await.is_err());
    }

    #[tokio::test]
    async fn test_paging_with_cursor_and_host_filter() {
        let pool = setup_test_db().await;
        let repo = SqlxTargetRepository::new(pool);

        for i in 0..5 {
            register(&repo, &format!("https://a.example/{}", i)).await;
            register(&repo, &format!("https://b.example/{}", i)).await;
        }

        // Walk all ten with a page size of three.
        let mut seen = Vec::new();
        let mut after: Option<PageCursor> = None;
        loop {
            let page = repo
                .list_targets(&TargetQuery::new(3).after(after.take()))
                .await
                .unwrap();
            seen.extend(page.items.iter().map(|t| t.id.clone()));
            match page.next {
                Some(cursor) => {
                    // Tokens survive an encode/decode trip through a client.
                    let token = cursor.encode().unwrap();
                    after = PageCursor::decode(&token).unwrap();
                }
                None => break,
            }
        }
        assert_eq!(seen.len(), 10);
        let mut deduped = seen.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), 10);

        let only_b = repo
            .list_targets(&TargetQuery::new(100).with_host("B.EXAMPLE"))
            .await
            .unwrap();
        assert_eq!(only_b.items.len(), 5);
        assert!(only_b.items.iter().all(|t| t.host == "b.example"));
        assert!(only_b.next.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_registration_converges() {
        let pool = setup_test_db().await;
        let repo = Arc::new(SqlxTargetRepository::new(pool));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.upsert_target_by_url("https://same.example/", "same.example")
                    .await
                    .unwrap()
            }));
        }

        let mut created = 0;
        let mut ids = Vec::new();
        for handle in handles {
            let (target, was_created) = handle.await.unwrap();
            if was_created {
                created += 1;
            }
            ids.push(target.id);
        }
        ids.dedup();
        assert_eq!(created, 1);
        assert_eq!(ids.len(), 1);
    }
}

mod checker_tests {
    use super::*;

    fn checker_config() -> CheckerConfig {
        CheckerConfig {
            check_interval: Duration::from_secs(3600),
            max_concurrency: 8,
            per_host_concurrency: 2,
            ..CheckerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_pass_records_one_result_per_target() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let pool = setup_test_db().await;
        let repo = Arc::new(SqlxTargetRepository::new(pool));

        let ok = register(&repo, &format!("{}/ok", server.uri())).await;
        let missing = register(&repo, &format!("{}/missing", server.uri())).await;
        // Nothing listens on port 9 locally.
        let dead = register(&repo, "http://127.0.0.1:9/").await;

        let prober = Arc::new(HttpProber::new(Duration::from_secs(2)).unwrap());
        let checker = Checker::new(checker_config(), repo.clone(), prober).unwrap();

        let summary = checker.run_pass().await;
        assert_eq!(summary.admitted, 3);
        let report = checker.shutdown(Duration::from_secs(10)).await;
        assert!(report.clean);

        let ok_results = repo.list_results(&ok.id, &ResultQuery::new()).await.unwrap();
        assert_eq!(ok_results.len(), 1);
        assert_eq!(ok_results[0].status_code, Some(200));
        assert!(ok_results[0].error.is_none());

        let missing_results = repo
            .list_results(&missing.id, &ResultQuery::new())
            .await
            .unwrap();
        assert_eq!(missing_results.len(), 1);
        assert_eq!(missing_results[0].status_code, Some(404));

        let dead_results = repo.list_results(&dead.id, &ResultQuery::new()).await.unwrap();
        assert_eq!(dead_results.len(), 1);
        assert!(dead_results[0].status_code.is_none());
        assert!(dead_results[0].error.is_some());
        assert!(dead_results[0].latency_ms >= 0);

        assert_eq!(checker.stats().results_written, 3);
    }

    #[tokio::test]
    async fn test_started_checker_keeps_ticking() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let pool = setup_test_db().await;
        let repo = Arc::new(SqlxTargetRepository::new(pool));
        let target = register(&repo, &server.uri()).await;

        let prober = Arc::new(HttpProber::new(Duration::from_secs(2)).unwrap());
        let mut config = checker_config();
        config.check_interval = Duration::from_millis(100);
        let checker = Checker::new(config, repo.clone(), prober).unwrap();

        checker.start();
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(checker.shutdown(Duration::from_secs(5)).await.clean);

        let results = repo
            .list_results(&target.id, &ResultQuery::new())
            .await
            .unwrap();
        assert!(results.len() >= 2, "expected several passes, got {}", results.len());
        assert!(results.iter().all(|r| r.status_code == Some(204)));
        assert!(
            results
                .windows(2)
                .all(|w| (w[0].checked_at, w[0].id) > (w[1].checked_at, w[1].id))
        );
    }
}
