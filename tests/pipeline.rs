//! End-to-end pipeline tests: submit jobs, run the worker against a canned
//! fetcher, and inspect the resulting corpus and job states.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use tempfile::TempDir;

use ragline::config::Config;
use ragline::db;
use ragline::fetcher::{FetchedPage, Fetcher};
use ragline::governor::HostGovernor;
use ragline::migrate;
use ragline::models::{Budgets, CrawlParams, JobParams, JobState};
use ragline::policy;
use ragline::queue;
use ragline::worker::Worker;

/// Serves canned HTML bodies; any other URL fails like a dead server.
struct MockFetcher {
    pages: HashMap<String, String>,
}

impl MockFetcher {
    fn new(pages: &[(&str, &str)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(url, body)| (url.to_string(), body.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        match self.pages.get(url) {
            Some(body) => Ok(FetchedPage {
                final_url: url.to_string(),
                body: body.clone(),
            }),
            None => bail!("connection refused: {}", url),
        }
    }
}

async fn setup() -> (TempDir, SqlitePool, Config) {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.db.path = tmp.path().join("ragline.sqlite");

    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    // A permissive policy with a rate high enough that pacing does not
    // slow the tests down.
    policy::replace_policy(
        &pool,
        vec![],
        vec![],
        Budgets {
            max_pages_per_job: 200,
            max_depth: 3,
            rate_per_domain: 60_000,
        },
    )
    .await
    .unwrap();

    (tmp, pool, config)
}

fn make_worker(pool: &SqlitePool, config: &Config, fetcher: MockFetcher) -> Worker {
    let governor = Arc::new(HostGovernor::new("ragline-test", Duration::from_secs(1)));
    let (worker, _stop) = Worker::new(pool.clone(), config.clone(), Arc::new(fetcher), governor);
    worker
}

async fn submit_crawl(pool: &SqlitePool, seeds: &[&str], max_pages: Option<u32>) -> i64 {
    let job = queue::submit_job(
        pool,
        JobParams::Crawl(CrawlParams {
            seed_urls: seeds.iter().map(|s| s.to_string()).collect(),
            max_pages,
            max_depth: None,
        }),
    )
    .await
    .unwrap();
    job.id
}

#[tokio::test]
async fn test_end_to_end_single_page_crawl() {
    let (_tmp, pool, config) = setup().await;

    let fetcher = MockFetcher::new(&[(
        "https://a.test/",
        "<html><head><title>Hello</title></head><body><p>One paragraph of content.</p></body></html>",
    )]);
    let worker = make_worker(&pool, &config, fetcher);

    let job_id = submit_crawl(&pool, &["https://a.test/"], Some(1)).await;
    assert_eq!(worker.run_once().await.unwrap(), Some(job_id));

    let job = queue::get_job(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Done);
    assert_eq!(job.progress.pages_crawled, 1);

    let doc_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE is_active = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(doc_count, 1);

    let title: Option<String> =
        sqlx::query_scalar("SELECT title FROM documents WHERE is_active = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(title.as_deref(), Some("Hello"));

    let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(chunk_count, 1);
}

#[tokio::test]
async fn test_crawl_follows_same_host_links() {
    let (_tmp, pool, config) = setup().await;

    let fetcher = MockFetcher::new(&[
        (
            "https://a.test/",
            r#"<html><head><title>Index</title></head><body>
               <p>Start here.</p>
               <a href="/next">next</a>
               <a href="https://other.test/away">away</a>
               </body></html>"#,
        ),
        (
            "https://a.test/next",
            "<html><head><title>Next</title></head><body><p>Second page.</p></body></html>",
        ),
    ]);
    let worker = make_worker(&pool, &config, fetcher);

    let job_id = submit_crawl(&pool, &["https://a.test/"], Some(10)).await;
    worker.run_once().await.unwrap();

    let job = queue::get_job(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Done);
    // The cross-host link is never fetched, so only two pages land.
    assert_eq!(job.progress.pages_crawled, 2);

    let uris: Vec<String> =
        sqlx::query_scalar("SELECT external_id FROM documents WHERE is_active = 1 ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(uris, vec!["https://a.test/", "https://a.test/next"]);
}

#[tokio::test]
async fn test_dedup_second_crawl_adds_nothing() {
    let (_tmp, pool, config) = setup().await;

    let pages = [(
        "https://a.test/",
        "<html><head><title>Stable</title></head><body><p>Unchanged body.</p></body></html>",
    )];

    let worker = make_worker(&pool, &config, MockFetcher::new(&pages));
    let first = submit_crawl(&pool, &["https://a.test/"], Some(1)).await;
    worker.run_once().await.unwrap();

    let chunks_after_first: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await
        .unwrap();

    let second = submit_crawl(&pool, &["https://a.test/"], Some(1)).await;
    worker.run_once().await.unwrap();

    for job_id in [first, second] {
        let job = queue::get_job(&pool, job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Done);
    }

    // Exactly one active document and no new chunks on the second run.
    let doc_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE is_active = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(doc_count, 1);

    let chunks_after_second: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(chunks_after_second, chunks_after_first);
}

#[tokio::test]
async fn test_changed_content_supersedes_document() {
    let (_tmp, pool, config) = setup().await;

    let worker = make_worker(
        &pool,
        &config,
        MockFetcher::new(&[(
            "https://a.test/",
            "<html><head><title>V1</title></head><body><p>first version</p></body></html>",
        )]),
    );
    submit_crawl(&pool, &["https://a.test/"], Some(1)).await;
    worker.run_once().await.unwrap();

    let worker = make_worker(
        &pool,
        &config,
        MockFetcher::new(&[(
            "https://a.test/",
            "<html><head><title>V2</title></head><body><p>second version</p></body></html>",
        )]),
    );
    submit_crawl(&pool, &["https://a.test/"], Some(1)).await;
    worker.run_once().await.unwrap();

    let active: Vec<String> =
        sqlx::query_scalar("SELECT title FROM documents WHERE is_active = 1")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(active, vec!["V2"]);

    let inactive: Vec<String> =
        sqlx::query_scalar("SELECT title FROM documents WHERE is_active = 0")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(inactive, vec!["V1"]);

    // Chunks of the superseded document are gone; only V2's remain.
    let orphan_chunks: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM chunks WHERE doc_id IN (SELECT id FROM documents WHERE is_active = 0)",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(orphan_chunks, 0);
}

#[tokio::test]
async fn test_error_budget_fails_job_with_aggregated_message() {
    let (_tmp, pool, config) = setup().await;

    // Every URL refuses to connect.
    let worker = make_worker(&pool, &config, MockFetcher::new(&[]));

    let seeds: Vec<String> = (0..12)
        .map(|i| format!("https://a.test/page/{}", i))
        .collect();
    let seed_refs: Vec<&str> = seeds.iter().map(|s| s.as_str()).collect();
    let job_id = submit_crawl(&pool, &seed_refs, None).await;
    worker.run_once().await.unwrap();

    let job = queue::get_job(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Error);
    let message = job.error_message.unwrap();
    assert!(message.contains("too many errors"), "message: {}", message);
    assert!(message.contains("fetch failed"), "message: {}", message);
}

#[tokio::test]
async fn test_single_bad_url_does_not_fail_job() {
    let (_tmp, pool, config) = setup().await;

    let fetcher = MockFetcher::new(&[(
        "https://a.test/good",
        "<html><head><title>Good</title></head><body><p>fine</p></body></html>",
    )]);
    let worker = make_worker(&pool, &config, fetcher);

    let job_id = submit_crawl(&pool, &["https://a.test/bad", "https://a.test/good"], None).await;
    worker.run_once().await.unwrap();

    let job = queue::get_job(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Done);
    assert_eq!(job.progress.pages_crawled, 1);
}

#[tokio::test]
async fn test_policy_denied_urls_are_silent_skips() {
    let (_tmp, pool, config) = setup().await;

    policy::replace_policy(
        &pool,
        vec!["allowed.test".to_string()],
        vec![],
        Budgets {
            rate_per_domain: 60_000,
            ..Budgets::default()
        },
    )
    .await
    .unwrap();

    let fetcher = MockFetcher::new(&[(
        "https://allowed.test/",
        "<html><head><title>In</title></head><body><p>content</p></body></html>",
    )]);
    let worker = make_worker(&pool, &config, fetcher);

    let job_id = submit_crawl(
        &pool,
        &["https://blocked.test/", "https://allowed.test/"],
        None,
    )
    .await;
    worker.run_once().await.unwrap();

    // The denied URL neither fails the job nor counts as a page.
    let job = queue::get_job(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Done);
    assert_eq!(job.progress.pages_crawled, 1);
}

#[tokio::test]
async fn test_claim_is_exclusive_under_concurrency() {
    let (_tmp, pool, _config) = setup().await;

    submit_crawl(&pool, &["https://a.test/"], Some(1)).await;

    let (a, b) = tokio::join!(queue::claim_job(&pool), queue::claim_job(&pool));
    let a = a.unwrap();
    let b = b.unwrap();

    // Exactly one claimant wins.
    assert!(a.is_some() ^ b.is_some(), "a={:?} b={:?}", a.is_some(), b.is_some());
}

#[tokio::test]
async fn test_terminal_job_transitions_are_idempotent() {
    let (_tmp, pool, _config) = setup().await;

    let job_id = submit_crawl(&pool, &["https://a.test/"], Some(1)).await;
    let claimed = queue::claim_job(&pool).await.unwrap().unwrap();
    assert_eq!(claimed.id, job_id);
    assert_eq!(claimed.state, JobState::Running);

    queue::complete_job(&pool, job_id).await.unwrap();
    // A late failure report must not clobber the terminal state.
    queue::fail_job(&pool, job_id, "late failure").await.unwrap();

    let job = queue::get_job(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Done);
    assert!(job.error_message.is_none());
}

#[tokio::test]
async fn test_progress_writes_ignored_after_terminal() {
    let (_tmp, pool, _config) = setup().await;

    let job_id = submit_crawl(&pool, &["https://a.test/"], Some(1)).await;
    queue::claim_job(&pool).await.unwrap().unwrap();
    queue::complete_job(&pool, job_id).await.unwrap();

    let mut progress = ragline::models::JobProgress::default();
    progress.pages_crawled = 99;
    queue::update_progress(&pool, job_id, &progress).await.unwrap();

    let job = queue::get_job(&pool, job_id).await.unwrap().unwrap();
    assert_eq!(job.progress.pages_crawled, 0);
}

#[tokio::test]
async fn test_repo_ingest_of_local_directory() {
    let (tmp, pool, config) = setup().await;

    let repo_dir = tmp.path().join("project");
    std::fs::create_dir_all(repo_dir.join("src")).unwrap();
    std::fs::create_dir_all(repo_dir.join("node_modules/dep")).unwrap();
    std::fs::write(
        repo_dir.join("src/lib.rs"),
        "pub fn answer() -> u32 {\n    42\n}\n",
    )
    .unwrap();
    std::fs::write(
        repo_dir.join("README.md"),
        "# Project\n\nA small fixture project.\n",
    )
    .unwrap();
    std::fs::write(repo_dir.join("node_modules/dep/index.js"), "module.exports = 1;\n").unwrap();

    let worker = make_worker(&pool, &config, MockFetcher::new(&[]));

    let job = queue::submit_job(
        &pool,
        JobParams::RepoIngest(ragline::models::RepoIngestParams {
            repo_url: repo_dir.to_string_lossy().to_string(),
            branch: None,
            include: vec![],
            exclude: vec![],
        }),
    )
    .await
    .unwrap();

    worker.run_once().await.unwrap();

    let done = queue::get_job(&pool, job.id).await.unwrap().unwrap();
    assert_eq!(done.state, JobState::Done);
    assert_eq!(done.progress.files_processed, 2);

    // The default excludes keep node_modules out of the corpus.
    let uris: Vec<String> =
        sqlx::query_scalar("SELECT external_id FROM documents WHERE is_active = 1 ORDER BY external_id")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(uris, vec!["README.md", "src/lib.rs"]);

    let lang: Option<String> =
        sqlx::query_scalar("SELECT language FROM documents WHERE external_id = 'src/lib.rs'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(lang.as_deref(), Some("rust"));

    // Re-running the same ingest adds nothing.
    let chunks_before: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await
        .unwrap();

    queue::submit_job(
        &pool,
        JobParams::RepoIngest(ragline::models::RepoIngestParams {
            repo_url: repo_dir.to_string_lossy().to_string(),
            branch: None,
            include: vec![],
            exclude: vec![],
        }),
    )
    .await
    .unwrap();
    worker.run_once().await.unwrap();

    let chunks_after: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(chunks_after, chunks_before);
}

#[tokio::test]
async fn test_submit_rejects_invalid_params() {
    let (_tmp, pool, _config) = setup().await;

    let err = queue::submit_job(
        &pool,
        JobParams::Crawl(CrawlParams {
            seed_urls: vec![],
            max_pages: None,
            max_depth: None,
        }),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("seed URL"));

    let err = queue::submit_job(
        &pool,
        JobParams::Crawl(CrawlParams {
            seed_urls: vec!["not a url".to_string()],
            max_pages: None,
            max_depth: None,
        }),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("invalid seed URL"));
}
