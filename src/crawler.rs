//! Crawl job driver: frontier, visited set, gates, and the per-URL
//! ingestion pipeline.
//!
//! The frontier is a strict FIFO seeded from the job's seed URLs at depth
//! zero and never persisted — a crashed crawl restarts from its seeds.
//! Every candidate URL passes three gates (governance policy, robots.txt,
//! per-host rate slot) before fetching. Fetched pages flow through
//! extract → dedup-check → chunk → embed → persist; a page whose content
//! hash is unchanged skips the chunk/embed/persist tail but still counts
//! and still contributes links.
//!
//! Per-URL failures are logged and counted; the job only fails once the
//! error budget is exhausted.

use std::collections::{HashSet, VecDeque};

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use crate::chunker;
use crate::config::Config;
use crate::embedding;
use crate::error::{ErrorBudget, IngestError};
use crate::extract;
use crate::fetcher::Fetcher;
use crate::governor::HostGovernor;
use crate::models::{CrawlParams, Job, JobProgress, Policy, SourceKind};
use crate::policy;
use crate::queue;
use crate::store;

/// Extensions that never point at crawlable HTML.
const SKIP_EXTENSIONS: &[&str] = &[
    ".pdf", ".jpg", ".jpeg", ".png", ".gif", ".svg", ".css", ".js", ".json", ".xml", ".zip",
    ".tar", ".gz",
];

/// Final accounting for one crawl job.
#[derive(Debug, Default)]
pub struct CrawlStats {
    pub pages_crawled: u32,
    pub chunks_created: u32,
    pub errors: usize,
    pub stopped_early: bool,
}

enum PageOutcome {
    Processed { chunks: u32, links: Vec<String> },
    Skipped,
}

pub async fn run_crawl_job(
    pool: &SqlitePool,
    config: &Config,
    fetcher: &dyn Fetcher,
    governor: &HostGovernor,
    policy: &Policy,
    job: &Job,
    params: &CrawlParams,
    stop: &watch::Receiver<bool>,
) -> Result<CrawlStats> {
    let max_pages = params.max_pages.unwrap_or(policy.budgets.max_pages_per_job);
    let max_depth = params.max_depth.unwrap_or(policy.budgets.max_depth);

    let first_seed = params
        .seed_urls
        .first()
        .context("crawl job has no seed URLs")?;
    let source = store::upsert_source(pool, SourceKind::Web, first_seed).await?;

    let mut frontier: VecDeque<(String, u32)> = params
        .seed_urls
        .iter()
        .map(|url| (url.clone(), 0u32))
        .collect();
    let mut visited: HashSet<String> = HashSet::new();
    let mut budget = ErrorBudget::new();
    let mut stats = CrawlStats::default();
    let mut progress = JobProgress::default();

    while let Some((url, depth)) = frontier.pop_front() {
        if stats.pages_crawled >= max_pages {
            break;
        }
        if *stop.borrow() {
            info!(job_id = job.id, "stop requested, finishing crawl early");
            stats.stopped_early = true;
            break;
        }

        let normalized = normalize_url(&url);
        if !visited.insert(normalized.clone()) {
            continue;
        }
        if depth > max_depth {
            continue;
        }

        match process_url(pool, config, fetcher, governor, policy, source.id, &normalized).await {
            Ok(PageOutcome::Processed { chunks, links }) => {
                stats.pages_crawled += 1;
                stats.chunks_created += chunks;

                progress.pages_crawled = stats.pages_crawled;
                progress.chunks_created = stats.chunks_created;
                progress.current_url = Some(normalized.clone());
                queue::update_progress(pool, job.id, &progress).await?;

                if depth < max_depth {
                    for link in links {
                        frontier.push_back((link, depth + 1));
                    }
                }

                debug!(url = %normalized, depth, chunks, "crawled page");
            }
            Ok(PageOutcome::Skipped) => {}
            Err(err) => {
                warn!(url = %normalized, error = %err, "page failed");
                budget
                    .record(&err)
                    .with_context(|| format!("crawl aborted after {} errors", budget.count()))?;
            }
        }
    }

    stats.errors = budget.count();
    info!(
        job_id = job.id,
        pages = stats.pages_crawled,
        chunks = stats.chunks_created,
        errors = stats.errors,
        visited = visited.len(),
        "crawl complete"
    );

    Ok(stats)
}

async fn process_url(
    pool: &SqlitePool,
    config: &Config,
    fetcher: &dyn Fetcher,
    governor: &HostGovernor,
    policy: &Policy,
    source_id: i64,
    url: &str,
) -> std::result::Result<PageOutcome, IngestError> {
    if !policy::is_allowed(url, policy) {
        debug!(url, "blocked by policy");
        return Ok(PageOutcome::Skipped);
    }

    if !governor.check_robots(url).await {
        debug!(url, "blocked by robots.txt");
        return Ok(PageOutcome::Skipped);
    }

    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()));
    let host = match host {
        Some(h) => h,
        None => return Ok(PageOutcome::Skipped),
    };

    let page = {
        let _slot = governor
            .acquire_slot(&host, policy.budgets.rate_per_domain)
            .await;
        fetcher
            .fetch(url)
            .await
            .map_err(|e| IngestError::fetch(url, e))?
    };

    let content = extract::extract_html(&page.body, url);
    if content.text.is_empty() {
        return Err(IngestError::extract(url, "no content after extraction"));
    }

    let links = outbound_links(&content.anchors, &page.final_url);

    let outcome = store::upsert_document(
        pool,
        source_id,
        url,
        content.title.as_deref(),
        Some(content.language.as_str()),
        &content.content_hash,
        content.text.len() as i64,
    )
    .await
    .map_err(|e| IngestError::storage(url, e))?;

    if !outcome.is_new {
        debug!(url, "unchanged content, skipping chunks");
        return Ok(PageOutcome::Processed { chunks: 0, links });
    }

    let pieces = chunker::chunk_text(
        &content.text,
        config.chunking.window_lines,
        config.chunking.overlap_lines,
    );

    let vectors = if config.embedding.is_enabled() && !pieces.is_empty() {
        let texts: Vec<String> = pieces.iter().map(|p| p.text.clone()).collect();
        embedding::embed_texts(&config.embedding, &texts)
            .await
            .map_err(|e| IngestError::embed(url, e))?
    } else {
        Vec::new()
    };

    store::insert_chunks(pool, outcome.document.id, &pieces, &vectors)
        .await
        .map_err(|e| IngestError::storage(url, e))?;

    Ok(PageOutcome::Processed {
        chunks: pieces.len() as u32,
        links,
    })
}

/// Resolve a page's anchors against its base URL and keep same-host HTML
/// candidates, deduplicated in order.
pub fn outbound_links(anchors: &[String], base_url: &str) -> Vec<String> {
    let base = match Url::parse(base_url) {
        Ok(u) => u,
        Err(_) => return Vec::new(),
    };
    let base_host = base.host_str().map(|h| h.to_string());

    let mut links = Vec::new();
    let mut seen = HashSet::new();

    for anchor in anchors {
        let resolved = match base.join(anchor) {
            Ok(u) => u,
            Err(_) => continue,
        };

        if resolved.host_str().map(|h| h.to_string()) != base_host {
            continue;
        }
        if !is_html_link(&resolved) {
            continue;
        }

        let link = resolved.to_string();
        if seen.insert(link.clone()) {
            links.push(link);
        }
    }

    links
}

fn is_html_link(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    !SKIP_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Normalize a URL for the visited set: fragment stripped, query params
/// sorted. Unparseable URLs pass through unchanged.
pub fn normalize_url(url: &str) -> String {
    let mut parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(_) => return url.to_string(),
    };

    parsed.set_fragment(None);

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        pairs.sort();
        let query = pairs
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{}={}", k, v)
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&query));
    }

    parsed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_fragment() {
        assert_eq!(
            normalize_url("https://a.test/page#section"),
            "https://a.test/page"
        );
    }

    #[test]
    fn test_normalize_sorts_query_params() {
        assert_eq!(
            normalize_url("https://a.test/p?b=2&a=1"),
            "https://a.test/p?a=1&b=2"
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_url("https://a.test/p?z=9&a=1#frag");
        assert_eq!(normalize_url(&once), once);
    }

    #[test]
    fn test_normalize_passes_through_garbage() {
        assert_eq!(normalize_url("not a url"), "not a url");
    }

    #[test]
    fn test_outbound_links_same_host_only() {
        let anchors = vec![
            "/docs".to_string(),
            "https://a.test/about".to_string(),
            "https://other.test/external".to_string(),
        ];
        let links = outbound_links(&anchors, "https://a.test/");
        assert_eq!(
            links,
            vec!["https://a.test/docs", "https://a.test/about"]
        );
    }

    #[test]
    fn test_outbound_links_skip_non_html() {
        let anchors = vec![
            "/style.css".to_string(),
            "/report.pdf".to_string(),
            "/page".to_string(),
        ];
        let links = outbound_links(&anchors, "https://a.test/");
        assert_eq!(links, vec!["https://a.test/page"]);
    }

    #[test]
    fn test_outbound_links_deduped() {
        let anchors = vec!["/x".to_string(), "/x".to_string(), "x".to_string()];
        let links = outbound_links(&anchors, "https://a.test/");
        assert_eq!(links, vec!["https://a.test/x"]);
    }
}
