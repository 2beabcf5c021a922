//! Repository ingest job driver.
//!
//! Workflow:
//! 1. Clone (shallow, single branch) or update a local cache of the repo.
//! 2. Walk files under the checkout, applying include/exclude globs.
//! 3. Classify each file, hash its content, and run it through the same
//!    dedup → chunk → embed → persist tail as the crawler.
//!
//! Per-file failures share the crawl driver's error budget policy.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunker;
use crate::config::Config;
use crate::embedding;
use crate::error::{ErrorBudget, IngestError};
use crate::extract;
use crate::models::{Job, JobProgress, RepoIngestParams, SourceKind};
use crate::queue;
use crate::store;

const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/node_modules/**",
    "**/target/**",
    "**/dist/**",
    "**/build/**",
    "**/.next/**",
    "**/.cache/**",
    "**/coverage/**",
    "**/*.min.js",
    "**/*.map",
];

#[derive(Debug, Default)]
pub struct RepoStats {
    pub files_processed: u32,
    pub chunks_created: u32,
    pub errors: usize,
    pub stopped_early: bool,
}

pub async fn run_repo_job(
    pool: &SqlitePool,
    config: &Config,
    job: &Job,
    params: &RepoIngestParams,
    stop: &watch::Receiver<bool>,
) -> Result<RepoStats> {
    // A local directory ingests in place; anything else goes through git.
    let local = Path::new(&params.repo_url);
    let (checkout, kind) = if local.is_dir() {
        (local.to_path_buf(), SourceKind::Filesystem)
    } else {
        let branch = params.branch.as_deref().unwrap_or("main");
        (clone_or_update(&params.repo_url, branch)?, SourceKind::GitRepo)
    };

    let include = if params.include.is_empty() {
        build_globset(&["**/*".to_string()])?
    } else {
        build_globset(&params.include)?
    };
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(params.exclude.iter().cloned());
    let exclude = build_globset(&excludes)?;

    let source = store::upsert_source(pool, kind, &params.repo_url).await?;

    let mut files: Vec<(PathBuf, String)> = Vec::new();
    for entry in WalkDir::new(&checkout) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(&checkout).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude.is_match(&rel_str) {
            continue;
        }
        if !include.is_match(&rel_str) {
            continue;
        }
        files.push((path.to_path_buf(), rel_str));
    }

    // Deterministic ordering keeps progress comparable between runs
    files.sort_by(|a, b| a.1.cmp(&b.1));

    let mut seen: HashSet<String> = HashSet::new();
    let mut budget = ErrorBudget::new();
    let mut stats = RepoStats::default();
    let mut progress = JobProgress::default();

    for (path, rel_str) in files {
        if *stop.borrow() {
            info!(job_id = job.id, "stop requested, finishing repo ingest early");
            stats.stopped_early = true;
            break;
        }
        if !seen.insert(rel_str.clone()) {
            continue;
        }

        match process_file(pool, config, source.id, &path, &rel_str).await {
            Ok(chunks) => {
                stats.files_processed += 1;
                stats.chunks_created += chunks;

                if stats.files_processed % 10 == 0 {
                    progress.files_processed = stats.files_processed;
                    progress.chunks_created = stats.chunks_created;
                    progress.current_file = Some(rel_str.clone());
                    queue::update_progress(pool, job.id, &progress).await?;
                }

                debug!(file = %rel_str, chunks, "ingested file");
            }
            Err(err) => {
                warn!(file = %rel_str, error = %err, "file failed");
                budget
                    .record(&err)
                    .with_context(|| format!("repo ingest aborted after {} errors", budget.count()))?;
            }
        }
    }

    progress.files_processed = stats.files_processed;
    progress.chunks_created = stats.chunks_created;
    progress.current_file = None;
    queue::update_progress(pool, job.id, &progress).await?;

    stats.errors = budget.count();
    info!(
        job_id = job.id,
        files = stats.files_processed,
        chunks = stats.chunks_created,
        errors = stats.errors,
        "repo ingest complete"
    );

    Ok(stats)
}

async fn process_file(
    pool: &SqlitePool,
    config: &Config,
    source_id: i64,
    path: &Path,
    rel_str: &str,
) -> std::result::Result<u32, IngestError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| IngestError::extract(rel_str, e))?;
    if content.trim().is_empty() {
        return Ok(0);
    }

    let class = extract::classify_file(rel_str);
    debug!(file = %rel_str, doc_type = class.doc_type.as_str(), "classified file");
    let content_hash = extract::content_hash(&content);
    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| rel_str.to_string());

    let outcome = store::upsert_document(
        pool,
        source_id,
        rel_str,
        Some(title.as_str()),
        class.language,
        &content_hash,
        content.len() as i64,
    )
    .await
    .map_err(|e| IngestError::storage(rel_str, e))?;

    if !outcome.is_new {
        debug!(file = %rel_str, "unchanged content, skipping chunks");
        return Ok(0);
    }

    let pieces = chunker::chunk_text(
        &content,
        config.chunking.window_lines,
        config.chunking.overlap_lines,
    );

    let vectors = if config.embedding.is_enabled() && !pieces.is_empty() {
        let texts: Vec<String> = pieces.iter().map(|p| p.text.clone()).collect();
        embedding::embed_texts(&config.embedding, &texts)
            .await
            .map_err(|e| IngestError::embed(rel_str, e))?
    } else {
        Vec::new()
    };

    store::insert_chunks(pool, outcome.document.id, &pieces, &vectors)
        .await
        .map_err(|e| IngestError::storage(rel_str, e))?;

    Ok(pieces.len() as u32)
}

/// Clone the repo into a per-URL cache directory, or update an existing
/// checkout. Shallow, single branch.
fn clone_or_update(repo_url: &str, branch: &str) -> Result<PathBuf> {
    let cache_dir = std::env::temp_dir()
        .join("ragline-repos")
        .join(short_hash(repo_url));

    if cache_dir.join(".git").exists() {
        git_update(&cache_dir, branch)?;
    } else {
        git_clone(repo_url, branch, &cache_dir)?;
    }

    Ok(cache_dir)
}

fn git_clone(url: &str, branch: &str, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create cache directory: {}", dest.display()))?;

    let output = Command::new("git")
        .args(["clone", "--branch", branch, "--single-branch", "--depth", "1"])
        .arg(url)
        .arg(dest)
        .output()
        .with_context(|| "Failed to execute 'git clone'. Is git installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git clone failed: {}", stderr.trim());
    }

    Ok(())
}

fn git_update(repo_dir: &Path, branch: &str) -> Result<()> {
    let output = Command::new("git")
        .args(["fetch", "--depth", "1", "origin", branch])
        .current_dir(repo_dir)
        .output()
        .with_context(|| "Failed to execute 'git fetch'")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git fetch failed: {}", stderr.trim());
    }

    let remote_ref = format!("origin/{}", branch);
    let output = Command::new("git")
        .args(["reset", "--hard", &remote_ref])
        .current_dir(repo_dir)
        .output()
        .with_context(|| "Failed to execute 'git reset'")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git reset failed: {}", stderr.trim());
    }

    Ok(())
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())[..12].to_string()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
