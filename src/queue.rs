//! Durable job queue with crash-safe claim semantics.
//!
//! The claim is a single conditional UPDATE: SQLite serializes writers, so
//! two workers can never flip the same row to `running`. Completion and
//! failure only transition out of `running`, which makes them idempotent
//! no-ops on already-terminal jobs.

use anyhow::{bail, Context, Result};
use sqlx::{Row, SqlitePool};
use url::Url;

use crate::models::{Job, JobKind, JobParams, JobProgress, JobState};

/// Validate params and enqueue a new job. Returns the stored job in state
/// `queued`.
pub async fn submit_job(pool: &SqlitePool, params: JobParams) -> Result<Job> {
    validate_params(&params)?;

    let kind = params.job_kind();
    let params_json = serde_json::to_string(&params)?;
    let now = chrono::Utc::now().timestamp();

    let result = sqlx::query(
        r#"
        INSERT INTO jobs (kind, params, state, progress, created_at, updated_at)
        VALUES (?, ?, 'queued', '{}', ?, ?)
        "#,
    )
    .bind(kind.as_str())
    .bind(&params_json)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(Job {
        id: result.last_insert_rowid(),
        kind,
        params,
        state: JobState::Queued,
        progress: JobProgress::default(),
        error_message: None,
        created_at: now,
        updated_at: now,
    })
}

fn validate_params(params: &JobParams) -> Result<()> {
    match params {
        JobParams::Crawl(crawl) => {
            if crawl.seed_urls.is_empty() {
                bail!("crawl job requires at least one seed URL");
            }
            for url in &crawl.seed_urls {
                Url::parse(url).with_context(|| format!("invalid seed URL: {}", url))?;
            }
        }
        JobParams::RepoIngest(repo) => {
            if repo.repo_url.trim().is_empty() {
                bail!("repo ingest job requires a repository URL");
            }
        }
    }
    Ok(())
}

/// Atomically claim the oldest queued job, flipping it to `running`.
/// Returns `None` when the queue is empty.
pub async fn claim_job(pool: &SqlitePool) -> Result<Option<Job>> {
    let now = chrono::Utc::now().timestamp();

    let row = sqlx::query(
        r#"
        UPDATE jobs
        SET state = 'running', updated_at = ?
        WHERE id = (SELECT id FROM jobs WHERE state = 'queued' ORDER BY id LIMIT 1)
          AND state = 'queued'
        RETURNING id, kind, params, state, progress, error_message, created_at, updated_at
        "#,
    )
    .bind(now)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(Some(job_from_row(&row)?)),
        None => Ok(None),
    }
}

/// Mark a running job done. No-op if the job is already terminal.
pub async fn complete_job(pool: &SqlitePool, job_id: i64) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query("UPDATE jobs SET state = 'done', updated_at = ? WHERE id = ? AND state = 'running'")
        .bind(now)
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Mark a running job failed with a human-readable message. No-op if the
/// job is already terminal.
pub async fn fail_job(pool: &SqlitePool, job_id: i64, message: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        "UPDATE jobs SET state = 'error', error_message = ?, updated_at = ? WHERE id = ? AND state = 'running'",
    )
    .bind(message)
    .bind(now)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Non-terminal, repeatable progress write. Safe to lose.
pub async fn update_progress(
    pool: &SqlitePool,
    job_id: i64,
    progress: &JobProgress,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        "UPDATE jobs SET progress = ?, updated_at = ? WHERE id = ? AND state = 'running'",
    )
    .bind(serde_json::to_string(progress)?)
    .bind(now)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_job(pool: &SqlitePool, job_id: i64) -> Result<Option<Job>> {
    let row = sqlx::query(
        "SELECT id, kind, params, state, progress, error_message, created_at, updated_at FROM jobs WHERE id = ?",
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(Some(job_from_row(&row)?)),
        None => Ok(None),
    }
}

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Job> {
    let kind_str: String = row.get("kind");
    let state_str: String = row.get("state");
    let params_json: String = row.get("params");
    let progress_json: String = row.get("progress");

    let progress: JobProgress =
        serde_json::from_str(&progress_json).unwrap_or_default();
    let params: JobParams =
        serde_json::from_str(&params_json).context("invalid job params in queue")?;

    Ok(Job {
        id: row.get("id"),
        kind: JobKind::parse(&kind_str)?,
        params,
        state: JobState::parse(&state_str)?,
        progress,
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
