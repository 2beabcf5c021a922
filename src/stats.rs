//! Index statistics.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub sources: i64,
    pub active_documents: i64,
    pub chunks: i64,
    pub vectors: i64,
    pub queued_jobs: i64,
    pub running_jobs: i64,
    pub done_jobs: i64,
    pub failed_jobs: i64,
}

pub async fn index_stats(pool: &SqlitePool) -> Result<IndexStats> {
    let sources: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sources")
        .fetch_one(pool)
        .await?;
    let active_documents: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE is_active = 1")
            .fetch_one(pool)
            .await?;
    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await?;
    let vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(pool)
        .await?;

    let job_count = |state: &'static str| async move {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE state = ?")
            .bind(state)
            .fetch_one(pool)
            .await?;
        Ok::<i64, anyhow::Error>(n)
    };

    Ok(IndexStats {
        sources,
        active_documents,
        chunks,
        vectors,
        queued_jobs: job_count("queued").await?,
        running_jobs: job_count("running").await?,
        done_jobs: job_count("done").await?,
        failed_jobs: job_count("error").await?,
    })
}

/// CLI entry point — prints the stats.
pub async fn run_stats(pool: &SqlitePool) -> Result<()> {
    let stats = index_stats(pool).await?;

    println!("sources:          {}", stats.sources);
    println!("active documents: {}", stats.active_documents);
    println!("chunks:           {}", stats.chunks);
    println!("vectors:          {}", stats.vectors);
    println!(
        "jobs:             {} queued, {} running, {} done, {} failed",
        stats.queued_jobs, stats.running_jobs, stats.done_jobs, stats.failed_jobs
    );

    Ok(())
}
