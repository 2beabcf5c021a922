//! Full-document retrieval by ID.
//!
//! Fetches a document row and its chunks in chunk-index order. Used by the
//! `rag get` CLI command.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    pub id: i64,
    pub source_id: i64,
    pub uri: String,
    pub title: Option<String>,
    pub language: Option<String>,
    pub content_hash: String,
    pub size_bytes: i64,
    pub is_active: bool,
    pub created_at: String, // ISO8601
    pub chunks: Vec<ChunkResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkResponse {
    pub chunk_id: i64,
    pub index: i64,
    pub text: String,
    pub start_line: i64,
    pub end_line: i64,
    pub token_count: i64,
    pub heading_path: Vec<String>,
}

pub async fn get_document(pool: &SqlitePool, doc_id: i64) -> Result<DocumentResponse> {
    let doc_row = sqlx::query(
        "SELECT id, source_id, external_id, title, language, content_hash, size_bytes, is_active, created_at FROM documents WHERE id = ?",
    )
    .bind(doc_id)
    .fetch_optional(pool)
    .await?;

    let doc_row = match doc_row {
        Some(row) => row,
        None => bail!("document not found: {}", doc_id),
    };

    let chunk_rows = sqlx::query(
        "SELECT id, chunk_index, text, start_line, end_line, token_count, heading_path FROM chunks WHERE doc_id = ? ORDER BY chunk_index ASC",
    )
    .bind(doc_id)
    .fetch_all(pool)
    .await?;

    let chunks: Vec<ChunkResponse> = chunk_rows
        .iter()
        .map(|row| {
            let heading_path_json: String = row.get("heading_path");
            ChunkResponse {
                chunk_id: row.get("id"),
                index: row.get("chunk_index"),
                text: row.get("text"),
                start_line: row.get("start_line"),
                end_line: row.get("end_line"),
                token_count: row.get("token_count"),
                heading_path: serde_json::from_str(&heading_path_json).unwrap_or_default(),
            }
        })
        .collect();

    let created_at: i64 = doc_row.get("created_at");
    let is_active: i64 = doc_row.get("is_active");

    Ok(DocumentResponse {
        id: doc_row.get("id"),
        source_id: doc_row.get("source_id"),
        uri: doc_row.get("external_id"),
        title: doc_row.get("title"),
        language: doc_row.get("language"),
        content_hash: doc_row.get("content_hash"),
        size_bytes: doc_row.get("size_bytes"),
        is_active: is_active != 0,
        created_at: format_ts_iso(created_at),
        chunks,
    })
}

/// CLI entry point — fetches the document and prints it.
pub async fn run_get(pool: &SqlitePool, doc_id: i64) -> Result<()> {
    let doc = get_document(pool, doc_id).await?;

    println!("--- Document ---");
    println!("id:           {}", doc.id);
    println!(
        "title:        {}",
        doc.title.as_deref().unwrap_or("(untitled)")
    );
    println!("uri:          {}", doc.uri);
    if let Some(ref lang) = doc.language {
        println!("language:     {}", lang);
    }
    println!("content_hash: {}", doc.content_hash);
    println!("size_bytes:   {}", doc.size_bytes);
    println!("active:       {}", doc.is_active);
    println!("created_at:   {}", doc.created_at);
    println!();

    println!("--- Chunks ({}) ---", doc.chunks.len());
    for chunk in &doc.chunks {
        println!(
            "[chunk {} | lines {}-{} | {}]",
            chunk.index,
            chunk.start_line,
            chunk.end_line,
            chunk.heading_path.join(" > ")
        );
        println!("{}", chunk.text);
        println!();
    }

    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
