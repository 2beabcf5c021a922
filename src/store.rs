//! Source, document, and chunk persistence with content-hash dedup.
//!
//! The dedup short-circuit lives here: [`upsert_document`] compares the
//! incoming content hash against the most recent active document for the
//! same `(source_id, external_id)` and reports `is_new = false` on a match,
//! letting the pipeline skip re-chunking and re-embedding. A changed hash
//! supersedes the prior document — the old row is flipped inactive and its
//! chunks removed — inside one transaction. Races between writers on the
//! same key resolve through the UNIQUE(source_id, external_id, content_hash)
//! constraint, not application locks.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

use crate::embedding;
use crate::models::{ChunkPiece, Document, Source, SourceKind};

/// Find or create the source for a crawl root or repository, refreshing its
/// `last_seen_at`.
pub async fn upsert_source(pool: &SqlitePool, kind: SourceKind, root: &str) -> Result<Source> {
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO sources (kind, root, created_at, last_seen_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(kind, root) DO UPDATE SET last_seen_at = excluded.last_seen_at
        "#,
    )
    .bind(kind.as_str())
    .bind(root)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let row = sqlx::query(
        "SELECT id, kind, root, created_at, last_seen_at FROM sources WHERE kind = ? AND root = ?",
    )
    .bind(kind.as_str())
    .bind(root)
    .fetch_one(pool)
    .await?;

    Ok(Source {
        id: row.get("id"),
        kind,
        root: row.get("root"),
        created_at: row.get("created_at"),
        last_seen_at: row.get("last_seen_at"),
    })
}

/// Outcome of a document upsert.
pub struct UpsertOutcome {
    pub document: Document,
    /// False when the content hash matched the active document — the
    /// caller skips chunking and embedding.
    pub is_new: bool,
}

pub async fn upsert_document(
    pool: &SqlitePool,
    source_id: i64,
    external_id: &str,
    title: Option<&str>,
    language: Option<&str>,
    content_hash: &str,
    size_bytes: i64,
) -> Result<UpsertOutcome> {
    let now = chrono::Utc::now().timestamp();

    let mut tx = pool.begin().await?;

    let existing = sqlx::query(
        r#"
        SELECT id, title, language, content_hash, size_bytes, created_at
        FROM documents
        WHERE source_id = ? AND external_id = ? AND is_active = 1
        ORDER BY id DESC LIMIT 1
        "#,
    )
    .bind(source_id)
    .bind(external_id)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(row) = existing {
        let existing_hash: String = row.get("content_hash");
        if existing_hash == content_hash {
            tx.commit().await?;
            return Ok(UpsertOutcome {
                document: Document {
                    id: row.get("id"),
                    source_id,
                    external_id: external_id.to_string(),
                    title: row.get("title"),
                    language: row.get("language"),
                    content_hash: existing_hash,
                    size_bytes: row.get("size_bytes"),
                    is_active: true,
                    created_at: row.get("created_at"),
                },
                is_new: false,
            });
        }

        // Supersede: deactivate the prior document and drop its chunks.
        let old_id: i64 = row.get("id");
        sqlx::query("UPDATE documents SET is_active = 0 WHERE id = ?")
            .bind(old_id)
            .execute(&mut *tx)
            .await?;
        delete_chunks_tx(&mut tx, old_id).await?;
    }

    // Insert-or-reactivate on the dedup key. A conflict means this exact
    // content was seen before (e.g. a revert to an earlier version).
    sqlx::query(
        r#"
        INSERT INTO documents (source_id, external_id, title, language, content_hash, size_bytes, is_active, created_at)
        VALUES (?, ?, ?, ?, ?, ?, 1, ?)
        ON CONFLICT(source_id, external_id, content_hash) DO UPDATE SET
            is_active = 1,
            title = excluded.title,
            language = excluded.language
        "#,
    )
    .bind(source_id)
    .bind(external_id)
    .bind(title)
    .bind(language)
    .bind(content_hash)
    .bind(size_bytes)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let row = sqlx::query(
        r#"
        SELECT id, title, language, size_bytes, created_at
        FROM documents
        WHERE source_id = ? AND external_id = ? AND content_hash = ?
        "#,
    )
    .bind(source_id)
    .bind(external_id)
    .bind(content_hash)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(UpsertOutcome {
        document: Document {
            id: row.get("id"),
            source_id,
            external_id: external_id.to_string(),
            title: row.get("title"),
            language: row.get("language"),
            content_hash: content_hash.to_string(),
            size_bytes: row.get("size_bytes"),
            is_active: true,
            created_at: row.get("created_at"),
        },
        is_new: true,
    })
}

/// Persist a document's chunks, FTS rows, and vectors in one transaction.
/// `vectors` is either empty (embeddings disabled) or exactly one vector
/// per chunk, in chunk-index order.
pub async fn insert_chunks(
    pool: &SqlitePool,
    doc_id: i64,
    pieces: &[ChunkPiece],
    vectors: &[Vec<f32>],
) -> Result<()> {
    if !vectors.is_empty() && vectors.len() != pieces.len() {
        anyhow::bail!(
            "vector count {} does not match chunk count {}",
            vectors.len(),
            pieces.len()
        );
    }

    let mut tx = pool.begin().await?;

    for (i, piece) in pieces.iter().enumerate() {
        let heading_path = serde_json::to_string(&piece.heading_path)
            .context("failed to serialize heading path")?;

        let result = sqlx::query(
            r#"
            INSERT INTO chunks (doc_id, chunk_index, text, start_line, end_line, token_count, heading_path)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(doc_id)
        .bind(piece.chunk_index)
        .bind(&piece.text)
        .bind(piece.start_line)
        .bind(piece.end_line)
        .bind(piece.token_count)
        .bind(heading_path)
        .execute(&mut *tx)
        .await?;

        let chunk_id = result.last_insert_rowid();

        sqlx::query("INSERT INTO chunks_fts (chunk_id, doc_id, text) VALUES (?, ?, ?)")
            .bind(chunk_id)
            .bind(doc_id)
            .bind(&piece.text)
            .execute(&mut *tx)
            .await?;

        if let Some(vector) = vectors.get(i) {
            sqlx::query("INSERT INTO chunk_vectors (chunk_id, doc_id, embedding) VALUES (?, ?, ?)")
                .bind(chunk_id)
                .bind(doc_id)
                .bind(embedding::vec_to_blob(vector))
                .execute(&mut *tx)
                .await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

async fn delete_chunks_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    doc_id: i64,
) -> Result<()> {
    sqlx::query("DELETE FROM chunk_vectors WHERE doc_id = ?")
        .bind(doc_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM chunks_fts WHERE doc_id = ?")
        .bind(doc_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE doc_id = ?")
        .bind(doc_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
