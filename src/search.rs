//! Hybrid lexical + semantic retrieval.
//!
//! The final score is a fixed weighted sum:
//! `final = semantic_weight * cosine + lexical_weight * fts`, with FTS5's
//! best-match-lowest rank mapped into (0, 1] via `1 / (1 + |rank|)`. A
//! chunk found by only one channel contributes zero for the missing term.
//!
//! When the embedding provider is disabled or the query embedding fails,
//! the engine degrades to lexical-only ranking instead of failing the
//! query; the response records which mode actually ran, so the caller
//! never mistakes a degraded ranking for a hybrid one.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tracing::warn;

use crate::cache::SearchCache;
use crate::config::Config;
use crate::embedding;
use crate::models::RankedResult;

/// Characters of chunk text included in a result snippet.
const SNIPPET_CHARS: usize = 200;

/// Which ranking actually ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Hybrid,
    Lexical,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Hybrid => "hybrid",
            SearchMode::Lexical => "lexical",
        }
    }
}

#[derive(Debug)]
pub struct SearchResponse {
    pub mode: SearchMode,
    pub results: Vec<RankedResult>,
}

struct Candidate {
    chunk_id: i64,
    doc_id: i64,
    uri: String,
    title: Option<String>,
    text: String,
    heading_path: Vec<String>,
    token_count: i64,
    fts_score: Option<f64>,
    semantic_score: Option<f64>,
}

pub async fn hybrid_search(
    pool: &SqlitePool,
    config: &Config,
    cache: &SearchCache,
    query: &str,
    top_k: i64,
) -> Result<SearchResponse> {
    let normalized = normalize_query(query);
    if normalized.is_empty() {
        return Ok(SearchResponse {
            mode: SearchMode::Lexical,
            results: Vec::new(),
        });
    }
    let top_k = top_k.max(1);

    // Degrade to lexical-only when no query vector can be produced. This
    // is a documented fallback: no vector term is claimed in the response.
    let query_vec = if config.embedding.is_enabled() {
        match embedding::embed_query(&config.embedding, &normalized).await {
            Ok(v) => Some(v),
            Err(err) => {
                warn!(error = %err, "query embedding failed, degrading to lexical search");
                None
            }
        }
    } else {
        None
    };

    let mode = if query_vec.is_some() {
        SearchMode::Hybrid
    } else {
        SearchMode::Lexical
    };

    if let Some(results) = cache.get(&normalized, top_k, mode.as_str()) {
        return Ok(SearchResponse { mode, results });
    }

    let candidate_k = config.retrieval.candidate_k.max(top_k);
    let mut candidates: HashMap<i64, Candidate> = HashMap::new();

    fetch_lexical_candidates(pool, &normalized, candidate_k, &mut candidates).await?;
    if let Some(ref vec) = query_vec {
        fetch_semantic_candidates(pool, vec, candidate_k, &mut candidates).await?;
    }

    let mut scored: Vec<(f64, Candidate)> = candidates
        .into_values()
        .map(|c| {
            let score = match mode {
                SearchMode::Hybrid => combine_scores(
                    c.semantic_score,
                    c.fts_score,
                    config.retrieval.semantic_weight,
                    config.retrieval.lexical_weight,
                ),
                SearchMode::Lexical => c.fts_score.unwrap_or(0.0),
            };
            (score, c)
        })
        .collect();

    // Deterministic ordering: score desc, then chunk id
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.chunk_id.cmp(&b.1.chunk_id))
    });
    scored.truncate(top_k as usize);

    let results: Vec<RankedResult> = scored
        .into_iter()
        .map(|(score, c)| RankedResult {
            chunk_id: c.chunk_id,
            doc_id: c.doc_id,
            uri: c.uri,
            title: c.title,
            snippet: snippet(&c.text),
            score,
            heading_path: c.heading_path,
            token_count: c.token_count,
        })
        .collect();

    cache.put(&normalized, top_k, mode.as_str(), results.clone());

    Ok(SearchResponse { mode, results })
}

/// The fixed hybrid formula. A missing channel contributes zero.
fn combine_scores(
    semantic: Option<f64>,
    lexical: Option<f64>,
    semantic_weight: f64,
    lexical_weight: f64,
) -> f64 {
    semantic_weight * semantic.unwrap_or(0.0) + lexical_weight * lexical.unwrap_or(0.0)
}

/// Map FTS5's rank (lower is better, usually negative) into (0, 1].
fn fts_rank_score(rank: f64) -> f64 {
    1.0 / (1.0 + rank.abs())
}

fn normalize_query(query: &str) -> String {
    query
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn snippet(text: &str) -> String {
    if text.chars().count() <= SNIPPET_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(SNIPPET_CHARS).collect();
        format!("{}...", cut)
    }
}

async fn fetch_lexical_candidates(
    pool: &SqlitePool,
    query: &str,
    candidate_k: i64,
    candidates: &mut HashMap<i64, Candidate>,
) -> Result<()> {
    let rows = sqlx::query(
        r#"
        SELECT c.id AS chunk_id, c.doc_id, c.text, c.heading_path, c.token_count,
               d.external_id, d.title, chunks_fts.rank AS rank
        FROM chunks_fts
        JOIN chunks c ON c.id = chunks_fts.chunk_id
        JOIN documents d ON d.id = c.doc_id
        WHERE chunks_fts MATCH ? AND d.is_active = 1
        ORDER BY chunks_fts.rank
        LIMIT ?
        "#,
    )
    .bind(query)
    .bind(candidate_k)
    .fetch_all(pool)
    .await?;

    for row in rows {
        let rank: f64 = row.get("rank");
        let candidate = candidate_from_row(&row);
        candidates
            .entry(candidate.chunk_id)
            .or_insert(candidate)
            .fts_score = Some(fts_rank_score(rank));
    }

    Ok(())
}

async fn fetch_semantic_candidates(
    pool: &SqlitePool,
    query_vec: &[f32],
    candidate_k: i64,
    candidates: &mut HashMap<i64, Candidate>,
) -> Result<()> {
    // Vectors are scanned in full and scored in process; the corpus a
    // single worker maintains stays small enough for this to hold up.
    let rows = sqlx::query(
        r#"
        SELECT c.id AS chunk_id, c.doc_id, c.text, c.heading_path, c.token_count,
               d.external_id, d.title, cv.embedding
        FROM chunk_vectors cv
        JOIN chunks c ON c.id = cv.chunk_id
        JOIN documents d ON d.id = c.doc_id
        WHERE d.is_active = 1
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut scored: Vec<(f64, sqlx::sqlite::SqliteRow)> = rows
        .into_iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vec = embedding::blob_to_vec(&blob);
            let similarity = embedding::cosine_similarity(query_vec, &vec) as f64;
            (similarity, row)
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(candidate_k as usize);

    for (similarity, row) in scored {
        let candidate = candidate_from_row(&row);
        candidates
            .entry(candidate.chunk_id)
            .or_insert(candidate)
            .semantic_score = Some(similarity);
    }

    Ok(())
}

fn candidate_from_row(row: &sqlx::sqlite::SqliteRow) -> Candidate {
    let heading_path_json: String = row.get("heading_path");
    let heading_path: Vec<String> = serde_json::from_str(&heading_path_json).unwrap_or_default();

    Candidate {
        chunk_id: row.get("chunk_id"),
        doc_id: row.get("doc_id"),
        uri: row.get("external_id"),
        title: row.get("title"),
        text: row.get("text"),
        heading_path,
        token_count: row.get("token_count"),
        fts_score: None,
        semantic_score: None,
    }
}
