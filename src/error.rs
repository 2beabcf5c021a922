//! Error taxonomy for per-item ingestion failures.
//!
//! A failure on one URL or file is recovered locally: the crawl and repo
//! drivers log it, count it against the job's error budget, and move on.
//! Only a systematically broken source (budget exceeded) escalates to a
//! job-level error.

use thiserror::Error;

/// A recoverable failure while ingesting a single URL or file.
///
/// Policy and robots denials are deliberately not represented here: those
/// are silent skips, not errors.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("fetch failed for {item}: {message}")]
    Fetch { item: String, message: String },

    #[error("extraction failed for {item}: {message}")]
    Extract { item: String, message: String },

    #[error("embedding failed for {item}: {message}")]
    Embed { item: String, message: String },

    #[error("storage failed for {item}: {message}")]
    Storage { item: String, message: String },
}

impl IngestError {
    pub fn fetch(item: impl Into<String>, err: impl std::fmt::Display) -> Self {
        IngestError::Fetch {
            item: item.into(),
            message: err.to_string(),
        }
    }

    pub fn extract(item: impl Into<String>, err: impl std::fmt::Display) -> Self {
        IngestError::Extract {
            item: item.into(),
            message: err.to_string(),
        }
    }

    pub fn embed(item: impl Into<String>, err: impl std::fmt::Display) -> Self {
        IngestError::Embed {
            item: item.into(),
            message: err.to_string(),
        }
    }

    pub fn storage(item: impl Into<String>, err: impl std::fmt::Display) -> Self {
        IngestError::Storage {
            item: item.into(),
            message: err.to_string(),
        }
    }
}

/// Tracks per-item errors for one job and fails the job once the budget is
/// exhausted. The aggregated message surfaces the first few errors so a
/// failed job's `error_message` stays readable.
#[derive(Debug)]
pub struct ErrorBudget {
    errors: Vec<String>,
    limit: usize,
}

/// Cap on wasted work against a systematically broken source.
pub const MAX_ERRORS_PER_JOB: usize = 10;

impl ErrorBudget {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            limit: MAX_ERRORS_PER_JOB,
        }
    }

    /// Record one error. Returns `Err` with the aggregated message once the
    /// budget is exceeded.
    pub fn record(&mut self, err: &IngestError) -> anyhow::Result<()> {
        self.errors.push(err.to_string());
        if self.errors.len() >= self.limit {
            anyhow::bail!("too many errors: {}", self.summary());
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.errors.len()
    }

    fn summary(&self) -> String {
        self.errors
            .iter()
            .take(5)
            .cloned()
            .collect::<Vec<_>>()
            .join("; ")
    }
}
