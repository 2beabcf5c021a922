//! Core data models used throughout Ragline.
//!
//! These types represent the sources, documents, chunks, jobs, and policies
//! that flow through the ingestion pipeline and the retrieval engine.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Where ingested content originally came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Web,
    Filesystem,
    GitRepo,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Web => "web",
            SourceKind::Filesystem => "filesystem",
            SourceKind::GitRepo => "git_repo",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "web" => Ok(SourceKind::Web),
            "filesystem" => Ok(SourceKind::Filesystem),
            "git_repo" => Ok(SourceKind::GitRepo),
            other => bail!("unknown source kind: {}", other),
        }
    }
}

/// A crawl root or repository. Created once per distinct root; only
/// `last_seen_at` is ever updated afterwards.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: i64,
    pub kind: SourceKind,
    pub root: String,
    pub created_at: i64,
    pub last_seen_at: i64,
}

/// One ingested unit of content. A document with the same `external_id` but
/// a new content hash supersedes the prior row (which is flipped inactive).
#[derive(Debug, Clone)]
pub struct Document {
    pub id: i64,
    pub source_id: i64,
    pub external_id: String,
    pub title: Option<String>,
    pub language: Option<String>,
    pub content_hash: String,
    pub size_bytes: i64,
    pub is_active: bool,
    pub created_at: i64,
}

/// A contiguous slice of a document's normalized text, produced by the
/// chunker before persistence. Line numbers are 1-based inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPiece {
    pub chunk_index: i64,
    pub text: String,
    pub start_line: i64,
    pub end_line: i64,
    pub token_count: i64,
    pub heading_path: Vec<String>,
}

/// Classification of an ingested repository file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocType {
    Code,
    Markdown,
    Config,
    Test,
    Other,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Code => "code",
            DocType::Markdown => "markdown",
            DocType::Config => "config",
            DocType::Test => "test",
            DocType::Other => "other",
        }
    }
}

/// Doc type plus language label derived from a file's extension and name.
#[derive(Debug, Clone)]
pub struct FileClass {
    pub doc_type: DocType,
    pub language: Option<&'static str>,
}

/// Content extracted from a fetched web page.
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    pub text: String,
    pub title: Option<String>,
    pub heading_path: Vec<String>,
    pub anchors: Vec<String>,
    pub language: String,
    pub canonical_url: String,
    pub content_hash: String,
}

/// Kind of ingestion work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Crawl,
    RepoIngest,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Crawl => "crawl",
            JobKind::RepoIngest => "repo_ingest",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "crawl" => Ok(JobKind::Crawl),
            "repo_ingest" => Ok(JobKind::RepoIngest),
            other => bail!("unknown job kind: {}", other),
        }
    }
}

/// Job lifecycle state: `queued -> running -> {done, error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Done,
    Error,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "done" => Ok(JobState::Done),
            "error" => Ok(JobState::Error),
            other => bail!("unknown job state: {}", other),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Error)
    }
}

/// Typed job parameters, tagged by job kind. Validated when the job is
/// submitted, not when it is claimed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobParams {
    Crawl(CrawlParams),
    RepoIngest(RepoIngestParams),
}

impl JobParams {
    pub fn job_kind(&self) -> JobKind {
        match self {
            JobParams::Crawl(_) => JobKind::Crawl,
            JobParams::RepoIngest(_) => JobKind::RepoIngest,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrawlParams {
    pub seed_urls: Vec<String>,
    #[serde(default)]
    pub max_pages: Option<u32>,
    #[serde(default)]
    pub max_depth: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepoIngestParams {
    pub repo_url: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Observable progress counters for a running job. Monotonically
/// increasing; a lost write is harmless.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobProgress {
    #[serde(default)]
    pub pages_crawled: u32,
    #[serde(default)]
    pub files_processed: u32,
    #[serde(default)]
    pub chunks_created: u32,
    #[serde(default)]
    pub current_url: Option<String>,
    #[serde(default)]
    pub current_file: Option<String>,
}

/// A unit of ingestion work stored in the durable queue.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub kind: JobKind,
    pub params: JobParams,
    pub state: JobState,
    pub progress: JobProgress,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A ranked search hit returned by the retrieval engine.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub chunk_id: i64,
    pub doc_id: i64,
    /// URL or repository-relative path of the parent document.
    pub uri: String,
    pub title: Option<String>,
    pub snippet: String,
    pub score: f64,
    pub heading_path: Vec<String>,
    pub token_count: i64,
}

/// Budget limits bounding one job's resource consumption.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Budgets {
    pub max_pages_per_job: u32,
    pub max_depth: u32,
    pub rate_per_domain: u32,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            max_pages_per_job: 200,
            max_depth: 3,
            rate_per_domain: 30,
        }
    }
}

/// The active governance record. Read-only during a job's lifetime;
/// replaced wholesale, never mutated in place.
#[derive(Debug, Clone)]
pub struct Policy {
    pub id: i64,
    pub allowlist: Vec<String>,
    pub denylist: Vec<String>,
    pub budgets: Budgets,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            id: 0,
            allowlist: Vec::new(),
            denylist: Vec::new(),
            budgets: Budgets::default(),
        }
    }
}
