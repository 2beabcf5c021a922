//! # Ragline CLI (`rag`)
//!
//! The `rag` binary is the operator interface for Ragline. It provides
//! commands for database initialization, governance, job submission, the
//! worker loop, search, and document retrieval.
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/ragline.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag init` | Create the SQLite database and run schema migrations |
//! | `rag govern` | Replace the active governance policy |
//! | `rag seed <url>...` | Submit a crawl job |
//! | `rag ingest-repo <url>` | Submit a repository ingest job |
//! | `rag worker` | Run the worker loop until interrupted |
//! | `rag status <job-id>` | Show a job's state and progress |
//! | `rag search "<query>"` | Hybrid search over the corpus |
//! | `rag get <doc-id>` | Retrieve a full document with its chunks |
//! | `rag stats` | Show index statistics |
//!
//! ## Examples
//!
//! ```bash
//! rag init
//! rag govern --allow docs.example.com --rate 30
//! rag seed https://docs.example.com/ --max-pages 50
//! rag worker
//! rag search "deployment checklist" --top-k 5
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use ragline::cache::SearchCache;
use ragline::config::{self, Config};
use ragline::db;
use ragline::fetcher::HttpFetcher;
use ragline::get;
use ragline::governor::HostGovernor;
use ragline::migrate;
use ragline::models::{Budgets, CrawlParams, JobParams, RepoIngestParams};
use ragline::policy;
use ragline::queue;
use ragline::search;
use ragline::stats;
use ragline::worker::Worker;

/// Ragline — an ingestion pipeline and hybrid retrieval engine for a
/// retrieval-augmented knowledge base.
#[derive(Parser)]
#[command(
    name = "rag",
    about = "Ragline — crawl, ingest, and search a retrieval-augmented knowledge base",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Built-in defaults are used when
    /// the file does not exist.
    #[arg(long, global = true, default_value = "./config/ragline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Running
    /// it multiple times is safe.
    Init,

    /// Replace the active governance policy.
    ///
    /// Unspecified fields are carried over from the current policy. The
    /// swap is atomic: a running crawl keeps the policy it started with.
    Govern {
        /// Allowed domain patterns (wildcards supported).
        #[arg(long = "allow")]
        allow: Vec<String>,

        /// Denied domain or domain/path patterns (wildcards supported).
        #[arg(long = "deny")]
        deny: Vec<String>,

        /// Maximum pages per crawl job.
        #[arg(long)]
        max_pages: Option<u32>,

        /// Maximum crawl depth.
        #[arg(long)]
        max_depth: Option<u32>,

        /// Requests per domain per minute.
        #[arg(long)]
        rate: Option<u32>,
    },

    /// Submit a crawl job seeded with explicit URLs.
    Seed {
        /// Starting URLs.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Page budget override for this job.
        #[arg(long)]
        max_pages: Option<u32>,

        /// Depth budget override for this job.
        #[arg(long)]
        max_depth: Option<u32>,
    },

    /// Submit a repository ingest job.
    IngestRepo {
        /// Repository URL (anything `git clone` accepts).
        repo_url: String,

        /// Branch to ingest.
        #[arg(long, default_value = "main")]
        branch: String,

        /// File patterns to include (globs).
        #[arg(long = "include")]
        include: Vec<String>,

        /// File patterns to exclude (globs).
        #[arg(long = "exclude")]
        exclude: Vec<String>,
    },

    /// Run the worker loop until interrupted.
    ///
    /// Claims queued jobs one at a time and drives them to a terminal
    /// state. Ctrl-C stops the loop after the current URL or file.
    Worker,

    /// Show a job's state, progress, and error message.
    Status {
        /// Job ID as returned by `seed` or `ingest-repo`.
        job_id: i64,
    },

    /// Search indexed chunks.
    ///
    /// Runs hybrid (keyword + semantic) ranking when an embedding provider
    /// is configured, and keyword-only ranking otherwise.
    Search {
        /// The search query string.
        query: String,

        /// Number of results to return.
        #[arg(long, default_value_t = 10)]
        top_k: i64,
    },

    /// Retrieve a full document and its chunks by ID.
    Get {
        /// Document ID.
        doc_id: i64,
    },

    /// Show index statistics.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        Config::default()
    };

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("initialized {}", config.db.path.display());
        }

        Commands::Govern {
            allow,
            deny,
            max_pages,
            max_depth,
            rate,
        } => {
            let pool = db::connect(&config).await?;
            let current = policy::active_policy(&pool).await?;

            let allowlist = if allow.is_empty() {
                current.allowlist
            } else {
                allow
            };
            let denylist = if deny.is_empty() { current.denylist } else { deny };
            let budgets = Budgets {
                max_pages_per_job: max_pages.unwrap_or(current.budgets.max_pages_per_job),
                max_depth: max_depth.unwrap_or(current.budgets.max_depth),
                rate_per_domain: rate.unwrap_or(current.budgets.rate_per_domain),
            };

            let new_policy = policy::replace_policy(&pool, allowlist, denylist, budgets).await?;
            pool.close().await;

            println!("policy {} active", new_policy.id);
            println!("  allowlist: {:?}", new_policy.allowlist);
            println!("  denylist:  {:?}", new_policy.denylist);
            println!(
                "  budgets:   max_pages={} max_depth={} rate={}/min",
                new_policy.budgets.max_pages_per_job,
                new_policy.budgets.max_depth,
                new_policy.budgets.rate_per_domain
            );
        }

        Commands::Seed {
            urls,
            max_pages,
            max_depth,
        } => {
            let pool = db::connect(&config).await?;
            let job = queue::submit_job(
                &pool,
                JobParams::Crawl(CrawlParams {
                    seed_urls: urls,
                    max_pages,
                    max_depth,
                }),
            )
            .await?;
            pool.close().await;
            println!("job {} queued", job.id);
        }

        Commands::IngestRepo {
            repo_url,
            branch,
            include,
            exclude,
        } => {
            let pool = db::connect(&config).await?;
            let job = queue::submit_job(
                &pool,
                JobParams::RepoIngest(RepoIngestParams {
                    repo_url,
                    branch: Some(branch),
                    include,
                    exclude,
                }),
            )
            .await?;
            pool.close().await;
            println!("job {} queued", job.id);
        }

        Commands::Worker => {
            let pool = db::connect(&config).await?;
            let fetcher = Arc::new(HttpFetcher::new(
                &config.crawler.user_agent,
                Duration::from_secs(config.crawler.fetch_timeout_secs),
            )?);
            let governor = Arc::new(HostGovernor::new(
                &config.crawler.user_agent,
                Duration::from_secs(config.crawler.robots_timeout_secs),
            ));

            let (worker, stop) = Worker::new(pool.clone(), config, fetcher, governor);
            let task = tokio::spawn(worker.run());

            tokio::signal::ctrl_c().await?;
            stop.stop();
            task.await??;
            pool.close().await;
        }

        Commands::Status { job_id } => {
            let pool = db::connect(&config).await?;
            let job = queue::get_job(&pool, job_id).await?;
            pool.close().await;

            match job {
                Some(job) => {
                    println!("job {} ({})", job.id, job.kind.as_str());
                    println!("  state:    {}", job.state.as_str());
                    println!("  progress: {}", serde_json::to_string(&job.progress)?);
                    if let Some(ref msg) = job.error_message {
                        println!("  error:    {}", msg);
                    }
                }
                None => {
                    eprintln!("job not found: {}", job_id);
                    std::process::exit(1);
                }
            }
        }

        Commands::Search { query, top_k } => {
            let pool = db::connect(&config).await?;
            let cache = SearchCache::new(Duration::from_secs(config.retrieval.cache_ttl_secs));
            let response = search::hybrid_search(&pool, &config, &cache, &query, top_k).await?;
            pool.close().await;

            if response.results.is_empty() {
                println!("No results.");
                return Ok(());
            }

            println!("mode: {}", response.mode.as_str());
            for (i, result) in response.results.iter().enumerate() {
                let title = result.title.as_deref().unwrap_or("(untitled)");
                println!("{}. [{:.3}] {}", i + 1, result.score, title);
                println!("    uri: {}", result.uri);
                if !result.heading_path.is_empty() {
                    println!("    section: {}", result.heading_path.join(" > "));
                }
                println!(
                    "    excerpt: \"{}\"",
                    result.snippet.replace('\n', " ").trim()
                );
                println!("    chunk: {} doc: {}", result.chunk_id, result.doc_id);
                println!();
            }
        }

        Commands::Get { doc_id } => {
            let pool = db::connect(&config).await?;
            get::run_get(&pool, doc_id).await?;
            pool.close().await;
        }

        Commands::Stats => {
            let pool = db::connect(&config).await?;
            stats::run_stats(&pool).await?;
            pool.close().await;
        }
    }

    Ok(())
}
