//! Worker loop: claim jobs from the durable queue and drive them.
//!
//! The worker is an explicit value owned by the process main, not a
//! module-load side effect. [`Worker::new`] returns a [`StopHandle`];
//! signaling it halts the polling loop and tells the running driver to
//! finish its current URL or file, persist progress, and return — a clean
//! shutdown never leaves a job stuck in `running`.
//!
//! Multiple worker processes may share one queue: exclusivity comes from
//! the atomic claim in [`crate::queue`], not from anything here.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::SqlitePool;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::crawler;
use crate::fetcher::Fetcher;
use crate::governor::HostGovernor;
use crate::models::{Job, JobParams};
use crate::policy;
use crate::queue;
use crate::repo;

/// Signals the worker (and its in-flight job driver) to stop.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

pub struct Worker {
    pool: SqlitePool,
    config: Config,
    fetcher: Arc<dyn Fetcher>,
    governor: Arc<HostGovernor>,
    stop: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        pool: SqlitePool,
        config: Config,
        fetcher: Arc<dyn Fetcher>,
        governor: Arc<HostGovernor>,
    ) -> (Self, StopHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                pool,
                config,
                fetcher,
                governor,
                stop: rx,
            },
            StopHandle { tx: Arc::new(tx) },
        )
    }

    /// Poll the queue until stopped. A claimed job always reaches a
    /// terminal state before the loop moves on.
    pub async fn run(mut self) -> Result<()> {
        let poll_interval = Duration::from_millis(self.config.crawler.poll_interval_ms);
        info!("worker started");

        loop {
            if *self.stop.borrow() {
                break;
            }

            match queue::claim_job(&self.pool).await {
                Ok(Some(job)) => {
                    self.process_job(job).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => {}
                        _ = self.stop.changed() => {}
                    }
                }
                Err(err) => {
                    warn!(error = %err, "failed to claim job");
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }

        info!("worker stopped");
        Ok(())
    }

    /// Run exactly one queued job if there is one. Returns the job id.
    /// Used by tests and one-shot invocations.
    pub async fn run_once(&self) -> Result<Option<i64>> {
        match queue::claim_job(&self.pool).await? {
            Some(job) => {
                let id = job.id;
                self.process_job(job).await;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    async fn process_job(&self, job: Job) {
        info!(job_id = job.id, kind = job.kind.as_str(), "processing job");

        let result = self.dispatch(&job).await;

        let finalize = match result {
            Ok(()) => {
                info!(job_id = job.id, "job completed");
                queue::complete_job(&self.pool, job.id).await
            }
            Err(err) => {
                error!(job_id = job.id, error = %err, "job failed");
                queue::fail_job(&self.pool, job.id, &format!("{:#}", err)).await
            }
        };

        if let Err(err) = finalize {
            error!(job_id = job.id, error = %err, "failed to finalize job state");
        }
    }

    async fn dispatch(&self, job: &Job) -> Result<()> {
        match &job.params {
            JobParams::Crawl(params) => {
                let policy = policy::active_policy(&self.pool).await?;
                crawler::run_crawl_job(
                    &self.pool,
                    &self.config,
                    self.fetcher.as_ref(),
                    &self.governor,
                    &policy,
                    job,
                    params,
                    &self.stop,
                )
                .await?;
            }
            JobParams::RepoIngest(params) => {
                repo::run_repo_job(&self.pool, &self.config, job, params, &self.stop).await?;
            }
        }
        Ok(())
    }
}
