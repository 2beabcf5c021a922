//! HTTP fetch capability behind an async trait.
//!
//! The crawl driver talks to the web only through [`Fetcher`], so tests can
//! inject a canned implementation and exercise the whole pipeline without
//! network access.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

/// A successfully fetched page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects.
    pub final_url: String,
    pub body: String,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch one URL. Non-2xx statuses are errors; the caller decides how
    /// a failure counts against the job's error budget.
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
}

/// Production fetcher backed by reqwest.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let response = self
            .client
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            bail!("unexpected status {} for {}", status, url);
        }

        let final_url = response.url().to_string();
        let body = response.text().await?;

        Ok(FetchedPage { final_url, body })
    }
}
