//! Per-host request pacing and robots.txt compliance.
//!
//! [`HostGovernor`] owns both concerns: a lazily-created per-host rate
//! limiter enforcing one in-flight request and a minimum inter-request
//! interval, and a robots.txt cache keyed by `scheme://host`. The governor
//! is constructed explicitly and injected into the crawl driver, so tests
//! can run isolated instances.
//!
//! Robots handling is fail-open: any fetch or parse problem yields
//! "allowed". Only an explicit matching Disallow rule blocks a URL.
//! Cached rules live for the governor's lifetime; robots.txt is not
//! re-fetched within a crawl run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use url::Url;

/// Per-host state guarded by the slot mutex.
#[derive(Debug, Default)]
struct HostState {
    last_request: Option<Instant>,
}

/// Held by the caller for the duration of a fetch; while alive, no other
/// request to the same host can acquire a slot.
pub struct HostSlot {
    _guard: OwnedMutexGuard<HostState>,
}

pub struct HostGovernor {
    user_agent: String,
    client: reqwest::Client,
    hosts: Mutex<HashMap<String, Arc<AsyncMutex<HostState>>>>,
    robots: AsyncMutex<HashMap<String, RobotsRules>>,
}

impl HostGovernor {
    pub fn new(user_agent: &str, robots_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(robots_timeout)
            .build()
            .unwrap_or_default();

        Self {
            user_agent: user_agent.to_string(),
            client,
            hosts: Mutex::new(HashMap::new()),
            robots: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Minimum spacing between two requests to the same host at the given
    /// per-domain budget.
    pub fn min_interval(rate_per_minute: u32) -> Duration {
        Duration::from_millis(60_000 / rate_per_minute.max(1) as u64)
    }

    /// Wait for the host's request slot. The rate comes from the active
    /// policy's budgets. Returns a guard that must be held while the
    /// request is in flight.
    pub async fn acquire_slot(&self, host: &str, rate_per_minute: u32) -> HostSlot {
        let cell = {
            let mut hosts = self.hosts.lock().expect("host map poisoned");
            hosts
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(HostState::default())))
                .clone()
        };

        let mut guard = cell.lock_owned().await;

        let min_interval = Self::min_interval(rate_per_minute);
        if let Some(last) = guard.last_request {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                tokio::time::sleep(min_interval - elapsed).await;
            }
        }
        guard.last_request = Some(Instant::now());

        HostSlot { _guard: guard }
    }

    /// Check whether `url` is permitted by the host's robots.txt.
    pub async fn check_robots(&self, url: &str) -> bool {
        let parsed = match Url::parse(url) {
            Ok(u) => u,
            Err(_) => return true,
        };
        let host = match parsed.host_str() {
            Some(h) => h.to_string(),
            None => return true,
        };
        let key = format!("{}://{}", parsed.scheme(), host);

        {
            let cache = self.robots.lock().await;
            if let Some(rules) = cache.get(&key) {
                return rules.is_allowed(parsed.path());
            }
        }

        let robots_url = format!("{}/robots.txt", key);
        let body = match self.client.get(&robots_url).send().await {
            Ok(resp) if resp.status().is_success() => resp.text().await.unwrap_or_default(),
            Ok(resp) if resp.status().as_u16() == 404 => String::new(),
            // Fetch trouble is never a hard blocker; skip caching so a
            // later attempt can still pick the rules up.
            _ => return true,
        };

        let rules = RobotsRules::parse(&body, &self.user_agent);
        let allowed = rules.is_allowed(parsed.path());

        let mut cache = self.robots.lock().await;
        cache.insert(key, rules);

        allowed
    }
}

/// Path rules from the robots.txt group that applies to our user agent.
#[derive(Debug, Clone)]
pub struct RobotsRules {
    rules: Vec<(bool, String)>, // (allow, path prefix)
}

impl RobotsRules {
    /// Parse robots.txt, keeping the group that best matches `user_agent`.
    /// A group whose agent token is a substring of our UA wins over the
    /// `*` group.
    pub fn parse(body: &str, user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();

        let mut wildcard_rules: Vec<(bool, String)> = Vec::new();
        let mut specific_rules: Vec<(bool, String)> = Vec::new();

        let mut current_agents: Vec<String> = Vec::new();
        let mut current_rules: Vec<(bool, String)> = Vec::new();
        let mut in_rules = false;

        let mut flush = |agents: &[String], rules: Vec<(bool, String)>| {
            if agents.iter().any(|a| a != "*" && ua.contains(a.as_str())) {
                specific_rules.extend(rules);
            } else if agents.iter().any(|a| a == "*") {
                wildcard_rules.extend(rules);
            }
        };

        for line in body.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f.trim().to_ascii_lowercase(), v.trim().to_string()),
                None => continue,
            };

            match field.as_str() {
                "user-agent" => {
                    if in_rules {
                        flush(&current_agents, std::mem::take(&mut current_rules));
                        current_agents.clear();
                        in_rules = false;
                    }
                    current_agents.push(value.to_ascii_lowercase());
                }
                "disallow" => {
                    in_rules = true;
                    current_rules.push((false, value));
                }
                "allow" => {
                    in_rules = true;
                    current_rules.push((true, value));
                }
                _ => {}
            }
        }
        flush(&current_agents, current_rules);

        let rules = if specific_rules.is_empty() {
            wildcard_rules
        } else {
            specific_rules
        };

        Self { rules }
    }

    /// Longest matching prefix wins; Allow wins ties. An empty Disallow
    /// value allows everything. Default is allowed.
    pub fn is_allowed(&self, path: &str) -> bool {
        let mut best_len = 0usize;
        let mut best_allow = true;

        for (allow, prefix) in &self.rules {
            if prefix.is_empty() {
                continue;
            }
            if path.starts_with(prefix.as_str()) {
                let len = prefix.len();
                if len > best_len || (len == best_len && *allow) {
                    best_len = len;
                    best_allow = *allow;
                }
            }
        }

        best_allow
    }
}
