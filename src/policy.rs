//! Governance policy: allow/deny domain patterns and crawl budgets.
//!
//! Evaluation order is allowlist first (when non-empty, the URL's host must
//! match at least one pattern), then denylist (a match on host or host+path
//! rejects). Patterns use a single wildcard glob: `*` matches any run of
//! characters, literal dots are escaped. Evaluation fails closed — an
//! unparseable URL is never allowed.

use anyhow::{Context, Result};
use regex::Regex;
use sqlx::{Row, SqlitePool};
use url::Url;

use crate::models::{Budgets, Policy};

/// Check whether `url` is permitted by the policy. Pure; no side effects.
pub fn is_allowed(url: &str, policy: &Policy) -> bool {
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(_) => return false,
    };
    let host = match parsed.host_str() {
        Some(h) => h,
        None => return false,
    };
    let path = parsed.path();

    if !policy.allowlist.is_empty() {
        let allowed = policy
            .allowlist
            .iter()
            .any(|pattern| host_matches(host, pattern));
        if !allowed {
            return false;
        }
    }

    for pattern in &policy.denylist {
        let denied = if pattern.contains('*') {
            match_pattern(&format!("{}{}", host, path), pattern)
        } else {
            host_matches(host, pattern)
        };
        if denied {
            return false;
        }
    }

    true
}

/// Match a host against a domain pattern. A bare domain covers its
/// subdomains: `example.com` matches both `example.com` and
/// `sub.example.com`.
fn host_matches(host: &str, pattern: &str) -> bool {
    match_pattern(host, pattern) || match_pattern(host, &format!("*.{}", pattern))
}

/// Match `value` against a wildcard pattern, anchored at both ends.
fn match_pattern(value: &str, pattern: &str) -> bool {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    match Regex::new(&format!("^{}$", escaped)) {
        Ok(re) => re.is_match(value),
        Err(_) => false,
    }
}

/// Load the active policy, falling back to built-in defaults when none has
/// been configured yet.
pub async fn active_policy(pool: &SqlitePool) -> Result<Policy> {
    let row = sqlx::query(
        "SELECT id, allowlist, denylist, budgets FROM policies WHERE active = 1 ORDER BY id DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    let row = match row {
        Some(row) => row,
        None => return Ok(Policy::default()),
    };

    let allowlist: String = row.get("allowlist");
    let denylist: String = row.get("denylist");
    let budgets: String = row.get("budgets");

    Ok(Policy {
        id: row.get("id"),
        allowlist: serde_json::from_str(&allowlist).context("invalid policy allowlist")?,
        denylist: serde_json::from_str(&denylist).context("invalid policy denylist")?,
        budgets: serde_json::from_str(&budgets).context("invalid policy budgets")?,
    })
}

/// Swap the active policy: deactivate the old row and insert the new one in
/// a single transaction, so a crawl never observes a partial update.
pub async fn replace_policy(
    pool: &SqlitePool,
    allowlist: Vec<String>,
    denylist: Vec<String>,
    budgets: Budgets,
) -> Result<Policy> {
    let now = chrono::Utc::now().timestamp();

    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE policies SET active = 0 WHERE active = 1")
        .execute(&mut *tx)
        .await?;

    let result = sqlx::query(
        "INSERT INTO policies (allowlist, denylist, budgets, active, created_at) VALUES (?, ?, ?, 1, ?)",
    )
    .bind(serde_json::to_string(&allowlist)?)
    .bind(serde_json::to_string(&denylist)?)
    .bind(serde_json::to_string(&budgets)?)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Policy {
        id: result.last_insert_rowid(),
        allowlist,
        denylist,
        budgets,
    })
}
