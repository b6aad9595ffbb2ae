use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::rules::{RateRule, RuleSet};
use crate::store::{WindowStore, WindowStoreError};

/// Outcome of one rate-limit check, with everything the response headers
/// need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Unix seconds at which the current window ends.
    pub reset_at: u64,
    /// Seconds until the window ends; set only on denial.
    pub retry_after: Option<u64>,
    /// The store could not be consulted and the request was let through.
    pub degraded: bool,
}

/// Fixed-window limiter over a shared [`WindowStore`].
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    rules: Arc<RuleSet>,
    timeout: Duration,
}

struct Window {
    index: i64,
    reset_at: i64,
}

fn window_for(now: i64, window_secs: u64) -> Window {
    let window = window_secs.max(1) as i64;
    let index = now.div_euclid(window);
    Window {
        index,
        reset_at: (index + 1) * window,
    }
}

impl RateLimiter {
    pub fn new(store: Arc<dyn WindowStore>, rules: RuleSet, timeout: Duration) -> Self {
        Self {
            store,
            rules: Arc::new(rules),
            timeout,
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Count a request from `client` to `path` against the route's rule.
    pub async fn allow(&self, client: &str, path: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let resolved = self.rules.resolve(path);
        let window = window_for(now.timestamp(), resolved.rule.window_secs);
        let key = format!("ratelimit:{client}:{}:{}", resolved.bucket, window.index);

        let decision = self.count(key, resolved.rule, window, now).await;
        if !decision.allowed {
            tracing::warn!(
                client = client,
                route = resolved.bucket,
                limit = decision.limit,
                retry_after = decision.retry_after,
                "rate_limit_exceeded"
            );
        }
        decision
    }

    /// Count one hit against an arbitrary key, e.g. `user:123:checkout`.
    pub async fn check_key(
        &self,
        key: &str,
        limit: u64,
        window_secs: u64,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let rule = RateRule { limit, window_secs };
        let window = window_for(now.timestamp(), window_secs);
        let key = format!("ratelimit:{key}:{}", window.index);
        self.count(key, rule, window, now).await
    }

    async fn count(
        &self,
        key: String,
        rule: RateRule,
        window: Window,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let reset_at = window.reset_at.max(0) as u64;
        let store = self.store.clone();
        let expires_at = window.reset_at;
        let ts = now.timestamp();
        let log_key = key.clone();

        let result = match timeout(
            self.timeout,
            tokio::task::spawn_blocking(move || store.hit(&key, expires_at, ts)),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(WindowStoreError::Task(join.to_string())),
            Err(_) => Err(WindowStoreError::Timeout(self.timeout)),
        };

        match result {
            Ok(count) => {
                let allowed = count <= rule.limit;
                RateLimitDecision {
                    allowed,
                    limit: rule.limit,
                    remaining: rule.limit.saturating_sub(count),
                    reset_at,
                    retry_after: (!allowed).then(|| (window.reset_at - ts).max(1) as u64),
                    degraded: false,
                }
            }
            Err(err) => {
                tracing::warn!(
                    key = %log_key,
                    error = %err,
                    code = err.error_code(),
                    "Rate limit store unavailable; allowing request"
                );
                RateLimitDecision {
                    allowed: true,
                    limit: rule.limit,
                    remaining: rule.limit,
                    reset_at,
                    retry_after: None,
                    degraded: true,
                }
            }
        }
    }

    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, WindowStoreError> {
        let store = self.store.clone();
        let ts = now.timestamp();
        match timeout(
            self.timeout,
            tokio::task::spawn_blocking(move || store.purge_expired(ts)),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(WindowStoreError::Task(join.to_string())),
            Err(_) => Err(WindowStoreError::Timeout(self.timeout)),
        }
    }

    /// Periodically delete expired windows until the returned handle is
    /// aborted.
    pub fn spawn_purge_task(&self, every: Duration) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match limiter.purge_expired(Utc::now()).await {
                    Ok(0) => {}
                    Ok(removed) => tracing::debug!(removed, "Purged expired rate windows"),
                    Err(err) => tracing::warn!(error = %err, "Failed to purge rate windows"),
                }
            }
        })
    }
}
