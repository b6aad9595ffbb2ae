use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-route override, matched by longest path prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteLimitSettings {
    pub prefix: String,
    pub limit: u64,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl RouteLimitSettings {
    fn new(prefix: &str, limit: u64, window_secs: u64) -> Self {
        Self {
            prefix: prefix.to_string(),
            limit,
            window_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_limit")]
    pub default_limit: u64,
    #[serde(default = "default_window_secs")]
    pub default_window_secs: u64,
    /// Use the first `X-Forwarded-For` entry as the client identity. Only
    /// safe behind a proxy that overwrites the header.
    #[serde(default)]
    pub trust_forwarded_for: bool,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
    /// Overrides `<config dir>/ratelimit.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteLimitSettings>,
}

fn default_enabled() -> bool {
    true
}

fn default_limit() -> u64 {
    100
}

fn default_window_secs() -> u64 {
    60
}

fn default_store_timeout_ms() -> u64 {
    250
}

fn default_purge_interval_secs() -> u64 {
    60
}

fn default_routes() -> Vec<RouteLimitSettings> {
    vec![
        RouteLimitSettings::new("/r/", 200, 60),
        RouteLimitSettings::new("/analytics/", 60, 60),
        RouteLimitSettings::new("/library/", 120, 60),
        RouteLimitSettings::new("/billing/checkout", 10, 60),
        RouteLimitSettings::new("/health", 1000, 60),
    ]
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            default_limit: default_limit(),
            default_window_secs: default_window_secs(),
            trust_forwarded_for: false,
            store_timeout_ms: default_store_timeout_ms(),
            purge_interval_secs: default_purge_interval_secs(),
            database: None,
            routes: default_routes(),
        }
    }
}

impl RateLimitSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_window_secs == 0 {
            anyhow::bail!("rate_limit.default_window_secs must be greater than 0");
        }
        if self.store_timeout_ms == 0 {
            anyhow::bail!("rate_limit.store_timeout_ms must be greater than 0");
        }
        if self.purge_interval_secs == 0 {
            anyhow::bail!("rate_limit.purge_interval_secs must be greater than 0");
        }
        for route in &self.routes {
            if !route.prefix.starts_with('/') {
                anyhow::bail!(
                    "rate_limit.routes prefix {:?} must start with '/'",
                    route.prefix
                );
            }
            if route.window_secs == 0 {
                anyhow::bail!(
                    "rate_limit.routes window_secs for {:?} must be greater than 0",
                    route.prefix
                );
            }
        }
        Ok(())
    }
}
