use qrc_config::ServiceConfig;
use qrc_quota::{AccountDirectory, FailMode, PlanCatalog, QuotaGate, QuotaLedger, QuotaStore};
use qrc_ratelimit::{RateLimiter, RuleSet, SqliteWindowStore, WindowStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub config: ServiceConfig,
    pub catalog: Arc<PlanCatalog>,
    pub accounts: AccountDirectory,
    pub gate: Arc<QuotaGate>,
    /// `None` when rate limiting is disabled in config.
    pub limiter: Option<RateLimiter>,
    pub version: &'static str,
}

fn ensure_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

impl AppState {
    /// Open the on-disk stores named by `config` and wire the quota core.
    pub fn new(config: ServiceConfig) -> anyhow::Result<Self> {
        let quota_db = config.quota_db_path()?;
        ensure_parent(&quota_db)?;
        let quota_store = Arc::new(QuotaStore::open(&quota_db)?);
        tracing::info!(path = %quota_db.display(), "Opened quota ledger");

        let window_store = if config.rate_limit.enabled {
            let rate_db = config.rate_limit_db_path()?;
            ensure_parent(&rate_db)?;
            let store: Arc<dyn WindowStore> = Arc::new(SqliteWindowStore::open(&rate_db)?);
            tracing::info!(path = %rate_db.display(), "Opened rate limit store");
            Some(store)
        } else {
            None
        };

        Ok(Self::from_parts(config, quota_store, window_store))
    }

    /// Wire the service over already-open stores. The limiter runs only when
    /// a window store is given and rate limiting is enabled in `config`.
    pub fn from_parts(
        config: ServiceConfig,
        quota_store: Arc<QuotaStore>,
        window_store: Option<Arc<dyn WindowStore>>,
    ) -> Self {
        let catalog = Arc::new(PlanCatalog::builtin());
        let quota_timeout = Duration::from_millis(config.quota.store_timeout_ms);

        let accounts = AccountDirectory::new(quota_store.clone(), catalog.clone(), quota_timeout);
        let ledger = QuotaLedger::new(quota_store, quota_timeout);
        let gate = Arc::new(QuotaGate::new(
            catalog.clone(),
            accounts.clone(),
            ledger,
            FailMode::from_fail_open(config.quota.fail_open),
        ));

        let limiter = window_store
            .filter(|_| config.rate_limit.enabled)
            .map(|store| {
                RateLimiter::new(
                    store,
                    RuleSet::from_settings(&config.rate_limit),
                    Duration::from_millis(config.rate_limit.store_timeout_ms),
                )
            });

        Self {
            config,
            catalog,
            accounts,
            gate,
            limiter,
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Version reported by `/health`; the binary passes its own build version.
    pub fn with_version(mut self, version: &'static str) -> Self {
        self.version = version;
        self
    }

    /// In-memory stores, for tests and `check-config` dry runs.
    pub fn in_memory(config: ServiceConfig) -> anyhow::Result<Self> {
        let window_store = if config.rate_limit.enabled {
            let store: Arc<dyn WindowStore> = Arc::new(SqliteWindowStore::in_memory()?);
            Some(store)
        } else {
            None
        };
        Ok(Self::from_parts(
            config,
            Arc::new(QuotaStore::in_memory()?),
            window_store,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrc_config::ConfigPaths;

    fn config_in(dir: &Path) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.set_paths(ConfigPaths::with_base(dir.to_path_buf()));
        config
    }

    #[test]
    fn disabled_rate_limiting_opens_no_window_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.rate_limit.enabled = false;

        let state = AppState::new(config.clone()).unwrap();
        assert!(state.limiter.is_none());
        assert!(config.quota_db_path().unwrap().exists());
        assert!(!config.rate_limit_db_path().unwrap().exists());
    }

    #[test]
    fn enabled_rate_limiting_opens_both_stores() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let state = AppState::new(config.clone()).unwrap();
        assert!(state.limiter.is_some());
        assert!(config.rate_limit_db_path().unwrap().exists());
    }

    #[test]
    fn window_store_is_ignored_when_disabled_in_config() {
        let mut config = ServiceConfig::default();
        config.rate_limit.enabled = false;
        let store: Arc<dyn WindowStore> = Arc::new(SqliteWindowStore::in_memory().unwrap());
        let state = AppState::from_parts(
            config,
            Arc::new(QuotaStore::in_memory().unwrap()),
            Some(store),
        );
        assert!(state.limiter.is_none());
    }

    #[test]
    fn version_defaults_to_package_and_can_be_overridden() {
        let state = AppState::in_memory(ServiceConfig::default()).unwrap();
        assert_eq!(state.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(state.with_version("2.0.0-rc1").version, "2.0.0-rc1");
    }
}
