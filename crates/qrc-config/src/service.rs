use serde::{Deserialize, Serialize};
use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use crate::paths::ConfigPaths;
use crate::quota::QuotaSettings;
use crate::rate_limit::RateLimitSettings;

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

fn default_upgrade_url() -> String {
    "/pricing".to_string()
}

fn default_identity_header() -> String {
    "x-account-id".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    match env::var("QRC_ALLOWED_ORIGINS") {
        Ok(val) => val
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn default_billing_token() -> Option<String> {
    env::var("QRC_BILLING_TOKEN")
        .ok()
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

const MIN_BILLING_TOKEN_LEN: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Linked from quota denials so clients can render upgrade messaging.
    #[serde(default = "default_upgrade_url")]
    pub upgrade_url: String,
    /// Header carrying the account id verified by the upstream gateway.
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Bearer token the billing integration presents to change plans. Plan
    /// changes are refused while unset.
    #[serde(
        default = "default_billing_token",
        skip_serializing_if = "Option::is_none"
    )]
    pub billing_token: Option<String>,
    #[serde(default)]
    pub quota: QuotaSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(skip)]
    paths: Option<ConfigPaths>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            upgrade_url: default_upgrade_url(),
            identity_header: default_identity_header(),
            allowed_origins: default_allowed_origins(),
            billing_token: default_billing_token(),
            quota: QuotaSettings::default(),
            rate_limit: RateLimitSettings::default(),
            paths: None,
        }
    }
}

impl ServiceConfig {
    /// Returns the `ConfigPaths` for this config. If paths haven't been set,
    /// creates the default paths (may fail if `$HOME` is unset).
    pub fn paths(&self) -> anyhow::Result<ConfigPaths> {
        match &self.paths {
            Some(p) => Ok(p.clone()),
            None => ConfigPaths::new(),
        }
    }

    /// Set a custom `ConfigPaths` (useful for testing or multi-instance).
    pub fn set_paths(&mut self, paths: ConfigPaths) {
        self.paths = Some(paths);
    }

    /// Load config from the default location (`~/.qrcloner/config.toml`).
    pub fn load() -> anyhow::Result<Self> {
        let paths = ConfigPaths::new()?;
        Self::load_from(&paths)
    }

    /// Load config from a specific `ConfigPaths`.
    pub fn load_from(paths: &ConfigPaths) -> anyhow::Result<Self> {
        let config_file = paths.config_path();
        let mut config = if config_file.exists() {
            Self::parse_file(&config_file)?
        } else {
            Self::default()
        };
        config.paths = Some(paths.clone());
        config.validate()?;
        Ok(config)
    }

    /// Load an explicit config file. Database paths default to the file's
    /// directory.
    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        let mut config = Self::parse_file(path)?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.paths = Some(ConfigPaths::with_base(base));
        config.validate()?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ServiceConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Validate config values. Called automatically by `load` / `load_from`.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must not be 0");
        }
        if self.upgrade_url.is_empty() {
            anyhow::bail!("upgrade_url must not be empty");
        }
        if self.identity_header.is_empty()
            || !self
                .identity_header
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            anyhow::bail!(
                "identity_header must be a lowercase header name, got {:?}",
                self.identity_header
            );
        }
        if let Some(token) = &self.billing_token {
            if token.len() < MIN_BILLING_TOKEN_LEN {
                anyhow::bail!(
                    "billing_token must be at least {} characters",
                    MIN_BILLING_TOKEN_LEN
                );
            }
        }
        if self.quota.store_timeout_ms == 0 {
            anyhow::bail!("quota.store_timeout_ms must be greater than 0");
        }
        self.rate_limit.validate()?;
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn quota_db_path(&self) -> anyhow::Result<PathBuf> {
        match &self.quota.database {
            Some(path) => Ok(path.clone()),
            None => Ok(self.paths()?.quota_db_path()),
        }
    }

    pub fn rate_limit_db_path(&self) -> anyhow::Result<PathBuf> {
        match &self.rate_limit.database {
            Some(path) => Ok(path.clone()),
            None => Ok(self.paths()?.rate_limit_db_path()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_paths() -> (tempfile::TempDir, ConfigPaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = ConfigPaths::with_base(dir.path().to_path_buf());
        (dir, paths)
    }

    #[test]
    fn default_produces_expected_values() {
        let config = ServiceConfig::default();
        assert_eq!(config.host, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.port, 8080);
        assert_eq!(config.upgrade_url, "/pricing");
        assert_eq!(config.identity_header, "x-account-id");
        assert!(!config.quota.fail_open);
        assert!(config.rate_limit.enabled);
    }

    #[test]
    fn bind_addr_formats_correctly() {
        let mut config = ServiceConfig::default();
        config.port = 9090;
        config.host = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(config.bind_addr(), "127.0.0.1:9090");
    }

    #[test]
    fn load_with_no_file_returns_default() {
        let (_dir, paths) = test_paths();
        let config = ServiceConfig::load_from(&paths).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.quota_db_path().unwrap(), paths.quota_db_path());
        assert_eq!(
            config.rate_limit_db_path().unwrap(),
            paths.rate_limit_db_path()
        );
    }

    #[test]
    fn load_with_nested_sections() {
        let (_dir, paths) = test_paths();
        std::fs::write(
            paths.config_path(),
            r#"
port = 9000
upgrade_url = "https://qrcloner.app/pricing"

[quota]
fail_open = true

[rate_limit]
default_limit = 30
"#,
        )
        .unwrap();
        let config = ServiceConfig::load_from(&paths).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.upgrade_url, "https://qrcloner.app/pricing");
        assert!(config.quota.fail_open);
        assert_eq!(config.rate_limit.default_limit, 30);
        // untouched fields keep their defaults
        assert_eq!(config.rate_limit.default_window_secs, 60);
    }

    #[test]
    fn load_file_uses_parent_directory_for_databases() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("qrcd.toml");
        std::fs::write(&file, "port = 7000\n").unwrap();
        let config = ServiceConfig::load_file(&file).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.quota_db_path().unwrap(), dir.path().join("quota.db"));
    }

    #[test]
    fn explicit_database_paths_win() {
        let mut config = ServiceConfig::default();
        config.quota.database = Some(PathBuf::from("/data/q.db"));
        config.rate_limit.database = Some(PathBuf::from("/data/r.db"));
        assert_eq!(config.quota_db_path().unwrap(), PathBuf::from("/data/q.db"));
        assert_eq!(
            config.rate_limit_db_path().unwrap(),
            PathBuf::from("/data/r.db")
        );
    }

    #[test]
    fn load_with_invalid_toml_returns_error() {
        let (_dir, paths) = test_paths();
        std::fs::write(paths.config_path(), "not valid {{{{ toml").unwrap();
        assert!(ServiceConfig::load_from(&paths).is_err());
    }

    #[test]
    fn validate_rejects_port_zero() {
        let mut config = ServiceConfig::default();
        config.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_upgrade_url() {
        let mut config = ServiceConfig::default();
        config.upgrade_url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_uppercase_identity_header() {
        let mut config = ServiceConfig::default();
        config.identity_header = "X-Account-Id".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_short_billing_token() {
        let mut config = ServiceConfig::default();
        config.billing_token = Some("short".to_string());
        assert!(config.validate().is_err());
        config.billing_token = Some("0123456789abcdef0123".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn billing_token_read_from_file() {
        let (_dir, paths) = test_paths();
        std::fs::write(
            paths.config_path(),
            "billing_token = \"whsec_0123456789abcdef\"\n",
        )
        .unwrap();
        let config = ServiceConfig::load_from(&paths).unwrap();
        assert_eq!(
            config.billing_token.as_deref(),
            Some("whsec_0123456789abcdef")
        );
    }

    #[test]
    fn validate_rejects_zero_quota_timeout() {
        let mut config = ServiceConfig::default();
        config.quota.store_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_checks_rate_limit_section() {
        let mut config = ServiceConfig::default();
        config.rate_limit.default_window_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_roundtrip() {
        let config = ServiceConfig::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: ServiceConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(deserialized.port, config.port);
        assert_eq!(deserialized.host, config.host);
        assert_eq!(deserialized.rate_limit.routes, config.rate_limit.routes);
    }
}
