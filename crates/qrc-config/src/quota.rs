use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaSettings {
    /// Allow quota-gated actions when the ledger cannot be reached. Off by
    /// default: billing counters must not silently under-count.
    #[serde(default)]
    pub fail_open: bool,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Overrides `<config dir>/quota.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
}

fn default_store_timeout_ms() -> u64 {
    2000
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            fail_open: false,
            store_timeout_ms: default_store_timeout_ms(),
            database: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_fail_closed() {
        let quota = QuotaSettings::default();
        assert!(!quota.fail_open);
        assert_eq!(quota.store_timeout_ms, 2000);
        assert!(quota.database.is_none());
    }

    #[test]
    fn serde_missing_fields_uses_defaults() {
        let quota: QuotaSettings = toml::from_str("").unwrap();
        assert!(!quota.fail_open);
        assert_eq!(quota.store_timeout_ms, 2000);
    }

    #[test]
    fn serde_reads_database_override() {
        let quota: QuotaSettings =
            toml::from_str("fail_open = true\ndatabase = \"/var/lib/qrc/quota.db\"\n").unwrap();
        assert!(quota.fail_open);
        assert_eq!(quota.database, Some(PathBuf::from("/var/lib/qrc/quota.db")));
    }
}
