//! Shared helpers used by the `qrcd` service binary.

use qrc_config::ServiceConfig;
use qrc_quota::PlanCatalog;
use std::fmt::Write as _;
use std::path::Path;

/// Build-time service version string.
///
/// When `QRCD_VERSION` is provided in the build environment (for example by
/// CI release workflows), that value is used. Otherwise we fall back to the
/// crate package version.
pub const DAEMON_VERSION: &str = match option_env!("QRCD_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};

/// `RUST_LOG` fallback.
pub const DEFAULT_LOG_FILTER: &str =
    "qrcd=info,qrc_api=info,qrc_quota=info,qrc_ratelimit=info,tower_http=info";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Load the service config from `path`, or from `~/.qrcloner/config.toml`
/// when no path is given. `port` overrides the configured port.
pub fn load_config(path: Option<&Path>, port: Option<u16>) -> anyhow::Result<ServiceConfig> {
    let mut config = match path {
        Some(path) => ServiceConfig::load_file(path)?,
        None => ServiceConfig::load()?,
    };
    if let Some(port) = port {
        config.port = port;
        config.validate()?;
    }
    Ok(config)
}

/// One-screen summary printed by `qrcd check-config`.
pub fn describe_config(config: &ServiceConfig) -> anyhow::Result<String> {
    let mut out = String::new();
    writeln!(out, "listen:          {}", config.bind_addr())?;
    writeln!(out, "identity header: {}", config.identity_header)?;
    writeln!(out, "upgrade url:     {}", config.upgrade_url)?;
    writeln!(
        out,
        "plan changes:    {}",
        if config.billing_token.is_some() {
            "billing token set"
        } else {
            "disabled (no billing token)"
        }
    )?;
    writeln!(out, "quota db:        {}", config.quota_db_path()?.display())?;
    writeln!(
        out,
        "quota failure:   {}",
        if config.quota.fail_open {
            "fail open"
        } else {
            "fail closed"
        }
    )?;
    if config.rate_limit.enabled {
        writeln!(
            out,
            "rate limit db:   {}",
            config.rate_limit_db_path()?.display()
        )?;
        writeln!(
            out,
            "rate limit:      {} req / {}s default",
            config.rate_limit.default_limit, config.rate_limit.default_window_secs
        )?;
        for route in &config.rate_limit.routes {
            writeln!(
                out,
                "  {:<20} {} req / {}s",
                route.prefix, route.limit, route.window_secs
            )?;
        }
    } else {
        writeln!(out, "rate limit:      disabled")?;
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

/// Plain-text plan table printed by `qrcd plans`.
pub fn format_plan_table(catalog: &PlanCatalog) -> String {
    let mut out = format!(
        "{:<8} {:>10} {:>10} {:>12} {:>16}\n",
        "PLAN", "PRICE", "QR/MONTH", "EXPORTS/DAY", "TEMPLATES/MONTH"
    );
    let cell = |value: Option<u64>| value.map_or_else(|| "-".to_string(), |v| v.to_string());
    for plan in catalog.plans() {
        let price = format!(
            "{}.{:02} {}",
            plan.price_cents / 100,
            plan.price_cents % 100,
            plan.currency.to_uppercase()
        );
        out.push_str(&format!(
            "{:<8} {:>10} {:>10} {:>12} {:>16}\n",
            plan.id,
            price,
            cell(plan.quota.get(qrc_quota::plans::QR_MONTH)),
            cell(plan.quota.get(qrc_quota::plans::EXPORTS_DAY)),
            cell(plan.quota.get(qrc_quota::plans::TEMPLATES_APPLY)),
        ));
    }
    out
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    }
    tracing::info!("Shutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    // -- Configuration -----------------------------------------------------

    #[test]
    fn load_config_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qrcd.toml");
        fs::write(&path, "port = 9100\n[quota]\nfail_open = true\n").unwrap();

        let config = load_config(Some(&path), None).unwrap();
        assert_eq!(config.port, 9100);
        assert!(config.quota.fail_open);
        assert_eq!(config.quota_db_path().unwrap(), dir.path().join("quota.db"));
    }

    #[test]
    fn port_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qrcd.toml");
        fs::write(&path, "port = 9100\n").unwrap();
        let config = load_config(Some(&path), Some(9200)).unwrap();
        assert_eq!(config.port, 9200);
    }

    #[test]
    fn port_override_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qrcd.toml");
        fs::write(&path, "").unwrap();
        assert!(load_config(Some(&path), Some(0)).is_err());
    }

    #[test]
    fn invalid_config_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qrcd.toml");
        fs::write(&path, "[rate_limit]\ndefault_window_secs = 0\n").unwrap();
        assert!(load_config(Some(&path), None).is_err());
    }

    #[test]
    fn describe_config_lists_routes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qrcd.toml");
        fs::write(&path, "").unwrap();
        let config = load_config(Some(&path), None).unwrap();
        let summary = describe_config(&config).unwrap();
        assert!(summary.contains("fail closed"));
        assert!(summary.contains("/billing/checkout"));
        assert!(summary.contains("ratelimit.db"));
    }

    #[test]
    fn describe_config_never_prints_billing_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qrcd.toml");
        fs::write(&path, "billing_token = \"whsec_0123456789abcdef\"\n").unwrap();
        let config = load_config(Some(&path), None).unwrap();
        let summary = describe_config(&config).unwrap();
        assert!(summary.contains("billing token set"));
        assert!(!summary.contains("whsec_0123456789abcdef"));
    }

    // -- Plans -------------------------------------------------------------

    #[test]
    fn plan_table_lists_every_plan() {
        let table = format_plan_table(&PlanCatalog::builtin());
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("free"));
        assert!(lines[2].contains("9.90 USD"));
        assert!(lines[3].contains("10000"));
    }

    #[test]
    fn daemon_version_is_not_empty() {
        assert!(!DAEMON_VERSION.is_empty());
    }
}
