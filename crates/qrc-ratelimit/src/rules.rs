use qrc_config::RateLimitSettings;

/// Requests allowed per fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRule {
    pub limit: u64,
    pub window_secs: u64,
}

#[derive(Debug, Clone)]
struct RouteRule {
    prefix: String,
    rule: RateRule,
}

/// The rule that applies to one request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRule<'a> {
    /// Counter bucket: the matched prefix, or the full path under the default.
    pub bucket: &'a str,
    pub rule: RateRule,
}

/// Route overrides matched by longest path prefix, with a default rule for
/// everything else.
#[derive(Debug, Clone)]
pub struct RuleSet {
    default: RateRule,
    routes: Vec<RouteRule>,
}

impl RuleSet {
    pub fn new<I, P>(default: RateRule, routes: I) -> Self
    where
        I: IntoIterator<Item = (P, RateRule)>,
        P: Into<String>,
    {
        let mut routes: Vec<RouteRule> = routes
            .into_iter()
            .map(|(prefix, rule)| RouteRule {
                prefix: prefix.into(),
                rule,
            })
            .collect();
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { default, routes }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::new(
            RateRule {
                limit: settings.default_limit,
                window_secs: settings.default_window_secs,
            },
            settings.routes.iter().map(|route| {
                (
                    route.prefix.clone(),
                    RateRule {
                        limit: route.limit,
                        window_secs: route.window_secs,
                    },
                )
            }),
        )
    }

    pub fn resolve<'a>(&'a self, path: &'a str) -> ResolvedRule<'a> {
        self.routes
            .iter()
            .find(|route| path.starts_with(&route.prefix))
            .map(|route| ResolvedRule {
                bucket: &route.prefix,
                rule: route.rule,
            })
            .unwrap_or(ResolvedRule {
                bucket: path,
                rule: self.default,
            })
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::from_settings(&RateLimitSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(limit: u64) -> RateRule {
        RateRule {
            limit,
            window_secs: 60,
        }
    }

    #[test]
    fn defaults_cover_shipped_routes() {
        let rules = RuleSet::default();
        assert_eq!(rules.resolve("/r/abc123").rule.limit, 200);
        assert_eq!(rules.resolve("/analytics/summary").rule.limit, 60);
        assert_eq!(rules.resolve("/library/items").rule.limit, 120);
        assert_eq!(rules.resolve("/billing/checkout").rule.limit, 10);
        assert_eq!(rules.resolve("/health").rule.limit, 1000);
        assert_eq!(rules.resolve("/api/v1/quota/usage").rule, rule(100));
    }

    #[test]
    fn longest_prefix_wins() {
        let rules = RuleSet::new(rule(100), [("/api/", rule(50)), ("/api/v1/export", rule(5))]);
        let resolved = rules.resolve("/api/v1/export/pdf");
        assert_eq!(resolved.bucket, "/api/v1/export");
        assert_eq!(resolved.rule.limit, 5);
        assert_eq!(rules.resolve("/api/v1/plans").bucket, "/api/");
    }

    #[test]
    fn unmatched_paths_bucket_by_full_path() {
        let rules = RuleSet::new(rule(100), [("/r/", rule(200))]);
        let resolved = rules.resolve("/pricing");
        assert_eq!(resolved.bucket, "/pricing");
        assert_eq!(resolved.rule, rule(100));
    }
}
