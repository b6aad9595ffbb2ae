//! Static catalog of subscription plans and their numeric limits.

use serde::Serialize;
use std::collections::BTreeMap;

pub const QR_MONTH: &str = "qr_month";
pub const EXPORTS_DAY: &str = "exports_day";
pub const TEMPLATES_APPLY: &str = "templates_apply";

/// Plan every unknown or missing plan id resolves to.
pub const DEFAULT_PLAN: &str = "free";

/// Open-ended limit key to value mapping. A key missing from a plan means
/// that resource kind is not limited for the plan.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct PlanLimits(BTreeMap<String, u64>);

impl PlanLimits {
    pub fn new<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, u64)>,
        K: Into<String>,
    {
        Self(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.0.get(key).copied()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    /// Informational; billing is handled elsewhere.
    pub price_cents: u32,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    pub quota: PlanLimits,
    pub features: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
}

impl PlanCatalog {
    /// The shipped plan tiers. The first entry is the fallback tier.
    pub fn builtin() -> Self {
        Self {
            plans: vec![
                Plan {
                    id: DEFAULT_PLAN.to_string(),
                    name: "Free".to_string(),
                    price_cents: 0,
                    currency: "usd".to_string(),
                    interval: None,
                    quota: PlanLimits::new([(QR_MONTH, 50), (EXPORTS_DAY, 10), (TEMPLATES_APPLY, 5)]),
                    features: features(&[
                        "50 QR codes per month",
                        "10 exports per day",
                        "Basic templates",
                    ]),
                },
                Plan {
                    id: "pro".to_string(),
                    name: "Pro".to_string(),
                    price_cents: 990,
                    currency: "usd".to_string(),
                    interval: Some("month".to_string()),
                    quota: PlanLimits::new([
                        (QR_MONTH, 1000),
                        (EXPORTS_DAY, 100),
                        (TEMPLATES_APPLY, 100),
                    ]),
                    features: features(&[
                        "1,000 QR codes per month",
                        "100 exports per day",
                        "All templates",
                        "Priority support",
                    ]),
                },
                Plan {
                    id: "team".to_string(),
                    name: "Team".to_string(),
                    price_cents: 2990,
                    currency: "usd".to_string(),
                    interval: Some("month".to_string()),
                    quota: PlanLimits::new([
                        (QR_MONTH, 10_000),
                        (EXPORTS_DAY, 1000),
                        (TEMPLATES_APPLY, 1000),
                    ]),
                    features: features(&[
                        "10,000 QR codes per month",
                        "1,000 exports per day",
                        "All templates",
                        "Team collaboration",
                        "Priority support",
                    ]),
                },
            ],
        }
    }

    /// Build a catalog from explicit plans. The first plan is the fallback.
    pub fn from_plans(plans: Vec<Plan>) -> Option<Self> {
        if plans.is_empty() {
            None
        } else {
            Some(Self { plans })
        }
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    pub fn get(&self, plan_id: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.id == plan_id)
    }

    pub fn is_known(&self, plan_id: &str) -> bool {
        self.get(plan_id).is_some()
    }

    pub fn fallback(&self) -> &Plan {
        &self.plans[0]
    }

    /// Limits for `plan_id`, falling back to the first tier for unknown or
    /// missing ids.
    pub fn limits_for(&self, plan_id: Option<&str>) -> &PlanLimits {
        plan_id
            .and_then(|id| self.get(id))
            .map(|plan| &plan.quota)
            .unwrap_or(&self.fallback().quota)
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn features(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_plan_falls_back_to_free() {
        let catalog = PlanCatalog::builtin();
        assert_eq!(
            catalog.limits_for(Some("nonexistent-plan")),
            catalog.limits_for(Some("free"))
        );
        assert_eq!(catalog.limits_for(None), catalog.limits_for(Some("free")));
    }

    #[test]
    fn builtin_tiers_have_expected_limits() {
        let catalog = PlanCatalog::builtin();
        let free = catalog.limits_for(Some("free"));
        assert_eq!(free.get(QR_MONTH), Some(50));
        assert_eq!(free.get(EXPORTS_DAY), Some(10));
        assert_eq!(free.get(TEMPLATES_APPLY), Some(5));

        let pro = catalog.limits_for(Some("pro"));
        assert_eq!(pro.get(QR_MONTH), Some(1000));
        assert_eq!(pro.get(EXPORTS_DAY), Some(100));

        let team = catalog.limits_for(Some("team"));
        assert_eq!(team.get(QR_MONTH), Some(10_000));
        assert_eq!(team.get(TEMPLATES_APPLY), Some(1000));
    }

    #[test]
    fn every_builtin_plan_defines_every_kind() {
        let catalog = PlanCatalog::builtin();
        for plan in catalog.plans() {
            for kind in crate::ResourceKind::ALL {
                assert!(
                    plan.quota.get(kind.limit_key()).is_some(),
                    "plan {} is missing {}",
                    plan.id,
                    kind.limit_key()
                );
            }
        }
    }

    #[test]
    fn absent_key_reports_no_limit() {
        let limits = PlanLimits::new([(QR_MONTH, 3)]);
        assert_eq!(limits.get(EXPORTS_DAY), None);
    }

    #[test]
    fn from_plans_rejects_empty_catalog() {
        assert!(PlanCatalog::from_plans(Vec::new()).is_none());
    }

    #[test]
    fn plan_serializes_limits_as_map() {
        let catalog = PlanCatalog::builtin();
        let json = serde_json::to_value(catalog.get("pro").unwrap()).unwrap();
        assert_eq!(json["quota"]["qr_month"], 1000);
        assert_eq!(json["interval"], "month");
        let free = serde_json::to_value(catalog.fallback()).unwrap();
        assert!(free.get("interval").is_none());
    }
}
