use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::plans::{EXPORTS_DAY, QR_MONTH, TEMPLATES_APPLY};

/// A billable action category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    QrGeneration,
    Export,
    TemplateApplication,
}

/// Window a kind's enforced counter accumulates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Monthly,
    Daily,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::QrGeneration,
        ResourceKind::Export,
        ResourceKind::TemplateApplication,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::QrGeneration => "qr_generation",
            ResourceKind::Export => "export",
            ResourceKind::TemplateApplication => "template_application",
        }
    }

    /// Key of this kind's entry in a plan's limits.
    pub fn limit_key(&self) -> &'static str {
        match self {
            ResourceKind::QrGeneration => QR_MONTH,
            ResourceKind::Export => EXPORTS_DAY,
            ResourceKind::TemplateApplication => TEMPLATES_APPLY,
        }
    }

    /// Name of the monthly ledger counter. For exports this is the
    /// cumulative total; the enforced value is the daily counter.
    pub fn counter(&self) -> &'static str {
        match self {
            ResourceKind::QrGeneration => "qr_generated",
            ResourceKind::Export => "exports",
            ResourceKind::TemplateApplication => "templates_applied",
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            ResourceKind::Export => Scope::Daily,
            ResourceKind::QrGeneration | ResourceKind::TemplateApplication => Scope::Monthly,
        }
    }

    pub fn is_daily(&self) -> bool {
        self.scope() == Scope::Daily
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown resource kind: {0}")]
pub struct UnknownResourceKind(pub String);

impl FromStr for ResourceKind {
    type Err = UnknownResourceKind;

    /// Accepts the kind name, its limit key or its counter name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| s == kind.as_str() || s == kind.limit_key() || s == kind.counter())
            .ok_or_else(|| UnknownResourceKind(s.to_string()))
    }
}
