//! Allow/deny decisions for quota-gated actions.
//!
//! `check` followed by `record` is the two-step flow: the caller runs the
//! guarded action between the two and records it as soon as it has happened.
//! Under heavy concurrency this can admit slightly more than the limit.
//! `try_acquire` folds both steps into one guarded increment at the store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::accounts::AccountDirectory;
use crate::error::{QuotaError, StoreError};
use crate::kind::ResourceKind;
use crate::ledger::QuotaLedger;
use crate::period::{next_day_start, BillingPeriod};
use crate::plans::PlanCatalog;
use crate::store::{GuardedIncrement, QuotaPeriod};

/// What the gate does when the ledger cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailMode {
    /// Deny the action.
    #[default]
    Closed,
    /// Allow the action without counting it.
    Open,
}

impl FailMode {
    pub fn from_fail_open(fail_open: bool) -> Self {
        if fail_open {
            FailMode::Open
        } else {
            FailMode::Closed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    pub kind: ResourceKind,
    /// `None` when the plan does not limit this kind.
    pub limit: Option<u64>,
    pub current: u64,
    /// Allowed without consulting the ledger because the store failed and
    /// the gate is configured to fail open.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl QuotaUsage {
    pub fn remaining(&self) -> Option<u64> {
        self.limit.map(|limit| limit.saturating_sub(self.current))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaDenial {
    pub kind: ResourceKind,
    pub limit: u64,
    pub current: u64,
    /// When the counter for `kind` next resets: the following UTC midnight
    /// for daily kinds, the next billing period otherwise.
    pub resets_at: DateTime<Utc>,
}

impl QuotaDenial {
    pub const REASON: &'static str = "quota_exceeded";

    pub fn reason_code(&self) -> &'static str {
        Self::REASON
    }
}

fn resets_at(kind: ResourceKind, now: DateTime<Utc>) -> DateTime<Utc> {
    if kind.is_daily() {
        next_day_start(now)
    } else {
        BillingPeriod::containing(now).next().start
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    Allow(QuotaUsage),
    Deny(QuotaDenial),
    /// The ledger failed and the gate fails closed. Treated as a denial.
    Unavailable(ResourceKind),
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allow(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageLine {
    pub count: u64,
    pub limit: Option<u64>,
    pub percentage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    pub account_id: String,
    pub plan: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Keyed `qr_generated`, `exports_today`, `templates_applied`.
    pub usage: BTreeMap<String, UsageLine>,
    pub exports_total: u64,
}

fn report_key(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Export => "exports_today",
        other => other.counter(),
    }
}

fn usage_line(count: u64, limit: Option<u64>) -> UsageLine {
    let percentage = limit.map(|limit| {
        if limit == 0 {
            100.0
        } else {
            (count as f64 / limit as f64 * 100.0).min(100.0)
        }
    });
    UsageLine {
        count,
        limit,
        percentage,
    }
}

pub struct QuotaGate {
    catalog: Arc<PlanCatalog>,
    accounts: AccountDirectory,
    ledger: QuotaLedger,
    fail_mode: FailMode,
}

impl QuotaGate {
    pub fn new(
        catalog: Arc<PlanCatalog>,
        accounts: AccountDirectory,
        ledger: QuotaLedger,
        fail_mode: FailMode,
    ) -> Self {
        Self {
            catalog,
            accounts,
            ledger,
            fail_mode,
        }
    }

    /// Decide whether `account_id` may perform one more `kind` action. Does
    /// not consume quota.
    pub async fn check(
        &self,
        account_id: &str,
        kind: ResourceKind,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision, QuotaError> {
        let limit = match self.limit_for(account_id, kind).await {
            Ok(limit) => limit,
            Err(QuotaError::StoreUnavailable(err)) => {
                return Ok(self.on_store_failure(account_id, kind, &err))
            }
            Err(err) => return Err(err),
        };

        let current = match self.current_period(account_id, kind, now).await {
            Ok(period) => period.value(kind),
            Err(err) => return Ok(self.on_store_failure(account_id, kind, &err)),
        };

        Ok(self.decide(account_id, kind, limit, current, now))
    }

    /// Count one performed `kind` action. Call immediately after the guarded
    /// action happened, not at request teardown.
    pub async fn record(
        &self,
        account_id: &str,
        kind: ResourceKind,
        now: DateTime<Utc>,
    ) -> Result<u64, QuotaError> {
        self.accounts.plan_for(account_id).await?;
        let result = async {
            let period = self.ledger.get_or_create(account_id, now).await?;
            self.ledger.increment(&period, kind, now).await
        }
        .await;

        match result {
            Ok(value) => {
                tracing::info!(
                    account_id = account_id,
                    quota_type = kind.counter(),
                    new_count = value,
                    "quota_incremented"
                );
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(
                    account_id = account_id,
                    quota_type = kind.counter(),
                    error = %err,
                    "Failed to record quota usage"
                );
                Err(err.into())
            }
        }
    }

    /// Check and consume in one guarded increment at the store. On Allow,
    /// `current` is the value after this action was counted.
    pub async fn try_acquire(
        &self,
        account_id: &str,
        kind: ResourceKind,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision, QuotaError> {
        let limit = match self.limit_for(account_id, kind).await {
            Ok(limit) => limit,
            Err(QuotaError::StoreUnavailable(err)) => {
                return Ok(self.on_store_failure(account_id, kind, &err))
            }
            Err(err) => return Err(err),
        };

        let result = async {
            let period = self.ledger.get_or_create(account_id, now).await?;
            match limit {
                Some(limit) => {
                    self.ledger
                        .increment_if_below(&period, kind, limit, now)
                        .await
                }
                None => self
                    .ledger
                    .increment(&period, kind, now)
                    .await
                    .map(GuardedIncrement::Applied),
            }
        }
        .await;

        match result {
            Ok(GuardedIncrement::Applied(current)) => {
                tracing::info!(
                    account_id = account_id,
                    quota_type = kind.counter(),
                    new_count = current,
                    "quota_incremented"
                );
                Ok(QuotaDecision::Allow(QuotaUsage {
                    kind,
                    limit,
                    current,
                    degraded: false,
                }))
            }
            Ok(GuardedIncrement::AtLimit(current)) => {
                // `AtLimit` is only produced when a limit exists.
                let limit = limit.unwrap_or(current);
                Ok(self.deny(account_id, kind, limit, current, now))
            }
            Err(err) => Ok(self.on_store_failure(account_id, kind, &err)),
        }
    }

    /// Per-kind usage for the current period.
    pub async fn usage(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> Result<UsageReport, QuotaError> {
        let plan = self.accounts.plan_for(account_id).await?;
        let limits = self.catalog.limits_for(Some(&plan));

        let period = self.ledger.get_or_create(account_id, now).await?;
        let period = self.ledger.ensure_daily_rollover(&period, now).await?;

        let usage = ResourceKind::ALL
            .into_iter()
            .map(|kind| {
                (
                    report_key(kind).to_string(),
                    usage_line(period.value(kind), limits.get(kind.limit_key())),
                )
            })
            .collect();

        Ok(UsageReport {
            account_id: account_id.to_string(),
            plan,
            period_start: period.period_start,
            period_end: period.period_end,
            usage,
            exports_total: period.counter(ResourceKind::Export.counter()),
        })
    }

    /// Retained periods for an account, newest first.
    pub async fn history(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<QuotaPeriod>, QuotaError> {
        self.accounts.plan_for(account_id).await?;
        Ok(self.ledger.history(account_id, limit).await?)
    }

    async fn limit_for(
        &self,
        account_id: &str,
        kind: ResourceKind,
    ) -> Result<Option<u64>, QuotaError> {
        let plan = self.accounts.plan_for(account_id).await?;
        let limit = self.catalog.limits_for(Some(&plan)).get(kind.limit_key());
        if limit.is_none() {
            tracing::debug!(
                account_id = account_id,
                plan = %plan,
                quota_type = kind.limit_key(),
                "Plan does not limit this resource kind"
            );
        }
        Ok(limit)
    }

    async fn current_period(
        &self,
        account_id: &str,
        kind: ResourceKind,
        now: DateTime<Utc>,
    ) -> Result<QuotaPeriod, StoreError> {
        let period = self.ledger.get_or_create(account_id, now).await?;
        if kind.is_daily() {
            self.ledger.ensure_daily_rollover(&period, now).await
        } else {
            Ok(period)
        }
    }

    fn decide(
        &self,
        account_id: &str,
        kind: ResourceKind,
        limit: Option<u64>,
        current: u64,
        now: DateTime<Utc>,
    ) -> QuotaDecision {
        match limit {
            Some(limit) if current >= limit => self.deny(account_id, kind, limit, current, now),
            _ => QuotaDecision::Allow(QuotaUsage {
                kind,
                limit,
                current,
                degraded: false,
            }),
        }
    }

    fn deny(
        &self,
        account_id: &str,
        kind: ResourceKind,
        limit: u64,
        current: u64,
        now: DateTime<Utc>,
    ) -> QuotaDecision {
        tracing::warn!(
            account_id = account_id,
            quota_type = kind.limit_key(),
            limit = limit,
            current = current,
            "quota_exceeded"
        );
        QuotaDecision::Deny(QuotaDenial {
            kind,
            limit,
            current,
            resets_at: resets_at(kind, now),
        })
    }

    fn on_store_failure(
        &self,
        account_id: &str,
        kind: ResourceKind,
        err: &StoreError,
    ) -> QuotaDecision {
        match self.fail_mode {
            FailMode::Closed => {
                tracing::warn!(
                    account_id = account_id,
                    quota_type = kind.limit_key(),
                    error = %err,
                    "Quota store unavailable; denying (fail-closed)"
                );
                QuotaDecision::Unavailable(kind)
            }
            FailMode::Open => {
                tracing::warn!(
                    account_id = account_id,
                    quota_type = kind.limit_key(),
                    error = %err,
                    "Quota store unavailable; allowing without counting (fail-open)"
                );
                QuotaDecision::Allow(QuotaUsage {
                    kind,
                    limit: None,
                    current: 0,
                    degraded: true,
                })
            }
        }
    }
}
