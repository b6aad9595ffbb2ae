use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::error::QuotaError;
use crate::ledger::run_blocking;
use crate::plans::{PlanCatalog, DEFAULT_PLAN};
use crate::store::{Account, AccountStore};

/// Async view of the account/plan collaborator. Plans are validated against
/// the catalog on write; reads return whatever plan id is stored.
#[derive(Clone)]
pub struct AccountDirectory {
    store: Arc<dyn AccountStore>,
    catalog: Arc<PlanCatalog>,
    timeout: Duration,
}

impl AccountDirectory {
    pub fn new(store: Arc<dyn AccountStore>, catalog: Arc<PlanCatalog>, timeout: Duration) -> Self {
        Self {
            store,
            catalog,
            timeout,
        }
    }

    pub async fn find(&self, account_id: &str) -> Result<Option<Account>, QuotaError> {
        let store = self.store.clone();
        let account_id = account_id.to_string();
        Ok(run_blocking(self.timeout, move || store.find_account(&account_id)).await?)
    }

    pub async fn plan_for(&self, account_id: &str) -> Result<String, QuotaError> {
        self.find(account_id)
            .await?
            .map(|account| account.plan)
            .ok_or_else(|| QuotaError::AccountNotFound(account_id.to_string()))
    }

    /// Create the account on the free plan at first contact. Idempotent: an
    /// existing account keeps its current plan. Only [`Self::set_plan`]
    /// moves an account to another tier.
    pub async fn register(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Account, QuotaError> {
        let store = self.store.clone();
        let account_id = account_id.to_string();
        Ok(run_blocking(self.timeout, move || {
            store.register_account(&account_id, DEFAULT_PLAN, now)
        })
        .await?)
    }

    /// Apply a plan change pushed by the billing integration.
    pub async fn set_plan(
        &self,
        account_id: &str,
        plan: &str,
        now: DateTime<Utc>,
    ) -> Result<Account, QuotaError> {
        let plan = self.known_plan(plan)?;
        let store = self.store.clone();
        let id = account_id.to_string();
        run_blocking(self.timeout, move || store.set_plan(&id, &plan, now))
            .await?
            .ok_or_else(|| QuotaError::AccountNotFound(account_id.to_string()))
    }

    fn known_plan(&self, plan: &str) -> Result<String, QuotaError> {
        if self.catalog.is_known(plan) {
            Ok(plan.to_string())
        } else {
            Err(QuotaError::UnknownPlan(plan.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::QuotaStore;

    fn directory() -> AccountDirectory {
        AccountDirectory::new(
            Arc::new(QuotaStore::in_memory().unwrap()),
            Arc::new(PlanCatalog::builtin()),
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn register_defaults_to_free_plan() {
        let accounts = directory();
        let account = accounts.register("acct", Utc::now()).await.unwrap();
        assert_eq!(account.plan, "free");
        assert_eq!(accounts.plan_for("acct").await.unwrap(), "free");
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let accounts = directory();
        let err = accounts.plan_for("ghost").await.unwrap_err();
        assert!(matches!(err, QuotaError::AccountNotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn rejects_plans_missing_from_catalog() {
        let accounts = directory();
        accounts.register("acct", Utc::now()).await.unwrap();
        let err = accounts
            .set_plan("acct", "enterprise", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, QuotaError::UnknownPlan(_)));
        assert_eq!(accounts.plan_for("acct").await.unwrap(), "free");
    }

    #[tokio::test]
    async fn registering_again_keeps_the_paid_plan() {
        let accounts = directory();
        accounts.register("acct", Utc::now()).await.unwrap();
        accounts.set_plan("acct", "team", Utc::now()).await.unwrap();
        let again = accounts.register("acct", Utc::now()).await.unwrap();
        assert_eq!(again.plan, "team");
    }

    #[tokio::test]
    async fn set_plan_requires_existing_account() {
        let accounts = directory();
        let err = accounts.set_plan("ghost", "pro", Utc::now()).await.unwrap_err();
        assert!(matches!(err, QuotaError::AccountNotFound(_)));

        accounts.register("acct", Utc::now()).await.unwrap();
        let updated = accounts.set_plan("acct", "pro", Utc::now()).await.unwrap();
        assert_eq!(updated.plan, "pro");
    }
}
