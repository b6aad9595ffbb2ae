use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::StoreError;
use crate::kind::ResourceKind;
use crate::store::{GuardedIncrement, LedgerStore, QuotaPeriod};

/// Run a blocking store call on the blocking pool, bounded by `limit`.
pub(crate) async fn run_blocking<T, F>(limit: Duration, f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(StoreError::Task(join.to_string())),
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

/// Async access to a [`LedgerStore`] with a bounded timeout on every call.
/// Increments carry the same bound down to the store as a deadline, so a
/// call that times out here never commits later.
#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn LedgerStore>,
    timeout: Duration,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn LedgerStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn get_or_create(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> Result<QuotaPeriod, StoreError> {
        let store = self.store.clone();
        let account_id = account_id.to_string();
        run_blocking(self.timeout, move || store.get_or_create_period(&account_id, now)).await
    }

    /// Reset the daily sub-window if `now` is on a later day, returning the
    /// period as it stands afterwards.
    pub async fn ensure_daily_rollover(
        &self,
        period: &QuotaPeriod,
        now: DateTime<Utc>,
    ) -> Result<QuotaPeriod, StoreError> {
        if !period.needs_daily_reset(now) {
            return Ok(period.clone());
        }
        let store = self.store.clone();
        let period_id = period.id;
        run_blocking(self.timeout, move || {
            store.ensure_daily_rollover(period_id, now)?;
            store.load_period(period_id)
        })
        .await
    }

    pub async fn increment(
        &self,
        period: &QuotaPeriod,
        kind: ResourceKind,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let store = self.store.clone();
        let period_id = period.id;
        let deadline = Instant::now() + self.timeout;
        run_blocking(self.timeout, move || {
            store.increment(period_id, kind, now, deadline)
        })
        .await
    }

    pub async fn increment_if_below(
        &self,
        period: &QuotaPeriod,
        kind: ResourceKind,
        limit: u64,
        now: DateTime<Utc>,
    ) -> Result<GuardedIncrement, StoreError> {
        let store = self.store.clone();
        let period_id = period.id;
        let deadline = Instant::now() + self.timeout;
        run_blocking(self.timeout, move || {
            store.increment_if_below(period_id, kind, limit, now, deadline)
        })
        .await
    }

    pub async fn current_value(
        &self,
        period: &QuotaPeriod,
        kind: ResourceKind,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let store = self.store.clone();
        let period_id = period.id;
        run_blocking(self.timeout, move || store.current_value(period_id, kind, now)).await
    }

    pub async fn history(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<QuotaPeriod>, StoreError> {
        let store = self.store.clone();
        let account_id = account_id.to_string();
        run_blocking(self.timeout, move || store.history(&account_id, limit)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::QuotaStore;
    use chrono::{TimeDelta, TimeZone};

    fn ledger() -> QuotaLedger {
        QuotaLedger::new(
            Arc::new(QuotaStore::in_memory().unwrap()),
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn rollover_skips_store_when_same_day() {
        let ledger = ledger();
        let now = Utc.with_ymd_and_hms(2026, 9, 3, 10, 0, 0).unwrap();
        let period = ledger.get_or_create("acct", now).await.unwrap();
        ledger.increment(&period, ResourceKind::Export, now).await.unwrap();
        let stale = period.clone();

        let same_day = ledger
            .ensure_daily_rollover(&stale, now + TimeDelta::hours(1))
            .await
            .unwrap();
        assert_eq!(same_day, stale);

        let next_day = now + TimeDelta::days(1);
        let rolled = ledger.ensure_daily_rollover(&stale, next_day).await.unwrap();
        assert_eq!(rolled.daily_exports, 0);
        assert_eq!(rolled.daily_reset_at, next_day);
        assert_eq!(rolled.counter("exports"), 1);
    }

    #[tokio::test]
    async fn timeout_surfaces_as_store_error() {
        let result: Result<(), StoreError> = run_blocking(Duration::from_millis(10), || {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn panicking_task_surfaces_as_store_error() {
        let result: Result<(), StoreError> =
            run_blocking(Duration::from_secs(1), || panic!("boom")).await;
        assert!(matches!(result, Err(StoreError::Task(_))));
    }

    #[tokio::test]
    async fn history_lists_newest_first() {
        let ledger = ledger();
        let march = Utc.with_ymd_and_hms(2026, 3, 3, 10, 0, 0).unwrap();
        let april = Utc.with_ymd_and_hms(2026, 4, 3, 10, 0, 0).unwrap();
        ledger.get_or_create("acct", march).await.unwrap();
        ledger.get_or_create("acct", april).await.unwrap();
        let history = ledger.history("acct", 12).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].period_start > history[1].period_start);
    }
}
