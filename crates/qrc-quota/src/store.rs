use crate::error::StoreError;
use crate::kind::ResourceKind;
use crate::migrations;
use crate::period::{day_key, BillingPeriod};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

const SECONDS_PER_DAY: i64 = 86_400;

/// One ledger row: an account's counters for one calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaPeriod {
    pub id: i64,
    pub account_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Monthly counters keyed by counter name (`qr_generated`, `exports`, ...).
    pub counters: BTreeMap<String, u64>,
    pub daily_exports: u64,
    pub daily_reset_at: DateTime<Utc>,
}

impl QuotaPeriod {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// The value enforced for `kind` as stored, without rollover applied.
    pub fn value(&self, kind: ResourceKind) -> u64 {
        if kind.is_daily() {
            self.daily_exports
        } else {
            self.counter(kind.counter())
        }
    }

    pub fn needs_daily_reset(&self, now: DateTime<Utc>) -> bool {
        day_key(now) > day_key(self.daily_reset_at)
    }

    pub fn billing_period(&self) -> BillingPeriod {
        BillingPeriod {
            start: self.period_start,
            end: self.period_end,
        }
    }
}

/// Result of an increment guarded by a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardedIncrement {
    /// Counter was below the limit and now holds this value.
    Applied(u64),
    /// Counter was already at or above the limit; nothing changed.
    AtLimit(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: String,
    pub plan: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable per-account, per-period counters. Implementations must make every
/// mutation atomic at the store: concurrent callers, in this process or
/// another one sharing the store, never lose an update.
pub trait LedgerStore: Send + Sync {
    /// Fetch the row whose bounds contain `now`, creating it with zeroed
    /// counters if absent. Concurrent first calls yield the same row.
    fn get_or_create_period(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> Result<QuotaPeriod, StoreError>;

    fn load_period(&self, period_id: i64) -> Result<QuotaPeriod, StoreError>;

    /// Zero the daily counter if `now` falls on a later UTC day than the last
    /// reset. Returns whether a reset happened.
    fn ensure_daily_rollover(&self, period_id: i64, now: DateTime<Utc>)
        -> Result<bool, StoreError>;

    /// Add one to `kind`'s counter and return the new enforced value.
    /// Nothing is written once `deadline` has passed.
    fn increment(
        &self,
        period_id: i64,
        kind: ResourceKind,
        now: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<u64, StoreError>;

    /// Add one only while the enforced value is below `limit`. Nothing is
    /// written once `deadline` has passed.
    fn increment_if_below(
        &self,
        period_id: i64,
        kind: ResourceKind,
        limit: u64,
        now: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<GuardedIncrement, StoreError>;

    /// Enforced value for `kind` as of `now`; a stale daily counter reads 0.
    fn current_value(
        &self,
        period_id: i64,
        kind: ResourceKind,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Past and current periods for an account, newest first.
    fn history(&self, account_id: &str, limit: usize) -> Result<Vec<QuotaPeriod>, StoreError>;
}

/// Read side of the account/plan collaborator, plus the writes the billing
/// integration and first-contact registration need.
pub trait AccountStore: Send + Sync {
    fn find_account(&self, account_id: &str) -> Result<Option<Account>, StoreError>;

    /// Create the account if it does not exist. An existing account is
    /// returned unchanged.
    fn register_account(
        &self,
        account_id: &str,
        plan: &str,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError>;

    fn set_plan(
        &self,
        account_id: &str,
        plan: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>, StoreError>;
}

pub struct QuotaStore {
    conn: Mutex<Connection>,
}

impl QuotaStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn to_datetime(secs: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {secs}")))
}

fn to_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn to_limit(limit: u64) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn epoch_day(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(SECONDS_PER_DAY)
}

struct PeriodRow {
    id: i64,
    account_id: String,
    period_start: i64,
    period_end: i64,
    daily_exports: i64,
    daily_reset_at: i64,
}

const PERIOD_COLUMNS: &str =
    "id, account_id, period_start, period_end, daily_exports, daily_reset_at";

fn map_period_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PeriodRow> {
    Ok(PeriodRow {
        id: row.get(0)?,
        account_id: row.get(1)?,
        period_start: row.get(2)?,
        period_end: row.get(3)?,
        daily_exports: row.get(4)?,
        daily_reset_at: row.get(5)?,
    })
}

fn hydrate(conn: &Connection, row: PeriodRow) -> Result<QuotaPeriod, StoreError> {
    let mut stmt =
        conn.prepare_cached("SELECT counter, value FROM quota_counters WHERE period_id = ?1")?;
    let counters = stmt
        .query_map([row.id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
        .map(|entry| entry.map(|(name, value)| (name, to_count(value))))
        .collect::<Result<BTreeMap<_, _>, _>>()?;

    Ok(QuotaPeriod {
        id: row.id,
        account_id: row.account_id,
        period_start: to_datetime(row.period_start)?,
        period_end: to_datetime(row.period_end)?,
        counters,
        daily_exports: to_count(row.daily_exports),
        daily_reset_at: to_datetime(row.daily_reset_at)?,
    })
}

fn load_period_in(conn: &Connection, period_id: i64) -> Result<QuotaPeriod, StoreError> {
    let row = conn
        .query_row(
            &format!("SELECT {PERIOD_COLUMNS} FROM quota_periods WHERE id = ?1"),
            [period_id],
            map_period_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::Corrupt(format!("quota period {period_id} not found")))?;
    hydrate(conn, row)
}

fn rollover_in(conn: &Connection, period_id: i64, now: DateTime<Utc>) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE quota_periods SET daily_exports = 0, daily_reset_at = ?2
         WHERE id = ?1 AND daily_reset_at / 86400 < ?3",
        params![period_id, now.timestamp(), epoch_day(now)],
    )?;
    Ok(changed > 0)
}

fn bump_counter(conn: &Connection, period_id: i64, counter: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "INSERT INTO quota_counters (period_id, counter, value) VALUES (?1, ?2, 1)
         ON CONFLICT(period_id, counter) DO UPDATE SET value = value + 1
         RETURNING value",
        params![period_id, counter],
        |row| row.get(0),
    )
}

fn read_counter(conn: &Connection, period_id: i64, counter: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT value FROM quota_counters WHERE period_id = ?1 AND counter = ?2",
        params![period_id, counter],
        |row| row.get(0),
    )
    .optional()
    .map(|value| value.unwrap_or(0))
}

fn read_daily(conn: &Connection, period_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT daily_exports FROM quota_periods WHERE id = ?1",
        [period_id],
        |row| row.get(0),
    )
}

fn immediate(conn: &mut Connection) -> rusqlite::Result<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
}

/// Commit only while the caller is still waiting for the answer. A late
/// commit would count an action the caller has already reported as failed.
fn commit_before(tx: Transaction<'_>, deadline: Instant) -> Result<(), StoreError> {
    if Instant::now() >= deadline {
        tx.rollback()?;
        return Err(StoreError::DeadlineExceeded);
    }
    tx.commit()?;
    Ok(())
}

impl LedgerStore for QuotaStore {
    fn get_or_create_period(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> Result<QuotaPeriod, StoreError> {
        let period = BillingPeriod::containing(now);
        let conn = self.lock()?;

        let created = conn.execute(
            "INSERT INTO quota_periods (account_id, period_start, period_end, daily_exports, daily_reset_at, created_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?4)
             ON CONFLICT(account_id, period_start) DO NOTHING",
            params![
                account_id,
                period.start.timestamp(),
                period.end.timestamp(),
                now.timestamp(),
            ],
        )?;
        if created > 0 {
            tracing::info!(
                account_id = account_id,
                period_start = %period.start,
                period_end = %period.end,
                "Opened quota period"
            );
        }

        let row = conn.query_row(
            &format!(
                "SELECT {PERIOD_COLUMNS} FROM quota_periods
                 WHERE account_id = ?1 AND period_start <= ?2 AND period_end >= ?2
                 ORDER BY period_start DESC LIMIT 1"
            ),
            params![account_id, now.timestamp()],
            map_period_row,
        )?;
        hydrate(&conn, row)
    }

    fn load_period(&self, period_id: i64) -> Result<QuotaPeriod, StoreError> {
        let conn = self.lock()?;
        load_period_in(&conn, period_id)
    }

    fn ensure_daily_rollover(
        &self,
        period_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let reset = rollover_in(&conn, period_id, now)?;
        if reset {
            tracing::debug!(period_id = period_id, "Reset daily export counter");
        }
        Ok(reset)
    }

    fn increment(
        &self,
        period_id: i64,
        kind: ResourceKind,
        now: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<u64, StoreError> {
        let mut conn = self.lock()?;
        let tx = immediate(&mut conn)?;
        let value = if kind.is_daily() {
            rollover_in(&tx, period_id, now)?;
            let daily: i64 = tx.query_row(
                "UPDATE quota_periods SET daily_exports = daily_exports + 1 WHERE id = ?1
                 RETURNING daily_exports",
                [period_id],
                |row| row.get(0),
            )?;
            bump_counter(&tx, period_id, kind.counter())?;
            daily
        } else {
            bump_counter(&tx, period_id, kind.counter())?
        };
        commit_before(tx, deadline)?;
        Ok(to_count(value))
    }

    fn increment_if_below(
        &self,
        period_id: i64,
        kind: ResourceKind,
        limit: u64,
        now: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<GuardedIncrement, StoreError> {
        let mut conn = self.lock()?;
        let tx = immediate(&mut conn)?;

        let outcome = if kind.is_daily() {
            rollover_in(&tx, period_id, now)?;
            let applied: Option<i64> = tx
                .query_row(
                    "UPDATE quota_periods SET daily_exports = daily_exports + 1
                     WHERE id = ?1 AND daily_exports < ?2
                     RETURNING daily_exports",
                    params![period_id, to_limit(limit)],
                    |row| row.get(0),
                )
                .optional()?;
            match applied {
                Some(daily) => {
                    bump_counter(&tx, period_id, kind.counter())?;
                    GuardedIncrement::Applied(to_count(daily))
                }
                None => GuardedIncrement::AtLimit(to_count(read_daily(&tx, period_id)?)),
            }
        } else {
            tx.execute(
                "INSERT INTO quota_counters (period_id, counter, value) VALUES (?1, ?2, 0)
                 ON CONFLICT(period_id, counter) DO NOTHING",
                params![period_id, kind.counter()],
            )?;
            let applied: Option<i64> = tx
                .query_row(
                    "UPDATE quota_counters SET value = value + 1
                     WHERE period_id = ?1 AND counter = ?2 AND value < ?3
                     RETURNING value",
                    params![period_id, kind.counter(), to_limit(limit)],
                    |row| row.get(0),
                )
                .optional()?;
            match applied {
                Some(value) => GuardedIncrement::Applied(to_count(value)),
                None => GuardedIncrement::AtLimit(to_count(read_counter(
                    &tx,
                    period_id,
                    kind.counter(),
                )?)),
            }
        };

        commit_before(tx, deadline)?;
        Ok(outcome)
    }

    fn current_value(
        &self,
        period_id: i64,
        kind: ResourceKind,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let value = if kind.is_daily() {
            conn.query_row(
                "SELECT CASE WHEN daily_reset_at / 86400 < ?2 THEN 0 ELSE daily_exports END
                 FROM quota_periods WHERE id = ?1",
                params![period_id, epoch_day(now)],
                |row| row.get(0),
            )?
        } else {
            read_counter(&conn, period_id, kind.counter())?
        };
        Ok(to_count(value))
    }

    fn history(&self, account_id: &str, limit: usize) -> Result<Vec<QuotaPeriod>, StoreError> {
        let conn = self.lock()?;
        let rows = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PERIOD_COLUMNS} FROM quota_periods
                 WHERE account_id = ?1 ORDER BY period_start DESC LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(
                    params![account_id, i64::try_from(limit).unwrap_or(i64::MAX)],
                    map_period_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        rows.into_iter().map(|row| hydrate(&conn, row)).collect()
    }
}

fn map_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, i64, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn to_account((id, plan, created_at, updated_at): (String, String, i64, i64)) -> Result<Account, StoreError> {
    Ok(Account {
        id,
        plan,
        created_at: to_datetime(created_at)?,
        updated_at: to_datetime(updated_at)?,
    })
}

fn find_account_in(conn: &Connection, account_id: &str) -> Result<Option<Account>, StoreError> {
    conn.query_row(
        "SELECT id, plan, created_at, updated_at FROM accounts WHERE id = ?1",
        [account_id],
        map_account,
    )
    .optional()?
    .map(to_account)
    .transpose()
}

impl AccountStore for QuotaStore {
    fn find_account(&self, account_id: &str) -> Result<Option<Account>, StoreError> {
        let conn = self.lock()?;
        find_account_in(&conn, account_id)
    }

    fn register_account(
        &self,
        account_id: &str,
        plan: &str,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        let conn = self.lock()?;
        let created = conn.execute(
            "INSERT INTO accounts (id, plan, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(id) DO NOTHING",
            params![account_id, plan, now.timestamp()],
        )?;
        if created > 0 {
            tracing::info!(account_id = account_id, plan = plan, "Registered account");
        }
        find_account_in(&conn, account_id)?
            .ok_or_else(|| StoreError::Corrupt(format!("account {account_id} vanished")))
    }

    fn set_plan(
        &self,
        account_id: &str,
        plan: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE accounts SET plan = ?2, updated_at = ?3 WHERE id = ?1",
            params![account_id, plan, now.timestamp()],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        tracing::info!(account_id = account_id, plan = plan, "Account plan changed");
        find_account_in(&conn, account_id)
    }
}
