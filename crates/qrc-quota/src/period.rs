//! Calendar-month billing periods and daily sub-windows, all in UTC.

use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveTime, TimeDelta, Utc};
use serde::Serialize;

/// Inclusive `[start, end]` bounds of one calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BillingPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BillingPeriod {
    /// The month containing `now`. `end` is the first instant of the next
    /// month minus one second, so month length never needs counting.
    pub fn containing(now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        // Day 1 exists in every month.
        let first = today.with_day(1).unwrap_or(today);
        // Only overflows at the end of chrono's representable range.
        let next_first = first
            .checked_add_months(Months::new(1))
            .unwrap_or(NaiveDate::MAX);

        let start = first.and_time(NaiveTime::MIN).and_utc();
        let end = next_first.and_time(NaiveTime::MIN).and_utc() - TimeDelta::seconds(1);
        Self { start, end }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }

    /// The period that follows this one.
    pub fn next(&self) -> Self {
        Self::containing(self.end + TimeDelta::seconds(1))
    }
}

/// Key used to detect daily rollover: the UTC calendar date.
pub fn day_key(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive()
}

/// Start of the UTC day after `now`; when the daily counters next reset.
pub fn next_day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    today
        .succ_opt()
        .unwrap_or(today)
        .and_time(NaiveTime::MIN)
        .and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn mid_month_bounds() {
        let p = BillingPeriod::containing(at(2026, 4, 17, 9, 30, 0));
        assert_eq!(p.start, at(2026, 4, 1, 0, 0, 0));
        assert_eq!(p.end, at(2026, 4, 30, 23, 59, 59));
    }

    #[test]
    fn december_rolls_into_next_january() {
        let p = BillingPeriod::containing(at(2025, 12, 31, 23, 59, 59));
        assert_eq!(p.start, at(2025, 12, 1, 0, 0, 0));
        assert_eq!(p.end, at(2025, 12, 31, 23, 59, 59));
        assert_eq!(p.next().start, at(2026, 1, 1, 0, 0, 0));
    }

    #[test]
    fn february_in_leap_and_common_years() {
        let leap = BillingPeriod::containing(at(2028, 2, 10, 0, 0, 0));
        assert_eq!(leap.end, at(2028, 2, 29, 23, 59, 59));
        let common = BillingPeriod::containing(at(2027, 2, 10, 0, 0, 0));
        assert_eq!(common.end, at(2027, 2, 28, 23, 59, 59));
    }

    #[test]
    fn bounds_are_inclusive() {
        let p = BillingPeriod::containing(at(2026, 7, 15, 0, 0, 0));
        assert!(p.contains(at(2026, 7, 1, 0, 0, 0)));
        assert!(p.contains(at(2026, 7, 31, 23, 59, 59)));
        assert!(!p.contains(at(2026, 8, 1, 0, 0, 0)));
        assert!(!p.contains(at(2026, 6, 30, 23, 59, 59)));
    }

    #[test]
    fn first_instant_of_month_starts_new_period() {
        let p = BillingPeriod::containing(at(2026, 8, 1, 0, 0, 0));
        assert_eq!(p.start, at(2026, 8, 1, 0, 0, 0));
    }

    #[test]
    fn day_key_changes_at_utc_midnight() {
        assert_eq!(
            day_key(at(2026, 3, 5, 23, 59, 59)),
            NaiveDate::from_ymd_opt(2026, 3, 5).unwrap()
        );
        assert_ne!(day_key(at(2026, 3, 5, 23, 59, 59)), day_key(at(2026, 3, 6, 0, 0, 0)));
    }

    #[test]
    fn next_day_start_is_following_midnight() {
        assert_eq!(
            next_day_start(at(2026, 12, 31, 8, 0, 0)),
            at(2027, 1, 1, 0, 0, 0)
        );
    }
}
