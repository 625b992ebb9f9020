//! Leaderboard periods and their time windows.
//!
//! Each period maps to a half-open UTC interval `[start, end)` and to the
//! cache time-to-live used for results computed over it. Shorter periods
//! churn faster and get shorter TTLs; `all_time` has no interval and is
//! cached longest.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StatsError;

/// A symbolic leaderboard period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Today,
    Month,
    Year,
    AllTime,
}

/// A half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// The resolved form of a period at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodWindow {
    /// `None` means no time restriction.
    pub interval: Option<Interval>,
    pub ttl: Duration,
}

impl Period {
    /// Every period, shortest first.
    pub const ALL: [Period; 4] = [Period::Today, Period::Month, Period::Year, Period::AllTime];

    /// The symbol used in cache keys and query strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Today => "today",
            Period::Month => "month",
            Period::Year => "year",
            Period::AllTime => "all_time",
        }
    }

    /// Cache time-to-live for results over this period.
    pub fn ttl(&self) -> Duration {
        match self {
            Period::Today => Duration::from_secs(60),
            Period::Month => Duration::from_secs(5 * 60),
            Period::Year => Duration::from_secs(15 * 60),
            Period::AllTime => Duration::from_secs(30 * 60),
        }
    }

    /// The calendar interval containing `now`, or `None` for `all_time`.
    pub fn interval(&self, now: DateTime<Utc>) -> Option<Interval> {
        let today = now.date_naive();

        let (start, end) = match self {
            Period::Today => (today, today.checked_add_days(Days::new(1))),
            Period::Month => {
                let first = today.with_day(1)?;
                (first, first.checked_add_months(Months::new(1)))
            }
            Period::Year => {
                let first = today.with_ordinal(1)?;
                (first, NaiveDate::from_ymd_opt(today.year() + 1, 1, 1))
            }
            Period::AllTime => return None,
        };

        Some(Interval {
            start: midnight(start),
            end: end.map_or(DateTime::<Utc>::MAX_UTC, midnight),
        })
    }

    /// Resolve this period into its interval and TTL at `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> PeriodWindow {
        PeriodWindow {
            interval: self.interval(now),
            ttl: self.ttl(),
        }
    }
}

/// Resolve a period symbol at `now`.
///
/// Unknown symbols fail with [`StatsError::UnknownPeriod`]; there is no
/// default period.
pub fn resolve(period: &str, now: DateTime<Utc>) -> Result<PeriodWindow, StatsError> {
    Ok(period.parse::<Period>()?.resolve(now))
}

impl FromStr for Period {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "today" => Ok(Period::Today),
            "month" => Ok(Period::Month),
            "year" => Ok(Period::Year),
            "all_time" => Ok(Period::AllTime),
            other => Err(StatsError::UnknownPeriod(other.to_string())),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
