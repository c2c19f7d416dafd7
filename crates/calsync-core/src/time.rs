//! Time types for calendar events.
//!
//! This module provides [`EventTime`] for representing event start/end times
//! (which may be either a specific instant or an all-day date), [`TimeWindow`]
//! for listing ranges, and [`RangePolicy`] which turns a caller-supplied range
//! into a bounded window before anything reaches a provider.

use chrono::{DateTime, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

/// Errors produced while interpreting caller-supplied time ranges.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    /// A bound could not be parsed as RFC 3339 or `YYYY-MM-DD`.
    #[error("unparsable time bound: {0:?}")]
    Unparsable(String),

    /// The window is empty or inverted after clamping.
    #[error("invalid range: {start} is after {end}")]
    Inverted {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Represents the start or end of a calendar event.
///
/// - **DateTime**: A specific point in time, stored as UTC
/// - **AllDay**: A date without a time of day; never shifted into a zone
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EventTime {
    /// A specific datetime, stored in UTC.
    DateTime(DateTime<Utc>),
    /// An all-day event date (no specific time).
    AllDay(NaiveDate),
}

impl EventTime {
    /// Creates a new `EventTime::DateTime` from a UTC datetime.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self::DateTime(dt)
    }

    /// Creates a new `EventTime::DateTime` from a datetime in any timezone.
    pub fn from_local<Tz: TimeZone>(dt: DateTime<Tz>) -> Self {
        Self::DateTime(dt.with_timezone(&Utc))
    }

    /// Creates a new `EventTime::AllDay` from a date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self::AllDay(date)
    }

    /// Returns `true` if this is an all-day event time.
    pub fn is_all_day(&self) -> bool {
        matches!(self, Self::AllDay(_))
    }

    /// Returns the datetime if this is a `DateTime` variant.
    pub fn as_datetime(&self) -> Option<&DateTime<Utc>> {
        match self {
            Self::DateTime(dt) => Some(dt),
            Self::AllDay(_) => None,
        }
    }

    /// Returns the date if this is an `AllDay` variant.
    pub fn as_date(&self) -> Option<&NaiveDate> {
        match self {
            Self::AllDay(d) => Some(d),
            Self::DateTime(_) => None,
        }
    }

    /// Converts to a UTC datetime for ordering purposes.
    ///
    /// All-day values compare as midnight UTC on that date.
    pub fn to_utc_datetime(&self) -> DateTime<Utc> {
        match self {
            Self::DateTime(dt) => *dt,
            Self::AllDay(date) => date.and_time(NaiveTime::MIN).and_utc(),
        }
    }

    /// Returns true if both values are of the same kind (both timed or both all-day).
    pub fn same_kind(&self, other: &EventTime) -> bool {
        self.is_all_day() == other.is_all_day()
    }
}

impl PartialOrd for EventTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_utc_datetime()
            .cmp(&other.to_utc_datetime())
            .then_with(|| self.is_all_day().cmp(&other.is_all_day()).reverse())
    }
}

/// A time window for listing calendar events.
///
/// Represents the interval `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start of the window (inclusive).
    pub start: DateTime<Utc>,
    /// End of the window (exclusive).
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a new time window.
    ///
    /// # Panics
    ///
    /// Panics if `start` is after `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        assert!(start <= end, "TimeWindow start must be <= end");
        Self { start, end }
    }

    /// Creates a time window, or reports an inverted range.
    pub fn try_new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, TimeError> {
        if start > end {
            return Err(TimeError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// Returns the duration of this time window.
    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }

    /// Checks if a datetime falls within this window.
    pub fn contains(&self, dt: DateTime<Utc>) -> bool {
        self.start <= dt && dt < self.end
    }
}

/// A listing range as supplied by a caller; either bound may be omitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestedRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl RequestedRange {
    /// A range with both bounds left to the policy defaults.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// A range with explicit bounds.
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Parses optional query-string bounds.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, TimeError> {
        Ok(Self {
            start: start.map(parse_time_bound).transpose()?,
            end: end.map(parse_time_bound).transpose()?,
        })
    }
}

/// Defaults and absolute limits applied to listing ranges.
///
/// With no bounds the window is `default_past`/`default_future` months around
/// "now". With one bound the other is derived from it: `start +
/// default_future` or `end - default_past`. Every bound is then clamped to
/// `max_past`/`max_future` months around "now". Caller bounds inside the
/// clamp are honoured as given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePolicy {
    pub default_past: Months,
    pub default_future: Months,
    pub max_past: Months,
    pub max_future: Months,
}

impl Default for RangePolicy {
    fn default() -> Self {
        Self {
            default_past: Months::new(12),
            default_future: Months::new(12),
            max_past: Months::new(24),
            max_future: Months::new(24),
        }
    }
}

impl RangePolicy {
    /// Resolves a requested range into the window that will be queried.
    pub fn resolve(
        &self,
        requested: RequestedRange,
        now: DateTime<Utc>,
    ) -> Result<TimeWindow, TimeError> {
        let floor = months_before(now, self.max_past);
        let ceiling = months_after(now, self.max_future);

        let (start, end) = match (requested.start, requested.end) {
            (Some(start), Some(end)) => (start, end),
            (Some(start), None) => (start, months_after(start, self.default_future)),
            (None, Some(end)) => (months_before(end, self.default_past), end),
            (None, None) => (
                months_before(now, self.default_past),
                months_after(now, self.default_future),
            ),
        };

        TimeWindow::try_new(start.clamp(floor, ceiling), end.clamp(floor, ceiling))
    }
}

/// Parses a query bound: RFC 3339 timestamp or `YYYY-MM-DD` (midnight UTC).
pub fn parse_time_bound(value: &str) -> Result<DateTime<Utc>, TimeError> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        .map_err(|_| TimeError::Unparsable(value.to_string()))
}

fn months_before(now: DateTime<Utc>, months: Months) -> DateTime<Utc> {
    now.checked_sub_months(months)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn months_after(now: DateTime<Utc>, months: Months) -> DateTime<Utc> {
    now.checked_add_months(months)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
