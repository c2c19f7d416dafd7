//! RawEvent to CalendarEvent conversion.
//!
//! Normalization is where malformed provider data stops: an event without a
//! usable start or end, or whose end precedes its start, is rejected here and
//! never reaches a listing.

use calsync_core::{AccountId, CalendarEvent, EventTime};
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::raw_event::{RawEvent, RawEventTime};

/// Why a raw event could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("event has no id")]
    MissingId,
    #[error("event {0} has no {1} time")]
    MissingTime(String, &'static str),
    #[error("event {id} has unparsable {field} time {value:?}")]
    Unparsable {
        id: String,
        field: &'static str,
        value: String,
    },
    #[error("event {0} ends before it starts")]
    Inverted(String),
}

/// Converts a [`RawEvent`] into a [`CalendarEvent`] owned by `account_id`.
pub fn normalize_event(raw: &RawEvent, account_id: &AccountId) -> Result<CalendarEvent, NormalizeError> {
    if raw.id.is_empty() {
        return Err(NormalizeError::MissingId);
    }

    let start = convert_time(&raw.id, raw.start.as_ref(), "start")?;
    let end = convert_time(&raw.id, raw.end.as_ref(), "end")?;
    if start > end {
        return Err(NormalizeError::Inverted(raw.id.clone()));
    }

    let mut event = CalendarEvent::new(
        &raw.id,
        account_id.clone(),
        raw.summary.clone().unwrap_or_default(),
        start,
        end,
    )
    .with_description(raw.description.clone().unwrap_or_default());

    if let Some(ref location) = raw.location {
        event = event.with_location(location);
    }

    let tz = raw
        .start
        .as_ref()
        .and_then(|s| s.time_zone.as_ref())
        .or_else(|| raw.end.as_ref().and_then(|e| e.time_zone.as_ref()));
    if let Some(tz) = tz {
        event = event.with_time_zone(tz);
    }

    if let Some(ref link) = raw.html_link {
        event = event.with_html_link(link);
    }

    let attendees = raw
        .attendees
        .iter()
        .map(|a| a.email.as_str())
        .filter(|email| !email.is_empty());
    event = event.with_attendees(attendees);

    Ok(event)
}

fn convert_time(
    id: &str,
    raw: Option<&RawEventTime>,
    field: &'static str,
) -> Result<EventTime, NormalizeError> {
    let raw = raw.ok_or_else(|| NormalizeError::MissingTime(id.to_string(), field))?;

    if let Some(ref dt) = raw.date_time {
        return DateTime::parse_from_rfc3339(dt)
            .map(|parsed| EventTime::from_utc(parsed.with_timezone(&Utc)))
            .map_err(|_| NormalizeError::Unparsable {
                id: id.to_string(),
                field,
                value: dt.clone(),
            });
    }

    if let Some(ref date) = raw.date {
        return NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map(EventTime::from_date)
            .map_err(|_| NormalizeError::Unparsable {
                id: id.to_string(),
                field,
                value: date.clone(),
            });
    }

    Err(NormalizeError::MissingTime(id.to_string(), field))
}

/// Normalizes a batch for a listing.
///
/// Cancelled events are skipped silently; malformed events are dropped with
/// a warning.
pub fn normalize_events(raw_events: &[RawEvent], account_id: &AccountId) -> Vec<CalendarEvent> {
    let mut events = Vec::with_capacity(raw_events.len());
    for raw in raw_events {
        if raw.is_cancelled() {
            debug!(event_id = %raw.id, "skipping cancelled event");
            continue;
        }
        match normalize_event(raw, account_id) {
            Ok(event) => events.push(event),
            Err(e) => warn!(account_id = %account_id, "dropping event: {}", e),
        }
    }
    events
}
