//! Raw event types exchanged with calendar providers.
//!
//! [`RawEvent`] mirrors what a provider sends back before any validation:
//! times are still strings and any field may be missing. It is converted to
//! a [`CalendarEvent`](calsync_core::CalendarEvent) by [`crate::normalize`].
//!
//! [`RawEventWrite`] is the request body for inserts and patches. Fields left
//! as `None` are omitted from the serialized JSON, which is what gives
//! updates their PATCH semantics.

use calsync_core::{EventDraft, EventPatch, EventTime};
use serde::{Deserialize, Serialize};

/// Start or end of a raw event.
///
/// Timed values carry `dateTime` (RFC 3339) and optionally `timeZone`;
/// all-day values carry only `date` (`YYYY-MM-DD`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEventTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl RawEventTime {
    /// An all-day value.
    pub fn date(date: impl Into<String>) -> Self {
        Self {
            date: Some(date.into()),
            ..Default::default()
        }
    }

    /// A timed value.
    pub fn date_time(date_time: impl Into<String>) -> Self {
        Self {
            date_time: Some(date_time.into()),
            ..Default::default()
        }
    }

    pub fn with_time_zone(mut self, tz: impl Into<String>) -> Self {
        self.time_zone = Some(tz.into());
        self
    }

    /// Encodes an [`EventTime`] for the wire.
    ///
    /// All-day values never carry a time zone, so they cannot drift by a day
    /// when the provider interprets them.
    pub fn from_event_time(time: &EventTime, time_zone: Option<&str>) -> Self {
        match time {
            EventTime::AllDay(date) => Self::date(date.format("%Y-%m-%d").to_string()),
            EventTime::DateTime(dt) => Self {
                date: None,
                date_time: Some(dt.to_rfc3339()),
                time_zone: time_zone.map(String::from),
            },
        }
    }

    pub fn is_all_day(&self) -> bool {
        self.date_time.is_none() && self.date.is_some()
    }
}

/// A guest on an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAttendee {
    #[serde(default)]
    pub email: String,
    /// "needsAction", "accepted", "declined" or "tentative".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<String>,
}

impl RawAttendee {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            response_status: None,
        }
    }
}

fn attendees_from(emails: &[String]) -> Vec<RawAttendee> {
    emails.iter().map(RawAttendee::new).collect()
}

/// A calendar event as returned by a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    /// Provider identifier; empty when the provider omitted it.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub start: Option<RawEventTime>,
    #[serde(default)]
    pub end: Option<RawEventTime>,
    /// "confirmed", "tentative" or "cancelled".
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub html_link: Option<String>,
    #[serde(default)]
    pub attendees: Vec<RawAttendee>,
}

impl RawEvent {
    pub fn new(id: impl Into<String>, start: RawEventTime, end: RawEventTime) -> Self {
        Self {
            id: id.into(),
            start: Some(start),
            end: Some(end),
            ..Default::default()
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_html_link(mut self, link: impl Into<String>) -> Self {
        self.html_link = Some(link.into());
        self
    }

    pub fn with_attendees<S: Into<String>>(mut self, emails: impl IntoIterator<Item = S>) -> Self {
        self.attendees = emails.into_iter().map(RawAttendee::new).collect();
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.status.as_deref() == Some("cancelled")
    }
}

/// Body of an insert or patch request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEventWrite {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<RawEventTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<RawEventTime>,
    /// `Some(vec![])` clears the guest list on a patch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendees: Option<Vec<RawAttendee>>,
}

impl RawEventWrite {
    /// Builds an insert body. Timed bounds without a draft time zone get
    /// `default_time_zone`.
    pub fn from_draft(id: impl Into<String>, draft: &EventDraft, default_time_zone: &str) -> Self {
        let tz = draft.time_zone.as_deref().unwrap_or(default_time_zone);
        Self {
            id: Some(id.into()),
            summary: Some(draft.title.clone()),
            description: draft.description.clone(),
            location: draft.location.clone(),
            start: Some(RawEventTime::from_event_time(&draft.start, Some(tz))),
            end: Some(RawEventTime::from_event_time(&draft.end, Some(tz))),
            attendees: (!draft.attendees.is_empty()).then(|| attendees_from(&draft.attendees)),
        }
    }

    /// Builds a patch body containing only the fields set in `patch`.
    pub fn from_patch(patch: &EventPatch, default_time_zone: &str) -> Self {
        let tz = patch.time_zone.as_deref().unwrap_or(default_time_zone);
        Self {
            id: None,
            summary: patch.title.clone(),
            description: patch.description.clone(),
            location: patch.location.clone(),
            start: patch
                .start
                .as_ref()
                .map(|t| RawEventTime::from_event_time(t, Some(tz))),
            end: patch
                .end
                .as_ref()
                .map(|t| RawEventTime::from_event_time(t, Some(tz))),
            attendees: patch.attendees.as_deref().map(attendees_from),
        }
    }

    /// Whether the write touches guests, who should then be emailed.
    pub fn notifies_attendees(&self) -> bool {
        self.attendees.as_ref().is_some_and(|a| !a.is_empty())
    }
}
