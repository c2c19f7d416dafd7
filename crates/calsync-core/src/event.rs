//! Event types for calendar events.
//!
//! - [`CalendarEvent`]: the normalized, provider-agnostic event shown to users
//! - [`EventDraft`]: the input for creating an event
//! - [`EventPatch`]: a partial update; absent fields are left untouched

use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::time::EventTime;

/// A normalized calendar event, tagged with the account it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// Provider-assigned identifier, unique within a calendar.
    pub external_id: String,
    /// The connected calendar account that owns this event.
    pub account_id: AccountId,
    pub title: String,
    /// Event description; empty when the provider has none.
    pub description: String,
    pub location: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    /// IANA time zone the event was created in, if the provider reports one.
    pub time_zone: Option<String>,
    /// Link to the event in the provider's web UI.
    pub html_link: Option<String>,
    /// Guest email addresses.
    #[serde(default)]
    pub attendees: Vec<String>,
}

impl CalendarEvent {
    /// Creates a new event with the required fields.
    pub fn new(
        external_id: impl Into<String>,
        account_id: AccountId,
        title: impl Into<String>,
        start: EventTime,
        end: EventTime,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            account_id,
            title: title.into(),
            description: String::new(),
            location: None,
            start,
            end,
            time_zone: None,
            html_link: None,
            attendees: Vec::new(),
        }
    }

    /// Returns true if this is an all-day event.
    pub fn is_all_day(&self) -> bool {
        self.start.is_all_day()
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_time_zone(mut self, tz: impl Into<String>) -> Self {
        self.time_zone = Some(tz.into());
        self
    }

    pub fn with_html_link(mut self, link: impl Into<String>) -> Self {
        self.html_link = Some(link.into());
        self
    }

    pub fn with_attendees(mut self, attendees: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.attendees = attendees.into_iter().map(Into::into).collect();
        self
    }
}

/// Why a draft or patch was rejected before reaching a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftError {
    MissingTitle,
    EndBeforeStart,
    MixedTimeKinds,
    InvalidAttendee(String),
}

impl std::fmt::Display for DraftError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTitle => write!(f, "event title is required"),
            Self::EndBeforeStart => write!(f, "event end is before its start"),
            Self::MixedTimeKinds => {
                write!(f, "event start and end must both be all-day or both be timed")
            }
            Self::InvalidAttendee(email) => write!(f, "invalid attendee email {:?}", email),
        }
    }
}

impl std::error::Error for DraftError {}

/// Input for creating an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    /// IANA time zone for timed events; the server default applies when absent.
    #[serde(default)]
    pub time_zone: Option<String>,
    /// Guests to invite; they are notified by the provider.
    #[serde(default)]
    pub attendees: Vec<String>,
}

impl EventDraft {
    pub fn new(title: impl Into<String>, start: EventTime, end: EventTime) -> Self {
        Self {
            title: title.into(),
            description: None,
            location: None,
            start,
            end,
            time_zone: None,
            attendees: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_time_zone(mut self, tz: impl Into<String>) -> Self {
        self.time_zone = Some(tz.into());
        self
    }

    pub fn with_attendees(mut self, attendees: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.attendees = attendees.into_iter().map(Into::into).collect();
        self
    }

    /// Checks the draft invariants.
    pub fn validate(&self) -> Result<(), DraftError> {
        if self.title.trim().is_empty() {
            return Err(DraftError::MissingTitle);
        }
        validate_attendees(&self.attendees)?;
        validate_bounds(&self.start, &self.end)
    }
}

/// A partial update. Only fields that are `Some` are sent to the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub start: Option<EventTime>,
    #[serde(default)]
    pub end: Option<EventTime>,
    #[serde(default)]
    pub time_zone: Option<String>,
    /// Replaces the guest list when present.
    #[serde(default)]
    pub attendees: Option<Vec<String>>,
}

impl EventPatch {
    /// Returns true if the patch would change nothing.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.location.is_none()
            && self.start.is_none()
            && self.end.is_none()
            && self.time_zone.is_none()
            && self.attendees.is_none()
    }

    /// Checks what can be checked without the stored event.
    pub fn validate(&self) -> Result<(), DraftError> {
        if self.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(DraftError::MissingTitle);
        }
        if let Some(ref attendees) = self.attendees {
            validate_attendees(attendees)?;
        }
        match (&self.start, &self.end) {
            (Some(start), Some(end)) => validate_bounds(start, end),
            _ => Ok(()),
        }
    }
}

fn validate_attendees(attendees: &[String]) -> Result<(), DraftError> {
    match attendees.iter().find(|email| !looks_like_email(email)) {
        Some(bad) => Err(DraftError::InvalidAttendee(bad.clone())),
        None => Ok(()),
    }
}

fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !value.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn validate_bounds(start: &EventTime, end: &EventTime) -> Result<(), DraftError> {
    if !start.same_kind(end) {
        return Err(DraftError::MixedTimeKinds);
    }
    if start > end {
        return Err(DraftError::EndBeforeStart);
    }
    Ok(())
}
