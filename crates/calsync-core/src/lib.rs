//! Core types: calendar accounts, normalized events, time windows, tracing.

pub mod account;
pub mod event;
pub mod time;
pub mod tracing;

pub use account::{
    AccountId, AccountSummary, CalendarAccount, Credential, EXPIRY_SKEW_SECS, MAX_TOKEN_LIFETIME_SECS,
    token_expiry,
};
pub use event::{CalendarEvent, DraftError, EventDraft, EventPatch};
pub use time::{EventTime, RangePolicy, RequestedRange, TimeError, TimeWindow, parse_time_bound};
pub use tracing::{LogFormat, TracingConfig, TracingError, init_tracing, parse_level};
