//! Google Calendar backend.
//!
//! - [`OAuthClient`] runs the web-server authorization-code flow and refreshes
//!   access tokens; it is the production [`TokenEndpoint`](crate::TokenEndpoint)
//! - [`GoogleCalendarClient`] implements [`CalendarApi`](crate::CalendarApi)
//!   against Calendar API v3
//!
//! Both share a [`GoogleConfig`], whose endpoints can be redirected for tests.

mod client;
mod config;
mod oauth;

pub use client::{CalendarListEntry, GoogleCalendarClient};
pub use config::{
    CALENDAR_API_BASE, DEFAULT_SCOPES, GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL, GoogleConfig,
    OAuthCredentials,
};
pub use oauth::{AuthorizationGrant, OAuthClient};
