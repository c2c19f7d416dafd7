//! CalendarApi trait definition.
//!
//! [`CalendarApi`] is the seam between the gateway and a concrete calendar
//! backend. Every call takes the access token to use explicitly: the retry
//! executor decides which token that is, the backend never caches one.

use std::future::Future;
use std::pin::Pin;

use calsync_core::TimeWindow;

use crate::error::ProviderResult;
use crate::raw_event::{RawEvent, RawEventWrite};

/// A boxed future for async trait methods.
///
/// Boxed futures keep the traits object-safe, so the server can hold
/// `Arc<dyn CalendarApi>` and `Arc<dyn CredentialStore>`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One page of an event listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPage {
    pub events: Vec<RawEvent>,
    /// Token for the next page, `None` on the last page.
    pub next_page_token: Option<String>,
}

impl EventPage {
    pub fn last(events: Vec<RawEvent>) -> Self {
        Self {
            events,
            next_page_token: None,
        }
    }

    pub fn with_next_page_token(mut self, token: impl Into<String>) -> Self {
        self.next_page_token = Some(token.into());
        self
    }
}

/// Low-level access to a remote calendar.
///
/// Implementations map provider responses onto [`ProviderErrorCode`]s and
/// return raw events; normalization happens in the gateway.
///
/// [`ProviderErrorCode`]: crate::error::ProviderErrorCode
pub trait CalendarApi: Send + Sync {
    /// Returns the name of this backend (e.g., "google").
    fn name(&self) -> &str;

    /// Fetches a single page of events overlapping `window`.
    fn list_page<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        window: TimeWindow,
        page_token: Option<&'a str>,
    ) -> BoxFuture<'a, ProviderResult<EventPage>>;

    fn get_event<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        event_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<RawEvent>>;

    /// Inserts an event. `body.id` is set by the caller.
    fn insert_event<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        body: &'a RawEventWrite,
    ) -> BoxFuture<'a, ProviderResult<RawEvent>>;

    /// Applies a partial update; fields absent from `body` are left untouched.
    fn patch_event<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        event_id: &'a str,
        body: &'a RawEventWrite,
    ) -> BoxFuture<'a, ProviderResult<RawEvent>>;

    fn delete_event<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        event_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>>;

    /// Resolves the id of the account's primary calendar.
    fn primary_calendar_id<'a>(&'a self, access_token: &'a str) -> BoxFuture<'a, ProviderResult<String>>;
}
