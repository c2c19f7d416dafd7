//! In-process fakes for the token endpoint and the calendar API.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use calsync_core::TimeWindow;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{BoxFuture, CalendarApi, EventPage};
use crate::raw_event::{RawEvent, RawEventWrite};
use crate::refresh::{TokenEndpoint, TokenGrant};

/// Token endpoint returning a canned grant, counting calls.
pub(crate) struct FakeEndpoint {
    calls: AtomicUsize,
    grant: Option<TokenGrant>,
}

impl FakeEndpoint {
    pub fn granting(access_token: &str, refresh_token: Option<&str>, expires_in: Option<i64>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            grant: Some(TokenGrant {
                access_token: access_token.into(),
                refresh_token: refresh_token.map(String::from),
                expires_in,
            }),
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            grant: None,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TokenEndpoint for FakeEndpoint {
    fn refresh<'a>(&'a self, _refresh_token: &'a str) -> BoxFuture<'a, ProviderResult<TokenGrant>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let grant = self.grant.clone();
        Box::pin(async move { grant.ok_or_else(|| ProviderError::bad_request("invalid_grant")) })
    }
}

/// A single calendar held in memory.
///
/// Queued failures are returned, one per call, before any work is done.
/// Tokens in `rejected` always get `AuthExpired`.
pub(crate) struct FakeCalendar {
    events: Mutex<BTreeMap<String, RawEvent>>,
    failures: Mutex<VecDeque<ProviderError>>,
    rejected: Mutex<HashSet<String>>,
    /// Inserts that are applied but answered with a transient error.
    lost_insert_responses: AtomicUsize,
    page_size: usize,
    calls: AtomicUsize,
    tokens_seen: Mutex<Vec<String>>,
    windows_seen: Mutex<Vec<TimeWindow>>,
}

impl FakeCalendar {
    pub fn new() -> Self {
        Self::with_page_size(250)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            events: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(VecDeque::new()),
            rejected: Mutex::new(HashSet::new()),
            lost_insert_responses: AtomicUsize::new(0),
            page_size: page_size.max(1),
            calls: AtomicUsize::new(0),
            tokens_seen: Mutex::new(Vec::new()),
            windows_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_events(self, events: impl IntoIterator<Item = RawEvent>) -> Self {
        {
            let mut map = self.events.lock().unwrap();
            for event in events {
                map.insert(event.id.clone(), event);
            }
        }
        self
    }

    pub fn fail_next(&self, error: ProviderError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn reject_token(&self, token: &str) {
        self.rejected.lock().unwrap().insert(token.to_string());
    }

    pub fn lose_next_insert_response(&self) {
        self.lost_insert_responses.fetch_add(1, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        self.tokens_seen.lock().unwrap().clone()
    }

    pub fn windows_seen(&self) -> Vec<TimeWindow> {
        self.windows_seen.lock().unwrap().clone()
    }

    pub fn event(&self, id: &str) -> Option<RawEvent> {
        self.events.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    fn enter(&self, token: &str) -> ProviderResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tokens_seen.lock().unwrap().push(token.to_string());
        if self.rejected.lock().unwrap().contains(token) {
            return Err(ProviderError::auth_expired("token rejected"));
        }
        match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn apply(event: &mut RawEvent, body: &RawEventWrite) {
        if let Some(ref summary) = body.summary {
            event.summary = Some(summary.clone());
        }
        if let Some(ref description) = body.description {
            event.description = Some(description.clone());
        }
        if let Some(ref location) = body.location {
            event.location = Some(location.clone());
        }
        if let Some(ref start) = body.start {
            event.start = Some(start.clone());
        }
        if let Some(ref end) = body.end {
            event.end = Some(end.clone());
        }
        if let Some(ref attendees) = body.attendees {
            event.attendees = attendees.clone();
        }
    }

    fn list(&self, token: &str, page_token: Option<&str>) -> ProviderResult<EventPage> {
        self.enter(token)?;
        let offset: usize = match page_token {
            Some(t) => t
                .parse()
                .map_err(|_| ProviderError::bad_request("bad page token"))?,
            None => 0,
        };
        let events: Vec<RawEvent> = self.events.lock().unwrap().values().cloned().collect();
        let page: Vec<RawEvent> = events.iter().skip(offset).take(self.page_size).cloned().collect();
        let next = offset + page.len();
        let mut result = EventPage::last(page);
        if next < events.len() {
            result = result.with_next_page_token(next.to_string());
        }
        Ok(result)
    }

    fn get(&self, token: &str, event_id: &str) -> ProviderResult<RawEvent> {
        self.enter(token)?;
        self.event(event_id)
            .ok_or_else(|| ProviderError::not_found(format!("event {} not found", event_id)))
    }

    fn insert(&self, token: &str, body: &RawEventWrite) -> ProviderResult<RawEvent> {
        self.enter(token)?;
        let id = body
            .id
            .clone()
            .ok_or_else(|| ProviderError::bad_request("missing id"))?;
        let mut events = self.events.lock().unwrap();
        if events.contains_key(&id) {
            return Err(ProviderError::conflict("the requested identifier already exists"));
        }
        let mut event = RawEvent {
            id: id.clone(),
            status: Some("confirmed".into()),
            html_link: Some(format!("https://calendar.example.com/event?eid={}", id)),
            ..Default::default()
        };
        Self::apply(&mut event, body);
        events.insert(id, event.clone());
        drop(events);

        let lost = self
            .lost_insert_responses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            return Err(ProviderError::transient("connection reset"));
        }
        Ok(event)
    }

    fn patch(&self, token: &str, event_id: &str, body: &RawEventWrite) -> ProviderResult<RawEvent> {
        self.enter(token)?;
        let mut events = self.events.lock().unwrap();
        let event = events
            .get_mut(event_id)
            .ok_or_else(|| ProviderError::not_found(format!("event {} not found", event_id)))?;
        Self::apply(event, body);
        Ok(event.clone())
    }

    fn delete(&self, token: &str, event_id: &str) -> ProviderResult<()> {
        self.enter(token)?;
        match self.events.lock().unwrap().remove(event_id) {
            Some(_) => Ok(()),
            None => Err(ProviderError::not_found("resource has been deleted")),
        }
    }
}

impl CalendarApi for FakeCalendar {
    fn name(&self) -> &str {
        "fake"
    }

    fn list_page<'a>(
        &'a self,
        access_token: &'a str,
        _calendar_id: &'a str,
        window: TimeWindow,
        page_token: Option<&'a str>,
    ) -> BoxFuture<'a, ProviderResult<EventPage>> {
        self.windows_seen.lock().unwrap().push(window);
        let result = self.list(access_token, page_token);
        Box::pin(async move { result })
    }

    fn get_event<'a>(
        &'a self,
        access_token: &'a str,
        _calendar_id: &'a str,
        event_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<RawEvent>> {
        let result = self.get(access_token, event_id);
        Box::pin(async move { result })
    }

    fn insert_event<'a>(
        &'a self,
        access_token: &'a str,
        _calendar_id: &'a str,
        body: &'a RawEventWrite,
    ) -> BoxFuture<'a, ProviderResult<RawEvent>> {
        let result = self.insert(access_token, body);
        Box::pin(async move { result })
    }

    fn patch_event<'a>(
        &'a self,
        access_token: &'a str,
        _calendar_id: &'a str,
        event_id: &'a str,
        body: &'a RawEventWrite,
    ) -> BoxFuture<'a, ProviderResult<RawEvent>> {
        let result = self.patch(access_token, event_id, body);
        Box::pin(async move { result })
    }

    fn delete_event<'a>(
        &'a self,
        access_token: &'a str,
        _calendar_id: &'a str,
        event_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        let result = self.delete(access_token, event_id);
        Box::pin(async move { result })
    }

    fn primary_calendar_id<'a>(&'a self, access_token: &'a str) -> BoxFuture<'a, ProviderResult<String>> {
        let result = self.enter(access_token).map(|_| "me@example.com".to_string());
        Box::pin(async move { result })
    }
}
