//! Calendar event operations for one connected account.
//!
//! Every provider call made by [`CalendarGateway`] goes through the
//! [`RetryExecutor`], one execution per request, so a listing with ten pages
//! gets ten independent attempt budgets.

use std::collections::HashSet;
use std::sync::Arc;

use calsync_core::{CalendarAccount, CalendarEvent, EventDraft, EventPatch, TimeWindow};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ProviderError, ProviderErrorCode, ProviderResult};
use crate::normalize::{normalize_event, normalize_events};
use crate::provider::CalendarApi;
use crate::raw_event::{RawEvent, RawEventWrite};
use crate::retry::RetryExecutor;

/// Calendar used for every account.
pub const PRIMARY_CALENDAR: &str = "primary";

/// Most pages fetched for one listing.
pub const DEFAULT_MAX_PAGES: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub calendar_id: String,
    /// IANA zone applied to timed events that do not name one.
    pub default_time_zone: String,
    pub max_attempts: u32,
    /// Listings stop after this many pages.
    pub max_pages: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            calendar_id: PRIMARY_CALENDAR.to_string(),
            default_time_zone: "UTC".to_string(),
            max_attempts: 3,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl GatewayConfig {
    pub fn with_default_time_zone(mut self, tz: impl Into<String>) -> Self {
        self.default_time_zone = tz.into();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }
}

pub struct CalendarGateway {
    api: Arc<dyn CalendarApi>,
    executor: Arc<RetryExecutor>,
    config: GatewayConfig,
}

impl CalendarGateway {
    pub fn new(api: Arc<dyn CalendarApi>, executor: Arc<RetryExecutor>, config: GatewayConfig) -> Self {
        Self { api, executor, config }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Lists the events of `account` overlapping `window`, following pages.
    ///
    /// Stops early, keeping what was fetched, when the provider hands back a
    /// page token it already sent or after `max_pages` pages.
    pub async fn list_events(
        &self,
        account: &CalendarAccount,
        window: &TimeWindow,
    ) -> ProviderResult<Vec<CalendarEvent>> {
        let window = *window;
        let calendar_id = self.config.calendar_id.as_str();
        let mut raw: Vec<RawEvent> = Vec::new();
        let mut page_token: Option<String> = None;
        let mut seen_tokens: HashSet<String> = HashSet::new();
        let mut pages = 0usize;

        loop {
            let current = page_token.as_deref();
            let page = self
                .executor
                .execute(account, self.config.max_attempts, |token| async move {
                    self.api.list_page(&token, calendar_id, window, current).await
                })
                .await?;
            pages += 1;
            raw.extend(page.events);

            let Some(next) = page.next_page_token else {
                break;
            };
            if !seen_tokens.insert(next.clone()) {
                warn!(account_id = %account.id, pages, "provider repeated a page token, stopping");
                break;
            }
            if pages >= self.config.max_pages {
                warn!(account_id = %account.id, pages, "page limit reached, listing truncated");
                break;
            }
            page_token = Some(next);
        }

        let events = normalize_events(&raw, &account.id);
        debug!(
            account_id = %account.id,
            pages,
            fetched = raw.len(),
            kept = events.len(),
            "listed events"
        );
        Ok(events)
    }

    /// Creates an event.
    ///
    /// The event id is chosen here, so a retried insert that already landed
    /// comes back as a conflict and the stored event is returned instead.
    pub async fn create_event(
        &self,
        account: &CalendarAccount,
        draft: &EventDraft,
    ) -> ProviderResult<CalendarEvent> {
        draft.validate()?;

        let event_id = Uuid::new_v4().simple().to_string();
        let body = RawEventWrite::from_draft(&event_id, draft, &self.config.default_time_zone);
        let calendar_id = self.config.calendar_id.as_str();
        let (body, event_id) = (&body, event_id.as_str());
        let mut attempt = 0u32;

        let raw = self
            .executor
            .execute(account, self.config.max_attempts, |token| {
                attempt += 1;
                let retrying = attempt > 1;
                async move {
                    match self.api.insert_event(&token, calendar_id, body).await {
                        Err(e) if retrying && e.code() == ProviderErrorCode::Conflict => {
                            debug!(event_id, "insert already applied, fetching stored event");
                            self.api.get_event(&token, calendar_id, event_id).await
                        }
                        other => other,
                    }
                }
            })
            .await?;

        info!(account_id = %account.id, event_id, "created event");
        self.normalize_one(&raw, account)
    }

    /// Applies `patch` to an existing event. Absent fields are not sent.
    pub async fn update_event(
        &self,
        account: &CalendarAccount,
        external_id: &str,
        patch: &EventPatch,
    ) -> ProviderResult<CalendarEvent> {
        if patch.is_empty() {
            return Err(ProviderError::invalid_request("nothing to update"));
        }
        if patch.time_zone.is_some() && patch.start.is_none() && patch.end.is_none() {
            return Err(ProviderError::invalid_request(
                "time_zone can only be changed together with start or end",
            ));
        }
        patch.validate()?;

        let body = RawEventWrite::from_patch(patch, &self.config.default_time_zone);
        let body = &body;
        let calendar_id = self.config.calendar_id.as_str();

        let raw = self
            .executor
            .execute(account, self.config.max_attempts, |token| async move {
                self.api
                    .patch_event(&token, calendar_id, external_id, body)
                    .await
            })
            .await?;

        info!(account_id = %account.id, event_id = external_id, "updated event");
        self.normalize_one(&raw, account)
    }

    /// Deletes an event. Deleting an event that is already gone succeeds.
    pub async fn delete_event(&self, account: &CalendarAccount, external_id: &str) -> ProviderResult<()> {
        let calendar_id = self.config.calendar_id.as_str();

        self.executor
            .execute(account, self.config.max_attempts, |token| async move {
                match self.api.delete_event(&token, calendar_id, external_id).await {
                    Err(e) if e.code() == ProviderErrorCode::NotFound => {
                        debug!(event_id = external_id, "event already deleted");
                        Ok(())
                    }
                    other => other,
                }
            })
            .await?;

        info!(account_id = %account.id, event_id = external_id, "deleted event");
        Ok(())
    }

    /// Resolves the primary calendar of a freshly authorized account.
    pub async fn primary_calendar_id(&self, access_token: &str) -> ProviderResult<String> {
        self.api.primary_calendar_id(access_token).await
    }

    fn normalize_one(&self, raw: &RawEvent, account: &CalendarAccount) -> ProviderResult<CalendarEvent> {
        normalize_event(raw, &account.id).map_err(|e| {
            warn!(account_id = %account.id, error = %e, "provider returned an unusable event");
            ProviderError::invalid_response(e.to_string())
                .with_provider(self.api.name())
                .with_source(e)
        })
    }
}
