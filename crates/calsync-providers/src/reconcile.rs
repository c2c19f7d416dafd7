//! Merged, chronological view across all of a user's calendars.
//!
//! Accounts are listed independently: one account failing (a revoked
//! refresh token, a provider outage) is reported next to the events of the
//! others instead of failing the whole view. Events are never deduplicated
//! across accounts.

use std::sync::Arc;

use calsync_core::{
    AccountId, CalendarAccount, CalendarEvent, RangePolicy, RequestedRange, TimeWindow,
};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderErrorCode, ProviderResult};
use crate::gateway::CalendarGateway;

/// An account whose events could not be listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountFailure {
    pub account_id: AccountId,
    pub calendar_email: String,
    pub kind: ProviderErrorCode,
    pub message: String,
}

impl AccountFailure {
    fn from_error(account: &CalendarAccount, error: &ProviderError) -> Self {
        Self {
            account_id: account.id.clone(),
            calendar_email: account.calendar_email.clone(),
            kind: error.code(),
            message: error.user_message(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciledView {
    pub events: Vec<CalendarEvent>,
    pub failures: Vec<AccountFailure>,
    /// The window actually queried, after defaults and clamping.
    pub window: TimeWindow,
}

impl ReconciledView {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

pub struct ReconciliationView {
    gateway: Arc<CalendarGateway>,
    policy: RangePolicy,
}

impl ReconciliationView {
    pub fn new(gateway: Arc<CalendarGateway>, policy: RangePolicy) -> Self {
        Self { gateway, policy }
    }

    pub fn policy(&self) -> &RangePolicy {
        &self.policy
    }

    /// Applies defaults and the absolute clamp to a requested range.
    pub fn resolve_window(&self, requested: RequestedRange, now: DateTime<Utc>) -> ProviderResult<TimeWindow> {
        Ok(self.policy.resolve(requested, now)?)
    }

    /// Lists every account's events within the resolved window.
    pub async fn reconcile(
        &self,
        accounts: &[CalendarAccount],
        requested: RequestedRange,
        now: DateTime<Utc>,
    ) -> ProviderResult<ReconciledView> {
        let window = self.resolve_window(requested, now)?;
        debug!(
            accounts = accounts.len(),
            start = %window.start,
            end = %window.end,
            "reconciling calendars"
        );

        let listings = join_all(accounts.iter().map(|account| async move {
            (account, self.gateway.list_events(account, &window).await)
        }))
        .await;

        let mut events = Vec::new();
        let mut failures = Vec::new();
        for (account, listing) in listings {
            match listing {
                Ok(mut listed) => events.append(&mut listed),
                Err(e) => {
                    warn!(account_id = %account.id, error = %e, "calendar account failed to list");
                    failures.push(AccountFailure::from_error(account, &e));
                }
            }
        }

        sort_events(&mut events);

        Ok(ReconciledView {
            events,
            failures,
            window,
        })
    }

    /// Lists one account's events, with the same window rules as the merged view.
    pub async fn list_account(
        &self,
        account: &CalendarAccount,
        requested: RequestedRange,
        now: DateTime<Utc>,
    ) -> ProviderResult<(TimeWindow, Vec<CalendarEvent>)> {
        let window = self.resolve_window(requested, now)?;
        let mut events = self.gateway.list_events(account, &window).await?;
        sort_events(&mut events);
        Ok((window, events))
    }
}

/// Orders by start, then end, then account and event id.
pub fn sort_events(events: &mut [CalendarEvent]) {
    events.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| a.end.cmp(&b.end))
            .then_with(|| a.account_id.cmp(&b.account_id))
            .then_with(|| a.external_id.cmp(&b.external_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayConfig;
    use crate::raw_event::{RawEvent, RawEventTime};
    use crate::refresh::TokenRefreshManager;
    use crate::retry::{RetryConfig, RetryExecutor};
    use crate::store::MemoryCredentialStore;
    use crate::testing::{FakeCalendar, FakeEndpoint};
    use calsync_core::Credential;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
    }

    fn account(id: &str, token: &str, refresh: Option<&str>) -> CalendarAccount {
        CalendarAccount::new(
            AccountId::new(id),
            "user-1",
            format!("{}@example.com", id),
            Credential::new(token, refresh.map(String::from), Utc::now() + Duration::hours(1)),
        )
    }

    fn view(calendar: Arc<FakeCalendar>, accounts: &[CalendarAccount]) -> ReconciliationView {
        let store = Arc::new(MemoryCredentialStore::with_accounts(accounts.to_vec()));
        let endpoint = Arc::new(FakeEndpoint::failing());
        let tokens = Arc::new(TokenRefreshManager::new(store, endpoint));
        let executor = Arc::new(RetryExecutor::new(tokens, RetryConfig::default()));
        let gateway = Arc::new(CalendarGateway::new(calendar, executor, GatewayConfig::default()));
        ReconciliationView::new(gateway, RangePolicy::default())
    }

    fn raw(id: &str, start_hour: u32) -> RawEvent {
        RawEvent::new(
            id,
            RawEventTime::date_time(format!("2025-06-15T{:02}:00:00Z", start_hour)),
            RawEventTime::date_time(format!("2025-06-15T{:02}:30:00Z", start_hour)),
        )
    }

    #[tokio::test]
    async fn one_failing_account_does_not_sink_the_view() {
        let accounts = vec![
            account("acc-a", "tok-a", Some("r")),
            account("acc-b", "tok-b", Some("r")),
            account("acc-c", "tok-c", None),
        ];
        let calendar = Arc::new(FakeCalendar::new().with_events([raw("late", 15), raw("early", 9)]));
        calendar.reject_token("tok-c");
        let view = view(calendar, &accounts);

        let result = view
            .reconcile(&accounts, RequestedRange::unbounded(), now())
            .await
            .unwrap();

        assert_eq!(result.events.len(), 4);
        assert!(result.is_partial());
        assert_eq!(result.failures.len(), 1);
        let failure = &result.failures[0];
        assert_eq!(failure.account_id, AccountId::new("acc-c"));
        assert_eq!(failure.kind, ProviderErrorCode::AuthExpired);
        assert!(failure.message.contains("reconnect"));

        let order: Vec<_> = result
            .events
            .iter()
            .map(|e| (e.external_id.as_str(), e.account_id.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("early", "acc-a"),
                ("early", "acc-b"),
                ("late", "acc-a"),
                ("late", "acc-b"),
            ]
        );
    }

    #[tokio::test]
    async fn wide_request_is_clamped_before_listing() {
        let accounts = vec![account("acc-a", "tok-a", Some("r"))];
        let calendar = Arc::new(FakeCalendar::new());
        let view = view(calendar.clone(), &accounts);

        let requested = RequestedRange::between(
            now().checked_sub_months(chrono::Months::new(120)).unwrap(),
            now().checked_add_months(chrono::Months::new(120)).unwrap(),
        );
        let result = view.reconcile(&accounts, requested, now()).await.unwrap();

        let expected = TimeWindow::new(
            Utc.with_ymd_and_hms(2023, 6, 15, 12, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2027, 6, 15, 12, 0, 0).unwrap(),
        );
        assert_eq!(result.window, expected);
        assert_eq!(calendar.windows_seen(), vec![expected]);
    }

    #[tokio::test]
    async fn inverted_range_is_rejected_without_listing() {
        let accounts = vec![account("acc-a", "tok-a", Some("r"))];
        let calendar = Arc::new(FakeCalendar::new());
        let view = view(calendar.clone(), &accounts);

        let requested = RequestedRange::between(now(), now() - Duration::days(1));
        let err = view.reconcile(&accounts, requested, now()).await.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::InvalidRange);
        assert_eq!(calendar.calls(), 0);
    }

    #[tokio::test]
    async fn no_accounts_is_an_empty_view() {
        let calendar = Arc::new(FakeCalendar::new());
        let view = view(calendar, &[]);
        let result = view
            .reconcile(&[], RequestedRange::unbounded(), now())
            .await
            .unwrap();
        assert!(result.events.is_empty());
        assert!(!result.is_partial());
    }

    #[test]
    fn all_day_sorts_before_timed_on_same_day() {
        let acc = AccountId::new("acc");
        let all_day = CalendarEvent::new(
            "b",
            acc.clone(),
            "holiday",
            calsync_core::EventTime::from_date(chrono::NaiveDate::from_ymd_opt(2025, 6, 15).unwrap()),
            calsync_core::EventTime::from_date(chrono::NaiveDate::from_ymd_opt(2025, 6, 16).unwrap()),
        );
        let timed = CalendarEvent::new(
            "a",
            acc,
            "meeting",
            calsync_core::EventTime::from_utc(Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap()),
            calsync_core::EventTime::from_utc(Utc.with_ymd_and_hms(2025, 6, 15, 1, 0, 0).unwrap()),
        );
        let mut events = vec![timed, all_day];
        sort_events(&mut events);
        assert_eq!(events[0].external_id, "b");
    }
}
