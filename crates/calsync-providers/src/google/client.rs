//! Google Calendar API client.
//!
//! A thin HTTP layer: every call takes the bearer token to use, maps the
//! HTTP status onto a [`ProviderErrorCode`](crate::error::ProviderErrorCode)
//! and hands back raw events for the gateway to normalize.

use calsync_core::TimeWindow;
use chrono::SecondsFormat;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::http::{build_http_client, retry_after, send_error};
use crate::provider::{BoxFuture, CalendarApi, EventPage};
use crate::raw_event::{RawEvent, RawEventWrite};

use super::config::GoogleConfig;

const PROVIDER: &str = "google";

/// Largest page Google accepts for events.list.
const MAX_RESULTS: u32 = 250;

/// Asks Google to email guests about the change.
const NOTIFY_GUESTS: [(&str, &str); 1] = [("sendUpdates", "all")];

/// Response from the events.list endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<RawEvent>,
    next_page_token: Option<String>,
}

/// Response from the calendarList.list endpoint.
#[derive(Debug, Deserialize)]
struct CalendarListResponse {
    #[serde(default)]
    items: Vec<CalendarListEntry>,
}

/// A calendar entry from the calendar list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarListEntry {
    pub id: String,
    pub summary: Option<String>,
    #[serde(default)]
    pub primary: bool,
    pub time_zone: Option<String>,
}

/// Google's JSON error envelope.
#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

impl ErrorEnvelope {
    fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    fn has_reason(&self, wanted: &[&str]) -> bool {
        self.error
            .errors
            .iter()
            .any(|d| wanted.contains(&d.reason.as_str()))
    }
}

/// Google Calendar API client.
#[derive(Debug)]
pub struct GoogleCalendarClient {
    http_client: reqwest::Client,
    api_base: String,
}

impl GoogleCalendarClient {
    pub fn new(config: &GoogleConfig) -> ProviderResult<Self> {
        Ok(Self {
            http_client: build_http_client(config.timeout)?,
            api_base: config.api_base.clone(),
        })
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            self.api_base,
            urlencoding::encode(calendar_id)
        )
    }

    fn event_url(&self, calendar_id: &str, event_id: &str) -> String {
        format!(
            "{}/{}",
            self.events_url(calendar_id),
            urlencoding::encode(event_id)
        )
    }

    fn request(&self, method: Method, url: &str, access_token: &str) -> RequestBuilder {
        self.http_client
            .request(method, url)
            .bearer_auth(access_token)
    }

    /// A write request carrying `body`; guests are notified when it lists any.
    fn write(&self, method: Method, url: &str, access_token: &str, body: &RawEventWrite) -> RequestBuilder {
        let request = self.request(method, url, access_token).json(body);
        if body.notifies_attendees() {
            request.query(&NOTIFY_GUESTS)
        } else {
            request
        }
    }

    /// Sends the request and returns the successful response body.
    async fn send(&self, request: RequestBuilder, what: &str) -> ProviderResult<String> {
        let response = request.send().await.map_err(|e| send_error(PROVIDER, e))?;
        let status = response.status();
        if status.is_success() {
            return read_body(response).await;
        }

        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        let err = error_for_status(status, &body);
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            warn!(%status, body = %body, "{} failed", what);
        } else {
            debug!(%status, body = %body, "{} failed", what);
        }

        let err = match (err.is_retryable(), retry_after(&headers)) {
            (true, Some(delay)) => err.with_retry_after(delay),
            _ => err,
        };
        Err(err.with_provider(PROVIDER))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> ProviderResult<T> {
        let body = self.send(request, what).await?;
        serde_json::from_str(&body).map_err(|e| {
            ProviderError::invalid_response(format!("failed to parse {} response: {}", what, e))
                .with_provider(PROVIDER)
        })
    }

    /// Lists the calendars visible to the token's owner.
    pub async fn list_calendars(&self, access_token: &str) -> ProviderResult<Vec<CalendarListEntry>> {
        let url = format!("{}/users/me/calendarList", self.api_base);
        let request = self.request(Method::GET, &url, access_token);
        let list: CalendarListResponse = self.send_json(request, "calendar list").await?;
        Ok(list.items)
    }

    async fn fetch_page(
        &self,
        access_token: &str,
        calendar_id: &str,
        window: TimeWindow,
        page_token: Option<&str>,
    ) -> ProviderResult<EventPage> {
        let mut request = self
            .request(Method::GET, &self.events_url(calendar_id), access_token)
            .query(&[
                ("timeMin", window.start.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ("timeMax", window.end.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
                ("maxResults", MAX_RESULTS.to_string()),
            ]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let list: EventListResponse = self.send_json(request, "event list").await?;
        debug!(
            calendar_id,
            count = list.items.len(),
            more = list.next_page_token.is_some(),
            "fetched event page"
        );
        Ok(EventPage {
            events: list.items,
            next_page_token: list.next_page_token,
        })
    }

    async fn fetch_primary(&self, access_token: &str) -> ProviderResult<String> {
        let calendars = self.list_calendars(access_token).await?;
        calendars
            .into_iter()
            .find(|c| c.primary)
            .map(|c| c.id)
            .ok_or_else(|| {
                ProviderError::invalid_response("no primary calendar in calendar list")
                    .with_provider(PROVIDER)
            })
    }
}

async fn read_body(response: Response) -> ProviderResult<String> {
    response.text().await.map_err(|e| {
        ProviderError::transient(format!("failed to read response: {}", e)).with_provider(PROVIDER)
    })
}

/// Maps a non-success status onto an error.
///
/// Google reports quota exhaustion either as 429 or as 403 with a
/// rate-limit reason; any other 403 is a permission problem.
fn error_for_status(status: StatusCode, body: &str) -> ProviderError {
    let envelope = ErrorEnvelope::parse(body);
    let detail = if envelope.error.message.is_empty() {
        status.to_string()
    } else {
        format!("{} ({})", envelope.error.message, status)
    };

    match status {
        StatusCode::UNAUTHORIZED => ProviderError::auth_expired("access token expired or invalid"),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::rate_limited(detail),
        StatusCode::FORBIDDEN
            if envelope.has_reason(&["rateLimitExceeded", "userRateLimitExceeded"]) =>
        {
            ProviderError::rate_limited(detail)
        }
        StatusCode::FORBIDDEN => ProviderError::forbidden(detail),
        StatusCode::NOT_FOUND | StatusCode::GONE => ProviderError::not_found(detail),
        StatusCode::CONFLICT => ProviderError::conflict(detail),
        StatusCode::BAD_REQUEST => ProviderError::bad_request(detail),
        s if s.is_server_error() => ProviderError::transient(detail),
        _ => ProviderError::invalid_response(format!("unexpected status: {}", detail)),
    }
}

impl CalendarApi for GoogleCalendarClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn list_page<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        window: TimeWindow,
        page_token: Option<&'a str>,
    ) -> BoxFuture<'a, ProviderResult<EventPage>> {
        Box::pin(self.fetch_page(access_token, calendar_id, window, page_token))
    }

    fn get_event<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        event_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<RawEvent>> {
        Box::pin(async move {
            let url = self.event_url(calendar_id, event_id);
            self.send_json(self.request(Method::GET, &url, access_token), "event get")
                .await
        })
    }

    fn insert_event<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        body: &'a RawEventWrite,
    ) -> BoxFuture<'a, ProviderResult<RawEvent>> {
        Box::pin(async move {
            let url = self.events_url(calendar_id);
            let request = self.write(Method::POST, &url, access_token, body);
            self.send_json(request, "event insert").await
        })
    }

    fn patch_event<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        event_id: &'a str,
        body: &'a RawEventWrite,
    ) -> BoxFuture<'a, ProviderResult<RawEvent>> {
        Box::pin(async move {
            let url = self.event_url(calendar_id, event_id);
            let request = self.write(Method::PATCH, &url, access_token, body);
            self.send_json(request, "event patch").await
        })
    }

    fn delete_event<'a>(
        &'a self,
        access_token: &'a str,
        calendar_id: &'a str,
        event_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            // guests of the event, if any, get a cancellation
            let url = self.event_url(calendar_id, event_id);
            let request = self
                .request(Method::DELETE, &url, access_token)
                .query(&NOTIFY_GUESTS);
            self.send(request, "event delete").await.map(|_| ())
        })
    }

    fn primary_calendar_id<'a>(&'a self, access_token: &'a str) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(self.fetch_primary(access_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorCode;
    use crate::google::config::OAuthCredentials;
    use crate::raw_event::RawEventTime;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use crate::raw_event::RawAttendee;
    use wiremock::matchers::{body_json, header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup() -> (MockServer, GoogleCalendarClient) {
        let server = MockServer::start().await;
        let config = GoogleConfig::new(OAuthCredentials::new("id", "secret"), "http://localhost/cb")
            .with_api_base(server.uri());
        let client = GoogleCalendarClient::new(&config).unwrap();
        (server, client)
    }

    fn window() -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap(),
        )
    }

    fn google_error(code: u16, reason: &str) -> ResponseTemplate {
        ResponseTemplate::new(code).set_body_json(serde_json::json!({
            "error": {
                "code": code,
                "message": "boom",
                "errors": [{ "reason": reason, "domain": "usageLimits" }]
            }
        }))
    }

    #[tokio::test]
    async fn list_page_sends_window_and_parses_events() {
        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .and(header("authorization", "Bearer tok-1"))
            .and(query_param("timeMin", "2025-06-01T00:00:00Z"))
            .and(query_param("timeMax", "2025-07-01T00:00:00Z"))
            .and(query_param("singleEvents", "true"))
            .and(query_param("orderBy", "startTime"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kind": "calendar#events",
                "nextPageToken": "p3",
                "items": [{
                    "id": "evt-1",
                    "status": "confirmed",
                    "summary": "Standup",
                    "htmlLink": "https://www.google.com/calendar/event?eid=1",
                    "start": { "dateTime": "2025-06-02T09:00:00+02:00", "timeZone": "Europe/Paris" },
                    "end": { "dateTime": "2025-06-02T09:15:00+02:00", "timeZone": "Europe/Paris" }
                }, {
                    "id": "evt-2",
                    "summary": "Holiday",
                    "start": { "date": "2025-06-09" },
                    "end": { "date": "2025-06-10" }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let page = client
            .list_page("tok-1", "primary", window(), Some("p2"))
            .await
            .unwrap();

        assert_eq!(page.next_page_token.as_deref(), Some("p3"));
        assert_eq!(page.events.len(), 2);
        assert_eq!(page.events[0].summary.as_deref(), Some("Standup"));
        assert_eq!(
            page.events[0].start.as_ref().and_then(|t| t.time_zone.as_deref()),
            Some("Europe/Paris")
        );
        assert!(page.events[1].start.as_ref().is_some_and(|t| t.is_all_day()));
    }

    #[tokio::test]
    async fn status_mapping() {
        let cases: Vec<(ResponseTemplate, ProviderErrorCode)> = vec![
            (google_error(401, "authError"), ProviderErrorCode::AuthExpired),
            (google_error(429, "rateLimitExceeded"), ProviderErrorCode::RateLimited),
            (google_error(403, "userRateLimitExceeded"), ProviderErrorCode::RateLimited),
            (google_error(403, "forbidden"), ProviderErrorCode::Forbidden),
            (google_error(404, "notFound"), ProviderErrorCode::NotFound),
            (google_error(410, "deleted"), ProviderErrorCode::NotFound),
            (google_error(409, "duplicate"), ProviderErrorCode::Conflict),
            (google_error(400, "invalid"), ProviderErrorCode::BadRequest),
            (google_error(503, "backendError"), ProviderErrorCode::Transient),
            (ResponseTemplate::new(200).set_body_string("not json"), ProviderErrorCode::InvalidResponse),
        ];

        for (template, expected) in cases {
            let (server, client) = setup().await;
            Mock::given(method("GET"))
                .and(path("/calendars/primary/events/evt-1"))
                .respond_with(template)
                .mount(&server)
                .await;

            let err = client.get_event("tok", "primary", "evt-1").await.unwrap_err();
            assert_eq!(err.code(), expected, "{}", err);
            assert_eq!(err.provider(), Some("google"));
        }
    }

    #[tokio::test]
    async fn retry_after_is_attached_to_rate_limits() {
        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .respond_with(google_error(429, "rateLimitExceeded").insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let err = client.get_event("tok", "primary", "evt-1").await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn insert_posts_client_id_and_patch_sends_only_set_fields() {
        let (server, client) = setup().await;
        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .and(query_param_is_missing("sendUpdates"))
            .and(body_json(serde_json::json!({
                "id": "abc123",
                "summary": "Review",
                "start": { "dateTime": "2025-06-02T10:00:00Z", "timeZone": "UTC" },
                "end": { "dateTime": "2025-06-02T11:00:00Z", "timeZone": "UTC" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "abc123",
                "summary": "Review",
                "start": { "dateTime": "2025-06-02T10:00:00Z" },
                "end": { "dateTime": "2025-06-02T11:00:00Z" }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/calendars/primary/events/abc123"))
            .and(query_param_is_missing("sendUpdates"))
            .and(body_json(serde_json::json!({ "location": "Room 4" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "abc123",
                "summary": "Review",
                "location": "Room 4",
                "start": { "dateTime": "2025-06-02T10:00:00Z" },
                "end": { "dateTime": "2025-06-02T11:00:00Z" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let insert = RawEventWrite {
            id: Some("abc123".into()),
            summary: Some("Review".into()),
            start: Some(RawEventTime::date_time("2025-06-02T10:00:00Z").with_time_zone("UTC")),
            end: Some(RawEventTime::date_time("2025-06-02T11:00:00Z").with_time_zone("UTC")),
            ..Default::default()
        };
        let created = client.insert_event("tok", "primary", &insert).await.unwrap();
        assert_eq!(created.id, "abc123");

        let patch = RawEventWrite {
            location: Some("Room 4".into()),
            ..Default::default()
        };
        let patched = client
            .patch_event("tok", "primary", "abc123", &patch)
            .await
            .unwrap();
        assert_eq!(patched.location.as_deref(), Some("Room 4"));
    }

    #[tokio::test]
    async fn writes_with_guests_notify_them() {
        let (server, client) = setup().await;
        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .and(query_param("sendUpdates", "all"))
            .and(body_json(serde_json::json!({
                "id": "appt1",
                "summary": "Consultation",
                "start": { "dateTime": "2025-06-02T10:00:00Z", "timeZone": "UTC" },
                "end": { "dateTime": "2025-06-02T10:30:00Z", "timeZone": "UTC" },
                "attendees": [{ "email": "patient@example.com" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "appt1",
                "summary": "Consultation",
                "start": { "dateTime": "2025-06-02T10:00:00Z" },
                "end": { "dateTime": "2025-06-02T10:30:00Z" },
                "attendees": [{ "email": "patient@example.com", "responseStatus": "needsAction" }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/calendars/primary/events/appt1"))
            .and(query_param("sendUpdates", "all"))
            .and(body_json(serde_json::json!({
                "attendees": [{ "email": "patient@example.com" }, { "email": "nurse@example.com" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "appt1",
                "start": { "dateTime": "2025-06-02T10:00:00Z" },
                "end": { "dateTime": "2025-06-02T10:30:00Z" },
                "attendees": [{ "email": "patient@example.com" }, { "email": "nurse@example.com" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let insert = RawEventWrite {
            id: Some("appt1".into()),
            summary: Some("Consultation".into()),
            start: Some(RawEventTime::date_time("2025-06-02T10:00:00Z").with_time_zone("UTC")),
            end: Some(RawEventTime::date_time("2025-06-02T10:30:00Z").with_time_zone("UTC")),
            attendees: Some(vec![RawAttendee::new("patient@example.com")]),
            ..Default::default()
        };
        let created = client.insert_event("tok", "primary", &insert).await.unwrap();
        assert_eq!(
            created.attendees[0].response_status.as_deref(),
            Some("needsAction")
        );

        let patch = RawEventWrite {
            attendees: Some(vec![
                RawAttendee::new("patient@example.com"),
                RawAttendee::new("nurse@example.com"),
            ]),
            ..Default::default()
        };
        let patched = client
            .patch_event("tok", "primary", "appt1", &patch)
            .await
            .unwrap();
        assert_eq!(patched.attendees.len(), 2);
    }

    #[tokio::test]
    async fn delete_accepts_empty_body() {
        let (server, client) = setup().await;
        Mock::given(method("DELETE"))
            .and(path("/calendars/primary/events/evt-1"))
            .and(query_param("sendUpdates", "all"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client.delete_event("tok", "primary", "evt-1").await.unwrap();
    }

    #[tokio::test]
    async fn primary_calendar_from_calendar_list() {
        let (server, client) = setup().await;
        Mock::given(method("GET"))
            .and(path("/users/me/calendarList"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    { "id": "team@group.calendar.google.com", "summary": "Team" },
                    { "id": "me@example.com", "summary": "me", "primary": true }
                ]
            })))
            .mount(&server)
            .await;

        let id = client.primary_calendar_id("tok").await.unwrap();
        assert_eq!(id, "me@example.com");
    }
}
