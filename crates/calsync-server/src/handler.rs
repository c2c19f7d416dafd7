//! HTTP request handlers.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use calsync_core::{
    AccountId, AccountSummary, CalendarAccount, CalendarEvent, Credential, EventDraft, EventPatch,
    RequestedRange, TimeWindow,
};
use calsync_providers::{ProviderError, ReconciledView};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::state::AppState;

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Debug, Deserialize)]
pub struct AuthUrlParams {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct AuthUrlResponse {
    pub url: String,
    pub state: String,
}

/// Issues a consent URL bound to a fresh CSRF state.
pub async fn auth_url(
    State(state): State<AppState>,
    params: Result<Query<AuthUrlParams>, QueryRejection>,
) -> ApiResult<Json<AuthUrlResponse>> {
    let Query(params) = params?;
    let user_id = params.user_id.trim();
    if user_id.is_empty() {
        return Err(ApiError::invalid_request("user_id is required"));
    }

    let csrf = calsync_providers::google::OAuthClient::generate_state();
    state.pending.insert(csrf.clone(), user_id);
    debug!(user_id, "issued consent URL");

    Ok(Json(AuthUrlResponse {
        url: state.oauth.authorization_url(&csrf),
        state: csrf,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Completes the consent flow: exchanges the code, identifies the primary
/// calendar and stores the account.
pub async fn callback(
    State(state): State<AppState>,
    params: Result<Query<CallbackParams>, QueryRejection>,
) -> ApiResult<Json<AccountSummary>> {
    let Query(params) = params?;
    if let Some(error) = params.error {
        warn!(error = %error, "consent was not granted");
        return Err(ApiError::invalid_request("Calendar access was not granted."));
    }

    let csrf = params
        .state
        .ok_or_else(|| ApiError::invalid_request("state is required"))?;
    let code = params
        .code
        .ok_or_else(|| ApiError::invalid_request("code is required"))?;
    let user_id = state
        .pending
        .take(&csrf)
        .ok_or_else(|| ApiError::invalid_request("unknown or expired authorization state"))?;

    let grant = state.oauth.exchange_code(&code).await?;
    let calendar_email = state.gateway.primary_calendar_id(&grant.access_token).await?;
    let credential = Credential::from_grant(
        grant.access_token,
        Some(grant.refresh_token),
        grant.expires_in,
        Utc::now(),
    );

    let account = state
        .store
        .upsert(&user_id, &calendar_email, credential)
        .await?;
    info!(account_id = %account.id, user_id = %user_id, calendar_email = %calendar_email, "calendar connected");

    Ok(Json(account.summary()))
}

pub async fn list_accounts(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Vec<AccountSummary>>> {
    let accounts = state.store.list_for_user(&user_id).await?;
    Ok(Json(accounts.iter().map(CalendarAccount::summary).collect()))
}

#[derive(Debug, Default, Deserialize)]
pub struct RangeParams {
    #[serde(rename = "timeMin")]
    pub time_min: Option<String>,
    #[serde(rename = "timeMax")]
    pub time_max: Option<String>,
}

impl RangeParams {
    fn requested(&self) -> Result<RequestedRange, ProviderError> {
        Ok(RequestedRange::parse(
            self.time_min.as_deref(),
            self.time_max.as_deref(),
        )?)
    }
}

/// Merged view over every account of a user.
pub async fn user_events(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    params: Result<Query<RangeParams>, QueryRejection>,
) -> ApiResult<Json<ReconciledView>> {
    let Query(params) = params?;
    let requested = params.requested()?;
    let accounts = state.store.list_for_user(&user_id).await?;
    let view = state.view.reconcile(&accounts, requested, Utc::now()).await?;
    if view.is_partial() {
        debug!(user_id = %user_id, failures = view.failures.len(), "returning partial view");
    }
    Ok(Json(view))
}

#[derive(Debug, Serialize)]
pub struct AccountEventsResponse {
    pub events: Vec<CalendarEvent>,
    pub window: TimeWindow,
}

pub async fn account_events(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    params: Result<Query<RangeParams>, QueryRejection>,
) -> ApiResult<Json<AccountEventsResponse>> {
    let Query(params) = params?;
    let requested = params.requested()?;
    let account = state.store.get(&AccountId::new(account_id)).await?;
    let (window, events) = state
        .view
        .list_account(&account, requested, Utc::now())
        .await?;
    Ok(Json(AccountEventsResponse { events, window }))
}

pub async fn create_event(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    body: Result<Json<EventDraft>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CalendarEvent>)> {
    let Json(draft) = body?;
    let account = state.store.get(&AccountId::new(account_id)).await?;
    let event = state.gateway.create_event(&account, &draft).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn update_event(
    State(state): State<AppState>,
    Path((account_id, event_id)): Path<(String, String)>,
    body: Result<Json<EventPatch>, JsonRejection>,
) -> ApiResult<Json<CalendarEvent>> {
    let Json(patch) = body?;
    let account = state.store.get(&AccountId::new(account_id)).await?;
    let event = state.gateway.update_event(&account, &event_id, &patch).await?;
    Ok(Json(event))
}

/// Deletes an event; deleting one that is already gone also succeeds.
pub async fn delete_event(
    State(state): State<AppState>,
    Path((account_id, event_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let account = state.store.get(&AccountId::new(account_id)).await?;
    state.gateway.delete_event(&account, &event_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
