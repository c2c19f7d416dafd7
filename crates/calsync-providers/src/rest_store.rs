//! Credential store backed by a PostgREST endpoint.
//!
//! Rows live in a `user_calendar_accounts` table with a unique constraint on
//! `(user_id, calendar_email)`; the id is assigned by the database. Requests
//! authenticate with a service key sent both as `apikey` and as a bearer
//! token, which is what Supabase-style deployments expect.

use std::time::Duration;

use calsync_core::{AccountId, CalendarAccount, Credential};
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::http::build_http_client;
use crate::provider::BoxFuture;
use crate::store::CredentialStore;

pub const DEFAULT_TABLE: &str = "user_calendar_accounts";

#[derive(Clone)]
pub struct RestStoreConfig {
    /// Base URL of the REST endpoint, e.g. `https://db.example.com/rest/v1`.
    pub base_url: String,
    pub api_key: String,
    pub table: String,
    pub timeout: Duration,
}

impl RestStoreConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            table: DEFAULT_TABLE.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for RestStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestStoreConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("table", &self.table)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Serialize)]
struct NewRow<'a> {
    user_id: &'a str,
    calendar_email: &'a str,
    #[serde(flatten)]
    credential: &'a Credential,
}

#[derive(Serialize)]
struct TokenUpdate<'a> {
    access_token: &'a str,
    refresh_token: Option<&'a str>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct RestCredentialStore {
    config: RestStoreConfig,
    http_client: reqwest::Client,
}

impl RestCredentialStore {
    pub fn new(config: RestStoreConfig) -> ProviderResult<Self> {
        let http_client = build_http_client(config.timeout)?;
        Ok(Self { config, http_client })
    }

    fn request(&self, method: Method) -> RequestBuilder {
        let url = format!("{}/{}", self.config.base_url, self.config.table);
        self.http_client
            .request(method, url)
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
    }

    async fn rows(&self, request: RequestBuilder, what: &str) -> ProviderResult<Vec<CalendarAccount>> {
        let response = request.send().await.map_err(|e| {
            ProviderError::storage(format!("{} request failed: {}", what, e)).with_source(e)
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            ProviderError::storage(format!("failed to read {} response: {}", what, e))
        })?;
        if !status.is_success() {
            warn!(%status, body = %body, "{} rejected by credential store", what);
            return Err(ProviderError::storage(format!("{} failed ({})", what, status)));
        }

        serde_json::from_str(&body).map_err(|e| {
            ProviderError::storage(format!("invalid {} response: {}", what, e)).with_source(e)
        })
    }

    async fn fetch(&self, id: &AccountId) -> ProviderResult<CalendarAccount> {
        let filter = format!("eq.{}", id);
        let request = self
            .request(Method::GET)
            .query(&[("id", filter.as_str()), ("select", "*")]);
        self.rows(request, "account lookup")
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::account_not_found(id))
    }

    async fn put(
        &self,
        user_id: &str,
        calendar_email: &str,
        credential: Credential,
    ) -> ProviderResult<CalendarAccount> {
        let row = NewRow {
            user_id,
            calendar_email,
            credential: &credential,
        };
        let request = self
            .request(Method::POST)
            .query(&[("on_conflict", "user_id,calendar_email")])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&row);
        let account = self
            .rows(request, "account upsert")
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::storage("account upsert returned no row"))?;
        debug!(account_id = %account.id, "stored calendar account");
        Ok(account)
    }

    async fn patch_tokens(
        &self,
        id: &AccountId,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> ProviderResult<()> {
        let filter = format!("eq.{}", id);
        let update = TokenUpdate {
            access_token,
            refresh_token,
            expires_at,
        };
        let request = self
            .request(Method::PATCH)
            .query(&[("id", filter.as_str())])
            .header("Prefer", "return=representation")
            .json(&update);
        let updated = self.rows(request, "token update").await?;
        if updated.is_empty() {
            return Err(ProviderError::account_not_found(id));
        }
        Ok(())
    }

    async fn list(&self, user_id: &str) -> ProviderResult<Vec<CalendarAccount>> {
        let filter = format!("eq.{}", user_id);
        let request = self.request(Method::GET).query(&[
            ("user_id", filter.as_str()),
            ("select", "*"),
            ("order", "calendar_email.asc"),
        ]);
        self.rows(request, "account list").await
    }
}

impl CredentialStore for RestCredentialStore {
    fn get<'a>(&'a self, id: &'a AccountId) -> BoxFuture<'a, ProviderResult<CalendarAccount>> {
        Box::pin(self.fetch(id))
    }

    fn upsert<'a>(
        &'a self,
        user_id: &'a str,
        calendar_email: &'a str,
        credential: Credential,
    ) -> BoxFuture<'a, ProviderResult<CalendarAccount>> {
        Box::pin(self.put(user_id, calendar_email, credential))
    }

    fn update_tokens<'a>(
        &'a self,
        id: &'a AccountId,
        access_token: &'a str,
        refresh_token: Option<&'a str>,
        expires_at: DateTime<Utc>,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(self.patch_tokens(id, access_token, refresh_token, expires_at))
    }

    fn list_for_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, ProviderResult<Vec<CalendarAccount>>> {
        Box::pin(self.list(user_id))
    }
}
