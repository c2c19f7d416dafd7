//! Access token lifecycle.
//!
//! [`TokenRefreshManager`] hands out a usable access token for an account,
//! refreshing it through a [`TokenEndpoint`] and persisting the result in the
//! [`CredentialStore`] before returning.

use std::sync::Arc;

use calsync_core::{CalendarAccount, MAX_TOKEN_LIFETIME_SECS, token_expiry};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::BoxFuture;
use crate::store::CredentialStore;

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// What a token endpoint returns for a refresh grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

/// Exchanges a refresh token for a new access token.
pub trait TokenEndpoint: Send + Sync {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, ProviderResult<TokenGrant>>;
}

/// A completed refresh, with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRefreshResult {
    pub access_token: String,
    /// The new refresh token, or the previous one when the grant omitted it.
    pub refresh_token: Option<String>,
    pub expires_in_secs: i64,
}

impl TokenRefreshResult {
    pub fn from_grant(grant: TokenGrant, previous_refresh_token: Option<&str>) -> Self {
        if let Some(secs) = grant.expires_in.filter(|s| !(0..=MAX_TOKEN_LIFETIME_SECS).contains(s)) {
            warn!(expires_in = secs, "token endpoint returned an out of range lifetime, clamping");
        }
        Self {
            access_token: grant.access_token,
            refresh_token: grant
                .refresh_token
                .filter(|t| !t.is_empty())
                .or_else(|| previous_refresh_token.map(String::from)),
            expires_in_secs: grant.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        }
    }

    /// Expiry to persist for a grant received at `now`, see [`token_expiry`].
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        token_expiry(now, self.expires_in_secs)
    }
}

/// A token known to be usable, along with the account it belongs to.
#[derive(Debug, Clone)]
pub struct FreshToken {
    pub access_token: String,
    pub account: CalendarAccount,
}

pub struct TokenRefreshManager {
    store: Arc<dyn CredentialStore>,
    endpoint: Arc<dyn TokenEndpoint>,
}

impl TokenRefreshManager {
    pub fn new(store: Arc<dyn CredentialStore>, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        Self { store, endpoint }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Returns the stored token while it is valid, refreshes it otherwise.
    pub async fn ensure_fresh_token(&self, account: &CalendarAccount) -> ProviderResult<FreshToken> {
        self.ensure_fresh_token_at(account, Utc::now()).await
    }

    pub async fn ensure_fresh_token_at(
        &self,
        account: &CalendarAccount,
        now: DateTime<Utc>,
    ) -> ProviderResult<FreshToken> {
        if account.is_token_valid_at(now) {
            debug!(account_id = %account.id, "reusing stored access token");
            return Ok(FreshToken {
                access_token: account.access_token().to_string(),
                account: account.clone(),
            });
        }
        self.force_refresh_at(account, now).await
    }

    /// Refreshes regardless of the stored expiry.
    pub async fn force_refresh(&self, account: &CalendarAccount) -> ProviderResult<FreshToken> {
        self.force_refresh_at(account, Utc::now()).await
    }

    pub async fn force_refresh_at(
        &self,
        account: &CalendarAccount,
        now: DateTime<Utc>,
    ) -> ProviderResult<FreshToken> {
        let refresh_token = match account.refresh_token() {
            Some(token) if !token.is_empty() => token,
            _ => {
                return Err(ProviderError::auth_expired(format!(
                    "access token for {} expired and no refresh token is stored",
                    account.calendar_email
                )));
            }
        };

        let grant = self.endpoint.refresh(refresh_token).await.map_err(|e| {
            warn!(account_id = %account.id, error = %e, "token refresh failed");
            ProviderError::auth_expired(format!(
                "could not refresh access token for {}",
                account.calendar_email
            ))
            .with_source(e)
        })?;

        let result = TokenRefreshResult::from_grant(grant, Some(refresh_token));
        let expires_at = result.expires_at(now);

        self.store
            .update_tokens(
                &account.id,
                &result.access_token,
                result.refresh_token.as_deref(),
                expires_at,
            )
            .await?;

        info!(account_id = %account.id, %expires_at, "refreshed access token");

        let mut updated = account.clone();
        updated.credential.access_token = result.access_token.clone();
        updated.credential.refresh_token = result.refresh_token;
        updated.credential.expires_at = expires_at;

        Ok(FreshToken {
            access_token: result.access_token,
            account: updated,
        })
    }
}
