//! Connected calendar accounts and their OAuth credentials.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Opaque, stable identifier of a connected calendar account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Tokens are considered expired this long before the provider's deadline.
pub const EXPIRY_SKEW_SECS: i64 = 60;

/// Longest token lifetime taken from a provider; larger values are clamped.
pub const MAX_TOKEN_LIFETIME_SECS: i64 = 30 * 24 * 3600;

/// Expiry to persist for a token issued at `now` with a lifetime of
/// `expires_in_secs`.
///
/// The lifetime is clamped to `0..=MAX_TOKEN_LIFETIME_SECS` and shortened by
/// [`EXPIRY_SKEW_SECS`]; the result is never before `now`.
pub fn token_expiry(now: DateTime<Utc>, expires_in_secs: i64) -> DateTime<Utc> {
    let lifetime = expires_in_secs.clamp(0, MAX_TOKEN_LIFETIME_SECS);
    let usable = (lifetime - EXPIRY_SKEW_SECS).max(0);
    now.checked_add_signed(Duration::seconds(usable))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// The OAuth credential triple held for one calendar account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at,
        }
    }

    /// Builds a credential from a token grant issued at `now`, see [`token_expiry`].
    pub fn from_grant(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in_secs: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(access_token, refresh_token, token_expiry(now, expires_in_secs))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A connected calendar: identity plus credential.
///
/// At most one account exists per `(user_id, calendar_email)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarAccount {
    pub id: AccountId,
    /// Owner of the account in the dashboard.
    pub user_id: String,
    /// External identity of the connected calendar.
    pub calendar_email: String,
    #[serde(flatten)]
    pub credential: Credential,
}

impl CalendarAccount {
    pub fn new(
        id: AccountId,
        user_id: impl Into<String>,
        calendar_email: impl Into<String>,
        credential: Credential,
    ) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            calendar_email: calendar_email.into(),
            credential,
        }
    }

    pub fn access_token(&self) -> &str {
        &self.credential.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.credential.refresh_token.as_deref()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.credential.expires_at
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token().is_some_and(|t| !t.is_empty())
    }

    /// The stored access token is usable while `now <= expires_at`.
    pub fn is_token_valid_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.credential.expires_at
    }

    /// Public projection without secrets.
    pub fn summary(&self) -> AccountSummary {
        AccountSummary {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            calendar_email: self.calendar_email.clone(),
            expires_at: self.credential.expires_at,
            can_refresh: self.has_refresh_token(),
        }
    }
}

/// What the HTTP surface exposes about an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub id: AccountId,
    pub user_id: String,
    pub calendar_email: String,
    pub expires_at: DateTime<Utc>,
    pub can_refresh: bool,
}
