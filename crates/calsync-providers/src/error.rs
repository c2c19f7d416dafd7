//! Error types for calendar sync operations.
//!
//! Every failure coming out of the store, the token endpoint or the calendar
//! API is classified into a [`ProviderErrorCode`] at the boundary where it is
//! observed. The retry executor only looks at the [`FailureClass`].

use std::fmt;
use std::time::Duration;

use calsync_core::{DraftError, TimeError};
use serde::Serialize;
use thiserror::Error;

/// The category of a provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorCode {
    /// Caller-supplied time window is unparsable or inverted.
    InvalidRange,
    /// Caller-supplied event data is invalid.
    InvalidRequest,
    /// No credential record for the referenced account.
    AccountNotFound,
    /// Provider throttling (429, or 403 with a rate-limit reason).
    RateLimited,
    /// Access token rejected and could not be refreshed.
    AuthExpired,
    /// Authenticated but not permitted (missing scope, no access to calendar).
    Forbidden,
    /// Network failure, timeout or 5xx.
    Transient,
    /// Remote resource does not exist (404, 410).
    NotFound,
    /// Remote resource already exists (409).
    Conflict,
    /// Provider rejected the request as malformed (400).
    BadRequest,
    /// Provider answered with something we could not parse.
    InvalidResponse,
    /// Credential store failure.
    Storage,
    /// Missing or invalid configuration.
    Configuration,
    /// Unexpected state.
    Internal,
}

/// How the retry executor treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    RateLimited,
    AuthExpired,
    Transient,
    Fatal,
}

impl ProviderErrorCode {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::RateLimited => FailureClass::RateLimited,
            Self::AuthExpired => FailureClass::AuthExpired,
            Self::Transient => FailureClass::Transient,
            _ => FailureClass::Fatal,
        }
    }

    /// Returns true if this error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), FailureClass::RateLimited | FailureClass::Transient)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRange => "invalid_range",
            Self::InvalidRequest => "invalid_request",
            Self::AccountNotFound => "account_not_found",
            Self::RateLimited => "rate_limited",
            Self::AuthExpired => "auth_expired",
            Self::Forbidden => "forbidden",
            Self::Transient => "transient",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::BadRequest => "bad_request",
            Self::InvalidResponse => "invalid_response",
            Self::Storage => "storage",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An error from a calendar sync operation.
#[derive(Debug, Error)]
pub struct ProviderError {
    code: ProviderErrorCode,
    message: String,
    /// The provider that generated this error (e.g., "google", "postgrest").
    provider: Option<String>,
    /// Provider-suggested wait before retrying.
    retry_after: Option<Duration>,
    /// Number of attempts made before this error was surfaced.
    attempts: Option<u32>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider: None,
            retry_after: None,
            attempts: None,
            source: None,
        }
    }

    pub fn invalid_range(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InvalidRange, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InvalidRequest, message)
    }

    pub fn account_not_found(account_id: impl fmt::Display) -> Self {
        Self::new(
            ProviderErrorCode::AccountNotFound,
            format!("calendar account {} not found", account_id),
        )
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::RateLimited, message)
    }

    pub fn auth_expired(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::AuthExpired, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Forbidden, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Transient, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Conflict, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::BadRequest, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InvalidResponse, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Storage, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Configuration, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Internal, message)
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> ProviderErrorCode {
        self.code
    }

    pub fn class(&self) -> FailureClass {
        self.code.class()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub fn attempts(&self) -> Option<u32> {
        self.attempts
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Message safe to show to an end user.
    ///
    /// Provider details stay in the logs; only caller input errors are
    /// echoed back as is.
    pub fn user_message(&self) -> String {
        match self.code {
            ProviderErrorCode::RateLimited | ProviderErrorCode::Transient => match self.retry_after {
                Some(wait) => format!(
                    "The calendar service is busy, try again in {} seconds.",
                    wait.as_secs().max(1)
                ),
                None => "The calendar service is busy, try again shortly.".to_string(),
            },
            ProviderErrorCode::AuthExpired | ProviderErrorCode::Forbidden => {
                "Calendar access has expired, reconnect your calendar.".to_string()
            }
            ProviderErrorCode::AccountNotFound => "Calendar account not found.".to_string(),
            ProviderErrorCode::NotFound => "Event not found.".to_string(),
            ProviderErrorCode::InvalidRange | ProviderErrorCode::InvalidRequest => self.message.clone(),
            _ => "The calendar operation failed.".to_string(),
        }
    }

    /// Copies code, message and hints; the source chain is not carried.
    pub fn detached(&self) -> Self {
        Self {
            code: self.code,
            message: self.message.clone(),
            provider: self.provider.clone(),
            retry_after: self.retry_after,
            attempts: self.attempts,
            source: None,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref provider) = self.provider {
            write!(f, "[{}] ", provider)?;
        }
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(attempts) = self.attempts {
            write!(f, " (after {} attempts)", attempts)?;
        }
        Ok(())
    }
}

impl From<TimeError> for ProviderError {
    fn from(err: TimeError) -> Self {
        Self::invalid_range(err.to_string()).with_source(err)
    }
}

impl From<DraftError> for ProviderError {
    fn from(err: DraftError) -> Self {
        Self::invalid_request(err.to_string()).with_source(err)
    }
}

/// A specialized Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;
