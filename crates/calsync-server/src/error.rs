//! Server error types.
//!
//! [`ServerError`] covers startup (configuration, store, listener);
//! [`ApiError`] is what request handlers return and renders the JSON error
//! body.

use std::io;
use std::time::Duration;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use calsync_core::TracingError;
use calsync_providers::{ProviderError, ProviderErrorCode};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tracing error: {0}")]
    Tracing(#[from] TracingError),
}

impl ServerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Error categories exposed to API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    RateLimited,
    Unauthorized,
    NotFound,
    InvalidRange,
    /// Malformed body or missing parameters; shares 400 with `invalid_range`.
    InvalidRequest,
    Internal,
}

impl ApiErrorKind {
    pub fn from_code(code: ProviderErrorCode) -> Self {
        match code {
            ProviderErrorCode::RateLimited => Self::RateLimited,
            ProviderErrorCode::AuthExpired | ProviderErrorCode::Forbidden => Self::Unauthorized,
            ProviderErrorCode::AccountNotFound | ProviderErrorCode::NotFound => Self::NotFound,
            ProviderErrorCode::InvalidRange => Self::InvalidRange,
            ProviderErrorCode::InvalidRequest => Self::InvalidRequest,
            ProviderErrorCode::Transient
            | ProviderErrorCode::Conflict
            | ProviderErrorCode::BadRequest
            | ProviderErrorCode::InvalidResponse
            | ProviderErrorCode::Storage
            | ProviderErrorCode::Configuration
            | ProviderErrorCode::Internal => Self::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidRange | Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub kind: ApiErrorKind,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

/// Error returned by request handlers.
///
/// `message` is always safe to show to the end user.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
    pub retry_after: Option<Duration>,
    pub attempts: Option<u32>,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
            attempts: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::InvalidRequest, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Internal, message)
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    fn body(&self) -> ErrorResponse {
        ErrorResponse {
            kind: self.kind,
            error: self.message.clone(),
            retry_after_secs: self.retry_after.map(|d| d.as_secs().max(1)),
            attempts: self.attempts,
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        let kind = ApiErrorKind::from_code(err.code());
        match kind {
            ApiErrorKind::Internal if err.code() == ProviderErrorCode::Transient => {
                warn!(error = %err, "calendar operation failed")
            }
            ApiErrorKind::Internal => error!(error = %err, "calendar operation failed"),
            ApiErrorKind::InvalidRange | ApiErrorKind::InvalidRequest | ApiErrorKind::NotFound => {}
            _ => warn!(error = %err, "calendar operation failed"),
        }
        Self {
            kind,
            message: err.user_message(),
            retry_after: err.retry_after(),
            attempts: err.attempts(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::invalid_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.body())).into_response();
        if self.kind == ApiErrorKind::RateLimited {
            if let Some(wait) = self.retry_after {
                if let Ok(value) = HeaderValue::from_str(&wait.as_secs().max(1).to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
            }
        }
        response
    }
}
