//! HTTP API for the calendar dashboard.
//!
//! This crate exposes:
//! - The Google OAuth connect flow (consent URL and callback)
//! - Account listing per user
//! - Event CRUD on one account, with retry and token refresh
//! - A merged, chronological view across all of a user's accounts
//!
//! # Example
//!
//! ```rust,no_run
//! use calsync_server::{AppState, ServerConfig, router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::load(None)?;
//!     let state = AppState::from_config(&config).await?;
//!     let listener = tokio::net::TcpListener::bind(config.listen).await?;
//!     axum::serve(listener, router(state)).await?;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod handler;
mod pending;
mod secret;
mod state;

use axum::Router;
use axum::routing::{get, patch};
use tower_http::trace::TraceLayer;

pub use config::{
    CalendarSettings, GoogleSettings, LoggingSettings, RetrySettings, ServerConfig, StoreKind,
    StoreSettings,
};
pub use error::{ApiError, ApiErrorKind, ErrorResponse, ServerError, ServerResult};
pub use pending::{DEFAULT_MAX_PENDING, DEFAULT_STATE_TTL, PendingAuthorizations};
pub use state::AppState;

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handler::health))
        .route("/api/calendar/auth-url", get(handler::auth_url))
        .route("/api/calendar/callback", get(handler::callback))
        .route("/api/users/:user_id/accounts", get(handler::list_accounts))
        .route("/api/users/:user_id/events", get(handler::user_events))
        .route(
            "/api/accounts/:account_id/events",
            get(handler::account_events).post(handler::create_event),
        )
        .route(
            "/api/accounts/:account_id/events/:event_id",
            patch(handler::update_event).delete(handler::delete_event),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
