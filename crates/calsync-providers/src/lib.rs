//! Calendar backends and the resilience layer in front of them.
//!
//! - [`CredentialStore`] - Persistent account records and OAuth tokens
//! - [`TokenRefreshManager`] - Keeps access tokens fresh
//! - [`RetryExecutor`] - Bounded retry with a single refresh on auth failure
//! - [`CalendarGateway`] - CRUD on one account's calendar, normalized events
//! - [`ReconciliationView`] - Merged multi-account view with partial failures
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  ReconciliationView  │
//! └──────────┬───────────┘
//!            ▼
//! ┌──────────────────────┐     ┌──────────────────────┐
//! │   CalendarGateway    │────▶│     CalendarApi      │  (Google)
//! └──────────┬───────────┘     └──────────────────────┘
//!            ▼
//! ┌──────────────────────┐     ┌──────────────────────┐
//! │    RetryExecutor     │────▶│ TokenRefreshManager  │
//! └──────────────────────┘     └──────────┬───────────┘
//!                                         ▼
//!                       CredentialStore + TokenEndpoint
//! ```
//!
//! # Example
//!
//! ```ignore
//! use calsync_providers::{CalendarGateway, GatewayConfig, RetryConfig, RetryExecutor};
//!
//! let executor = Arc::new(RetryExecutor::new(tokens, RetryConfig::default()));
//! let gateway = CalendarGateway::new(api, executor, GatewayConfig::default());
//! let events = gateway.list_events(&account, &window).await?;
//! ```

pub mod error;
pub mod gateway;
#[cfg(feature = "google")]
pub mod google;
#[cfg(any(feature = "google", feature = "rest-store"))]
mod http;
pub mod normalize;
pub mod provider;
pub mod raw_event;
pub mod reconcile;
pub mod refresh;
#[cfg(feature = "rest-store")]
pub mod rest_store;
pub mod retry;
pub mod store;

#[cfg(test)]
mod testing;

pub use error::{FailureClass, ProviderError, ProviderErrorCode, ProviderResult};
pub use gateway::{CalendarGateway, DEFAULT_MAX_PAGES, GatewayConfig, PRIMARY_CALENDAR};
pub use normalize::{NormalizeError, normalize_event, normalize_events};
pub use provider::{BoxFuture, CalendarApi, EventPage};
pub use raw_event::{RawAttendee, RawEvent, RawEventTime, RawEventWrite};
pub use reconcile::{AccountFailure, ReconciledView, ReconciliationView, sort_events};
pub use refresh::{FreshToken, TokenEndpoint, TokenGrant, TokenRefreshManager, TokenRefreshResult};
#[cfg(feature = "rest-store")]
pub use rest_store::{RestCredentialStore, RestStoreConfig};
pub use retry::{
    AttemptContext, Decision, ExecState, ExecutionTrace, RetryConfig, RetryExecutor, decide,
};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
