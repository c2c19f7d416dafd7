//! Retry and backoff around single provider calls.
//!
//! [`RetryExecutor`] runs an operation as a small state machine:
//!
//! ```text
//!            ┌──────── retry (sleep) ───────┐
//!            ▼                              │
//!   ──▶ Attempting ──── ok ────▶ Succeeded  │
//!        │   ▲    └── error ── decide() ────┤
//!        │   │                              │
//!        │   └── new token ── Refreshing ◀──┘ (auth expired, once)
//!        └────────────── give up ──────────▶ Failed
//! ```
//!
//! The decision for each failure is made by [`decide`], a pure function, so
//! the budget and refresh-once rules can be tested without any I/O.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use calsync_core::{AccountId, CalendarAccount};
use tracing::{debug, warn};

use crate::error::{FailureClass, ProviderError, ProviderResult};
use crate::refresh::TokenRefreshManager;

/// Attempt budget and delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Pause before retrying a transient failure.
    pub transient_delay: Duration,
    /// Pause after a rate-limit response that carried no hint.
    pub default_retry_after: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            transient_delay: Duration::from_secs(1),
            default_retry_after: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_transient_delay(mut self, delay: Duration) -> Self {
        self.transient_delay = delay;
        self
    }

    pub fn with_default_retry_after(mut self, delay: Duration) -> Self {
        self.default_retry_after = delay;
        self
    }
}

/// States of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Attempting,
    Refreshing,
    Succeeded,
    Failed,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Sleep, then attempt again with the current token.
    Retry(Duration),
    /// Refresh the token, then attempt again immediately.
    Refresh,
    /// Give up. `exhausted` is set when the budget ran out on a recoverable failure.
    Fail { exhausted: bool },
}

/// Where an execution stands when a failure is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptContext {
    /// Attempts made so far, including the failed one.
    pub attempts: u32,
    pub max_attempts: u32,
    /// Refreshes already performed in this execution.
    pub refreshes: u32,
    /// Whether the account holds a refresh token.
    pub can_refresh: bool,
}

impl AttemptContext {
    fn attempts_remain(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Maps a failure onto the next step.
pub fn decide(error: &ProviderError, ctx: AttemptContext, config: &RetryConfig) -> Decision {
    match error.class() {
        FailureClass::Fatal => Decision::Fail { exhausted: false },
        FailureClass::AuthExpired => {
            if ctx.can_refresh && ctx.refreshes == 0 && ctx.attempts_remain() {
                Decision::Refresh
            } else {
                Decision::Fail { exhausted: false }
            }
        }
        FailureClass::RateLimited if ctx.attempts_remain() => {
            Decision::Retry(error.retry_after().unwrap_or(config.default_retry_after))
        }
        FailureClass::Transient if ctx.attempts_remain() => Decision::Retry(config.transient_delay),
        FailureClass::RateLimited | FailureClass::Transient => Decision::Fail { exhausted: true },
    }
}

/// Outcome of [`RetryExecutor::execute_traced`].
#[derive(Debug)]
pub struct ExecutionTrace<T> {
    /// Calls made to the operation.
    pub attempts: u32,
    /// Refreshes triggered by an auth failure.
    pub refreshes: u32,
    /// Every state entered, in order.
    pub states: Vec<ExecState>,
    pub result: ProviderResult<T>,
}

enum State<T> {
    Attempting { token: Option<String> },
    Refreshing,
    Succeeded(T),
    Failed(ProviderError),
}

impl<T> State<T> {
    fn label(&self) -> ExecState {
        match self {
            Self::Attempting { .. } => ExecState::Attempting,
            Self::Refreshing => ExecState::Refreshing,
            Self::Succeeded(_) => ExecState::Succeeded,
            Self::Failed(_) => ExecState::Failed,
        }
    }
}

/// Runs provider calls with token refresh and bounded retries.
pub struct RetryExecutor {
    tokens: Arc<TokenRefreshManager>,
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(tokens: Arc<TokenRefreshManager>, config: RetryConfig) -> Self {
        Self { tokens, config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn tokens(&self) -> &Arc<TokenRefreshManager> {
        &self.tokens
    }

    /// Runs `op` with a fresh access token, at most `max_attempts` times.
    pub async fn execute<T, F, Fut>(
        &self,
        account: &CalendarAccount,
        max_attempts: u32,
        op: F,
    ) -> ProviderResult<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        self.execute_traced(account, max_attempts, op).await.result
    }

    /// Like [`execute`](Self::execute), also reporting what happened.
    pub async fn execute_traced<T, F, Fut>(
        &self,
        account: &CalendarAccount,
        max_attempts: u32,
        mut op: F,
    ) -> ExecutionTrace<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let max_attempts = max_attempts.max(1);
        let mut attempts = 0;
        let mut refreshes = 0;
        let mut current = account.clone();
        let mut states = Vec::new();
        let mut state: State<T> = State::Attempting { token: None };

        let result = loop {
            states.push(state.label());
            state = match state {
                State::Attempting { token } => {
                    // A token minted by the refresh step is used as is; otherwise
                    // the account is re-read so a concurrent refresh is picked up.
                    let token = match token {
                        Some(token) => Ok(token),
                        None => self.current_token(&account.id).await.map(|fresh| {
                            current = fresh.account;
                            fresh.access_token
                        }),
                    };

                    match token {
                        Err(e) => State::Failed(e),
                        Ok(token) => {
                            attempts += 1;
                            match op(token).await {
                                Ok(value) => State::Succeeded(value),
                                Err(e) => {
                                    let ctx = AttemptContext {
                                        attempts,
                                        max_attempts,
                                        refreshes,
                                        can_refresh: current.has_refresh_token(),
                                    };
                                    self.next_state(e, ctx, &current.id).await
                                }
                            }
                        }
                    }
                }
                State::Refreshing => {
                    refreshes += 1;
                    match self.tokens.force_refresh(&current).await {
                        Ok(fresh) => {
                            current = fresh.account;
                            State::Attempting {
                                token: Some(fresh.access_token),
                            }
                        }
                        Err(e) => State::Failed(e),
                    }
                }
                State::Succeeded(value) => break Ok(value),
                State::Failed(e) => break Err(e),
            };
        };

        ExecutionTrace {
            attempts,
            refreshes,
            states,
            result,
        }
    }

    async fn current_token(&self, id: &AccountId) -> ProviderResult<crate::refresh::FreshToken> {
        let account = self.tokens.store().get(id).await?;
        self.tokens.ensure_fresh_token(&account).await
    }

    async fn next_state<T>(&self, error: ProviderError, ctx: AttemptContext, id: &AccountId) -> State<T> {
        match decide(&error, ctx, &self.config) {
            Decision::Retry(wait) => {
                warn!(
                    account_id = %id,
                    attempt = ctx.attempts,
                    max_attempts = ctx.max_attempts,
                    wait_ms = wait.as_millis() as u64,
                    error = %error,
                    "provider call failed, retrying"
                );
                tokio::time::sleep(wait).await;
                State::Attempting { token: None }
            }
            Decision::Refresh => {
                debug!(account_id = %id, "access token rejected, refreshing");
                State::Refreshing
            }
            Decision::Fail { exhausted: true } => {
                warn!(account_id = %id, attempts = ctx.attempts, error = %error, "retry budget exhausted");
                State::Failed(error.with_attempts(ctx.attempts))
            }
            Decision::Fail { exhausted: false } => State::Failed(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorCode;
    use crate::testing::FakeEndpoint;
    use crate::store::{CredentialStore, MemoryCredentialStore};
    use calsync_core::Credential;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Mutex;

    fn account(refresh: Option<&str>) -> CalendarAccount {
        CalendarAccount::new(
            AccountId::new("acc-1"),
            "user-1",
            "me@example.com",
            Credential::new(
                "stored-token",
                refresh.map(String::from),
                Utc::now() + ChronoDuration::hours(1),
            ),
        )
    }

    fn executor(
        account: &CalendarAccount,
        endpoint: Arc<FakeEndpoint>,
    ) -> (RetryExecutor, Arc<MemoryCredentialStore>) {
        let store = Arc::new(MemoryCredentialStore::with_accounts([account.clone()]));
        let tokens = Arc::new(TokenRefreshManager::new(store.clone(), endpoint));
        (RetryExecutor::new(tokens, RetryConfig::default()), store)
    }

    fn ctx(attempts: u32, refreshes: u32, can_refresh: bool) -> AttemptContext {
        AttemptContext {
            attempts,
            max_attempts: 3,
            refreshes,
            can_refresh,
        }
    }

    mod decisions {
        use super::*;

        #[test]
        fn rate_limit_uses_hint_or_default() {
            let config = RetryConfig::default();
            let hinted = ProviderError::rate_limited("slow").with_retry_after(Duration::from_secs(5));
            assert_eq!(
                decide(&hinted, ctx(1, 0, true), &config),
                Decision::Retry(Duration::from_secs(5))
            );
            let bare = ProviderError::rate_limited("slow");
            assert_eq!(
                decide(&bare, ctx(1, 0, true), &config),
                Decision::Retry(Duration::from_secs(60))
            );
            assert_eq!(
                decide(&bare, ctx(3, 0, true), &config),
                Decision::Fail { exhausted: true }
            );
        }

        #[test]
        fn auth_expired_refreshes_once() {
            let config = RetryConfig::default();
            let err = ProviderError::auth_expired("401");
            assert_eq!(decide(&err, ctx(1, 0, true), &config), Decision::Refresh);
            assert_eq!(
                decide(&err, ctx(2, 1, true), &config),
                Decision::Fail { exhausted: false }
            );
            assert_eq!(
                decide(&err, ctx(1, 0, false), &config),
                Decision::Fail { exhausted: false }
            );
            assert_eq!(
                decide(&err, ctx(3, 0, true), &config),
                Decision::Fail { exhausted: false }
            );
        }

        #[test]
        fn transient_and_fatal() {
            let config = RetryConfig::default().with_transient_delay(Duration::from_millis(250));
            let transient = ProviderError::transient("503");
            assert_eq!(
                decide(&transient, ctx(2, 0, true), &config),
                Decision::Retry(Duration::from_millis(250))
            );
            let fatal = ProviderError::not_found("gone");
            assert_eq!(
                decide(&fatal, ctx(1, 0, true), &config),
                Decision::Fail { exhausted: false }
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_stops_after_budget() {
        let acc = account(Some("r"));
        let endpoint = Arc::new(FakeEndpoint::granting("new", None, None));
        let (executor, _) = executor(&acc, endpoint);

        let calls = Mutex::new(0u32);
        let trace = executor
            .execute_traced(&acc, 3, |_token| {
                *calls.lock().unwrap() += 1;
                async { Err::<(), _>(ProviderError::rate_limited("429")) }
            })
            .await;

        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!(trace.attempts, 3);
        assert_eq!(trace.refreshes, 0);
        let err = trace.result.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::RateLimited);
        assert_eq!(err.attempts(), Some(3));
        assert_eq!(trace.states.last(), Some(&ExecState::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn auth_expired_once_then_success() {
        let acc = account(Some("r"));
        let endpoint = Arc::new(FakeEndpoint::granting("refreshed-token", None, Some(3600)));
        let (executor, store) = executor(&acc, endpoint.clone());

        let seen = Mutex::new(Vec::new());
        let trace = executor
            .execute_traced(&acc, 3, |token| {
                let first = {
                    let mut seen = seen.lock().unwrap();
                    seen.push(token);
                    seen.len() == 1
                };
                async move {
                    if first {
                        Err(ProviderError::auth_expired("401"))
                    } else {
                        Ok("listed")
                    }
                }
            })
            .await;

        assert_eq!(trace.result.unwrap(), "listed");
        assert_eq!(trace.attempts, 2);
        assert_eq!(trace.refreshes, 1);
        assert_eq!(endpoint.calls(), 1);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["stored-token".to_string(), "refreshed-token".to_string()]
        );
        assert_eq!(
            trace.states,
            vec![
                ExecState::Attempting,
                ExecState::Refreshing,
                ExecState::Attempting,
                ExecState::Succeeded
            ]
        );
        assert_eq!(store.get(&acc.id).await.unwrap().access_token(), "refreshed-token");
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_auth_failure_refreshes_only_once() {
        let acc = account(Some("r"));
        let endpoint = Arc::new(FakeEndpoint::granting("refreshed", None, None));
        let (executor, _) = executor(&acc, endpoint.clone());

        let trace = executor
            .execute_traced(&acc, 3, |_token| async {
                Err::<(), _>(ProviderError::auth_expired("401"))
            })
            .await;

        assert_eq!(trace.attempts, 2);
        assert_eq!(trace.refreshes, 1);
        assert_eq!(endpoint.calls(), 1);
        assert_eq!(trace.result.unwrap_err().code(), ProviderErrorCode::AuthExpired);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_expired_without_refresh_token_aborts() {
        let acc = account(None);
        let endpoint = Arc::new(FakeEndpoint::granting("refreshed", None, None));
        let (executor, _) = executor(&acc, endpoint.clone());

        let trace = executor
            .execute_traced(&acc, 3, |_token| async {
                Err::<(), _>(ProviderError::auth_expired("401"))
            })
            .await;

        assert_eq!(trace.attempts, 1);
        assert_eq!(trace.refreshes, 0);
        assert_eq!(endpoint.calls(), 0);
        assert_eq!(trace.result.unwrap_err().code(), ProviderErrorCode::AuthExpired);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_surfaces_auth_expired() {
        let acc = account(Some("revoked"));
        let endpoint = Arc::new(FakeEndpoint::failing());
        let (executor, _) = executor(&acc, endpoint.clone());

        let trace = executor
            .execute_traced(&acc, 3, |_token| async {
                Err::<(), _>(ProviderError::auth_expired("401"))
            })
            .await;

        assert_eq!(trace.attempts, 1);
        assert_eq!(trace.refreshes, 1);
        assert_eq!(trace.result.unwrap_err().code(), ProviderErrorCode::AuthExpired);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried() {
        let acc = account(Some("r"));
        let endpoint = Arc::new(FakeEndpoint::granting("new", None, None));
        let (executor, _) = executor(&acc, endpoint);

        let calls = Mutex::new(0u32);
        let result = executor
            .execute(&acc, 3, |_token| {
                let n = {
                    let mut calls = calls.lock().unwrap();
                    *calls += 1;
                    *calls
                };
                async move {
                    if n < 3 {
                        Err(ProviderError::transient("502"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn fatal_failure_is_not_retried() {
        let acc = account(Some("r"));
        let endpoint = Arc::new(FakeEndpoint::granting("new", None, None));
        let (executor, _) = executor(&acc, endpoint);

        let trace = executor
            .execute_traced(&acc, 3, |_token| async {
                Err::<(), _>(ProviderError::bad_request("400"))
            })
            .await;

        assert_eq!(trace.attempts, 1);
        let err = trace.result.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::BadRequest);
        assert_eq!(err.attempts(), None);
    }

    #[tokio::test]
    async fn each_attempt_rereads_the_store() {
        let acc = account(Some("r"));
        let endpoint = Arc::new(FakeEndpoint::granting("new", None, None));
        let (executor, store) = executor(&acc, endpoint);

        store
            .update_tokens(&acc.id, "rotated-elsewhere", Some("r"), acc.expires_at())
            .await
            .unwrap();

        let token = executor
            .execute(&acc, 1, |token| async move { Ok(token) })
            .await
            .unwrap();
        assert_eq!(token, "rotated-elsewhere");
    }

    #[tokio::test]
    async fn missing_account_fails_without_calling() {
        let acc = account(Some("r"));
        let endpoint = Arc::new(FakeEndpoint::granting("new", None, None));
        let store = Arc::new(MemoryCredentialStore::new());
        let tokens = Arc::new(TokenRefreshManager::new(store, endpoint));
        let executor = RetryExecutor::new(tokens, RetryConfig::default());

        let trace = executor
            .execute_traced(&acc, 3, |_token| async { Ok(()) })
            .await;
        assert_eq!(trace.attempts, 0);
        assert_eq!(
            trace.result.unwrap_err().code(),
            ProviderErrorCode::AccountNotFound
        );
    }
}
