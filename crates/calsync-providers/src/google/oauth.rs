//! OAuth 2.0 authorization-code flow for Google, web server variant.
//!
//! # Flow Overview
//!
//! 1. The dashboard asks for a consent URL; a random `state` is attached
//! 2. The user grants access; Google redirects to `/api/calendar/callback`
//! 3. The code is exchanged for an access token and a refresh token
//! 4. Later, the refresh token is traded for new access tokens
//!
//! `access_type=offline` and `prompt=consent` are always requested so that
//! Google issues a refresh token even when the user connected before.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng as _;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::http::{build_http_client, send_error};
use crate::provider::BoxFuture;
use crate::refresh::{TokenEndpoint, TokenGrant};

use super::config::GoogleConfig;

/// Tokens obtained by exchanging an authorization code.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

impl std::fmt::Debug for AuthorizationGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationGrant")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Google's token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug)]
pub struct OAuthClient {
    config: GoogleConfig,
    http_client: reqwest::Client,
}

impl OAuthClient {
    pub fn new(config: GoogleConfig) -> ProviderResult<Self> {
        let http_client = build_http_client(config.timeout)?;
        Ok(Self { config, http_client })
    }

    /// Generates a random state string for CSRF protection.
    pub fn generate_state() -> String {
        let mut rng = rand::rng();
        let bytes: Vec<u8> = (0..24).map(|_| rng.random()).collect();
        URL_SAFE_NO_PAD.encode(&bytes)
    }

    /// Builds the Google consent URL.
    pub fn authorization_url(&self, state: &str) -> String {
        let scope = self.config.scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&\
            state={}&access_type=offline&prompt=consent",
            self.config.auth_url,
            urlencoding::encode(&self.config.credentials.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(&scope),
            urlencoding::encode(state),
        )
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// A grant without a refresh token or lifetime is rejected: the account
    /// could never be refreshed, and the user has to consent again.
    pub async fn exchange_code(&self, code: &str) -> ProviderResult<AuthorizationGrant> {
        let params = [
            ("client_id", self.config.credentials.client_id.as_str()),
            ("client_secret", self.config.credentials.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];

        let response = self.post_token(&params, "code exchange").await?;
        match (response.refresh_token, response.expires_in) {
            (Some(refresh_token), Some(expires_in)) if !refresh_token.is_empty() => {
                info!("obtained tokens for a new calendar account");
                Ok(AuthorizationGrant {
                    access_token: response.access_token,
                    refresh_token,
                    expires_in,
                })
            }
            _ => Err(ProviderError::auth_expired(
                "token response is missing a refresh token or expiry, consent must be granted again",
            )
            .with_provider("google")),
        }
    }

    /// Trades a refresh token for a new access token.
    pub async fn refresh_token(&self, refresh_token: &str) -> ProviderResult<TokenGrant> {
        let params = [
            ("client_id", self.config.credentials.client_id.as_str()),
            ("client_secret", self.config.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let response = self.post_token(&params, "token refresh").await?;
        debug!(rotated = response.refresh_token.is_some(), "refreshed Google access token");
        Ok(TokenGrant {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_in: response.expires_in,
        })
    }

    async fn post_token(&self, params: &[(&str, &str)], what: &str) -> ProviderResult<TokenResponse> {
        let response = self
            .http_client
            .post(&self.config.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| send_error("google", e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            ProviderError::transient(format!("failed to read {} response: {}", what, e))
                .with_provider("google")
        })?;

        if !status.is_success() {
            warn!(%status, body = %body, "{} rejected by Google", what);
            let err = if status.is_server_error() {
                ProviderError::transient(format!("{} failed ({})", what, status))
            } else {
                ProviderError::auth_expired(format!("{} failed ({})", what, status))
            };
            return Err(err.with_provider("google"));
        }

        serde_json::from_str(&body).map_err(|e| {
            ProviderError::invalid_response(format!("invalid token response: {}", e))
                .with_provider("google")
        })
    }
}

impl TokenEndpoint for OAuthClient {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, ProviderResult<TokenGrant>> {
        Box::pin(self.refresh_token(refresh_token))
    }
}
