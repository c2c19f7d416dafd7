//! Server configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/calsync/config.toml` by default; every section is optional.
//!
//! ```toml
//! listen = "0.0.0.0:8080"
//! public_url = "https://calendar.example.com"
//!
//! [google]
//! client_id = "env::GOOGLE_CLIENT_ID"
//! client_secret = "env::GOOGLE_CLIENT_SECRET"
//!
//! [store]
//! kind = "rest"
//! url = "https://db.example.com/rest/v1"
//! api_key = "env::SERVICE_ROLE_KEY"
//! ```
//!
//! Secret values (`client_id`, `client_secret`, `api_key`) accept `env::VAR`
//! references. `GOOGLE_CLIENT_ID` and `GOOGLE_CLIENT_SECRET` in the
//! environment override the file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use calsync_providers::google::{GoogleConfig, OAuthCredentials};
use calsync_providers::{GatewayConfig, RestStoreConfig, RetryConfig};
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};
use crate::secret;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Externally visible base URL; the OAuth callback hangs off it.
    pub public_url: String,
    pub google: GoogleSettings,
    pub store: StoreSettings,
    pub retry: RetrySettings,
    pub calendar: CalendarSettings,
    pub logging: LoggingSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            public_url: "http://localhost:8080".to_string(),
            google: GoogleSettings::default(),
            store: StoreSettings::default(),
            retry: RetrySettings::default(),
            calendar: CalendarSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Google OAuth client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleSettings {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Overrides the default consent scopes when non-empty.
    pub scopes: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for GoogleSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            scopes: Vec::new(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    #[default]
    File,
    Rest,
}

/// Where account credentials are kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub kind: StoreKind,
    /// JSON file for `kind = "file"`; defaults to the data directory.
    pub path: Option<PathBuf>,
    /// REST endpoint for `kind = "rest"`.
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub table: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub transient_delay_ms: u64,
    pub default_retry_after_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            transient_delay_ms: 1000,
            default_retry_after_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarSettings {
    /// IANA zone attached to timed events created without one.
    pub default_time_zone: String,
}

impl Default for CalendarSettings {
    fn default() -> Self {
        Self {
            default_time_zone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl ServerConfig {
    /// Loads the configuration and applies environment overrides.
    ///
    /// An explicit `path` must exist; the default path may be absent, in
    /// which case defaults are used.
    pub fn load(path: Option<&Path>) -> ServerResult<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load_from(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> ServerResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServerError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ServerResult<Self> {
        toml::from_str(content).map_err(|e| ServerError::config(format!("failed to parse config: {}", e)))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calsync")
            .join("config.toml")
    }

    /// Returns the default account file for the file store.
    pub fn default_store_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calsync")
            .join("accounts.json")
    }

    /// Applies `GOOGLE_CLIENT_ID` / `GOOGLE_CLIENT_SECRET` from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("GOOGLE_CLIENT_ID").filter(|v| !v.is_empty()) {
            self.google.client_id = Some(id);
        }
        if let Some(secret) = lookup("GOOGLE_CLIENT_SECRET").filter(|v| !v.is_empty()) {
            self.google.client_secret = Some(secret);
        }
    }

    /// Checks the settings that would otherwise fail at the first request.
    pub fn validate(&self) -> ServerResult<()> {
        self.credentials()?;
        if self.retry.max_attempts == 0 {
            return Err(ServerError::config("retry.max_attempts must be at least 1"));
        }
        check_http_url("public_url", &self.public_url)?;
        if self.store.kind == StoreKind::Rest {
            let rest = self.rest_store_config()?;
            check_http_url("store.url", &rest.base_url)?;
        }
        Ok(())
    }

    fn credentials(&self) -> ServerResult<OAuthCredentials> {
        let raw_id = self.google.client_id.as_deref().ok_or_else(|| {
            ServerError::config(format!(
                "Google credentials not found. Add to {}:\n  \
                 [google]\n  \
                 client_id = \"YOUR_ID.apps.googleusercontent.com\"\n  \
                 client_secret = \"YOUR_SECRET\"\n\n  \
                 or set GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET",
                Self::default_path().display()
            ))
        })?;
        let raw_secret = self
            .google
            .client_secret
            .as_deref()
            .ok_or_else(|| ServerError::config("client_secret is missing from [google]"))?;

        let client_id = secret::resolve(raw_id)
            .map_err(|e| ServerError::config(format!("failed to resolve client_id: {}", e)))?;
        let client_secret = secret::resolve(raw_secret)
            .map_err(|e| ServerError::config(format!("failed to resolve client_secret: {}", e)))?;

        let credentials = OAuthCredentials::new(client_id, client_secret);
        credentials.validate().map_err(ServerError::config)?;
        Ok(credentials)
    }

    pub fn google_config(&self) -> ServerResult<GoogleConfig> {
        let config = GoogleConfig::new(self.credentials()?, GoogleConfig::callback_uri(&self.public_url))
            .with_scopes(self.google.scopes.clone())
            .with_timeout(Duration::from_secs(self.google.timeout_secs.max(1)));
        Ok(config)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::default()
            .with_max_attempts(self.retry.max_attempts)
            .with_transient_delay(Duration::from_millis(self.retry.transient_delay_ms))
            .with_default_retry_after(Duration::from_secs(self.retry.default_retry_after_secs))
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig::default()
            .with_default_time_zone(self.calendar.default_time_zone.clone())
            .with_max_attempts(self.retry.max_attempts)
    }

    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(Self::default_store_path)
    }

    pub fn rest_store_config(&self) -> ServerResult<RestStoreConfig> {
        let url = self
            .store
            .url
            .as_deref()
            .ok_or_else(|| ServerError::config("store.url is required for the rest store"))?;
        let raw_key = self
            .store
            .api_key
            .as_deref()
            .ok_or_else(|| ServerError::config("store.api_key is required for the rest store"))?;
        let api_key = secret::resolve(raw_key)
            .map_err(|e| ServerError::config(format!("failed to resolve store.api_key: {}", e)))?;

        let mut config = RestStoreConfig::new(url, api_key);
        if let Some(ref table) = self.store.table {
            config = config.with_table(table.clone());
        }
        Ok(config)
    }
}

fn check_http_url(field: &str, value: &str) -> ServerResult<()> {
    let url = url::Url::parse(value)
        .map_err(|e| ServerError::config(format!("{} is not a valid URL: {}", field, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ServerError::config(format!(
            "{} must be an http(s) URL, got scheme {:?}",
            field, other
        ))),
    }
}
