//! Shared application state and its assembly from configuration.

use std::sync::Arc;

use calsync_core::RangePolicy;
use calsync_providers::google::{GoogleCalendarClient, GoogleConfig, OAuthClient};
use calsync_providers::{
    CalendarApi, CalendarGateway, CredentialStore, FileCredentialStore, GatewayConfig,
    MemoryCredentialStore, ReconciliationView, RestCredentialStore, RetryConfig, RetryExecutor,
    TokenRefreshManager,
};
use tracing::{info, warn};

use crate::config::{ServerConfig, StoreKind};
use crate::error::ServerResult;
use crate::pending::PendingAuthorizations;

/// Everything a request handler needs. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CredentialStore>,
    pub oauth: Arc<OAuthClient>,
    pub gateway: Arc<CalendarGateway>,
    pub view: Arc<ReconciliationView>,
    pub pending: Arc<PendingAuthorizations>,
}

impl AppState {
    /// Builds the state described by `config`, opening the credential store.
    pub async fn from_config(config: &ServerConfig) -> ServerResult<Self> {
        let store = open_store(config).await?;
        Self::build(
            config.google_config()?,
            store,
            config.retry_config(),
            config.gateway_config(),
        )
    }

    /// Wires the Google clients, token refresh and retry layers over `store`.
    pub fn build(
        google: GoogleConfig,
        store: Arc<dyn CredentialStore>,
        retry: RetryConfig,
        gateway: GatewayConfig,
    ) -> ServerResult<Self> {
        let oauth = Arc::new(OAuthClient::new(google.clone())?);
        let api: Arc<dyn CalendarApi> = Arc::new(GoogleCalendarClient::new(&google)?);

        let tokens = Arc::new(TokenRefreshManager::new(store.clone(), oauth.clone()));
        let executor = Arc::new(RetryExecutor::new(tokens, retry));
        let gateway = Arc::new(CalendarGateway::new(api, executor, gateway));
        let view = Arc::new(ReconciliationView::new(gateway.clone(), RangePolicy::default()));

        Ok(Self {
            store,
            oauth,
            gateway,
            view,
            pending: Arc::new(PendingAuthorizations::default()),
        })
    }
}

async fn open_store(config: &ServerConfig) -> ServerResult<Arc<dyn CredentialStore>> {
    let store: Arc<dyn CredentialStore> = match config.store.kind {
        StoreKind::Memory => {
            warn!("using in-memory credential store, accounts are lost on restart");
            Arc::new(MemoryCredentialStore::new())
        }
        StoreKind::File => {
            let path = config.store_path();
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            info!(path = %path.display(), "using file credential store");
            Arc::new(FileCredentialStore::open(path).await?)
        }
        StoreKind::Rest => {
            let rest = config.rest_store_config()?;
            info!(url = %rest.base_url, table = %rest.table, "using REST credential store");
            Arc::new(RestCredentialStore::new(rest)?)
        }
    };
    Ok(store)
}
