//! Credential storage for connected calendar accounts.
//!
//! [`CredentialStore`] is the only owner of account records. Callers get a
//! clone per operation and must re-read rather than hold on to it.
//!
//! Two local implementations live here: [`MemoryCredentialStore`] for tests
//! and development, [`FileCredentialStore`] for single-node deployments. The
//! PostgREST-backed store is in [`crate::rest_store`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use calsync_core::{AccountId, CalendarAccount, Credential};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::BoxFuture;

/// Persistent storage of calendar accounts and their credentials.
pub trait CredentialStore: Send + Sync {
    /// Loads one account. Fails with `AccountNotFound` when absent.
    fn get<'a>(&'a self, id: &'a AccountId) -> BoxFuture<'a, ProviderResult<CalendarAccount>>;

    /// Inserts or replaces the credential for `(user_id, calendar_email)`.
    ///
    /// An existing record keeps its id; all credential fields are replaced.
    fn upsert<'a>(
        &'a self,
        user_id: &'a str,
        calendar_email: &'a str,
        credential: Credential,
    ) -> BoxFuture<'a, ProviderResult<CalendarAccount>>;

    /// Rewrites the three token fields of an existing account.
    fn update_tokens<'a>(
        &'a self,
        id: &'a AccountId,
        access_token: &'a str,
        refresh_token: Option<&'a str>,
        expires_at: DateTime<Utc>,
    ) -> BoxFuture<'a, ProviderResult<()>>;

    /// All accounts owned by `user_id`, ordered by calendar email.
    fn list_for_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, ProviderResult<Vec<CalendarAccount>>>;
}

fn upsert_into(
    accounts: &mut HashMap<AccountId, CalendarAccount>,
    user_id: &str,
    calendar_email: &str,
    credential: Credential,
) -> CalendarAccount {
    let existing = accounts
        .values_mut()
        .find(|a| a.user_id == user_id && a.calendar_email == calendar_email);

    if let Some(account) = existing {
        account.credential = credential;
        return account.clone();
    }

    let account = CalendarAccount::new(AccountId::generate(), user_id, calendar_email, credential);
    accounts.insert(account.id.clone(), account.clone());
    account
}

fn update_tokens_in(
    accounts: &mut HashMap<AccountId, CalendarAccount>,
    id: &AccountId,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: DateTime<Utc>,
) -> ProviderResult<()> {
    let account = accounts
        .get_mut(id)
        .ok_or_else(|| ProviderError::account_not_found(id))?;
    account.credential.access_token = access_token.to_string();
    account.credential.refresh_token = refresh_token.map(String::from);
    account.credential.expires_at = expires_at;
    Ok(())
}

fn list_in(accounts: &HashMap<AccountId, CalendarAccount>, user_id: &str) -> Vec<CalendarAccount> {
    let mut list: Vec<_> = accounts
        .values()
        .filter(|a| a.user_id == user_id)
        .cloned()
        .collect();
    list.sort_by(|a, b| a.calendar_email.cmp(&b.calendar_email));
    list
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    accounts: RwLock<HashMap<AccountId, CalendarAccount>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store with existing records.
    pub fn with_accounts(accounts: impl IntoIterator<Item = CalendarAccount>) -> Self {
        Self {
            accounts: RwLock::new(accounts.into_iter().map(|a| (a.id.clone(), a)).collect()),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get<'a>(&'a self, id: &'a AccountId) -> BoxFuture<'a, ProviderResult<CalendarAccount>> {
        Box::pin(async move {
            self.accounts
                .read()
                .await
                .get(id)
                .cloned()
                .ok_or_else(|| ProviderError::account_not_found(id))
        })
    }

    fn upsert<'a>(
        &'a self,
        user_id: &'a str,
        calendar_email: &'a str,
        credential: Credential,
    ) -> BoxFuture<'a, ProviderResult<CalendarAccount>> {
        Box::pin(async move {
            let mut accounts = self.accounts.write().await;
            Ok(upsert_into(&mut accounts, user_id, calendar_email, credential))
        })
    }

    fn update_tokens<'a>(
        &'a self,
        id: &'a AccountId,
        access_token: &'a str,
        refresh_token: Option<&'a str>,
        expires_at: DateTime<Utc>,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let mut accounts = self.accounts.write().await;
            update_tokens_in(&mut accounts, id, access_token, refresh_token, expires_at)
        })
    }

    fn list_for_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, ProviderResult<Vec<CalendarAccount>>> {
        Box::pin(async move { Ok(list_in(&*self.accounts.read().await, user_id)) })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    accounts: Vec<CalendarAccount>,
}

/// JSON-file store.
///
/// The whole file is rewritten on every mutation: written to a temporary
/// sibling, restricted to `0600` on Unix, then renamed over the original.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    accounts: Mutex<HashMap<AccountId, CalendarAccount>>,
}

impl FileCredentialStore {
    /// Opens the store at `path`. A missing file is an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> ProviderResult<Self> {
        let path = path.into();
        let accounts = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let file: StoreFile = serde_json::from_str(&content).map_err(|e| {
                    ProviderError::storage(format!("failed to parse {}: {}", path.display(), e))
                        .with_source(e)
                })?;
                info!(path = %path.display(), count = file.accounts.len(), "loaded calendar accounts");
                file.accounts.into_iter().map(|a| (a.id.clone(), a)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no credential file yet");
                HashMap::new()
            }
            Err(e) => {
                return Err(
                    ProviderError::storage(format!("failed to read {}: {}", path.display(), e))
                        .with_source(e),
                );
            }
        };

        Ok(Self {
            path,
            accounts: Mutex::new(accounts),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, accounts: &HashMap<AccountId, CalendarAccount>) -> ProviderResult<()> {
        let mut list: Vec<_> = accounts.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        let content = serde_json::to_string_pretty(&StoreFile { accounts: list })
            .map_err(|e| ProviderError::internal(format!("failed to serialize accounts: {}", e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ProviderError::storage(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, content)
            .await
            .map_err(|e| ProviderError::storage(format!("failed to write credential file: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| ProviderError::storage(format!("failed to restrict permissions: {}", e)))?;
        }

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| ProviderError::storage(format!("failed to replace credential file: {}", e)))?;

        debug!(path = %self.path.display(), "saved calendar accounts");
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get<'a>(&'a self, id: &'a AccountId) -> BoxFuture<'a, ProviderResult<CalendarAccount>> {
        Box::pin(async move {
            self.accounts
                .lock()
                .await
                .get(id)
                .cloned()
                .ok_or_else(|| ProviderError::account_not_found(id))
        })
    }

    fn upsert<'a>(
        &'a self,
        user_id: &'a str,
        calendar_email: &'a str,
        credential: Credential,
    ) -> BoxFuture<'a, ProviderResult<CalendarAccount>> {
        Box::pin(async move {
            let mut accounts = self.accounts.lock().await;
            let mut staged = accounts.clone();
            let account = upsert_into(&mut staged, user_id, calendar_email, credential);
            self.persist(&staged).await?;
            *accounts = staged;
            Ok(account)
        })
    }

    fn update_tokens<'a>(
        &'a self,
        id: &'a AccountId,
        access_token: &'a str,
        refresh_token: Option<&'a str>,
        expires_at: DateTime<Utc>,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let mut accounts = self.accounts.lock().await;
            let mut staged = accounts.clone();
            update_tokens_in(&mut staged, id, access_token, refresh_token, expires_at)?;
            self.persist(&staged).await?;
            *accounts = staged;
            Ok(())
        })
    }

    fn list_for_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, ProviderResult<Vec<CalendarAccount>>> {
        Box::pin(async move { Ok(list_in(&*self.accounts.lock().await, user_id)) })
    }
}
