//! CredentialStore - storage for the single bearer credential.
//!
//! Sync logic only ever reads the credential; it changes through explicit
//! `save`/`revoke` calls. The system keyring is the default backend, with a
//! JSON file fallback for machines without a secret service.

use crate::error::{SyncError, SyncResult};
use crate::storage::fs::atomic_write;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

const KEYRING_SERVICE: &str = "notesync";
const KEYRING_USER: &str = "github_token";

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Current credential, `None` when nothing is stored.
    async fn load(&self) -> SyncResult<Option<String>>;

    async fn save(&self, token: &str) -> SyncResult<()>;

    /// Forget the credential. Revoking an absent credential succeeds.
    async fn revoke(&self) -> SyncResult<()>;

    async fn is_configured(&self) -> bool {
        matches!(self.load().await, Ok(Some(_)))
    }
}

/// Load the credential or fail with `SyncError::Authentication`.
pub async fn require_token(store: &dyn CredentialStore) -> SyncResult<String> {
    store
        .load()
        .await?
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| SyncError::Authentication("No GitHub token configured".into()))
}

/// System keychain backend.
pub struct KeyringCredentialStore {
    service: String,
    user: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self {
            service: KEYRING_SERVICE.to_string(),
            user: KEYRING_USER.to_string(),
        }
    }

    fn entry(service: &str, user: &str) -> SyncResult<keyring::Entry> {
        keyring::Entry::new(service, user)
            .map_err(|e| SyncError::Storage(format!("Keyring unavailable: {}", e)))
    }

    async fn run<T, F>(&self, op: F) -> SyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce(keyring::Entry) -> SyncResult<T> + Send + 'static,
    {
        let entry = Self::entry(&self.service, &self.user)?;
        tokio::task::spawn_blocking(move || op(entry))
            .await
            .map_err(|e| SyncError::Storage(format!("Keyring task failed: {}", e)))?
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for KeyringCredentialStore {
    async fn load(&self) -> SyncResult<Option<String>> {
        self.run(|entry| match entry.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(SyncError::Storage(format!("Keyring read failed: {}", e))),
        })
        .await
    }

    async fn save(&self, token: &str) -> SyncResult<()> {
        let token = token.to_string();
        self.run(move |entry| {
            entry
                .set_password(&token)
                .map_err(|e| SyncError::Storage(format!("Keyring write failed: {}", e)))
        })
        .await
    }

    async fn revoke(&self) -> SyncResult<()> {
        self.run(|entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(SyncError::Storage(format!("Keyring delete failed: {}", e))),
        })
        .await
    }
}

/// On-disk credential record for the file backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCredential {
    access_token: String,
    token_type: String,
}

/// Fallback backend: a JSON file in the config directory.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> SyncResult<Option<String>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredCredential = serde_json::from_slice(&bytes)?;
        Ok(Some(stored.access_token))
    }

    async fn save(&self, token: &str) -> SyncResult<()> {
        let stored = StoredCredential {
            access_token: token.to_string(),
            token_type: "bearer".to_string(),
        };
        let json = serde_json::to_vec_pretty(&stored)?;
        atomic_write(&self.path, &json).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }

        debug!("[Credentials] Saved token to {:?}", self.path);
        Ok(())
    }

    async fn revoke(&self) -> SyncResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local backend, for tests and one-shot tokens.
#[derive(Default)]
pub struct MemoryCredentialStore {
    token: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.token.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> SyncResult<Option<String>> {
        Ok(self.lock().clone())
    }

    async fn save(&self, token: &str) -> SyncResult<()> {
        *self.lock() = Some(token.to_string());
        Ok(())
    }

    async fn revoke(&self) -> SyncResult<()> {
        *self.lock() = None;
        Ok(())
    }
}
