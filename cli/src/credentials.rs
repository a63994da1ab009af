//! Persistent storage for the bearer token and the last-known user.
//!
//! Everything outside this module talks to [`CredentialStore`]; the concrete
//! storage (files, OS keychain, memory) is picked once at startup.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use jwt_simple::prelude::*;
use keyring::Entry;
use multidb_common::User;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ClientConfig, CredentialBackend, SERVICE_NAME};

const TOKEN_FILE: &str = "token";
const USER_FILE: &str = "user.json";
const KEYRING_ACCOUNT: &str = "api-token";

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("credential storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored user snapshot is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("could not determine config directory")]
    NoConfigDir,

    #[error("token cannot be empty")]
    EmptyToken,
}

#[async_trait]
pub trait CredentialStore: Debug + Send + Sync {
    /// Overwrites any previously stored token.
    async fn set_token(&self, token: &str) -> Result<(), CredentialError>;

    /// Never fails: unreadable storage is reported as no token.
    async fn get_token(&self) -> Option<String>;

    /// Removes the token and the user snapshot. Clearing an empty store is a no-op.
    async fn clear_token(&self) -> Result<(), CredentialError>;

    async fn persist_user(&self, user: &User) -> Result<(), CredentialError>;

    async fn load_user(&self) -> Result<Option<User>, CredentialError>;
}

pub type CredentialStoreDyn = Arc<dyn CredentialStore>;

/// Builds the persistent store selected by the configuration.
pub fn build_store(config: &ClientConfig) -> Result<CredentialStoreDyn, CredentialError> {
    let dir = resolve_dir(config.config_dir.as_deref())?;
    let files = FileCredentialStore::new(dir);
    Ok(match config.credential_backend {
        CredentialBackend::File => Arc::new(files),
        CredentialBackend::Keyring => Arc::new(KeyringCredentialStore::new(files)),
    })
}

/// Override directory gets a service subdirectory, the same as the platform default.
pub fn resolve_dir(override_dir: Option<&Path>) -> Result<PathBuf, CredentialError> {
    let mut p = match override_dir {
        Some(dir) => dir.to_path_buf(),
        None => dirs::config_dir().ok_or(CredentialError::NoConfigDir)?,
    };
    p.push(SERVICE_NAME);
    Ok(p)
}

/// Expiry (`exp`, epoch seconds) of a JWT bearer token. The signature is not
/// checked; opaque tokens yield `None`.
pub fn token_expiry(token: &str) -> Option<u64> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    let payload_bytes = match Base64UrlSafeNoPadding::decode_to_vec(parts[1], None) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to decode JWT payload: {:?}", e);
            return None;
        }
    };
    match serde_json::from_slice::<serde_json::Value>(&payload_bytes) {
        Ok(payload) => payload.get("exp").and_then(|v| v.as_u64()),
        Err(e) => {
            warn!("Failed to parse JWT payload: {}", e);
            None
        }
    }
}

// =======================================================================
// FILE STORE
// =======================================================================

#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn token_path(&self) -> PathBuf {
        self.dir.join(TOKEN_FILE)
    }

    fn user_path(&self) -> PathBuf {
        self.dir.join(USER_FILE)
    }

    async fn write_private(&self, path: &Path, data: &[u8]) -> Result<(), CredentialError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(path, data).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
            {
                warn!("Failed to set strict permissions on {}: {}", path.display(), e);
            }
        }

        Ok(())
    }

    async fn remove_user(&self) -> Result<(), CredentialError> {
        remove_if_present(&self.user_path()).await
    }
}

async fn remove_if_present(path: &Path) -> Result<(), CredentialError> {
    match tokio::fs::remove_file(path).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn set_token(&self, token: &str) -> Result<(), CredentialError> {
        if token.is_empty() {
            return Err(CredentialError::EmptyToken);
        }
        self.write_private(&self.token_path(), token.as_bytes()).await?;
        debug!("token written to {}", self.dir.display());
        Ok(())
    }

    async fn get_token(&self) -> Option<String> {
        match tokio::fs::read_to_string(self.token_path()).await {
            Ok(tok) => {
                let tok = tok.trim().to_string();
                (!tok.is_empty()).then_some(tok)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("token file unreadable: {}", e);
                None
            }
        }
    }

    async fn clear_token(&self) -> Result<(), CredentialError> {
        remove_if_present(&self.token_path()).await?;
        self.remove_user().await
    }

    async fn persist_user(&self, user: &User) -> Result<(), CredentialError> {
        let data = serde_json::to_vec_pretty(user)?;
        self.write_private(&self.user_path(), &data).await
    }

    async fn load_user(&self) -> Result<Option<User>, CredentialError> {
        let bytes = match tokio::fs::read(self.user_path()).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

// =======================================================================
// KEYRING STORE
// =======================================================================

/// Token lives in the OS keychain; the user snapshot stays on disk.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    files: FileCredentialStore,
}

impl KeyringCredentialStore {
    pub fn new(files: FileCredentialStore) -> Self {
        Self { files }
    }
}

fn keyring_entry() -> Result<Entry, CredentialError> {
    Entry::new(SERVICE_NAME, KEYRING_ACCOUNT).map_err(|e| CredentialError::Keyring(e.to_string()))
}

#[async_trait]
impl CredentialStore for KeyringCredentialStore {
    async fn set_token(&self, token: &str) -> Result<(), CredentialError> {
        if token.is_empty() {
            return Err(CredentialError::EmptyToken);
        }
        let token = token.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), CredentialError> {
            keyring_entry()?
                .set_password(&token)
                .map_err(|e| CredentialError::Keyring(e.to_string()))
        })
        .await
        .map_err(|e| CredentialError::Keyring(e.to_string()))?
    }

    async fn get_token(&self) -> Option<String> {
        let res = tokio::task::spawn_blocking(|| -> Option<String> {
            let entry = match keyring_entry() {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("keyring entry creation failed: {}", err);
                    return None;
                }
            };
            match entry.get_password() {
                Ok(tok) => Some(tok),
                Err(keyring::Error::NoEntry) => None,
                Err(err) => {
                    warn!("keyring get_password error: {}", err);
                    None
                }
            }
        })
        .await;
        res.unwrap_or(None)
    }

    async fn clear_token(&self) -> Result<(), CredentialError> {
        tokio::task::spawn_blocking(|| {
            if let Ok(entry) = keyring_entry() {
                let _ = entry.delete_credential();
            }
        })
        .await
        .map_err(|e| CredentialError::Keyring(e.to_string()))?;
        self.files.clear_token().await
    }

    async fn persist_user(&self, user: &User) -> Result<(), CredentialError> {
        self.files.persist_user(user).await
    }

    async fn load_user(&self) -> Result<Option<User>, CredentialError> {
        self.files.load_user().await
    }
}

// =======================================================================
// MEMORY STORE
// =======================================================================

#[derive(Debug, Default)]
struct MemoryState {
    token: Option<String>,
    user: Option<User>,
}

/// Process-local store, used by tests and one-shot embeddings.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    state: Mutex<MemoryState>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn set_token(&self, token: &str) -> Result<(), CredentialError> {
        if token.is_empty() {
            return Err(CredentialError::EmptyToken);
        }
        self.with_state(|s| s.token = Some(token.to_string()));
        Ok(())
    }

    async fn get_token(&self) -> Option<String> {
        self.with_state(|s| s.token.clone())
    }

    async fn clear_token(&self) -> Result<(), CredentialError> {
        self.with_state(|s| {
            s.token = None;
            s.user = None;
        });
        Ok(())
    }

    async fn persist_user(&self, user: &User) -> Result<(), CredentialError> {
        self.with_state(|s| s.user = Some(user.clone()));
        Ok(())
    }

    async fn load_user(&self) -> Result<Option<User>, CredentialError> {
        Ok(self.with_state(|s| s.user.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multidb_common::Role;
    use tempfile::tempdir;

    fn sample_user() -> User {
        User {
            id: "1".into(),
            email: "admin@example.com".into(),
            display_name: "Admin".into(),
            role: Role::Admin,
        }
    }

    #[tokio::test]
    async fn test_file_token_round_trip() {
        let dir = tempdir().expect("create tempdir");
        let store = FileCredentialStore::new(dir.path().join(SERVICE_NAME));

        assert_eq!(store.get_token().await, None);
        store.set_token("abc").await.unwrap();
        assert_eq!(store.get_token().await.as_deref(), Some("abc"));
        store.set_token("def").await.unwrap();
        assert_eq!(store.get_token().await.as_deref(), Some("def"));

        store.clear_token().await.unwrap();
        assert_eq!(store.get_token().await, None);
    }

    #[tokio::test]
    async fn test_file_clear_removes_user_and_is_idempotent() {
        let dir = tempdir().expect("create tempdir");
        let store = FileCredentialStore::new(dir.path().join(SERVICE_NAME));

        store.set_token("abc").await.unwrap();
        store.persist_user(&sample_user()).await.unwrap();
        assert_eq!(store.load_user().await.unwrap(), Some(sample_user()));

        store.clear_token().await.unwrap();
        store.clear_token().await.unwrap();
        assert_eq!(store.load_user().await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_token_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().expect("create tempdir");
        let store = FileCredentialStore::new(dir.path().join(SERVICE_NAME));
        store.set_token("secret").await.unwrap();

        let meta = std::fs::metadata(store.dir().join(TOKEN_FILE)).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_corrupt_user_snapshot_is_an_error() {
        let dir = tempdir().expect("create tempdir");
        let store = FileCredentialStore::new(dir.path().to_path_buf());
        std::fs::write(dir.path().join(USER_FILE), b"{not json").unwrap();

        assert!(matches!(
            store.load_user().await,
            Err(CredentialError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryCredentialStore::new();
        store.set_token("t").await.unwrap();
        store.persist_user(&sample_user()).await.unwrap();
        assert_eq!(store.get_token().await.as_deref(), Some("t"));

        store.clear_token().await.unwrap();
        assert_eq!(store.get_token().await, None);
        assert_eq!(store.load_user().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_token_rejected() {
        let store = MemoryCredentialStore::new();
        assert!(matches!(
            store.set_token("").await,
            Err(CredentialError::EmptyToken)
        ));
    }

    #[test]
    fn test_token_expiry_reads_exp_claim() {
        let payload = Base64UrlSafeNoPadding::encode_to_string(br#"{"sub":"1","exp":1700000000}"#)
            .unwrap();
        let jwt = format!("eyJhbGciOiJIUzI1NiJ9.{}.sig", payload);
        assert_eq!(token_expiry(&jwt), Some(1_700_000_000));
        assert_eq!(token_expiry("opaque-token"), None);
    }

    #[test]
    fn test_resolve_dir_appends_service_name() {
        let p = resolve_dir(Some(Path::new("/tmp/x"))).unwrap();
        assert_eq!(p, PathBuf::from("/tmp/x").join(SERVICE_NAME));
    }
}
