use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::AuthError;
use super::provider::AuthProvider;
use super::token::{is_expired, CredentialRecord, EXPIRY_MARGIN_SECS};

const CREDENTIAL_FILE_VERSION: u32 = 1;

/// Secure storage for the credentials of the signed-in session.
///
/// Implementations only need `load`, `save` and `clear_all`; the per-field
/// accessors are read-modify-write helpers on top of them.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<CredentialRecord>, AuthError>;
    fn save(&self, record: &CredentialRecord) -> Result<(), AuthError>;
    fn clear_all(&self) -> Result<(), AuthError>;

    fn access_token(&self) -> Result<Option<String>, AuthError> {
        Ok(self.load()?.and_then(|record| record.access_token))
    }

    fn refresh_token(&self) -> Result<Option<String>, AuthError> {
        Ok(self.load()?.and_then(|record| record.refresh_token))
    }

    fn auth_provider(&self) -> Result<Option<AuthProvider>, AuthError> {
        Ok(self.load()?.and_then(|record| record.auth_provider))
    }

    fn token_expiration_date(&self) -> Result<Option<DateTime<Utc>>, AuthError> {
        Ok(self.load()?.and_then(|record| record.expires_at))
    }

    fn user_identifier(&self) -> Result<Option<String>, AuthError> {
        Ok(self.load()?.and_then(|record| record.user_identifier))
    }

    fn save_access_token(&self, token: &str) -> Result<(), AuthError> {
        let mut record = self.load()?.unwrap_or_default();
        record.access_token = Some(token.to_string());
        self.save(&record)
    }

    fn save_refresh_token(&self, token: &str) -> Result<(), AuthError> {
        let mut record = self.load()?.unwrap_or_default();
        record.refresh_token = Some(token.to_string());
        self.save(&record)
    }

    fn save_auth_provider(&self, provider: AuthProvider) -> Result<(), AuthError> {
        let mut record = self.load()?.unwrap_or_default();
        record.auth_provider = Some(provider);
        self.save(&record)
    }

    fn save_token_expiration_date(&self, expires_at: DateTime<Utc>) -> Result<(), AuthError> {
        let mut record = self.load()?.unwrap_or_default();
        record.expires_at = Some(expires_at);
        self.save(&record)
    }

    fn save_user_identifier(&self, id: &str) -> Result<(), AuthError> {
        let mut record = self.load()?.unwrap_or_default();
        record.user_identifier = Some(id.to_string());
        self.save(&record)
    }

    /// `now + 60s >= expires_at`. Unreadable or missing expiry counts as expired.
    fn is_access_token_expired(&self) -> bool {
        match self.token_expiration_date() {
            Ok(expires_at) => is_expired(
                expires_at,
                Utc::now(),
                Duration::seconds(EXPIRY_MARGIN_SECS),
            ),
            Err(err) => {
                tracing::debug!(error = %err, "Could not read token expiry, treating as expired");
                true
            }
        }
    }

    fn is_authenticated(&self) -> bool {
        matches!(self.access_token(), Ok(Some(_)))
    }
}

/// Configuration for file-backed credential storage.
#[derive(Debug, Clone)]
pub struct CredentialStoreConfig {
    pub path: PathBuf,
}

impl CredentialStoreConfig {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn default_path() -> PathBuf {
        default_tokenflight_dir().join("credentials.toml")
    }
}

/// Credential store backed by a single owner-only TOML file.
///
/// # Example
/// ```no_run
/// use tokenflight::auth::{CredentialStore, FileCredentialStore};
///
/// let store = FileCredentialStore::new_default();
/// store.save_refresh_token("refresh")?;
/// assert_eq!(store.refresh_token()?.as_deref(), Some("refresh"));
/// # Ok::<(), tokenflight::auth::AuthError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(config: CredentialStoreConfig) -> Self {
        Self { path: config.path }
    }

    pub fn new_default() -> Self {
        Self {
            path: CredentialStoreConfig::default_path(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent(path: &Path) -> Result<(), AuthError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<CredentialRecord>, AuthError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AuthError::Storage(err.to_string())),
        };
        let file: CredentialFile = toml::from_str(&raw)?;
        if file.version != CREDENTIAL_FILE_VERSION {
            return Err(AuthError::Storage(format!(
                "Unsupported credential file version {} at {}",
                file.version,
                self.path.display()
            )));
        }
        Ok(Some(file.record))
    }

    fn save(&self, record: &CredentialRecord) -> Result<(), AuthError> {
        Self::ensure_parent(&self.path)?;
        let file = CredentialFile {
            version: CREDENTIAL_FILE_VERSION,
            saved_at: Utc::now(),
            record: record.clone(),
        };
        let serialized = toml::to_string(&file)?;
        fs::write(&self.path, serialized)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    fn clear_all(&self) -> Result<(), AuthError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AuthError::Storage(err.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialFile {
    version: u32,
    saved_at: DateTime<Utc>,
    record: CredentialRecord,
}

/// Process-local credential store, mainly for tests and short-lived tools.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    record: Mutex<Option<CredentialRecord>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, record: CredentialRecord) {
        *self.lock() = Some(record);
    }

    pub fn snapshot(&self) -> Option<CredentialRecord> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<CredentialRecord>> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<CredentialRecord>, AuthError> {
        Ok(self.snapshot())
    }

    fn save(&self, record: &CredentialRecord) -> Result<(), AuthError> {
        *self.lock() = Some(record.clone());
        Ok(())
    }

    fn clear_all(&self) -> Result<(), AuthError> {
        *self.lock() = None;
        Ok(())
    }
}

fn default_tokenflight_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".tokenflight"))
        .unwrap_or_else(|| PathBuf::from(".tokenflight"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, FileCredentialStore) {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(CredentialStoreConfig::new(
            dir.path().join("nested").join("credentials.toml"),
        ));
        (dir, store)
    }

    fn sample_record() -> CredentialRecord {
        CredentialRecord {
            access_token: Some("access".to_string()),
            refresh_token: Some("refresh".to_string()),
            auth_provider: Some(AuthProvider::Apple),
            expires_at: Some(Utc::now() + Duration::hours(1)),
            user_identifier: Some("user-42".to_string()),
        }
    }

    #[test]
    fn record_round_trip_works() {
        let (_dir, store) = temp_store();
        let record = sample_record();
        store.save(&record).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let (_dir, store) = temp_store();
        assert!(store.load().unwrap().is_none());
        assert!(store.access_token().unwrap().is_none());
        assert!(!store.is_authenticated());
        assert!(store.is_access_token_expired());
    }

    #[test]
    fn clear_removes_record_and_tolerates_missing_file() {
        let (_dir, store) = temp_store();
        store.save(&sample_record()).unwrap();
        store.clear_all().unwrap();
        assert!(store.load().unwrap().is_none());
        store.clear_all().unwrap();
    }

    #[test]
    fn field_setters_update_one_field_at_a_time() {
        let (_dir, store) = temp_store();
        store.save_access_token("a1").unwrap();
        store.save_refresh_token("r1").unwrap();
        store.save_auth_provider(AuthProvider::Email).unwrap();
        store.save_user_identifier("someone").unwrap();
        assert_eq!(store.access_token().unwrap().as_deref(), Some("a1"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("r1"));
        assert_eq!(store.auth_provider().unwrap(), Some(AuthProvider::Email));
        assert_eq!(store.user_identifier().unwrap().as_deref(), Some("someone"));
        assert!(store.is_access_token_expired());

        store
            .save_token_expiration_date(Utc::now() + Duration::seconds(120))
            .unwrap();
        assert!(!store.is_access_token_expired());
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let (_dir, store) = temp_store();
        store.save(&sample_record()).unwrap();
        let raw = fs::read_to_string(store.path()).unwrap();
        fs::write(store.path(), raw.replace("version = 1", "version = 9")).unwrap();
        assert!(matches!(store.load(), Err(AuthError::Storage(_))));
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, store) = temp_store();
        store.save(&sample_record()).unwrap();
        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn memory_store_seed_and_clear() {
        let store = MemoryCredentialStore::new();
        store.seed(sample_record());
        assert!(store.is_authenticated());
        store.clear_all().unwrap();
        assert!(store.snapshot().is_none());
    }
}
