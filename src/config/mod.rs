//! Configuration system (layered: defaults < TOML file < environment).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use serde::Deserialize;

use crate::auth::exchange::{DEFAULT_BASE_URL, DEFAULT_REQUEST_TIMEOUT};
use crate::auth::store::CredentialStoreConfig;
use crate::auth::AuthError;
use crate::util::retry::RetryPolicy;

pub const ENV_BASE_URL: &str = "TOKENFLIGHT_BASE_URL";
pub const ENV_CREDENTIALS: &str = "TOKENFLIGHT_CREDENTIALS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "TOKENFLIGHT_REQUEST_TIMEOUT_SECS";
pub const ENV_MAX_ATTEMPTS: &str = "TOKENFLIGHT_MAX_ATTEMPTS";
pub const ENV_EXPIRY_MARGIN_SECS: &str = "TOKENFLIGHT_EXPIRY_MARGIN_SECS";
pub const ENV_PROACTIVE_MARGIN_SECS: &str = "TOKENFLIGHT_PROACTIVE_MARGIN_SECS";

/// Tuning for the token refresher.
///
/// ```
/// use std::time::Duration;
/// use tokenflight::config::RefreshConfig;
///
/// let config = RefreshConfig::builder()
///     .proactive_margin(Duration::from_secs(120))
///     .build();
/// assert_eq!(config.expiry_margin, Duration::from_secs(60));
/// assert_eq!(config.retry.max_attempts, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct RefreshConfig {
    /// Attempts and backoff for transient refresh failures.
    #[builder(default)]
    pub retry: RetryPolicy,
    /// A token is stale once `now + expiry_margin >= expires_at`.
    #[builder(default = Duration::from_secs(60))]
    pub expiry_margin: Duration,
    /// How long before expiry the proactive timer fires.
    #[builder(default = Duration::from_secs(300))]
    pub proactive_margin: Duration,
    /// Upper bound on a provider SDK silent refresh.
    #[builder(default = Duration::from_secs(30))]
    pub silent_refresh_timeout: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Everything needed to wire a refresher against a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub credential_path: PathBuf,
    pub refresh: RefreshConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            credential_path: CredentialStoreConfig::default_path(),
            refresh: RefreshConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults, then `path` (when given and present), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, AuthError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = match path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from environment variables only.
    pub fn from_env() -> Result<Self, AuthError> {
        Self::load(None)
    }

    /// Load a TOML config file over the defaults.
    ///
    /// Returns defaults if the file does not exist.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let path = path.as_ref();
        let raw = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(AuthError::Configuration(format!(
                    "Cannot read {}: {err}",
                    path.display()
                )))
            }
        };
        let file: ConfigFile = toml::from_str(&raw).map_err(|err| {
            AuthError::Configuration(format!("Invalid config file {}: {err}", path.display()))
        })?;
        let mut config = Self::default();
        file.apply_to(&mut config);
        Ok(config)
    }

    /// Apply `TOKENFLIGHT_*` overrides read through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), AuthError> {
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(path) = lookup(ENV_CREDENTIALS) {
            self.credential_path = PathBuf::from(path);
        }
        if let Some(secs) = parse_number(&lookup, ENV_REQUEST_TIMEOUT_SECS)? {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = parse_number(&lookup, ENV_MAX_ATTEMPTS)? {
            self.refresh.retry.max_attempts = u32::try_from(attempts).map_err(|_| {
                AuthError::Configuration(format!("{ENV_MAX_ATTEMPTS} is out of range"))
            })?;
        }
        if let Some(secs) = parse_number(&lookup, ENV_EXPIRY_MARGIN_SECS)? {
            self.refresh.expiry_margin = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_number(&lookup, ENV_PROACTIVE_MARGIN_SECS)? {
            self.refresh.proactive_margin = Duration::from_secs(secs);
        }
        Ok(())
    }

    pub fn credential_store_config(&self) -> CredentialStoreConfig {
        CredentialStoreConfig::new(self.credential_path.clone())
    }
}

fn parse_number(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<u64>, AuthError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            AuthError::Configuration(format!("{key} must be a whole number, got {raw:?}"))
        }),
        None => Ok(None),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    base_url: Option<String>,
    request_timeout_secs: Option<u64>,
    credential_path: Option<PathBuf>,
    refresh: Option<RefreshSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RefreshSection {
    max_attempts: Option<u32>,
    initial_backoff_secs: Option<u64>,
    max_backoff_secs: Option<u64>,
    expiry_margin_secs: Option<u64>,
    proactive_margin_secs: Option<u64>,
    silent_refresh_timeout_secs: Option<u64>,
}

impl ConfigFile {
    fn apply_to(self, config: &mut ClientConfig) {
        if let Some(url) = self.base_url {
            config.base_url = url;
        }
        if let Some(secs) = self.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(path) = self.credential_path {
            config.credential_path = path;
        }
        let Some(refresh) = self.refresh else {
            return;
        };
        let target = &mut config.refresh;
        if let Some(attempts) = refresh.max_attempts {
            target.retry.max_attempts = attempts;
        }
        if let Some(secs) = refresh.initial_backoff_secs {
            target.retry.initial_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = refresh.max_backoff_secs {
            target.retry.max_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = refresh.expiry_margin_secs {
            target.expiry_margin = Duration::from_secs(secs);
        }
        if let Some(secs) = refresh.proactive_margin_secs {
            target.proactive_margin = Duration::from_secs(secs);
        }
        if let Some(secs) = refresh.silent_refresh_timeout_secs {
            target.silent_refresh_timeout = Duration::from_secs(secs);
        }
    }
}
