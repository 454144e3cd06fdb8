use thiserror::Error;

/// Classified failures from token storage, token exchange and refresh.
///
/// Exchange-client failures are classified once, where they are caught; the
/// refresh coordinator only ever sees these variants. The type is `Clone` so
/// one refresh outcome can be handed to every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The backend rejected the presented token.
    #[error("Unauthorized")]
    Unauthorized,
    /// The refresh token is missing or rejected; the user must sign in again.
    #[error("Session expired, sign in again")]
    SessionExpired,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Server error (status {status}): {message}")]
    Server { status: u16, message: String },
    #[error("Failed to decode response: {0}")]
    Decoding(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl AuthError {
    /// Transient failures worth another attempt after backing off.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Unknown(_))
    }

    /// Failures that mean the refresh token itself is no longer usable.
    pub fn ends_session(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::SessionExpired)
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Decoding(error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decoding(error.to_string())
    }
}

impl From<toml::de::Error> for AuthError {
    fn from(error: toml::de::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

impl From<toml::ser::Error> for AuthError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, AuthError>;
