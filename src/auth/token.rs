use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::provider::AuthProvider;

/// Margin applied by expiry checks so a token is never sent moments before it lapses.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// Backend tokens returned by the exchange and refresh endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds until `access_token` expires.
    pub expires_in: u64,
}

/// Credentials handed back by an upstream OAuth provider at sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamCredential {
    pub provider: AuthProvider,
    /// Identity token issued by the provider.
    pub token: String,
    /// Authorization code; only some providers issue one.
    pub authorization_code: Option<String>,
    pub user_identifier: Option<String>,
}

impl UpstreamCredential {
    pub fn new(provider: AuthProvider, token: impl Into<String>) -> Self {
        Self {
            provider,
            token: token.into(),
            authorization_code: None,
            user_identifier: None,
        }
    }

    pub fn with_authorization_code(mut self, code: impl Into<String>) -> Self {
        self.authorization_code = Some(code.into());
        self
    }

    pub fn with_user_identifier(mut self, id: impl Into<String>) -> Self {
        self.user_identifier = Some(id.into());
        self
    }
}

/// The persisted credentials of one signed-in session.
///
/// # Example
/// ```
/// use chrono::{Duration, Utc};
/// use tokenflight::auth::{AuthProvider, CredentialRecord, TokenResponse};
///
/// let now = Utc::now();
/// let response = TokenResponse {
///     access_token: "access".to_string(),
///     refresh_token: "refresh".to_string(),
///     expires_in: 3600,
/// };
/// let mut record = CredentialRecord::default();
/// record.apply(&response, AuthProvider::Apple, now);
/// assert_eq!(record.expires_at, Some(now + Duration::seconds(3600)));
/// assert!(!record.is_expired_at(now, Duration::seconds(60)));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub auth_provider: Option<AuthProvider>,
    pub expires_at: Option<DateTime<Utc>>,
    pub user_identifier: Option<String>,
}

impl CredentialRecord {
    /// Overwrite the token fields from a backend response received at `now`.
    ///
    /// The access token and its expiry always change together.
    pub fn apply(&mut self, response: &TokenResponse, provider: AuthProvider, now: DateTime<Utc>) {
        self.access_token = Some(response.access_token.clone());
        self.refresh_token = Some(response.refresh_token.clone());
        self.auth_provider = Some(provider);
        self.expires_at = Some(expiry_after(now, response.expires_in));
    }

    /// Whether the access token should be treated as expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        is_expired(self.expires_at, now, margin)
    }

    /// The access token, if present and still valid at `now`.
    pub fn valid_access_token(&self, now: DateTime<Utc>, margin: Duration) -> Option<&str> {
        if self.is_expired_at(now, margin) {
            return None;
        }
        self.access_token.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// `now + margin >= expires_at`; a missing expiry counts as expired.
pub fn is_expired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>, margin: Duration) -> bool {
    match expires_at {
        Some(expires_at) => now + margin >= expires_at,
        None => true,
    }
}

/// Absolute expiry `secs` seconds after `now`, saturating at the latest representable instant.
pub fn expiry_after(now: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn margin() -> Duration {
        Duration::seconds(EXPIRY_MARGIN_SECS)
    }

    #[test]
    fn margin_boundary_is_inclusive() {
        let now = Utc::now();
        assert!(!is_expired(Some(now + Duration::seconds(61)), now, margin()));
        assert!(is_expired(Some(now + Duration::seconds(60)), now, margin()));
        assert!(is_expired(Some(now - Duration::seconds(1)), now, margin()));
    }

    #[test]
    fn missing_expiry_counts_as_expired() {
        assert!(is_expired(None, Utc::now(), margin()));
    }

    #[test]
    fn valid_access_token_hides_expired_tokens() {
        let now = Utc::now();
        let record = CredentialRecord {
            access_token: Some("access".into()),
            expires_at: Some(now + Duration::seconds(30)),
            ..Default::default()
        };
        assert_eq!(record.valid_access_token(now, margin()), None);
        assert_eq!(
            record.valid_access_token(now, Duration::zero()),
            Some("access")
        );
    }

    #[test]
    fn token_response_uses_snake_case_fields() {
        let parsed: TokenResponse = serde_json::from_str(
            r#"{"access_token":"a","refresh_token":"r","expires_in":3600}"#,
        )
        .unwrap();
        assert_eq!(parsed.expires_in, 3600);
    }

    #[test]
    fn apply_keeps_user_identifier() {
        let now = Utc::now();
        let mut record = CredentialRecord {
            user_identifier: Some("user-1".into()),
            ..Default::default()
        };
        record.apply(
            &TokenResponse {
                access_token: "a".into(),
                refresh_token: "r".into(),
                expires_in: 10,
            },
            AuthProvider::Email,
            now,
        );
        assert_eq!(record.user_identifier.as_deref(), Some("user-1"));
        assert_eq!(record.auth_provider, Some(AuthProvider::Email));
    }
}
