use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;

use super::error::AuthError;
use super::provider::AuthProvider;
use super::token::TokenResponse;

pub const DEFAULT_BASE_URL: &str = "https://chat-gt.pro";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const EXCHANGE_PATH: &str = "/api/auth/v1/token";
const REFRESH_PATH: &str = "/api/auth/v1/token/refresh";

/// Backend operations that mint access tokens.
///
/// Implementations classify every failure into [`AuthError`]: a rejected
/// token is `Unauthorized`, transport trouble is `Network`, other statuses are
/// `Server`, and undecodable success bodies are `Decoding`.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Trade an upstream OAuth token for backend tokens.
    async fn exchange_token(
        &self,
        oauth_token: &str,
        provider: AuthProvider,
        authorization_code: Option<&str>,
    ) -> Result<TokenResponse, AuthError>;

    /// Mint new backend tokens from a refresh token.
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse, AuthError>;
}

/// [`TokenExchange`] over the backend's JSON HTTP endpoints.
///
/// # Example
/// ```no_run
/// use tokenflight::auth::{HttpTokenExchange, TokenExchange};
///
/// # async fn example() -> Result<(), tokenflight::auth::AuthError> {
/// let exchange = HttpTokenExchange::new("https://backend.example")?;
/// let tokens = exchange.refresh_access_token("refresh").await?;
/// println!("expires in {}s", tokens.expires_in);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpTokenExchange {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTokenExchange {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AuthError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AuthError::Configuration(format!("HTTP client: {err}")))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_for_tokens<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<TokenResponse, AuthError> {
        let resp = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        classify_token_response(status, &body)
    }
}

#[async_trait]
impl TokenExchange for HttpTokenExchange {
    async fn exchange_token(
        &self,
        oauth_token: &str,
        provider: AuthProvider,
        authorization_code: Option<&str>,
    ) -> Result<TokenResponse, AuthError> {
        let body = ExchangeTokenRequest {
            provider,
            token: oauth_token,
            authorization_code,
        };
        self.post_for_tokens(EXCHANGE_PATH, &body).await
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let body = RefreshTokenRequest { refresh_token };
        self.post_for_tokens(REFRESH_PATH, &body).await
    }
}

#[derive(Debug, Serialize)]
struct ExchangeTokenRequest<'a> {
    provider: AuthProvider,
    token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorization_code: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct RefreshTokenRequest<'a> {
    refresh_token: &'a str,
}

fn classify_token_response(status: StatusCode, body: &[u8]) -> Result<TokenResponse, AuthError> {
    if status == StatusCode::UNAUTHORIZED {
        return Err(AuthError::Unauthorized);
    }
    if !status.is_success() {
        return Err(AuthError::Server {
            status: status.as_u16(),
            message: String::from_utf8_lossy(body).into_owned(),
        });
    }
    Ok(serde_json::from_slice(body)?)
}
