#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokenflight::auth::{
    AuthError, AuthProvider, CredentialRecord, CredentialStore, MemoryCredentialStore,
    SilentRefresh, TokenExchange, TokenResponse,
};
use tokenflight::config::RefreshConfig;
use tokenflight::refresh::TokenRefresher;

/// Exchange that replays queued results and counts calls.
#[derive(Default)]
pub struct ScriptedExchange {
    refresh_results: Mutex<VecDeque<Result<TokenResponse, AuthError>>>,
    exchange_results: Mutex<VecDeque<Result<TokenResponse, AuthError>>>,
    refresh_calls: AtomicUsize,
    exchange_calls: AtomicUsize,
    refresh_tokens_seen: Mutex<Vec<String>>,
    exchanges_seen: Mutex<Vec<(String, AuthProvider, Option<String>)>>,
    delay: Duration,
}

impl ScriptedExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push_refresh(&self, result: Result<TokenResponse, AuthError>) {
        self.refresh_results
            .lock()
            .expect("script lock poisoned")
            .push_back(result);
    }

    pub fn push_exchange(&self, result: Result<TokenResponse, AuthError>) {
        self.exchange_results
            .lock()
            .expect("script lock poisoned")
            .push_back(result);
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.refresh_tokens_seen
            .lock()
            .expect("script lock poisoned")
            .clone()
    }

    pub fn exchanges_seen(&self) -> Vec<(String, AuthProvider, Option<String>)> {
        self.exchanges_seen
            .lock()
            .expect("script lock poisoned")
            .clone()
    }
}

fn unscripted() -> Result<TokenResponse, AuthError> {
    Err(AuthError::Unknown("no scripted response".to_string()))
}

#[async_trait]
impl TokenExchange for ScriptedExchange {
    async fn exchange_token(
        &self,
        oauth_token: &str,
        provider: AuthProvider,
        authorization_code: Option<&str>,
    ) -> Result<TokenResponse, AuthError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        self.exchanges_seen.lock().expect("script lock poisoned").push((
            oauth_token.to_string(),
            provider,
            authorization_code.map(str::to_string),
        ));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self
            .exchange_results
            .lock()
            .expect("script lock poisoned")
            .pop_front();
        next.unwrap_or_else(unscripted)
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_tokens_seen
            .lock()
            .expect("script lock poisoned")
            .push(refresh_token.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self
            .refresh_results
            .lock()
            .expect("script lock poisoned")
            .pop_front();
        next.unwrap_or_else(unscripted)
    }
}

/// Provider hook that hands out a fixed upstream token.
pub struct StubSilentRefresh {
    provider: AuthProvider,
    token: Option<String>,
    calls: AtomicUsize,
}

impl StubSilentRefresh {
    pub fn new(provider: AuthProvider, token: Option<&str>) -> Self {
        Self {
            provider,
            token: token.map(str::to_string),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SilentRefresh for StubSilentRefresh {
    fn provider(&self) -> AuthProvider {
        self.provider
    }

    async fn refresh_upstream_token(&self) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.token.clone()
    }
}

/// Store that reads fine but refuses every write.
#[derive(Default)]
pub struct ReadOnlyStore {
    pub inner: MemoryCredentialStore,
}

impl CredentialStore for ReadOnlyStore {
    fn load(&self) -> Result<Option<CredentialRecord>, AuthError> {
        self.inner.load()
    }

    fn save(&self, _record: &CredentialRecord) -> Result<(), AuthError> {
        Err(AuthError::Storage("read-only".to_string()))
    }

    fn clear_all(&self) -> Result<(), AuthError> {
        self.inner.clear_all()
    }
}

/// Store whose first loads replay queued records, then falls back to `inner`.
///
/// Simulates another refresh landing between two reads.
#[derive(Default)]
pub struct QueuedLoadStore {
    pub inner: MemoryCredentialStore,
    queued: Mutex<VecDeque<CredentialRecord>>,
}

impl QueuedLoadStore {
    pub fn queue_load(&self, record: CredentialRecord) {
        self.queued
            .lock()
            .expect("store lock poisoned")
            .push_back(record);
    }
}

impl CredentialStore for QueuedLoadStore {
    fn load(&self) -> Result<Option<CredentialRecord>, AuthError> {
        let queued = self.queued.lock().expect("store lock poisoned").pop_front();
        match queued {
            Some(record) => Ok(Some(record)),
            None => self.inner.load(),
        }
    }

    fn save(&self, record: &CredentialRecord) -> Result<(), AuthError> {
        self.inner.save(record)
    }

    fn clear_all(&self) -> Result<(), AuthError> {
        self.inner.clear_all()
    }
}

/// Store that calls back into its refresher on every load, so a load made
/// while the refresher holds its state lock deadlocks.
#[derive(Default)]
pub struct ReentrantStore {
    pub inner: MemoryCredentialStore,
    pub refresher: OnceLock<TokenRefresher>,
    reentered: AtomicUsize,
}

impl ReentrantStore {
    pub fn reentered(&self) -> usize {
        self.reentered.load(Ordering::SeqCst)
    }
}

impl CredentialStore for ReentrantStore {
    fn load(&self) -> Result<Option<CredentialRecord>, AuthError> {
        if let Some(refresher) = self.refresher.get() {
            let _ = refresher.is_refreshing();
            self.reentered.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.load()
    }

    fn save(&self, record: &CredentialRecord) -> Result<(), AuthError> {
        self.inner.save(record)
    }

    fn clear_all(&self) -> Result<(), AuthError> {
        self.inner.clear_all()
    }
}

pub fn tokens(access_token: &str, refresh_token: &str, expires_in: u64) -> TokenResponse {
    TokenResponse {
        access_token: access_token.to_string(),
        refresh_token: refresh_token.to_string(),
        expires_in,
    }
}

/// A Google session whose access token expires `expires_in_secs` from now.
pub fn record(access_token: &str, refresh_token: Option<&str>, expires_in_secs: i64) -> CredentialRecord {
    CredentialRecord {
        access_token: Some(access_token.to_string()),
        refresh_token: refresh_token.map(str::to_string),
        auth_provider: Some(AuthProvider::Google),
        expires_at: Some(Utc::now() + chrono::Duration::seconds(expires_in_secs)),
        user_identifier: None,
    }
}

pub fn seeded_store(record: CredentialRecord) -> Arc<MemoryCredentialStore> {
    let store = Arc::new(MemoryCredentialStore::new());
    store.seed(record);
    store
}

pub fn refresher(
    store: Arc<MemoryCredentialStore>,
    exchange: Arc<ScriptedExchange>,
) -> TokenRefresher {
    refresher_with_config(store, exchange, RefreshConfig::default())
}

pub fn refresher_with_config(
    store: Arc<MemoryCredentialStore>,
    exchange: Arc<ScriptedExchange>,
    config: RefreshConfig,
) -> TokenRefresher {
    TokenRefresher::builder()
        .store(store)
        .exchange(exchange)
        .config(config)
        .build()
}
