//! Single-flight access token refresh.
//!
//! [`TokenRefresher`] is the one owner of the credential record and of the
//! in-flight refresh. Every caller that needs a bearer token goes through it:
//!
//! - [`TokenRefresher::get_valid_access_token`] returns the cached token while
//!   it is fresh and refreshes otherwise
//! - [`TokenRefresher::force_refresh`] refreshes even if the cached token looks
//!   fresh (the backend answered 401 anyway)
//! - [`TokenRefresher::refresh_if_needed`] is the fire-and-forget variant for
//!   lifecycle hooks
//!
//! The proactive timer fires `proactive_margin` before expiry and refreshes
//! unconditionally, unless it was re-armed or cancelled in the meantime.
//!
//! At most one refresh attempt exists at a time. Checking for it and starting
//! it happen under one lock, and every caller that arrives while it runs gets
//! the same outcome. Attempts run on their own task so they finish even when
//! all callers have gone away.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bon::bon;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::auth::token::EXPIRY_MARGIN_SECS;
use crate::auth::{
    AuthError, AuthProvider, CredentialRecord, CredentialStore, SilentRefresh, TokenExchange,
    TokenResponse, UpstreamCredential,
};
use crate::config::RefreshConfig;
use crate::session::{SessionEvent, SessionSignal};
use crate::util::timeout::with_timeout;

type RefreshOutcome = Shared<BoxFuture<'static, Result<String, AuthError>>>;

/// Coordinates access token refresh for one signed-in session.
///
/// Cloning is cheap; clones share the in-flight attempt and the proactive timer.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use tokenflight::auth::{FileCredentialStore, HttpTokenExchange};
/// use tokenflight::refresh::TokenRefresher;
///
/// # async fn example() -> Result<(), tokenflight::auth::AuthError> {
/// let refresher = TokenRefresher::builder()
///     .store(Arc::new(FileCredentialStore::new_default()))
///     .exchange(Arc::new(HttpTokenExchange::new("https://backend.example")?))
///     .build();
/// let mut expired = refresher.subscribe();
/// let token = refresher.get_valid_access_token().await?;
/// # drop((token, expired.try_recv()));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TokenRefresher {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn CredentialStore>,
    exchange: Arc<dyn TokenExchange>,
    silent: Option<Arc<dyn SilentRefresh>>,
    signal: SessionSignal,
    config: RefreshConfig,
    state: Mutex<RefreshState>,
}

#[derive(Default)]
struct RefreshState {
    in_flight: Option<InFlight>,
    last_attempt_id: u64,
    proactive: Option<JoinHandle<()>>,
    /// Bumped whenever the proactive timer is armed or cancelled.
    timer_generation: u64,
}

struct InFlight {
    id: u64,
    outcome: RefreshOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    IfExpired,
    Always,
    /// Fired by the proactive timer armed under this generation.
    Timer(u64),
}

enum Entry {
    Fresh(String),
    Pending(RefreshOutcome),
    /// The timer was re-armed or cancelled after it woke up.
    Superseded,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = state.proactive.take() {
            timer.abort();
        }
    }
}

#[bon]
impl TokenRefresher {
    /// `signal` defaults to a fresh [`SessionSignal`]; pass one to share it
    /// with observers created before the refresher.
    #[builder]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        exchange: Arc<dyn TokenExchange>,
        silent_refresh: Option<Arc<dyn SilentRefresh>>,
        signal: Option<SessionSignal>,
        #[builder(default)] config: RefreshConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                exchange,
                silent: silent_refresh,
                signal: signal.unwrap_or_default(),
                config,
                state: Mutex::new(RefreshState::default()),
            }),
        }
    }
}

impl TokenRefresher {
    pub fn config(&self) -> &RefreshConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    pub fn session_signal(&self) -> &SessionSignal {
        &self.inner.signal
    }

    /// Subscribe to [`SessionEvent::Expired`].
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.signal.subscribe()
    }

    /// Whether a refresh attempt is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        self.inner.lock_state().in_flight.is_some()
    }

    /// Whether a proactive refresh is armed and has not fired yet.
    pub fn has_proactive_refresh(&self) -> bool {
        self.inner
            .lock_state()
            .proactive
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// A currently valid access token, refreshing first when needed.
    ///
    /// Joins the in-flight refresh if there is one. Fails with
    /// [`AuthError::SessionExpired`] when no refresh token is stored or the
    /// backend rejects it.
    pub async fn get_valid_access_token(&self) -> Result<String, AuthError> {
        self.coalesced(Trigger::IfExpired).await
    }

    /// Refresh regardless of the cached token (or join the in-flight refresh).
    pub async fn force_refresh(&self) -> Result<String, AuthError> {
        self.coalesced(Trigger::Always).await
    }

    /// Refresh when a stored access token has gone stale. Never fails; the next
    /// authenticated call surfaces any problem.
    pub async fn refresh_if_needed(&self) {
        let record = match self.inner.store.load() {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(err) => {
                tracing::debug!(error = %err, "Skipping refresh, credentials unreadable");
                return;
            }
        };
        if record.access_token.is_none() || !record.is_expired_at(Utc::now(), self.expiry_margin()) {
            return;
        }
        self.refresh_in_background(Trigger::IfExpired).await;
    }

    /// Persist backend tokens and re-arm the proactive timer for them.
    pub fn save_tokens(&self, response: &TokenResponse, provider: AuthProvider) -> Result<(), AuthError> {
        let mut record = self.inner.store.load()?.unwrap_or_default();
        record.apply(response, provider, Utc::now());
        self.persist(&record, response.expires_in)
    }

    /// Arm the proactive timer to fire `proactive_margin` before expiry.
    ///
    /// `expires_in` is the remaining token lifetime; without it the stored
    /// expiry is used. Any previous timer is cancelled first, and nothing is
    /// armed when no expiry is known. Must run inside a Tokio runtime.
    pub fn schedule_proactive_refresh(&self, expires_in: Option<Duration>) {
        let remaining = match expires_in {
            Some(remaining) => Some(remaining),
            None => match self.inner.store.token_expiration_date() {
                Ok(expires_at) => expires_at
                    .map(|expires_at| (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)),
                Err(err) => {
                    tracing::warn!(error = %err, "Cannot schedule proactive refresh");
                    None
                }
            },
        };

        let mut state = self.inner.lock_state();
        if let Some(previous) = state.proactive.take() {
            previous.abort();
        }
        state.timer_generation += 1;
        let generation = state.timer_generation;

        let Some(remaining) = remaining else {
            return;
        };
        let delay = remaining.saturating_sub(self.inner.config.proactive_margin);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No Tokio runtime, proactive refresh not scheduled");
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        state.proactive = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            tracing::debug!("Proactive refresh timer fired");
            TokenRefresher { inner }
                .refresh_in_background(Trigger::Timer(generation))
                .await;
        }));
        tracing::debug!(delay_secs = delay.as_secs(), "Scheduled proactive refresh");
    }

    /// Cancel the proactive timer, if any.
    pub fn cancel_proactive_refresh(&self) {
        let mut state = self.inner.lock_state();
        state.timer_generation += 1;
        if let Some(timer) = state.proactive.take() {
            timer.abort();
        }
    }

    /// Trade upstream OAuth credentials for backend tokens and start a new session.
    pub async fn sign_in(&self, credential: &UpstreamCredential) -> Result<TokenResponse, AuthError> {
        let response = self
            .inner
            .exchange
            .exchange_token(
                &credential.token,
                credential.provider,
                credential.authorization_code.as_deref(),
            )
            .await?;
        let mut record = CredentialRecord {
            user_identifier: credential.user_identifier.clone(),
            ..CredentialRecord::default()
        };
        record.apply(&response, credential.provider, Utc::now());
        self.persist(&record, response.expires_in)?;
        tracing::info!(provider = %credential.provider, "Signed in");
        Ok(response)
    }

    /// End the session at the user's request. Observers are not signalled.
    pub fn sign_out(&self) -> Result<(), AuthError> {
        self.cancel_proactive_refresh();
        self.inner.store.clear_all()?;
        tracing::info!("Signed out");
        Ok(())
    }

    /// Pick up a stored session at startup or when returning to the foreground.
    pub async fn resume_session(&self) {
        if !self.inner.store.is_authenticated() {
            return;
        }
        self.schedule_proactive_refresh(None);
        self.refresh_if_needed().await;
    }

    /// Run `request` with a valid token, retrying once with a forced refresh
    /// if it fails with [`AuthError::Unauthorized`].
    pub async fn authorized<F, Fut, T>(&self, mut request: F) -> Result<T, AuthError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, AuthError>>,
    {
        let token = self.get_valid_access_token().await?;
        match request(token).await {
            Err(AuthError::Unauthorized) => {
                tracing::debug!("Cached token rejected, forcing refresh");
                let token = self.force_refresh().await?;
                request(token).await
            }
            other => other,
        }
    }

    fn expiry_margin(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.inner.config.expiry_margin)
            .unwrap_or_else(|_| chrono::Duration::seconds(EXPIRY_MARGIN_SECS))
    }

    fn persist(&self, record: &CredentialRecord, expires_in: u64) -> Result<(), AuthError> {
        self.inner.store.save(record)?;
        self.schedule_proactive_refresh(Some(Duration::from_secs(expires_in)));
        Ok(())
    }

    async fn coalesced(&self, trigger: Trigger) -> Result<String, AuthError> {
        match self.enter(trigger)? {
            Entry::Fresh(token) => Ok(token),
            Entry::Pending(outcome) => outcome.await,
            Entry::Superseded => Err(AuthError::Unknown("refresh superseded".to_string())),
        }
    }

    /// Refresh for a lifecycle hook or the timer, logging instead of failing.
    async fn refresh_in_background(&self, trigger: Trigger) {
        let outcome = match self.enter(trigger) {
            Ok(Entry::Pending(outcome)) => outcome,
            Ok(Entry::Fresh(_)) => return,
            Ok(Entry::Superseded) => {
                tracing::debug!("Proactive refresh superseded");
                return;
            }
            Err(err) => {
                tracing::debug!(error = %err, "Skipping background refresh");
                return;
            }
        };
        if let Err(err) = outcome.await {
            tracing::debug!(error = %err, "Background token refresh failed");
        }
    }

    /// Join the in-flight attempt or decide, under the state lock, whether to start one.
    fn enter(&self, trigger: Trigger) -> Result<Entry, AuthError> {
        let mut state = self.inner.lock_state();
        if let Some(in_flight) = &state.in_flight {
            tracing::debug!(attempt = in_flight.id, "Joining in-flight token refresh");
            return Ok(Entry::Pending(in_flight.outcome.clone()));
        }
        match trigger {
            Trigger::IfExpired => {
                if let Some(token) = self.cached_access_token()? {
                    return Ok(Entry::Fresh(token));
                }
            }
            Trigger::Timer(generation) if generation != state.timer_generation => {
                return Ok(Entry::Superseded);
            }
            Trigger::Timer(_) | Trigger::Always => {}
        }
        Ok(Entry::Pending(self.start_attempt(&mut state)))
    }

    fn cached_access_token(&self) -> Result<Option<String>, AuthError> {
        let Some(record) = self.inner.store.load()? else {
            return Ok(None);
        };
        Ok(record
            .valid_access_token(Utc::now(), self.expiry_margin())
            .map(str::to_owned))
    }

    fn start_attempt(&self, state: &mut RefreshState) -> RefreshOutcome {
        state.last_attempt_id += 1;
        let id = state.last_attempt_id;
        let refresher = self.clone();
        let task = tokio::spawn(async move {
            let result = refresher.run_attempt().await;
            refresher.finish_attempt(id);
            result
        });
        let outcome = async move {
            task.await.unwrap_or_else(|err| {
                Err(AuthError::Unknown(format!("refresh task failed: {err}")))
            })
        }
        .boxed()
        .shared();
        state.in_flight = Some(InFlight {
            id,
            outcome: outcome.clone(),
        });
        tracing::debug!(attempt = id, "Started token refresh");
        outcome
    }

    fn finish_attempt(&self, id: u64) {
        let mut state = self.inner.lock_state();
        if state.in_flight.as_ref().is_some_and(|in_flight| in_flight.id == id) {
            state.in_flight = None;
        }
    }

    async fn run_attempt(&self) -> Result<String, AuthError> {
        let record = self.inner.store.load()?.unwrap_or_default();
        let Some(refresh_token) = record.refresh_token else {
            tracing::info!("No refresh token stored");
            self.expire_session();
            return Err(AuthError::SessionExpired);
        };
        let provider = record.auth_provider.unwrap_or(AuthProvider::FALLBACK);

        if let Some(token) = self.try_silent_refresh(provider).await {
            return Ok(token);
        }

        let exchange = &self.inner.exchange;
        let refresh_token = refresh_token.as_str();
        let result = self
            .inner
            .config
            .retry
            .execute(move || exchange.refresh_access_token(refresh_token))
            .await;

        match result {
            Ok(response) => {
                self.save_tokens(&response, provider)?;
                tracing::info!(
                    provider = %provider,
                    expires_in = response.expires_in,
                    "Access token refreshed"
                );
                Ok(response.access_token)
            }
            Err(err) if err.ends_session() => {
                tracing::warn!(error = %err, "Refresh token rejected");
                self.expire_session();
                Err(AuthError::SessionExpired)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Token refresh failed");
                Err(err)
            }
        }
    }

    async fn try_silent_refresh(&self, provider: AuthProvider) -> Option<String> {
        let silent = self
            .inner
            .silent
            .as_ref()
            .filter(|silent| silent.provider() == provider)?;
        let timeout = self.inner.config.silent_refresh_timeout;

        let result = async {
            let upstream = with_timeout(timeout, async {
                silent.refresh_upstream_token().await.ok_or_else(|| {
                    AuthError::InvalidResponse("provider returned no token".to_string())
                })
            })
            .await?;
            let response = self
                .inner
                .exchange
                .exchange_token(&upstream, provider, None)
                .await?;
            self.save_tokens(&response, provider)?;
            Ok::<_, AuthError>(response.access_token)
        }
        .await;

        match result {
            Ok(token) => {
                tracing::info!(provider = %provider, "Access token renewed via provider silent refresh");
                Some(token)
            }
            Err(err) => {
                tracing::debug!(
                    provider = %provider,
                    error = %err,
                    "Silent refresh unavailable, using refresh token"
                );
                None
            }
        }
    }

    fn expire_session(&self) {
        if let Err(err) = self.inner.store.clear_all() {
            tracing::warn!(error = %err, "Failed to clear credentials after session expiry");
        }
        self.cancel_proactive_refresh();
        let observers = self.inner.signal.emit_expired();
        tracing::info!(observers, "Session expired, credentials cleared");
    }
}

impl fmt::Debug for TokenRefresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRefresher")
            .field("config", &self.inner.config)
            .field("silent_refresh", &self.inner.silent.as_ref().map(|s| s.provider()))
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}
