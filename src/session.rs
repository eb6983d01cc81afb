use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use crate::auth::{AuthApi, RefreshFailure, RefreshedTokens, RegisterResponse, Verification};
use crate::config::ClientConfig;
use crate::error::{Error, ExpiryReason, ValidationError};
use crate::store::{CredentialKey, CredentialStore};
use crate::types::{AccessToken, NewAccount, RefreshToken, Registration, UserProfile};

/// Coarse session state, for route guards and loading indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Phase {
    Unauthenticated,
    /// Startup restore, login or registration in flight.
    Initializing,
    Authenticated,
    /// Authenticated, with a token refresh in flight.
    Refreshing,
}

#[derive(Debug, Default)]
struct SessionState {
    access_token: Option<AccessToken>,
    refresh_token: Option<RefreshToken>,
    user: Option<UserProfile>,
    // Bumped whenever the session is replaced or cleared, so a refresh that
    // started against an older session never writes into a newer one.
    epoch: u64,
}

impl SessionState {
    fn is_authenticated(&self) -> bool {
        self.access_token.is_some() && self.user.is_some()
    }

    fn settled_phase(&self) -> Phase {
        if self.is_authenticated() {
            Phase::Authenticated
        } else {
            Phase::Unauthenticated
        }
    }
}

type SharedRefresh = Shared<BoxFuture<'static, Result<AccessToken, RefreshFailure>>>;

/// An exchange running on its own task, tagged with the session epoch it
/// was started for. Only callers of that same epoch join it.
struct RefreshFlight {
    epoch: u64,
    result: SharedRefresh,
}

struct Inner {
    api: AuthApi,
    store: Arc<dyn CredentialStore>,
    state: RwLock<SessionState>,
    phase: watch::Sender<Phase>,
    refresh_flight: Mutex<Option<RefreshFlight>>,
}

/// The client's single logical session.
///
/// Cheap to clone; every clone shares the same state. Hand one to each
/// consumer instead of reaching for a global.
///
/// ```rust,ignore
/// let session = Session::from_config(ClientConfig::from_env()?, Arc::new(MemoryStore::new()))?;
/// session.initialize().await;
/// if !session.is_authenticated() {
///     session.login("alice", "secret").await?;
/// }
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("phase", &self.phase())
            .field("user", &self.user().map(|u| u.username))
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session in [`Phase::Initializing`]. Call
    /// [`initialize`](Self::initialize) once to restore persisted credentials.
    #[must_use]
    pub fn new(api: AuthApi, store: Arc<dyn CredentialStore>) -> Self {
        let (phase, _) = watch::channel(Phase::Initializing);
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                state: RwLock::new(SessionState::default()),
                phase,
                refresh_flight: Mutex::new(None),
            }),
        }
    }

    /// Build the endpoint client from `config` and wrap it in a session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the HTTP client cannot be constructed.
    pub fn from_config(config: ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self, Error> {
        Ok(Self::new(AuthApi::new(config)?, store))
    }

    /// Like [`from_config`](Self::from_config), with the store picked from
    /// `config`: a [`FileStore`](crate::FileStore) at
    /// [`credentials_path`](ClientConfig::credentials_path) when one is set,
    /// otherwise a [`MemoryStore`](crate::MemoryStore).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the HTTP client cannot be constructed.
    pub fn open(config: ClientConfig) -> Result<Self, Error> {
        let store = configured_store(&config);
        Self::from_config(config, store)
    }

    #[must_use]
    pub fn api(&self) -> &AuthApi {
        &self.inner.api
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.inner.phase.borrow()
    }

    /// Watch phase changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.inner.phase.subscribe()
    }

    /// Both an access token and a profile are held.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.state.read().is_authenticated()
    }

    /// Route guards should neither redirect to login nor away from it.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.phase() == Phase::Initializing
    }

    #[must_use]
    pub fn access_token(&self) -> Option<AccessToken> {
        self.inner.state.read().access_token.clone()
    }

    #[must_use]
    pub fn user(&self) -> Option<UserProfile> {
        self.inner.state.read().user.clone()
    }

    #[must_use]
    pub fn has_refresh_token(&self) -> bool {
        self.inner.state.read().refresh_token.is_some()
    }

    /// Expiry of the current access token, when it is a JWT.
    #[cfg(feature = "jwt")]
    #[must_use]
    pub fn access_token_expires_at(&self) -> Option<time::OffsetDateTime> {
        self.access_token()
            .and_then(|token| crate::token::expires_at(token.as_str()))
    }

    // ── Startup ────────────────────────────────────────────────────

    /// Restore persisted credentials, then check them with the backend.
    ///
    /// A complete persisted session is trusted immediately, so the phase is
    /// already [`Phase::Authenticated`] while verification runs. A rejected
    /// token is refreshed; only a terminal refresh failure signs the user out.
    /// Network failures leave the session as it is.
    pub async fn initialize(&self) -> Phase {
        self.set_phase(Phase::Initializing);

        let Some(access) = self.restore() else {
            return self.phase();
        };

        if locally_expired(access.as_str()) {
            tracing::info!("Stored access token has expired, refreshing");
            self.renew_on_startup().await;
            return self.phase();
        }

        match self.inner.api.verify(&access).await {
            Ok(Verification::Valid(Some(user))) => self.update_user(user),
            Ok(Verification::Valid(None)) => {}
            Ok(Verification::Rejected { status }) => {
                tracing::info!(status, "Stored access token rejected, refreshing");
                self.renew_on_startup().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token verification failed, keeping stored session");
            }
        }
        self.phase()
    }

    async fn renew_on_startup(&self) {
        match self.refresh().await {
            Ok(_) => {}
            Err(e) if e.is_terminal() => {
                tracing::info!(reason = %e, "Stored session could not be renewed");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed at startup, keeping stored session");
            }
        }
    }

    /// Load persisted entries into memory. Returns the access token when a
    /// complete session was found.
    fn restore(&self) -> Option<AccessToken> {
        let access = self.read_entry(CredentialKey::AccessToken);
        let refresh = self.read_entry(CredentialKey::RefreshToken);
        let user_raw = self.read_entry(CredentialKey::User);
        let any_persisted = access.is_some() || refresh.is_some() || user_raw.is_some();

        let user = user_raw.and_then(|raw| {
            serde_json::from_str::<UserProfile>(&raw)
                .map_err(|e| tracing::warn!(error = %e, "Stored user profile is unreadable"))
                .ok()
        });

        match (access, user) {
            (Some(access), Some(user)) => {
                let access = AccessToken::new(access);
                {
                    let mut state = self.inner.state.write();
                    state.access_token = Some(access.clone());
                    state.refresh_token = refresh.map(RefreshToken::new);
                    state.user = Some(user);
                    state.epoch += 1;
                }
                self.set_phase(Phase::Authenticated);
                Some(access)
            }
            _ => {
                if any_persisted {
                    tracing::warn!("Stored session is incomplete, discarding it");
                }
                self.clear();
                None
            }
        }
    }

    // ── Login / registration / logout ─────────────────────────────

    /// Exchange credentials for a token pair and start a session.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if either field is empty (nothing is sent);
    /// - [`Error::Authentication`] with the backend's message on rejection;
    /// - [`Error::Network`] on transport failure.
    ///
    /// Any failure leaves the session cleared and [`Phase::Unauthenticated`].
    pub async fn login(&self, username: &str, password: &str) -> Result<UserProfile, Error> {
        if username.trim().is_empty() {
            return Err(ValidationError::MissingField("username").into());
        }
        if password.is_empty() {
            return Err(ValidationError::MissingField("password").into());
        }

        self.set_phase(Phase::Initializing);
        match self.inner.api.obtain_pair(username, password).await {
            Ok(pair) => {
                let user = pair.user.unwrap_or_else(|| UserProfile::new(username));
                self.establish(pair.access, Some(pair.refresh), user.clone());
                tracing::info!(username = %user.username, "Login successful");
                Ok(user)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Login failed");
                self.clear();
                Err(e)
            }
        }
    }

    /// Create an account. Signs in directly when the backend hands back a
    /// token pair.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if username or password is empty;
    /// - [`Error::Api`] with the backend's message when refused;
    /// - [`Error::Network`] on transport failure.
    pub async fn register(&self, account: &NewAccount) -> Result<Registration, Error> {
        if account.username.trim().is_empty() {
            return Err(ValidationError::MissingField("username").into());
        }
        if account.password.is_empty() {
            return Err(ValidationError::MissingField("password").into());
        }

        self.set_phase(Phase::Initializing);
        let outcome = self.inner.api.register(account).await;
        match outcome {
            Ok(RegisterResponse {
                access: Some(access),
                refresh: Some(refresh),
                user,
                ..
            }) => {
                let user = user.unwrap_or_else(|| UserProfile::new(account.username.clone()));
                self.establish(access, Some(refresh), user.clone());
                tracing::info!(username = %user.username, "Registered and signed in");
                Ok(Registration::SignedIn(user))
            }
            Ok(response) => {
                self.settle_phase();
                tracing::info!(username = %account.username, "Registered, login required");
                Ok(Registration::ConfirmationRequired {
                    message: response.message,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "Registration failed");
                self.settle_phase();
                Err(e)
            }
        }
    }

    /// Drop all credentials, in memory and persisted. Safe to call repeatedly.
    pub fn logout(&self) {
        let was_authenticated = self.is_authenticated();
        self.clear();
        if was_authenticated {
            tracing::info!("Logged out");
        }
    }

    /// Replace the cached profile after an out-of-band edit. Tokens are untouched.
    pub fn update_user(&self, user: UserProfile) {
        self.inner.state.write().user = Some(user.clone());
        self.write_user(&user);
    }

    // ── Refresh ────────────────────────────────────────────────────

    /// Exchange the refresh token for a new access token.
    ///
    /// Concurrent callers share one in-flight exchange and all see its outcome.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionExpired`] when there is no usable refresh token or the
    ///   backend rejects it; the session has been cleared;
    /// - [`Error::Network`] on transport failure; the session is kept.
    pub async fn refresh(&self) -> Result<AccessToken, Error> {
        self.join_refresh().await.map_err(Error::from)
    }

    /// Renew after the backend rejected `rejected`.
    ///
    /// When the current token already differs (another caller renewed it while
    /// this request was in flight) it is returned without a new exchange.
    pub(crate) async fn renew_rejected(
        &self,
        rejected: Option<&AccessToken>,
    ) -> Result<AccessToken, Error> {
        if let Some(current) = self.access_token() {
            if rejected != Some(&current) {
                tracing::debug!("Access token already renewed, reusing it");
                return Ok(current);
            }
        }
        self.refresh().await
    }

    fn join_refresh(&self) -> SharedRefresh {
        let epoch = self.inner.state.read().epoch;
        let mut slot = self.inner.refresh_flight.lock();
        if let Some(flight) = slot.as_ref().filter(|f| f.epoch == epoch) {
            tracing::debug!("Joining in-flight token refresh");
            return flight.result.clone();
        }

        if self.is_authenticated() {
            self.set_phase(Phase::Refreshing);
        }
        // The exchange runs to completion even if every caller goes away.
        let task = tokio::spawn(self.clone().run_refresh(epoch));
        let result = async move {
            task.await.unwrap_or_else(|e| {
                tracing::error!(error = %e, "Token refresh task failed");
                Err(RefreshFailure::Interrupted(e.to_string()))
            })
        }
        .boxed()
        .shared();
        *slot = Some(RefreshFlight {
            epoch,
            result: result.clone(),
        });
        result
    }

    async fn run_refresh(self, epoch: u64) -> Result<AccessToken, RefreshFailure> {
        let refresh_token = self.inner.state.read().refresh_token.clone();

        let outcome = match refresh_token {
            None => Err(RefreshFailure::Expired(ExpiryReason::MissingRefreshToken)),
            Some(token) if locally_expired(token.as_str()) => {
                Err(RefreshFailure::Expired(ExpiryReason::RefreshTokenExpired))
            }
            Some(token) => self.inner.api.refresh(&token).await,
        };

        let outcome = match outcome {
            Ok(tokens) => self.apply_refresh(tokens, epoch),
            Err(failure) => {
                self.handle_refresh_failure(&failure, epoch);
                Err(failure)
            }
        };

        {
            let mut slot = self.inner.refresh_flight.lock();
            if slot.as_ref().is_some_and(|f| f.epoch == epoch) {
                *slot = None;
            }
        }
        outcome
    }

    fn apply_refresh(
        &self,
        tokens: RefreshedTokens,
        epoch: u64,
    ) -> Result<AccessToken, RefreshFailure> {
        {
            let mut state = self.inner.state.write();
            if state.epoch != epoch {
                tracing::debug!("Session replaced during refresh, discarding result");
                return state
                    .access_token
                    .clone()
                    .ok_or(RefreshFailure::Expired(ExpiryReason::MissingRefreshToken));
            }
            state.access_token = Some(tokens.access.clone());
            if let Some(rotated) = &tokens.refresh {
                state.refresh_token = Some(rotated.clone());
            }
        }

        self.write_entry(CredentialKey::AccessToken, tokens.access.as_str());
        if let Some(rotated) = &tokens.refresh {
            self.write_entry(CredentialKey::RefreshToken, rotated.as_str());
        }
        self.settle_phase();
        tracing::info!(rotated = tokens.refresh.is_some(), "Access token refreshed");
        Ok(tokens.access)
    }

    fn handle_refresh_failure(&self, failure: &RefreshFailure, epoch: u64) {
        if self.inner.state.read().epoch != epoch {
            tracing::debug!("Session replaced during refresh, ignoring failure");
            return;
        }
        match failure {
            RefreshFailure::Expired(reason) => {
                tracing::warn!(reason = %reason, "Token refresh failed, signing out");
                self.clear();
            }
            RefreshFailure::Interrupted(_) => self.settle_phase(),
            RefreshFailure::Network(e) => {
                tracing::warn!(error = %e, "Token refresh failed, keeping session");
                self.settle_phase();
            }
            RefreshFailure::Config(msg) => {
                tracing::error!(error = %msg, "Token refresh misconfigured");
                self.settle_phase();
            }
        }
    }

    // ── State helpers ──────────────────────────────────────────────

    fn establish(&self, access: AccessToken, refresh: Option<RefreshToken>, user: UserProfile) {
        {
            let mut state = self.inner.state.write();
            state.access_token = Some(access.clone());
            state.refresh_token = refresh.clone();
            state.user = Some(user.clone());
            state.epoch += 1;
        }

        // Start from an empty store so no entry of a previous session survives.
        if let Err(e) = self.inner.store.clear() {
            tracing::warn!(error = %e, "Failed to clear credential store");
        }
        self.write_entry(CredentialKey::AccessToken, access.as_str());
        if let Some(refresh) = &refresh {
            self.write_entry(CredentialKey::RefreshToken, refresh.as_str());
        }
        self.write_user(&user);
        self.set_phase(Phase::Authenticated);
    }

    fn clear(&self) {
        {
            let mut state = self.inner.state.write();
            let epoch = state.epoch + 1;
            *state = SessionState {
                epoch,
                ..SessionState::default()
            };
        }
        if let Err(e) = self.inner.store.clear() {
            tracing::warn!(error = %e, "Failed to clear credential store");
        }
        self.set_phase(Phase::Unauthenticated);
    }

    fn settle_phase(&self) {
        let phase = self.inner.state.read().settled_phase();
        self.set_phase(phase);
    }

    fn set_phase(&self, phase: Phase) {
        self.inner.phase.send_if_modified(|current| {
            if *current == phase {
                return false;
            }
            tracing::debug!(from = %current, to = %phase, "Session phase changed");
            *current = phase;
            true
        });
    }

    fn read_entry(&self, key: CredentialKey) -> Option<String> {
        match self.inner.store.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to read credential store");
                None
            }
        }
    }

    fn write_entry(&self, key: CredentialKey, value: &str) {
        if let Err(e) = self.inner.store.set(key, value) {
            tracing::warn!(key = %key, error = %e, "Failed to persist credential");
        }
    }

    fn write_user(&self, user: &UserProfile) {
        match serde_json::to_string(user) {
            Ok(json) => self.write_entry(CredentialKey::User, &json),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize user profile"),
        }
    }
}

#[cfg(feature = "file-store")]
fn configured_store(config: &ClientConfig) -> Arc<dyn CredentialStore> {
    match crate::store::FileStore::from_config(config) {
        Some(store) => Arc::new(store),
        None => Arc::new(crate::store::MemoryStore::new()),
    }
}

#[cfg(not(feature = "file-store"))]
fn configured_store(config: &ClientConfig) -> Arc<dyn CredentialStore> {
    if let Some(path) = config.credentials_path() {
        tracing::warn!(path = %path.display(), "file-store feature disabled, keeping credentials in memory");
    }
    Arc::new(crate::store::MemoryStore::new())
}

#[cfg(feature = "jwt")]
fn locally_expired(token: &str) -> bool {
    crate::token::is_expired(token)
}

#[cfg(not(feature = "jwt"))]
fn locally_expired(_token: &str) -> bool {
    false
}
