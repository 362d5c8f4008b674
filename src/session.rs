//! The session manager: sole owner of the credential pair.
//!
//! Everything that needs a token reads it from a [`SessionManager`], and
//! everything that needs a new one asks [`SessionManager::refresh`].  Refresh
//! is single-flight: one network round trip serves every concurrent caller.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, warn};
use time::{Duration, OffsetDateTime};
use tokio::sync::broadcast;
use url::Url;

use crate::error::{Error, Result};
use crate::observability::{
    SESSION_LOGIN_FAILURES, SESSION_LOGIN_REQUIRED, SESSION_LOGINS, SESSION_LOGOUT_ERRORS,
    SESSION_LOGOUTS, SESSION_REFRESH_DURATION, SESSION_REFRESH_FAILURES, SESSION_REFRESH_JOINS,
    SESSION_REFRESHES,
};
use crate::store::{CredentialStore, PersistedSession};
use crate::transport::{ApiRequest, Transport, endpoint};
use crate::types::{
    CredentialPair, LoginRequest, LoginResponse, OAuthProvider, RefreshRequest, RefreshResponse,
    SignupRequest, User,
};

/// Access tokens this close to their `exp` are refreshed before a stream opens.
pub const EXPIRY_BUFFER: Duration = Duration::seconds(30);

const EVENT_CAPACITY: usize = 16;

type RefreshFuture = Shared<BoxFuture<'static, Option<String>>>;

//////////////////////////////////////////// SessionEvent ///////////////////////////////////////////

/// Credential changes broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A login was verified.
    LoggedIn(User),
    /// A new access token was installed.
    Refreshed,
    /// The user signed out.
    LoggedOut,
    /// Credentials were cleared after a failure; the user must sign in again.
    LoginRequired,
}

//////////////////////////////////////////// SessionState ///////////////////////////////////////////

#[derive(Default)]
struct SessionState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<OffsetDateTime>,
    user: Option<User>,
    // Bumped whenever login or logout replaces the credentials wholesale.
    epoch: u64,
}

impl SessionState {
    fn has_credentials(&self) -> bool {
        self.access_token.is_some() || self.refresh_token.is_some()
    }

    fn install(&mut self, pair: CredentialPair) {
        self.access_token = Some(pair.access_token);
        self.refresh_token = pair.refresh_token;
        self.expires_at = pair.expires_at;
    }

    fn credentials(&self) -> Option<CredentialPair> {
        Some(CredentialPair {
            access_token: self.access_token.clone()?,
            refresh_token: self.refresh_token.clone(),
            expires_at: self.expires_at,
        })
    }

    /// Drop everything and start a new epoch.  Returns true if there was
    /// anything to drop.
    fn reset(&mut self) -> bool {
        let had_credentials = self.has_credentials();
        *self = SessionState {
            epoch: self.epoch + 1,
            ..SessionState::default()
        };
        had_credentials
    }

    fn persisted(&self) -> PersistedSession {
        PersistedSession {
            refresh_token: self.refresh_token.clone(),
            user: self.user.clone(),
        }
    }
}

/////////////////////////////////////////////// Inner //////////////////////////////////////////////

struct Inner {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    state: Mutex<SessionState>,
    /// The pending refresh and the session epoch it was started under.
    in_flight: Mutex<Option<(u64, RefreshFuture)>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Inner {
    fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn persist(&self, session: &PersistedSession) {
        if let Err(err) = self.store.save(session) {
            warn!("could not persist session: {err}");
        }
    }

    fn clear_store(&self) {
        if let Err(err) = self.store.clear() {
            warn!("could not clear persisted session: {err}");
        }
    }

    async fn fetch_user(&self, access_token: &str) -> Result<User> {
        let request = ApiRequest::get("auth/me");
        self.transport
            .execute(&request, Some(access_token))
            .await?
            .error_for_status()?
            .json()
    }

    async fn request_refresh(&self, refresh_token: String) -> Result<RefreshResponse> {
        let request = ApiRequest::post("auth/refresh")
            .unauthenticated()
            .with_json(&RefreshRequest { refresh_token })?;
        self.transport
            .execute(&request, None)
            .await?
            .error_for_status()?
            .json()
    }

    async fn perform_refresh(&self) -> Option<String> {
        let (refresh_token, epoch) = {
            let state = lock(&self.state);
            (state.refresh_token.clone(), state.epoch)
        };
        let Some(refresh_token) = refresh_token else {
            debug!("no refresh token available");
            self.fail_refresh(epoch);
            return None;
        };

        SESSION_REFRESHES.click();
        let start = Instant::now();
        let outcome = self.request_refresh(refresh_token.clone()).await;
        SESSION_REFRESH_DURATION.add(start.elapsed().as_secs_f64());

        match outcome {
            Ok(response) => self.install_refresh(epoch, refresh_token, response),
            Err(err) => {
                SESSION_REFRESH_FAILURES.click();
                warn!("token refresh failed: {err}");
                self.fail_refresh(epoch);
                None
            }
        }
    }

    fn install_refresh(
        &self,
        epoch: u64,
        previous: String,
        response: RefreshResponse,
    ) -> Option<String> {
        let (token, persisted) = {
            let mut state = lock(&self.state);
            if state.epoch != epoch {
                debug!("discarding token refresh that settled after the session changed");
                return state.access_token.clone();
            }
            let refresh_token = response.refresh_token.unwrap_or(previous);
            let pair = CredentialPair::new(response.access_token, Some(refresh_token));
            let token = pair.access_token.clone();
            state.install(pair);
            (token, state.persisted())
        };
        self.persist(&persisted);
        debug!("access token refreshed");
        self.emit(SessionEvent::Refreshed);
        Some(token)
    }

    fn fail_refresh(&self, epoch: u64) {
        let cleared = {
            let mut state = lock(&self.state);
            if state.epoch != epoch {
                return;
            }
            state.reset()
        };
        self.clear_store();
        if cleared {
            self.require_login();
        }
    }

    fn require_login(&self) {
        SESSION_LOGIN_REQUIRED.click();
        debug!("credentials cleared; login required");
        self.emit(SessionEvent::LoginRequired);
    }
}

/////////////////////////////////////////// SessionManager //////////////////////////////////////////

/// Owner of the access/refresh token pair.
///
/// Cloning is cheap; clones share one session, so the request interceptor and
/// the streaming client see the same credentials.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// A signed-out session over `transport`, persisting through `store`.
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn CredentialStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                state: Mutex::new(SessionState::default()),
                in_flight: Mutex::new(None),
                events,
            }),
        }
    }

    /// The transport this session talks to the backend through.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Restore a persisted session.
    ///
    /// Only the refresh token is trusted: if one was stored it is exchanged
    /// for a fresh access token.  Returns the signed-in user, if any.
    pub async fn init(&self) -> Result<Option<User>> {
        let persisted = self.inner.store.load()?;
        let Some(refresh_token) = persisted.refresh_token else {
            debug!("no persisted session");
            return Ok(None);
        };
        {
            let mut state = lock(&self.inner.state);
            state.refresh_token = Some(refresh_token);
            state.user = persisted.user;
        }
        let Some(access_token) = self.refresh().await else {
            return Ok(None);
        };
        if self.current_user().is_none() {
            match self.inner.fetch_user(&access_token).await {
                Ok(user) => {
                    let persisted = {
                        let mut state = lock(&self.inner.state);
                        state.user = Some(user);
                        state.persisted()
                    };
                    self.inner.persist(&persisted);
                }
                Err(err) => warn!("could not load profile for restored session: {err}"),
            }
        }
        Ok(self.current_user())
    }

    /// Install `access_token`/`refresh_token` and verify them with `GET /auth/me`.
    ///
    /// All or nothing: if verification fails the credentials are rolled
    /// back, the durable store is cleared, and the result is an
    /// authentication error.
    pub async fn login(
        &self,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
    ) -> Result<User> {
        let pair = CredentialPair::new(access_token, refresh_token);
        let access_token = pair.access_token.clone();
        let epoch = {
            let mut state = lock(&self.inner.state);
            state.reset();
            state.install(pair);
            state.epoch
        };

        match self.inner.fetch_user(&access_token).await {
            Ok(user) => {
                let persisted = {
                    let mut state = lock(&self.inner.state);
                    if state.epoch != epoch {
                        return Err(Error::authentication(
                            "login was superseded by another sign-in or sign-out",
                        ));
                    }
                    state.user = Some(user.clone());
                    state.persisted()
                };
                self.inner.persist(&persisted);
                SESSION_LOGINS.click();
                debug!("logged in as user {}", user.id);
                self.inner.emit(SessionEvent::LoggedIn(user.clone()));
                Ok(user)
            }
            Err(err) => {
                SESSION_LOGIN_FAILURES.click();
                warn!("login verification failed: {err}");
                let rolled_back = {
                    let mut state = lock(&self.inner.state);
                    let current = state.epoch == epoch;
                    if current {
                        state.reset();
                    }
                    current
                };
                if rolled_back {
                    self.inner.clear_store();
                }
                Err(Error::authentication(format!(
                    "login verification failed: {}",
                    err.message()
                )))
            }
        }
    }

    /// Sign in with email and password (`POST /auth/login`), then verify.
    pub async fn login_with_password(&self, email: &str, password: &str) -> Result<User> {
        let request = ApiRequest::post("auth/login")
            .unauthenticated()
            .with_json(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })?;
        let response = self.inner.transport.execute(&request, None).await;
        let login: LoginResponse = match response.and_then(|r| r.error_for_status()) {
            Ok(response) => response.json()?,
            Err(err) => {
                SESSION_LOGIN_FAILURES.click();
                return Err(err);
            }
        };
        self.login(login.access_token, login.refresh_token).await
    }

    /// Create an account (`POST /auth/signup`).  Does not sign in.
    pub async fn signup(&self, email: &str, password: &str, full_name: &str) -> Result<User> {
        let request = ApiRequest::post("auth/signup")
            .unauthenticated()
            .with_json(&SignupRequest {
                email: email.to_string(),
                password: password.to_string(),
                full_name: full_name.to_string(),
            })?;
        self.inner
            .transport
            .execute(&request, None)
            .await?
            .error_for_status()?
            .json()
    }

    /// Where to send a browser to start signing in with `provider`.
    pub fn oauth_login_url(&self, provider: OAuthProvider) -> Result<Url> {
        endpoint(
            self.inner.transport.base_url(),
            &format!("auth/oauth/login/{provider}"),
        )
    }

    /// Finish an OAuth sign-in from the callback URL the backend redirected to.
    ///
    /// Both `access_token` and `refresh_token` query parameters are required.
    pub async fn login_from_callback(&self, callback: &Url) -> Result<User> {
        let param = |name: &str| {
            callback
                .query_pairs()
                .find(|(key, value)| key == name && !value.is_empty())
                .map(|(_, value)| value.into_owned())
        };
        match (param("access_token"), param("refresh_token")) {
            (Some(access_token), Some(refresh_token)) => {
                self.login(access_token, Some(refresh_token)).await
            }
            _ => {
                SESSION_LOGIN_FAILURES.click();
                Err(Error::authentication(
                    "OAuth callback did not carry both tokens",
                ))
            }
        }
    }

    /// Sign out.
    ///
    /// Local state is cleared first and unconditionally; the backend is then
    /// told to revoke the refresh token on a best-effort basis.
    pub async fn logout(&self) {
        let (access_token, refresh_token) = {
            let mut state = lock(&self.inner.state);
            let tokens = (state.access_token.take(), state.refresh_token.take());
            state.reset();
            tokens
        };
        self.inner.clear_store();
        SESSION_LOGOUTS.click();
        debug!("logged out");
        self.inner.emit(SessionEvent::LoggedOut);

        let Some(refresh_token) = refresh_token else {
            return;
        };
        let request = match ApiRequest::post("auth/logout")
            .unauthenticated()
            .with_json(&RefreshRequest { refresh_token })
        {
            Ok(request) => request,
            Err(err) => {
                SESSION_LOGOUT_ERRORS.click();
                warn!("could not build logout request: {err}");
                return;
            }
        };
        match self
            .inner
            .transport
            .execute(&request, access_token.as_deref())
            .await
        {
            Ok(response) if response.is_success() => {}
            Ok(response) => {
                SESSION_LOGOUT_ERRORS.click();
                warn!("backend logout failed: {}", response.into_error());
            }
            Err(err) => {
                SESSION_LOGOUT_ERRORS.click();
                warn!("backend logout failed: {err}");
            }
        }
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// Single-flight: callers arriving while a refresh is in progress get
    /// that refresh's outcome.  On failure all credentials are cleared,
    /// [`SessionEvent::LoginRequired`] is broadcast once, and `None` is
    /// returned.
    pub async fn refresh(&self) -> Option<String> {
        let refresh = {
            let mut in_flight = lock(&self.inner.in_flight);
            let epoch = lock(&self.inner.state).epoch;
            let joinable = match in_flight.as_ref() {
                Some((started, refresh)) if *started == epoch => Some(refresh.clone()),
                Some(_) => {
                    // Started under an earlier session; nobody may join it now.
                    debug!("dropping token refresh left over from a previous session");
                    None
                }
                None => None,
            };
            match joinable {
                Some(refresh) => {
                    SESSION_REFRESH_JOINS.click();
                    debug!("joining in-flight token refresh");
                    refresh
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let refresh = async move {
                        let token = inner.perform_refresh().await;
                        let mut in_flight = lock(&inner.in_flight);
                        if in_flight.as_ref().is_some_and(|(started, _)| *started == epoch) {
                            *in_flight = None;
                        }
                        token
                    }
                    .boxed()
                    .shared();
                    *in_flight = Some((epoch, refresh.clone()));
                    refresh
                }
            }
        };
        refresh.await
    }

    /// The current access token.  Never blocks on the network.
    pub fn access_token(&self) -> Option<String> {
        lock(&self.inner.state).access_token.clone()
    }

    /// The current access token, refreshed first if it is known to expire
    /// within [`EXPIRY_BUFFER`].
    pub async fn fresh_access_token(&self) -> Option<String> {
        let expiring = {
            let state = lock(&self.inner.state);
            match state.credentials() {
                Some(pair) if pair.expires_within(OffsetDateTime::now_utc(), EXPIRY_BUFFER) => {
                    true
                }
                Some(pair) => return Some(pair.access_token),
                None => state.refresh_token.is_some(),
            }
        };
        if expiring {
            debug!("access token missing or about to expire; refreshing");
            self.refresh().await
        } else {
            None
        }
    }

    /// A snapshot of the credential pair.
    pub fn credentials(&self) -> Option<CredentialPair> {
        lock(&self.inner.state).credentials()
    }

    /// The verified user, if signed in.
    pub fn current_user(&self) -> Option<User> {
        lock(&self.inner.state).user.clone()
    }

    /// True while an access token is held.
    pub fn is_authenticated(&self) -> bool {
        lock(&self.inner.state).access_token.is_some()
    }

    /// Listen for credential changes.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Clear credentials after a dependent saw an authentication failure.
    ///
    /// Broadcasts [`SessionEvent::LoginRequired`] only if credentials were
    /// still present, so a failure `refresh` already reported is not
    /// reported twice.  Returns whether anything was cleared.
    pub fn expire(&self) -> bool {
        let cleared = lock(&self.inner.state).reset();
        if cleared {
            self.inner.clear_store();
            self.inner.require_login();
        }
        cleared
    }

    /// Like [`SessionManager::expire`], but only if `rejected` is still the
    /// current access token.
    pub fn expire_token(&self, rejected: &str) -> bool {
        let cleared = {
            let mut state = lock(&self.inner.state);
            state.access_token.as_deref() == Some(rejected) && state.reset()
        };
        if cleared {
            self.inner.clear_store();
            self.inner.require_login();
        }
        cleared
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;

    use crate::store::MemoryStore;
    use crate::testing::ScriptedTransport;
    use crate::transport::{ApiResponse, Method, RequestBody};

    fn profile() -> serde_json::Value {
        json!({"id": "u1", "email": "ada@example.com", "full_name": "Ada"})
    }

    fn manager() -> (SessionManager, Arc<ScriptedTransport>, Arc<MemoryStore>) {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on(Method::Get, "auth/me", |_, bearer| match bearer {
            Some(_) => Ok(ApiResponse::json_body(200, &profile())),
            None => Ok(ApiResponse::json_body(401, &json!({"detail": "Not authenticated"}))),
        });
        let store = Arc::new(MemoryStore::new());
        let session = SessionManager::new(transport.clone(), store.clone());
        (session, transport, store)
    }

    fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut seen = Vec::new();
        loop {
            match events.try_recv() {
                Ok(event) => seen.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return seen,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
    }

    #[tokio::test]
    async fn login_verifies_and_persists_refresh_token() {
        let (session, _transport, store) = manager();
        let mut events = session.subscribe();

        let user = session.login("a1", Some("r1".to_string())).await.unwrap();
        assert_eq!(user.display_name(), "Ada");
        assert!(session.is_authenticated());
        assert_eq!(session.access_token().as_deref(), Some("a1"));

        let persisted = store.snapshot();
        assert_eq!(persisted.refresh_token.as_deref(), Some("r1"));
        assert_eq!(persisted.user.unwrap().id, "u1");
        assert_eq!(drain(&mut events), vec![SessionEvent::LoggedIn(user)]);
    }

    #[tokio::test]
    async fn failed_verification_rolls_back() {
        let (session, transport, store) = manager();
        store
            .save(&PersistedSession {
                refresh_token: Some("r0".to_string()),
                user: None,
            })
            .unwrap();
        transport.on(Method::Get, "auth/me", |_, _| {
            Ok(ApiResponse::json_body(401, &json!({"detail": "Invalid token"})))
        });

        let err = session.login("bad", Some("r1".to_string())).await.unwrap_err();
        assert!(err.is_authentication());
        assert!(session.credentials().is_none());
        assert!(session.current_user().is_none());
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn failed_verification_over_network_is_still_authentication_failure() {
        let (session, transport, _store) = manager();
        transport.on(Method::Get, "auth/me", |_, _| {
            Err(Error::connection("connection refused", None))
        });
        let err = session.login("a1", Some("r1".to_string())).await.unwrap_err();
        assert!(err.is_authentication());
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn login_with_password_posts_credentials() {
        let (session, transport, _store) = manager();
        transport.on(Method::Post, "auth/login", |request, bearer| {
            assert!(bearer.is_none());
            assert!(!request.authenticated);
            Ok(ApiResponse::json_body(
                200,
                &json!({"access_token": "a1", "refresh_token": "r1", "token_type": "bearer"}),
            ))
        });
        let user = session
            .login_with_password("ada@example.com", "hunter2")
            .await
            .unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(session.credentials().unwrap().refresh_token.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn wrong_password_is_authentication_failure() {
        let (session, transport, _store) = manager();
        transport.on(Method::Post, "auth/login", |_, _| {
            Ok(ApiResponse::json_body(401, &json!({"detail": "Incorrect email or password"})))
        });
        let err = session
            .login_with_password("ada@example.com", "nope")
            .await
            .unwrap_err();
        assert!(err.is_authentication());
        assert_eq!(err.message(), "Incorrect email or password");
        assert_eq!(transport.count(Method::Get, "auth/me"), 0);
    }

    #[tokio::test]
    async fn logout_clears_even_when_backend_fails() {
        let (session, transport, store) = manager();
        transport.on(Method::Post, "auth/logout", |_, _| {
            Err(Error::timeout("Request timed out", Some(60.0)))
        });
        session.login("a1", Some("r1".to_string())).await.unwrap();
        let mut events = session.subscribe();

        session.logout().await;
        assert!(session.credentials().is_none());
        assert!(session.current_user().is_none());
        assert!(store.snapshot().is_empty());
        assert_eq!(transport.count(Method::Post, "auth/logout"), 1);
        assert_eq!(drain(&mut events), vec![SessionEvent::LoggedOut]);
    }

    #[tokio::test]
    async fn logout_sends_refresh_token() {
        let (session, transport, _store) = manager();
        transport.on(Method::Post, "auth/logout", |request, _| {
            assert_eq!(
                request.body,
                crate::transport::RequestBody::Json(json!({"refresh_token": "r1"}))
            );
            Ok(ApiResponse::new(200, ""))
        });
        session.login("a1", Some("r1".to_string())).await.unwrap();
        session.logout().await;
        assert_eq!(transport.count(Method::Post, "auth/logout"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_refreshes_share_one_round_trip() {
        let (session, transport, store) = manager();
        transport.on_delayed(
            Method::Post,
            "auth/refresh",
            StdDuration::from_millis(100),
            |_, _| {
                Ok(ApiResponse::json_body(
                    200,
                    &json!({"access_token": "a2", "refresh_token": "r2"}),
                ))
            },
        );
        session.login("a1", Some("r1".to_string())).await.unwrap();

        let results =
            futures::future::join_all((0..8).map(|_| session.refresh())).await;
        assert!(results.iter().all(|t| t.as_deref() == Some("a2")));
        assert_eq!(transport.count(Method::Post, "auth/refresh"), 1);
        assert_eq!(session.access_token().as_deref(), Some("a2"));
        assert_eq!(store.snapshot().refresh_token.as_deref(), Some("r2"));

        // Settled refreshes do not linger: the next call goes to the network.
        assert_eq!(session.refresh().await.as_deref(), Some("a2"));
        assert_eq!(transport.count(Method::Post, "auth/refresh"), 2);
    }

    #[tokio::test]
    async fn refresh_keeps_refresh_token_when_not_rotated() {
        let (session, transport, _store) = manager();
        transport.on(Method::Post, "auth/refresh", |_, _| {
            Ok(ApiResponse::json_body(200, &json!({"access_token": "a2"})))
        });
        session.login("a1", Some("r1".to_string())).await.unwrap();
        assert_eq!(session.refresh().await.as_deref(), Some("a2"));
        assert_eq!(session.credentials().unwrap().refresh_token.as_deref(), Some("r1"));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_failure_requires_login_exactly_once() {
        let (session, transport, store) = manager();
        transport.on_delayed(
            Method::Post,
            "auth/refresh",
            StdDuration::from_millis(50),
            |_, _| Ok(ApiResponse::json_body(401, &json!({"detail": "Invalid refresh token"}))),
        );
        session.login("a1", Some("r1".to_string())).await.unwrap();
        let mut events = session.subscribe();

        let results =
            futures::future::join_all((0..4).map(|_| session.refresh())).await;
        assert!(results.iter().all(Option::is_none));
        assert_eq!(transport.count(Method::Post, "auth/refresh"), 1);
        assert!(session.credentials().is_none());
        assert!(store.snapshot().is_empty());

        // A later failure with nothing left to clear stays quiet.
        assert!(session.refresh().await.is_none());
        assert!(!session.expire());
        assert_eq!(drain(&mut events), vec![SessionEvent::LoginRequired]);
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_never_hits_network() {
        let (session, transport, _store) = manager();
        session.login("a1", None).await.unwrap();
        assert!(session.refresh().await.is_none());
        assert_eq!(transport.count(Method::Post, "auth/refresh"), 0);
        assert!(!session.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_settling_after_logout_is_discarded() {
        let (session, transport, store) = manager();
        transport.on_delayed(
            Method::Post,
            "auth/refresh",
            StdDuration::from_millis(100),
            |_, _| Ok(ApiResponse::json_body(200, &json!({"access_token": "a2"}))),
        );
        transport.on(Method::Post, "auth/logout", |_, _| Ok(ApiResponse::new(200, "")));
        session.login("a1", Some("r1".to_string())).await.unwrap();

        let (token, ()) = tokio::join!(session.refresh(), async {
            tokio::time::sleep(StdDuration::from_millis(10)).await;
            session.logout().await;
        });
        assert!(token.is_none());
        assert!(!session.is_authenticated());
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_refresh_does_not_leak_into_next_login() {
        let (session, transport, _store) = manager();
        transport.on_delayed(
            Method::Post,
            "auth/refresh",
            StdDuration::from_millis(100),
            |request, _| {
                let RequestBody::Json(body) = &request.body else {
                    panic!("refresh body should be JSON");
                };
                let refresh_token = body["refresh_token"].as_str().unwrap_or_default();
                Ok(ApiResponse::json_body(
                    200,
                    &json!({"access_token": format!("fresh-for-{refresh_token}")}),
                ))
            },
        );
        session.login("a1", Some("r1".to_string())).await.unwrap();

        let abandoned = tokio::time::timeout(StdDuration::from_millis(10), session.refresh()).await;
        assert!(abandoned.is_err());
        session.logout().await;
        session.login("b1", Some("r2".to_string())).await.unwrap();

        assert_eq!(session.refresh().await.as_deref(), Some("fresh-for-r2"));
        assert_eq!(session.access_token().as_deref(), Some("fresh-for-r2"));
        let sent: Vec<RequestBody> = transport
            .calls()
            .into_iter()
            .filter(|call| call.path == "auth/refresh")
            .map(|call| call.request.body)
            .collect();
        assert_eq!(
            sent.last(),
            Some(&RequestBody::Json(json!({"refresh_token": "r2"})))
        );
    }

    #[tokio::test]
    async fn init_bootstraps_from_persisted_refresh_token() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on(Method::Post, "auth/refresh", |request, _| {
            assert_eq!(
                request.body,
                crate::transport::RequestBody::Json(json!({"refresh_token": "r1"}))
            );
            Ok(ApiResponse::json_body(200, &json!({"access_token": "a2"})))
        });
        let store = Arc::new(MemoryStore::with_session(PersistedSession {
            refresh_token: Some("r1".to_string()),
            user: Some(User::new("u1", "ada@example.com")),
        }));
        let session = SessionManager::new(transport.clone(), store);

        let user = session.init().await.unwrap().unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(session.access_token().as_deref(), Some("a2"));
        assert_eq!(transport.count(Method::Get, "auth/me"), 0);
    }

    #[tokio::test]
    async fn init_without_persisted_session_is_signed_out() {
        let (session, transport, _store) = manager();
        assert!(session.init().await.unwrap().is_none());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn init_with_rejected_refresh_token_requires_login() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.on(Method::Post, "auth/refresh", |_, _| {
            Ok(ApiResponse::json_body(401, &json!({"detail": "expired"})))
        });
        let store = Arc::new(MemoryStore::with_session(PersistedSession {
            refresh_token: Some("r1".to_string()),
            user: None,
        }));
        let session = SessionManager::new(transport, store.clone());
        let mut events = session.subscribe();
        assert!(session.init().await.unwrap().is_none());
        assert!(store.snapshot().is_empty());
        assert_eq!(drain(&mut events), vec![SessionEvent::LoginRequired]);
    }

    #[tokio::test]
    async fn oauth_callback_requires_both_tokens() {
        let (session, _transport, _store) = manager();
        let url = Url::parse("http://localhost:3000/oauth/callback?access_token=a1").unwrap();
        let err = session.login_from_callback(&url).await.unwrap_err();
        assert!(err.is_authentication());

        let url = Url::parse(
            "http://localhost:3000/oauth/callback?access_token=a1&refresh_token=r1",
        )
        .unwrap();
        let user = session.login_from_callback(&url).await.unwrap();
        assert_eq!(user.id, "u1");
    }

    #[test]
    fn oauth_login_urls() {
        let (session, _transport, _store) = manager();
        assert_eq!(
            session.oauth_login_url(OAuthProvider::GitHub).unwrap().as_str(),
            "http://backend.test/api/auth/oauth/login/github"
        );
    }

    #[tokio::test]
    async fn expire_token_ignores_superseded_tokens() {
        let (session, _transport, _store) = manager();
        session.login("a1", Some("r1".to_string())).await.unwrap();
        let mut events = session.subscribe();
        assert!(!session.expire_token("a0"));
        assert!(session.is_authenticated());
        assert!(session.expire_token("a1"));
        assert!(!session.is_authenticated());
        assert_eq!(drain(&mut events), vec![SessionEvent::LoginRequired]);
    }

    #[tokio::test]
    async fn fresh_access_token_refreshes_expiring_jwt() {
        let (session, transport, _store) = manager();
        transport.on(Method::Post, "auth/refresh", |_, _| {
            Ok(ApiResponse::json_body(200, &json!({"access_token": "a2"})))
        });
        let expired = crate::utils::jwt::encode_for_test(&json!({"exp": 1_000}));
        session.login(expired, Some("r1".to_string())).await.unwrap();
        assert_eq!(session.fresh_access_token().await.as_deref(), Some("a2"));

        // Opaque tokens are used as-is.
        assert_eq!(session.fresh_access_token().await.as_deref(), Some("a2"));
        assert_eq!(transport.count(Method::Post, "auth/refresh"), 1);
    }
}
