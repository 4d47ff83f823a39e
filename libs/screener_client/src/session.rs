//! Authentication session state machine.
//!
//! `SessionStore` owns the credential, mirrors it into the gateway's default
//! header and persists it through the injected `PersistenceAdapter`.
//!
//! Every operation bumps a monotonic epoch when it starts. A completion whose
//! epoch is no longer current leaves shared state untouched, so a slow login
//! that resolves after a logout (or after a newer login) cannot clobber it.
//! The state mutex is never held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::{Credential, Error, Identity, RegisterRequest, TokenResponse};
use query_cache::{CacheKey, WeakQueryCache};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::gateway::HttpGateway;
use crate::persist::{PersistedSession, PersistenceAdapter};

const LOGIN_PATH: &str = "/auth/login";
const ME_PATH: &str = "/auth/me";
const REGISTER_PATH: &str = "/auth/register";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionStatus {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated,
}

/// Snapshot of the authenticated identity held by the client.
///
/// `status == Authenticated` exactly when both `user` and `token` are set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub user: Option<Identity>,
    pub token: Option<Credential>,
    pub status: SessionStatus,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }

    pub fn is_privileged(&self) -> bool {
        self.is_authenticated() && self.user.as_ref().is_some_and(|u| u.is_privileged)
    }

    fn authenticated(user: Identity, token: Credential) -> Self {
        Self {
            user: Some(user),
            token: Some(token),
            status: SessionStatus::Authenticated,
        }
    }
}

/// Notified whenever the session's identity is discarded.
///
/// The store keeps observers for its whole lifetime unless they report
/// themselves detached, so an observer must not own the store.
pub trait SessionObserver: Send + Sync {
    fn session_cleared(&self);

    /// Detached observers are dropped from the store on the next notification.
    fn is_attached(&self) -> bool {
        true
    }
}

/// Caches are observed through weak handles: their fetchers usually hold the
/// store, and a strong handle here would keep both alive forever.
impl<K, V> SessionObserver for WeakQueryCache<K, V>
where
    K: CacheKey,
    V: Send + Sync + 'static,
{
    fn session_cleared(&self) {
        if let Some(cache) = self.upgrade() {
            cache.invalidate(|key| key.identity_scoped());
        }
    }

    fn is_attached(&self) -> bool {
        self.is_alive()
    }
}

struct State {
    session: Session,
    epoch: u64,
}

pub struct SessionStore {
    gateway: HttpGateway,
    persistence: Arc<dyn PersistenceAdapter>,
    state: Mutex<State>,
    changes: watch::Sender<Session>,
    observers: Mutex<Vec<Arc<dyn SessionObserver>>>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("session", &self.snapshot())
            .field("epoch", &self.epoch())
            .finish()
    }
}

impl SessionStore {
    /// Create the store, synchronously rehydrating any persisted session.
    ///
    /// A persisted token with an identity is trusted optimistically
    /// (`Authenticated`) until `check_auth` verifies it. A token without an
    /// identity is held for verification only.
    pub fn new(gateway: HttpGateway, persistence: Arc<dyn PersistenceAdapter>) -> Self {
        let session = match persistence.load() {
            Ok(Some(PersistedSession {
                token,
                user: Some(user),
            })) => {
                info!(email = %user.email, "rehydrated persisted session");
                gateway.set_bearer(&token);
                Session::authenticated(user, token)
            }
            Ok(Some(PersistedSession { token, user: None })) => {
                debug!("rehydrated token without identity; awaiting verification");
                Session {
                    token: Some(token),
                    ..Session::default()
                }
            }
            Ok(None) => Session::default(),
            Err(e) => {
                warn!("Failed to load persisted session: {}", e);
                Session::default()
            }
        };

        let (changes, _) = watch::channel(session.clone());
        Self {
            gateway,
            persistence,
            state: Mutex::new(State { session, epoch: 0 }),
            changes,
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Register a party to be told when the identity is discarded.
    pub fn add_observer(&self, observer: Arc<dyn SessionObserver>) {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        observers.retain(|o| o.is_attached());
        observers.push(observer);
    }

    /// Receive every session transition.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.changes.subscribe()
    }

    pub fn snapshot(&self) -> Session {
        self.lock().session.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().session.status
    }

    pub fn user(&self) -> Option<Identity> {
        self.lock().session.user.clone()
    }

    /// Current epoch. Callers capture it before an authenticated request and
    /// hand it to `expire` if the request comes back unauthorized.
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    // ── Operations ────────────────────────────────────────────────────

    /// Exchange credentials for a token, then fetch the identity with it.
    ///
    /// Allowed from any state; a newer login supersedes an older one still in
    /// flight. The superseded call returns `Error::Superseded`.
    pub async fn login(&self, email: &str, secret: &str) -> Result<Identity, Error> {
        let (epoch, cleared) = {
            let mut state = self.lock();
            if state.session.status == SessionStatus::Authenticating {
                debug!("superseding a login already in flight");
            }
            state.epoch += 1;
            let cleared = self.clear_locked(&mut state);
            state.session.status = SessionStatus::Authenticating;
            self.publish(&state);
            (state.epoch, cleared)
        };
        if cleared {
            self.notify_cleared();
        }

        info!(email, "logging in");
        let outcome = self.exchange(email, secret).await;

        let mut state = self.lock();
        if state.epoch != epoch {
            debug!(email, "login resolved after being superseded; discarding");
            return Err(Error::Superseded);
        }

        match outcome {
            Ok((token, user)) => {
                self.gateway.set_bearer(&token);
                self.persist_locked(&token, &user);
                state.session = Session::authenticated(user.clone(), token);
                self.publish(&state);
                info!(email = %user.email, privileged = user.is_privileged, "logged in");
                Ok(user)
            }
            Err(e) => {
                warn!(email, "login failed: {}", e);
                state.session = Session::default();
                self.gateway.clear_bearer();
                self.publish(&state);
                Err(e)
            }
        }
    }

    /// Create an account, then log in with the same credentials.
    ///
    /// Only valid while `Unauthenticated`. If the account is created but the
    /// login fails, the login error is returned.
    pub async fn register(
        &self,
        email: &str,
        secret: &str,
        display_name: &str,
    ) -> Result<Identity, Error> {
        let status = self.status();
        if status != SessionStatus::Unauthenticated {
            return Err(Error::InvalidState(format!(
                "register requires an unauthenticated session (current: {status:?})"
            )));
        }

        let body = RegisterRequest {
            email: email.to_string(),
            password: secret.to_string(),
            full_name: display_name.to_string(),
        };
        let created: Identity = self.gateway.post_json(REGISTER_PATH, &body).await?;
        info!(id = created.id, email = %created.email, "account created");

        self.login(email, secret).await
    }

    /// Drop the session from any state. Idempotent.
    pub fn logout(&self) {
        {
            let mut state = self.lock();
            state.epoch += 1;
            self.clear_locked(&mut state);
        }
        self.notify_cleared();
        info!("logged out");
    }

    /// Verify the held token against the server.
    ///
    /// No-op when no token is held. Any failure, including a network error,
    /// ends the session exactly as `logout` would; there is no retry.
    pub async fn check_auth(&self) -> Option<Identity> {
        let (epoch, token) = {
            let mut state = self.lock();
            let Some(token) = state.session.token.clone() else {
                debug!("no persisted token; skipping verification");
                return None;
            };
            state.epoch += 1;
            (state.epoch, token)
        };

        let outcome = self.gateway.get_with_token::<Identity>(ME_PATH, &token).await;

        {
            let mut state = self.lock();
            if state.epoch != epoch {
                debug!("verification resolved after being superseded; discarding");
                return None;
            }

            match outcome {
                Ok(user) => {
                    self.gateway.set_bearer(&token);
                    self.persist_locked(&token, &user);
                    state.session = Session::authenticated(user.clone(), token);
                    self.publish(&state);
                    info!(email = %user.email, "session verified");
                    return Some(user);
                }
                Err(e) => {
                    warn!("session verification failed: {}", e);
                    self.clear_locked(&mut state);
                }
            }
        }

        self.notify_cleared();
        None
    }

    /// Forced logout after the server rejected the credential.
    ///
    /// `seen_epoch` is the epoch observed before the rejected request was
    /// sent; if the session moved on since then this is a no-op. Returns
    /// whether the session was ended.
    pub fn expire(&self, seen_epoch: u64) -> bool {
        {
            let mut state = self.lock();
            if state.epoch != seen_epoch || state.session.token.is_none() {
                debug!(seen_epoch, current = state.epoch, "ignoring stale unauthorized response");
                return false;
            }
            state.epoch += 1;
            self.clear_locked(&mut state);
        }

        warn!("credential rejected by server; session ended");
        self.notify_cleared();
        true
    }

    // ── Internals ─────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn exchange(&self, email: &str, secret: &str) -> Result<(Credential, Identity), Error> {
        let resp: TokenResponse = self
            .gateway
            .post_form(LOGIN_PATH, &[("username", email), ("password", secret)])
            .await?;
        let token = Credential::new(resp.access_token);

        let user: Identity = self.gateway.get_with_token(ME_PATH, &token).await?;
        Ok((token, user))
    }

    /// Reset to the initial session, clearing the header and storage.
    /// Returns whether there was anything to clear.
    fn clear_locked(&self, state: &mut State) -> bool {
        let had_session = state.session.token.is_some() || state.session.user.is_some();
        state.session = Session::default();
        self.gateway.clear_bearer();
        if let Err(e) = self.persistence.clear() {
            warn!("Failed to clear persisted session: {}", e);
        }
        self.publish(state);
        had_session
    }

    fn persist_locked(&self, token: &Credential, user: &Identity) {
        let record = PersistedSession {
            token: token.clone(),
            user: Some(user.clone()),
        };
        if let Err(e) = self.persistence.save(&record) {
            warn!("Failed to persist session: {}", e);
        }
    }

    fn publish(&self, state: &State) {
        self.changes.send_replace(state.session.clone());
    }

    fn notify_cleared(&self) {
        let observers = {
            let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
            observers.retain(|o| o.is_attached());
            observers.clone()
        };
        for observer in observers {
            observer.session_cleared();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryStore;
    use common::{ClientConfig, SubscriptionStatus, SubscriptionTier};
    use query_cache::{fetcher, FetchMode, QueryCache, QueryStatus};
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Key(&'static str);

    impl CacheKey for Key {}

    fn identity(id: i64, email: &str, privileged: bool) -> Identity {
        Identity {
            id,
            email: email.to_string(),
            display_name: None,
            is_privileged: privileged,
            tier: SubscriptionTier::Free,
            tier_status: SubscriptionStatus::Active,
        }
    }

    fn identity_body(id: i64, email: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "email": email,
            "full_name": null,
            "is_superuser": false,
            "subscription_tier": "free",
            "subscription_status": "active"
        })
    }

    fn store_with(server: &MockServer, persistence: Arc<MemoryStore>) -> SessionStore {
        let config = ClientConfig {
            api_root: format!("{}/api/v1", server.uri()),
            ..ClientConfig::default()
        };
        let gateway = HttpGateway::new(&config).expect("gateway should build");
        SessionStore::new(gateway, persistence)
    }

    async fn mount_login(server: &MockServer, username: &str, token: &str, delay_ms: u64) {
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/login"))
            .and(body_string_contains(format!("username={}", username.replace('@', "%40"))))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": token, "token_type": "bearer"}))
                    .set_delay(Duration::from_millis(delay_ms)),
            )
            .mount(server)
            .await;
    }

    async fn mount_me(server: &MockServer, token: &str, id: i64, email: &str) {
        Mock::given(method("GET"))
            .and(path("/api/v1/auth/me"))
            .and(header("authorization", format!("Bearer {token}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(identity_body(id, email)))
            .mount(server)
            .await;
    }

    fn assert_initial(store: &SessionStore) {
        let session = store.snapshot();
        assert_eq!(session.status, SessionStatus::Unauthenticated);
        assert_eq!(session.token, None);
        assert_eq!(session.user, None);
        assert_eq!(store.gateway.bearer(), None);
    }

    #[tokio::test]
    async fn test_login_success_sets_session_header_and_storage() {
        let server = MockServer::start().await;
        mount_login(&server, "trader@x.com", "tok-1", 0).await;
        mount_me(&server, "tok-1", 1, "trader@x.com").await;
        let persistence = Arc::new(MemoryStore::new());
        let store = store_with(&server, persistence.clone());

        let user = store.login("trader@x.com", "pw").await.expect("login");

        assert!(!user.is_privileged);
        let session = store.snapshot();
        assert_eq!(session.status, SessionStatus::Authenticated);
        assert_eq!(session.token, Some(Credential::new("tok-1")));
        assert_eq!(store.gateway.bearer(), Some(Credential::new("tok-1")));
        assert_eq!(
            persistence.snapshot(),
            Some(PersistedSession {
                token: Credential::new("tok-1"),
                user: Some(user),
            })
        );
    }

    #[tokio::test]
    async fn test_login_rejected_resets_to_unauthenticated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/login"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({"detail": "Incorrect email or password"})),
            )
            .mount(&server)
            .await;
        let store = store_with(&server, Arc::new(MemoryStore::new()));

        let err = store.login("trader@x.com", "wrong").await.expect_err("rejected");

        assert_eq!(err, Error::Unauthorized("Incorrect email or password".into()));
        assert_initial(&store);
    }

    #[tokio::test]
    async fn test_identity_fetch_failure_drops_partial_token() {
        let server = MockServer::start().await;
        mount_login(&server, "trader@x.com", "tok-1", 0).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/auth/me"))
            .respond_with(ResponseTemplate::new(500).set_body_string("db down"))
            .mount(&server)
            .await;
        let persistence = Arc::new(MemoryStore::new());
        let store = store_with(&server, persistence.clone());

        let err = store.login("trader@x.com", "pw").await.expect_err("me failed");

        assert!(matches!(err, Error::Server { status: 500, .. }));
        assert_initial(&store);
        assert_eq!(persistence.snapshot(), None);
    }

    #[tokio::test]
    async fn test_logout_from_any_state_clears_everything() {
        let server = MockServer::start().await;
        mount_login(&server, "trader@x.com", "tok-1", 0).await;
        mount_me(&server, "tok-1", 1, "trader@x.com").await;
        let persistence = Arc::new(MemoryStore::new());
        let store = store_with(&server, persistence.clone());

        store.logout();
        assert_initial(&store);

        store.login("trader@x.com", "pw").await.expect("login");
        store.logout();
        assert_initial(&store);
        assert_eq!(persistence.snapshot(), None);

        store.logout();
        assert_initial(&store);
    }

    #[tokio::test]
    async fn test_logout_invalidates_identity_scoped_queries() {
        let server = MockServer::start().await;
        let persistence = Arc::new(MemoryStore::with_session(PersistedSession {
            token: Credential::new("tok-1"),
            user: Some(identity(1, "trader@x.com", false)),
        }));
        let store = store_with(&server, persistence);
        let cache: QueryCache<Key, u32> = QueryCache::new();
        store.add_observer(Arc::new(cache.downgrade()));

        let key = Key("market-summary");
        let state = cache
            .request(key.clone(), fetcher(|| async { Ok(7) }), FetchMode::Auto)
            .await;
        assert_eq!(state.status, QueryStatus::Settled);

        store.logout();

        let state = cache.state(&key);
        assert_eq!(state.status, QueryStatus::Idle);
        assert_eq!(state.value, None);
    }

    #[tokio::test]
    async fn test_dropped_caches_are_pruned_from_observers() {
        let server = MockServer::start().await;
        let store = store_with(&server, Arc::new(MemoryStore::new()));
        let kept: QueryCache<Key, u32> = QueryCache::new();
        store.add_observer(Arc::new(kept.downgrade()));
        {
            let dropped: QueryCache<Key, u32> = QueryCache::new();
            store.add_observer(Arc::new(dropped.downgrade()));
        }
        assert_eq!(store.observers.lock().expect("observers").len(), 2);

        store.logout();

        assert_eq!(store.observers.lock().expect("observers").len(), 1);
    }

    #[tokio::test]
    async fn test_rehydrates_optimistically_then_verifies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/auth/me"))
            .and(header("authorization", "Bearer persisted"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 1,
                "email": "trader@x.com",
                "full_name": "Renamed Trader",
                "is_superuser": false,
                "subscription_tier": "premium",
                "subscription_status": "active"
            })))
            .expect(1)
            .mount(&server)
            .await;
        let persistence = Arc::new(MemoryStore::with_session(PersistedSession {
            token: Credential::new("persisted"),
            user: Some(identity(1, "trader@x.com", false)),
        }));
        let store = store_with(&server, persistence.clone());

        assert!(store.snapshot().is_authenticated());
        assert_eq!(store.gateway.bearer(), Some(Credential::new("persisted")));

        let verified = store.check_auth().await.expect("token accepted");

        assert_eq!(verified.display_name.as_deref(), Some("Renamed Trader"));
        assert_eq!(store.user(), Some(verified.clone()));
        let stored = persistence.snapshot().expect("still persisted");
        assert_eq!(stored.user, Some(verified));
    }

    #[tokio::test]
    async fn test_check_auth_rejection_matches_logout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/auth/me"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({"detail": "Could not validate credentials"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        let persistence = Arc::new(MemoryStore::with_session(PersistedSession {
            token: Credential::new("expired"),
            user: Some(identity(1, "trader@x.com", false)),
        }));
        let store = store_with(&server, persistence.clone());
        let mut changes = store.subscribe();

        assert_eq!(store.check_auth().await, None);

        assert_initial(&store);
        assert_eq!(persistence.snapshot(), None);
        assert!(changes.has_changed().expect("sender alive"));
        assert_eq!(*changes.borrow_and_update(), Session::default());
    }

    #[tokio::test]
    async fn test_check_auth_network_failure_also_logs_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/auth/me"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let persistence = Arc::new(MemoryStore::with_session(PersistedSession {
            token: Credential::new("tok"),
            user: None,
        }));
        let store = store_with(&server, persistence.clone());
        assert_eq!(store.status(), SessionStatus::Unauthenticated);

        assert_eq!(store.check_auth().await, None);

        assert_initial(&store);
        assert_eq!(persistence.snapshot(), None);
    }

    #[tokio::test]
    async fn test_check_auth_without_token_is_noop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/auth/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(identity_body(1, "a@b.c")))
            .expect(0)
            .mount(&server)
            .await;
        let store = store_with(&server, Arc::new(MemoryStore::new()));
        let epoch = store.epoch();

        assert_eq!(store.check_auth().await, None);
        assert_eq!(store.epoch(), epoch);
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/register"))
            .and(body_string_contains("\"full_name\":\"New Trader\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(identity_body(5, "new@x.com")))
            .expect(1)
            .mount(&server)
            .await;
        mount_login(&server, "new@x.com", "tok-5", 0).await;
        mount_me(&server, "tok-5", 5, "new@x.com").await;
        let store = store_with(&server, Arc::new(MemoryStore::new()));

        let user = store
            .register("new@x.com", "pw", "New Trader")
            .await
            .expect("register + login");

        assert_eq!(user.id, 5);
        assert!(store.snapshot().is_authenticated());

        let err = store
            .register("other@x.com", "pw", "Other")
            .await
            .expect_err("already authenticated");
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_register_errors_surface() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/register"))
            .and(body_string_contains("taken@x.com"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "detail": "The user with this email already exists in the system."
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/register"))
            .and(body_string_contains("fresh@x.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(identity_body(9, "fresh@x.com")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/login"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "detail": "Inactive user"
            })))
            .mount(&server)
            .await;
        let store = store_with(&server, Arc::new(MemoryStore::new()));

        let err = store
            .register("taken@x.com", "pw", "Taken")
            .await
            .expect_err("duplicate account");
        assert!(matches!(err, Error::Validation { status: 400, ref message } if message.contains("already exists")));
        assert_initial(&store);

        let err = store
            .register("fresh@x.com", "pw", "Fresh")
            .await
            .expect_err("created but login failed");
        assert_eq!(
            err,
            Error::Validation {
                status: 400,
                message: "Inactive user".into()
            }
        );
        assert_initial(&store);
    }

    #[tokio::test]
    async fn test_logout_during_login_discards_login() {
        let server = MockServer::start().await;
        mount_login(&server, "trader@x.com", "tok-1", 300).await;
        mount_me(&server, "tok-1", 1, "trader@x.com").await;
        let persistence = Arc::new(MemoryStore::new());
        let store = store_with(&server, persistence.clone());

        let (outcome, ()) = tokio::join!(store.login("trader@x.com", "pw"), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(store.status(), SessionStatus::Authenticating);
            store.logout();
        });

        assert_eq!(outcome, Err(Error::Superseded));
        assert_initial(&store);
        assert_eq!(persistence.snapshot(), None);
    }

    #[tokio::test]
    async fn test_logout_during_verification_discards_it() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/auth/me"))
            .and(header("authorization", "Bearer persisted"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(identity_body(1, "trader@x.com"))
                    .set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&server)
            .await;
        let persistence = Arc::new(MemoryStore::with_session(PersistedSession {
            token: Credential::new("persisted"),
            user: Some(identity(1, "trader@x.com", false)),
        }));
        let store = store_with(&server, persistence.clone());

        let (verified, ()) = tokio::join!(store.check_auth(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            store.logout();
        });

        assert_eq!(verified, None);
        assert_initial(&store);
        assert_eq!(persistence.snapshot(), None);
    }

    #[tokio::test]
    async fn test_newer_login_wins_over_slower_older_one() {
        let server = MockServer::start().await;
        mount_login(&server, "slow@x.com", "tok-slow", 300).await;
        mount_me(&server, "tok-slow", 1, "slow@x.com").await;
        mount_login(&server, "fast@x.com", "tok-fast", 0).await;
        mount_me(&server, "tok-fast", 2, "fast@x.com").await;
        let store = store_with(&server, Arc::new(MemoryStore::new()));

        let (slow, fast) = tokio::join!(store.login("slow@x.com", "pw"), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            store.login("fast@x.com", "pw").await
        });

        assert_eq!(slow, Err(Error::Superseded));
        assert_eq!(fast.expect("fast login").email, "fast@x.com");
        let session = store.snapshot();
        assert!(session.is_authenticated());
        assert_eq!(session.token, Some(Credential::new("tok-fast")));
        assert_eq!(store.gateway.bearer(), Some(Credential::new("tok-fast")));
    }

    #[tokio::test]
    async fn test_expire_respects_epoch() {
        let server = MockServer::start().await;
        let persistence = Arc::new(MemoryStore::with_session(PersistedSession {
            token: Credential::new("tok"),
            user: Some(identity(1, "trader@x.com", true)),
        }));
        let store = store_with(&server, persistence);
        assert!(store.snapshot().is_privileged());

        let stale = store.epoch();
        store.logout();
        assert!(!store.expire(stale), "epoch moved on");

        let server2 = MockServer::start().await;
        let store = store_with(
            &server2,
            Arc::new(MemoryStore::with_session(PersistedSession {
                token: Credential::new("tok"),
                user: Some(identity(1, "trader@x.com", false)),
            })),
        );
        let current = store.epoch();
        assert!(store.expire(current));
        assert_initial(&store);
    }
}
