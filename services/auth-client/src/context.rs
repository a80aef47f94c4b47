//! Session context
//!
//! Holds the in-memory session the rest of the application reads, restores
//! it from persisted storage at startup, and reacts to lifecycle events.
//! Navigation is a collaborator: the context decides *when* to send the user
//! to the login screen, the [`Navigator`] decides *how*.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use common::error::StorageResult;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::events::{AuthEvent, AuthEventKind, Subscription};
use crate::lifecycle::TokenLifecycleManager;
use crate::models::{ActiveSession, LoginResult, Role, User};

/// Login page route
pub const LOGIN_ROUTE: &str = "/login";
/// Registration page route
pub const REGISTER_ROUTE: &str = "/register";

/// UI navigation
pub trait Navigator: Send + Sync {
    /// Route currently displayed
    fn current_path(&self) -> String;

    fn redirect_to_login(&self);
}

/// Cache of server-derived data held by the UI layer
pub trait QueryCache: Send + Sync {
    fn clear(&self);
}

/// Query cache for front ends that keep none
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopQueryCache;

impl QueryCache for NoopQueryCache {
    fn clear(&self) {}
}

/// Views reachable without a session
pub fn is_public_route(path: &str) -> bool {
    matches!(path, LOGIN_ROUTE | REGISTER_ROUTE)
}

/// Result of startup restoration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored,
    /// At least one persisted slot was missing
    NoSession,
    /// The persisted refresh token was expired or undecodable
    Expired,
    /// The persisted user could not be parsed
    Corrupt,
    /// Restoration already ran for this context
    AlreadyRestored,
}

/// Timing knobs for the context
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub monitor_start_delay: Duration,
    pub redirect_guard: Duration,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            monitor_start_delay: Duration::from_millis(500),
            redirect_guard: Duration::from_millis(100),
        }
    }
}

impl From<&ClientConfig> for ContextOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            monitor_start_delay: config.monitor_start_delay(),
            redirect_guard: config.redirect_guard(),
        }
    }
}

struct Shared {
    session: Mutex<Option<ActiveSession>>,
    lifecycle: Arc<TokenLifecycleManager>,
    navigator: Arc<dyn Navigator>,
    query_cache: Arc<dyn QueryCache>,
    restore_started: AtomicBool,
    restored: AtomicBool,
    redirect_until: Mutex<Option<Instant>>,
    options: ContextOptions,
}

/// Authoritative in-memory session
pub struct SessionContext {
    shared: Arc<Shared>,
    _subscriptions: Vec<Subscription>,
}

impl SessionContext {
    /// Create the context and register its event handlers
    pub fn new(
        lifecycle: Arc<TokenLifecycleManager>,
        navigator: Arc<dyn Navigator>,
        query_cache: Arc<dyn QueryCache>,
        options: ContextOptions,
    ) -> Self {
        let shared = Arc::new(Shared {
            session: Mutex::new(None),
            lifecycle,
            navigator,
            query_cache,
            restore_started: AtomicBool::new(false),
            restored: AtomicBool::new(false),
            redirect_until: Mutex::new(None),
            options,
        });

        let bus = shared.lifecycle.bus().clone();
        let subscriptions = vec![
            bus.subscribe(AuthEventKind::TokenRefreshed, {
                let shared = Arc::downgrade(&shared);
                move |event| {
                    if let (Some(shared), AuthEvent::TokenRefreshed { access_token }) =
                        (shared.upgrade(), event)
                    {
                        shared.apply_refreshed_token(access_token);
                    }
                }
            }),
            bus.subscribe(AuthEventKind::SessionExpired, end_session_handler(&shared)),
            bus.subscribe(AuthEventKind::Logout, end_session_handler(&shared)),
        ];

        Self {
            shared,
            _subscriptions: subscriptions,
        }
    }

    /// Restore the session from persisted storage; runs once per context
    pub fn restore(&self) -> RestoreOutcome {
        if self.shared.restore_started.swap(true, Ordering::SeqCst) {
            debug!("Session restoration already ran");
            return RestoreOutcome::AlreadyRestored;
        }

        let outcome = Shared::restore(&self.shared);
        info!("Session restoration finished: {:?}", outcome);
        outcome
    }

    /// Install a fresh login; `None` or an empty result leaves everything as is
    pub fn set_auth_data(&self, result: Option<&LoginResult>) -> StorageResult<()> {
        let Some(result) = result.filter(|r| !r.is_empty()) else {
            debug!("Ignoring empty login result");
            return Ok(());
        };

        let session = ActiveSession::from(result);
        self.shared.lifecycle.store_session(
            &session.access_token,
            &session.refresh_token,
            &session.user,
        )?;

        let user = session.user.clone();
        *lock(&self.shared.session) = Some(session);

        self.shared.lifecycle.start_monitor();
        self.shared.lifecycle.bus().publish(AuthEvent::LoginSuccess { user });
        Ok(())
    }

    /// Drop the session everywhere; idempotent
    pub fn clear_auth_data(&self) {
        self.shared.clear_auth_data();
    }

    pub fn has_role(&self, role: Role) -> bool {
        lock(&self.shared.session)
            .as_ref()
            .is_some_and(|s| s.has_role(role))
    }

    pub fn is_authenticated(&self) -> bool {
        lock(&self.shared.session).is_some()
    }

    pub fn session(&self) -> Option<ActiveSession> {
        lock(&self.shared.session).clone()
    }

    pub fn user(&self) -> Option<User> {
        lock(&self.shared.session).as_ref().map(|s| s.user.clone())
    }

    pub fn access_token(&self) -> Option<String> {
        lock(&self.shared.session)
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        lock(&self.shared.session)
            .as_ref()
            .map(|s| s.refresh_token.clone())
    }

    /// Whether startup restoration has completed
    pub fn is_restored(&self) -> bool {
        self.shared.restored.load(Ordering::SeqCst)
    }

    pub fn lifecycle(&self) -> &Arc<TokenLifecycleManager> {
        &self.shared.lifecycle
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.shared.lifecycle.stop_monitor();
    }
}

fn end_session_handler(shared: &Arc<Shared>) -> impl Fn(&AuthEvent) + Send + Sync + 'static {
    let shared = Arc::downgrade(shared);
    move |event| {
        if let Some(shared) = shared.upgrade() {
            debug!("Ending session on {}", event.kind());
            shared.clear_auth_data();
            shared.redirect_to_login();
        }
    }
}

impl Shared {
    fn restore(this: &Arc<Self>) -> RestoreOutcome {
        let lifecycle = &this.lifecycle;

        let Some(persisted) = lifecycle.persisted_session() else {
            this.restored.store(true, Ordering::SeqCst);
            this.redirect_unless_public();
            return RestoreOutcome::NoSession;
        };

        let inspector = lifecycle.inspector();
        if inspector
            .classify(Some(&persisted.refresh_token))
            .is_unusable()
        {
            info!("Persisted refresh token expired, clearing session data");
            lifecycle.clear_tokens();
            this.restored.store(true, Ordering::SeqCst);
            this.redirect_unless_public();
            return RestoreOutcome::Expired;
        }

        let user: User = match serde_json::from_str(&persisted.user_json) {
            Ok(user) => user,
            Err(e) => {
                error!("Failed to parse stored user: {}", e);
                lifecycle.clear_tokens();
                this.restored.store(true, Ordering::SeqCst);
                this.redirect_unless_public();
                return RestoreOutcome::Corrupt;
            }
        };

        let access_status = inspector.classify(Some(&persisted.access_token));
        *lock(&this.session) = Some(ActiveSession {
            user,
            access_token: persisted.access_token,
            refresh_token: persisted.refresh_token,
        });
        this.restored.store(true, Ordering::SeqCst);

        if access_status.needs_refresh() {
            debug!("Restored access token is {:?}, refreshing in background", access_status);
            let lifecycle = Arc::clone(lifecycle);
            tokio::spawn(async move {
                // Failure is announced on the bus by the lifecycle manager
                if let Err(e) = lifecycle.refresh().await {
                    warn!("Background refresh after restore failed: {}", e);
                }
            });
        }

        let weak: Weak<Self> = Arc::downgrade(this);
        let delay = this.options.monitor_start_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                if lock(&shared.session).is_some() {
                    shared.lifecycle.start_monitor();
                }
            }
        });

        RestoreOutcome::Restored
    }

    fn apply_refreshed_token(&self, access_token: &str) {
        let mut session = lock(&self.session);
        match session.as_mut() {
            Some(session) => {
                session.access_token = access_token.to_string();
                debug!("In-memory access token updated");
            }
            None => debug!("Token refreshed with no active session, ignoring"),
        }
    }

    fn clear_auth_data(&self) {
        *lock(&self.session) = None;
        self.lifecycle.clear_tokens();
        self.lifecycle.stop_monitor();
        self.query_cache.clear();
        info!("Session cleared");
    }

    fn redirect_unless_public(&self) {
        let path = self.navigator.current_path();
        if is_public_route(&path) {
            debug!("No session on public route {}, staying", path);
            return;
        }
        self.redirect_to_login();
    }

    /// Navigate to login, collapsing bursts into a single navigation
    fn redirect_to_login(&self) {
        let now = Instant::now();
        {
            let mut until = lock(&self.redirect_until);
            if until.is_some_and(|deadline| now < deadline) {
                debug!("Redirect to login already in progress");
                return;
            }
            *until = Some(now + self.options.redirect_guard);
        }

        info!("Redirecting to login");
        self.navigator.redirect_to_login();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventBus, LogoutReason};
    use crate::lifecycle::{LifecycleConfig, MonitorState};
    use crate::test_support::{ScriptedRefresh, lifecycle_with, login_result, token_expiring_in};
    use std::sync::atomic::AtomicUsize;

    struct RecordingNavigator {
        path: Mutex<String>,
        redirects: AtomicUsize,
    }

    impl RecordingNavigator {
        fn at(path: &str) -> Arc<Self> {
            Arc::new(Self {
                path: Mutex::new(path.to_string()),
                redirects: AtomicUsize::new(0),
            })
        }

        fn redirects(&self) -> usize {
            self.redirects.load(Ordering::SeqCst)
        }
    }

    impl Navigator for RecordingNavigator {
        fn current_path(&self) -> String {
            self.path.lock().expect("path").clone()
        }

        fn redirect_to_login(&self) {
            self.redirects.fetch_add(1, Ordering::SeqCst);
            *self.path.lock().expect("path") = LOGIN_ROUTE.to_string();
        }
    }

    #[derive(Default)]
    struct CountingCache(AtomicUsize);

    impl QueryCache for CountingCache {
        fn clear(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        context: SessionContext,
        lifecycle: Arc<TokenLifecycleManager>,
        bus: EventBus,
        navigator: Arc<RecordingNavigator>,
        cache: Arc<CountingCache>,
        refresh: Arc<ScriptedRefresh>,
    }

    fn fixture_at(path: &str, refresh: ScriptedRefresh) -> Fixture {
        let refresh = Arc::new(refresh);
        let (lifecycle, bus) = lifecycle_with(refresh.clone(), LifecycleConfig::default());
        let navigator = RecordingNavigator::at(path);
        let cache = Arc::new(CountingCache::default());
        let context = SessionContext::new(
            lifecycle.clone(),
            navigator.clone(),
            cache.clone(),
            ContextOptions::default(),
        );

        Fixture {
            context,
            lifecycle,
            bus,
            navigator,
            cache,
            refresh,
        }
    }

    fn fixture() -> Fixture {
        fixture_at("/employee", ScriptedRefresh::default())
    }

    fn assert_invariant(context: &SessionContext) {
        assert_eq!(context.is_authenticated(), context.access_token().is_some());
        assert_eq!(context.user().is_some(), context.access_token().is_some());
    }

    #[tokio::test]
    async fn test_set_auth_data_installs_session() {
        let f = fixture();
        let mut events = f.bus.listen();
        let login = login_result(Role::Admin);

        f.context.set_auth_data(Some(&login)).expect("set auth data");

        assert!(f.context.is_authenticated());
        assert!(f.context.has_role(Role::Admin));
        assert!(!f.context.has_role(Role::Employee));
        assert_eq!(f.lifecycle.access_token(), Some(login.access_token.clone()));
        assert_eq!(f.lifecycle.monitor_state(), MonitorState::Running);
        assert_eq!(
            events.recv().await.expect("event"),
            AuthEvent::LoginSuccess { user: login.user() }
        );
    }

    #[tokio::test]
    async fn test_set_auth_data_ignores_empty_result() {
        let f = fixture();
        let login = login_result(Role::Employee);
        f.context.set_auth_data(Some(&login)).expect("set auth data");

        f.context.set_auth_data(None).expect("no-op");
        let mut empty = login.clone();
        empty.access_token.clear();
        f.context.set_auth_data(Some(&empty)).expect("no-op");

        assert_eq!(f.context.access_token(), Some(login.access_token));
    }

    #[tokio::test]
    async fn test_token_refreshed_updates_access_token_only() {
        let f = fixture();
        let login = login_result(Role::Employee);
        f.context.set_auth_data(Some(&login)).expect("set auth data");

        f.bus.publish(AuthEvent::TokenRefreshed {
            access_token: "T2".to_string(),
        });

        let session = f.context.session().expect("session");
        assert_eq!(session.access_token, "T2");
        assert_eq!(session.refresh_token, login.refresh_token);
        assert_eq!(session.user, login.user());
        assert_invariant(&f.context);
    }

    #[tokio::test]
    async fn test_token_refreshed_without_session_keeps_it_empty() {
        let f = fixture();

        f.bus.publish(AuthEvent::TokenRefreshed {
            access_token: "T2".to_string(),
        });

        assert!(!f.context.is_authenticated());
        assert_invariant(&f.context);
    }

    #[tokio::test]
    async fn test_clear_auth_data_is_idempotent() {
        let f = fixture();
        f.context
            .set_auth_data(Some(&login_result(Role::Employee)))
            .expect("set auth data");

        f.context.clear_auth_data();
        let after_once = (f.context.session(), f.lifecycle.persisted_session());
        f.context.clear_auth_data();

        assert_eq!((f.context.session(), f.lifecycle.persisted_session()), after_once);
        assert_eq!(after_once, (None, None));
        assert_eq!(f.lifecycle.monitor_state(), MonitorState::Stopped);
        assert_eq!(f.cache.0.load(Ordering::SeqCst), 2);
        assert_invariant(&f.context);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_burst_collapses_to_one_redirect() {
        let f = fixture();
        f.context
            .set_auth_data(Some(&login_result(Role::Employee)))
            .expect("set auth data");

        f.bus.publish(AuthEvent::SessionExpired);
        f.bus.publish(AuthEvent::SessionExpired);
        f.bus.publish(AuthEvent::Logout {
            reason: Some(LogoutReason::UserInitiated),
        });

        assert_eq!(f.navigator.redirects(), 1);
        assert!(!f.context.is_authenticated());
        assert_eq!(f.lifecycle.persisted_session(), None);

        tokio::time::sleep(Duration::from_millis(150)).await;
        f.bus.publish(AuthEvent::SessionExpired);
        assert_eq!(f.navigator.redirects(), 2, "guard releases after its window");
    }

    #[tokio::test]
    async fn test_bare_logout_event_ends_session() {
        let f = fixture();
        f.context
            .set_auth_data(Some(&login_result(Role::Employee)))
            .expect("set auth data");

        assert!(f.bus.publish_named("auth:logout"));

        assert!(!f.context.is_authenticated());
        assert_eq!(f.navigator.redirects(), 1);
    }

    #[tokio::test]
    async fn test_restore_without_session_redirects_unless_public() {
        let f = fixture_at("/employee/attendance", ScriptedRefresh::default());
        assert_eq!(f.context.restore(), RestoreOutcome::NoSession);
        assert!(f.context.is_restored());
        assert_eq!(f.navigator.redirects(), 1);

        let f = fixture_at(REGISTER_ROUTE, ScriptedRefresh::default());
        assert_eq!(f.context.restore(), RestoreOutcome::NoSession);
        assert_eq!(f.navigator.redirects(), 0);
    }

    #[tokio::test]
    async fn test_restore_with_expired_refresh_token_never_restores() {
        let f = fixture();
        let login = login_result(Role::Employee);
        f.lifecycle
            .store_session(&token_expiring_in(3600), &token_expiring_in(-1), &login.user())
            .expect("store session");

        assert_eq!(f.context.restore(), RestoreOutcome::Expired);

        assert!(!f.context.is_authenticated());
        assert_eq!(f.lifecycle.access_token(), None);
        assert_eq!(f.lifecycle.refresh_token(), None);
        assert_eq!(f.navigator.redirects(), 1);
    }

    #[tokio::test]
    async fn test_restore_with_corrupt_user_clears_tokens() {
        use crate::lifecycle::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY};
        use common::storage::{KeyValueStore, MemoryStore};

        let login = login_result(Role::Employee);
        let store = Arc::new(MemoryStore::new());
        store.set(ACCESS_TOKEN_KEY, &login.access_token).expect("set");
        store.set(REFRESH_TOKEN_KEY, &login.refresh_token).expect("set");
        store.set(USER_KEY, "{not json").expect("set");

        let lifecycle = Arc::new(TokenLifecycleManager::new(
            store,
            Arc::new(ScriptedRefresh::default()),
            EventBus::new(),
            LifecycleConfig::default(),
        ));
        let navigator = RecordingNavigator::at("/admin");
        let context = SessionContext::new(
            lifecycle.clone(),
            navigator.clone(),
            Arc::new(NoopQueryCache),
            ContextOptions::default(),
        );

        assert_eq!(context.restore(), RestoreOutcome::Corrupt);
        assert!(context.is_restored());
        assert!(!context.is_authenticated());
        assert_eq!(lifecycle.persisted_session(), None);
        assert_eq!(navigator.redirects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_starts_monitor_after_delay() {
        let f = fixture();
        let login = login_result(Role::Admin);
        f.lifecycle
            .store_session(&login.access_token, &login.refresh_token, &login.user())
            .expect("store session");

        assert_eq!(f.context.restore(), RestoreOutcome::Restored);
        assert_eq!(f.context.user(), Some(login.user()));
        assert_eq!(f.lifecycle.monitor_state(), MonitorState::Stopped);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(f.lifecycle.monitor_state(), MonitorState::Running);

        assert_eq!(f.context.restore(), RestoreOutcome::AlreadyRestored);
        assert_eq!(f.navigator.redirects(), 0);
    }

    #[tokio::test]
    async fn test_restore_refreshes_expiring_access_token_in_background() {
        let f = fixture_at("/employee", ScriptedRefresh::new(vec![Ok("T2".to_string())]));
        let login = login_result(Role::Employee);
        f.lifecycle
            .store_session(&token_expiring_in(30), &login.refresh_token, &login.user())
            .expect("store session");

        assert_eq!(f.context.restore(), RestoreOutcome::Restored);
        while f.refresh.calls() == 0 || f.context.access_token().as_deref() != Some("T2") {
            tokio::task::yield_now().await;
        }

        assert_eq!(f.lifecycle.access_token().as_deref(), Some("T2"));
        assert_invariant(&f.context);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_refresh_after_clear() {
        let f = fixture_at("/employee", ScriptedRefresh::new(vec![Ok("T2".to_string())]));
        let login = login_result(Role::Employee);
        let expiring = LoginResult {
            access_token: token_expiring_in(60),
            ..login
        };
        f.context.set_auth_data(Some(&expiring)).expect("set auth data");

        f.context.clear_auth_data();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(f.refresh.calls(), 0);
        assert_eq!(f.lifecycle.monitor_state(), MonitorState::Stopped);
    }

    #[tokio::test]
    async fn test_dropping_context_stops_monitor_and_handlers() {
        let f = fixture();
        f.context
            .set_auth_data(Some(&login_result(Role::Employee)))
            .expect("set auth data");
        let lifecycle = f.lifecycle.clone();
        let bus = f.bus.clone();

        drop(f.context);

        assert_eq!(lifecycle.monitor_state(), MonitorState::Stopped);
        assert_eq!(bus.subscriber_count(AuthEventKind::SessionExpired), 0);
    }
}
