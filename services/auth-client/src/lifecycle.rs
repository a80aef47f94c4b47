//! Token lifecycle management
//!
//! Owns the persisted credential slots, refreshes the access token through
//! the refresh transport, and runs the periodic expiry monitor. Session-wide
//! failures are returned to the caller and also broadcast as
//! `SessionExpired` on the event bus.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use common::error::StorageResult;
use common::storage::KeyValueStore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::AuthError;
use crate::events::{AuthEvent, EventBus};
use crate::models::User;
use crate::token::{DEFAULT_REFRESH_THRESHOLD_SECS, TokenInspector};
use crate::transport::RefreshTransport;

/// Storage slot holding the raw access token
pub const ACCESS_TOKEN_KEY: &str = "accessToken";
/// Storage slot holding the raw refresh token
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
/// Storage slot holding the JSON-serialized user
pub const USER_KEY: &str = "user";

/// Lifecycle manager settings
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub refresh_threshold_secs: i64,
    pub monitor_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            refresh_threshold_secs: DEFAULT_REFRESH_THRESHOLD_SECS,
            monitor_interval: Duration::from_secs(15),
        }
    }
}

impl From<&ClientConfig> for LifecycleConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            refresh_threshold_secs: config.refresh_threshold_secs,
            monitor_interval: config.monitor_interval(),
        }
    }
}

/// State of the periodic expiry monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Running,
    /// A tick started a refresh that has not settled; further ticks are skipped
    RefreshInFlight,
}

/// The three persisted slots, read together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Raw JSON of the `user` slot, parsed by the caller
    pub user_json: String,
}

struct MonitorHandle {
    task: JoinHandle<()>,
    state: Arc<Mutex<MonitorState>>,
}

/// Single source of truth for persisted tokens
pub struct TokenLifecycleManager {
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn RefreshTransport>,
    bus: EventBus,
    inspector: TokenInspector,
    monitor_interval: Duration,
    /// Bumped on every full store and every clear
    generation: AtomicU64,
    /// Refresh calls currently waiting on the transport, whoever started them
    refreshes_in_flight: AtomicUsize,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl TokenLifecycleManager {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn RefreshTransport>,
        bus: EventBus,
        config: LifecycleConfig,
    ) -> Self {
        let monitor_interval = if config.monitor_interval.is_zero() {
            let fallback = LifecycleConfig::default().monitor_interval;
            warn!("Zero monitor interval requested, using {:?}", fallback);
            fallback
        } else {
            config.monitor_interval
        };

        Self {
            store,
            transport,
            bus,
            inspector: TokenInspector::new(config.refresh_threshold_secs),
            monitor_interval,
            generation: AtomicU64::new(0),
            refreshes_in_flight: AtomicUsize::new(0),
            monitor: Mutex::new(None),
        }
    }

    pub fn inspector(&self) -> &TokenInspector {
        &self.inspector
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Counter identifying the current persisted session
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn access_token(&self) -> Option<String> {
        self.read_slot(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read_slot(REFRESH_TOKEN_KEY)
    }

    /// Whether a refresh call is waiting on the transport
    pub fn is_refreshing(&self) -> bool {
        self.refreshes_in_flight.load(Ordering::SeqCst) > 0
    }

    /// All three slots, or `None` if any of them is missing
    ///
    /// A slot that cannot be read makes the whole record unusable, so the
    /// stored session is cleared.
    pub fn persisted_session(&self) -> Option<PersistedSession> {
        let read = |key: &str| self.store.get(key).map(|v| v.filter(|v| !v.is_empty()));

        match (read(ACCESS_TOKEN_KEY), read(REFRESH_TOKEN_KEY), read(USER_KEY)) {
            (Ok(Some(access_token)), Ok(Some(refresh_token)), Ok(Some(user_json))) => {
                Some(PersistedSession {
                    access_token,
                    refresh_token,
                    user_json,
                })
            }
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
                error!("Persisted session unreadable, clearing it: {}", e);
                self.clear_tokens();
                None
            }
            _ => None,
        }
    }

    /// Persist a complete new session, replacing whatever was stored
    pub fn store_session(
        &self,
        access_token: &str,
        refresh_token: &str,
        user: &User,
    ) -> StorageResult<()> {
        self.generation.fetch_add(1, Ordering::SeqCst);

        let user_json = serde_json::to_string(user)?;
        let written = self
            .store
            .set(ACCESS_TOKEN_KEY, access_token)
            .and_then(|_| self.store.set(REFRESH_TOKEN_KEY, refresh_token))
            .and_then(|_| self.store.set(USER_KEY, &user_json));

        if let Err(e) = written {
            error!("Failed to persist session, clearing partial write: {}", e);
            self.clear_tokens();
            return Err(e);
        }

        info!("Session stored for user: {}", user.email);
        Ok(())
    }

    /// Remove all three persisted slots
    pub fn clear_tokens(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);

        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY] {
            if let Err(e) = self.store.remove(key) {
                error!("Failed to remove {} from storage: {}", key, e);
            }
        }

        debug!("Persisted tokens cleared");
    }

    /// Terminal failure: clear tokens and announce the expired session
    pub fn expire_session(&self) {
        warn!("Session expired, clearing persisted tokens");
        self.clear_tokens();
        self.bus.publish(AuthEvent::SessionExpired);
    }

    /// Exchange the persisted refresh token for a new access token
    ///
    /// Does not deduplicate concurrent calls; the interceptor keeps a single
    /// refresh in flight and the monitor skips its ticks while any call is
    /// outstanding.
    pub async fn refresh(&self) -> Result<String, AuthError> {
        let Some(refresh_token) = self.refresh_token() else {
            warn!("Refresh requested without a refresh token");
            self.expire_session();
            return Err(AuthError::MissingRefreshToken);
        };

        let status = self.inspector.classify(Some(&refresh_token));
        if status.is_unusable() {
            warn!("Refresh token is {:?}, not calling the backend", status);
            self.expire_session();
            return Err(AuthError::SessionExpired);
        }

        let generation = self.generation();
        info!("Refreshing access token");

        let outcome = {
            let _in_flight = InFlight::enter(&self.refreshes_in_flight);
            self.transport.refresh(&refresh_token).await
        };

        if generation != self.generation() {
            info!("Session changed during refresh, discarding the result");
            return Err(AuthError::SessionSuperseded);
        }

        match outcome {
            Ok(access_token) => {
                if let Err(e) = self.store.set(ACCESS_TOKEN_KEY, &access_token) {
                    error!("Failed to persist refreshed access token: {}", e);
                    self.expire_session();
                    return Err(AuthError::RefreshRejected(e.to_string()));
                }

                info!("Access token refreshed");
                self.bus.publish(AuthEvent::TokenRefreshed {
                    access_token: access_token.clone(),
                });
                Ok(access_token)
            }
            Err(e) => {
                error!("Token refresh failed: {}", e);
                self.expire_session();
                Err(AuthError::Transport(e))
            }
        }
    }

    /// Refresh only if the access token is expiring soon or expired
    ///
    /// Returns `false` when there is no access token or the refresh failed.
    pub async fn refresh_proactively(&self) -> bool {
        let Some(access_token) = self.access_token() else {
            return false;
        };

        let status = self.inspector.classify(Some(&access_token));
        if !status.needs_refresh() {
            return true;
        }

        debug!("Access token is {:?}, refreshing proactively", status);
        self.refresh().await.is_ok()
    }

    /// Lifetime left on the persisted refresh token
    pub fn session_remaining(&self) -> Duration {
        self.inspector.remaining(self.refresh_token().as_deref())
    }

    /// Start the periodic expiry monitor, replacing any running one
    pub fn start_monitor(self: &Arc<Self>) {
        self.stop_monitor();

        let (Some(_), Some(refresh_token)) = (self.access_token(), self.refresh_token()) else {
            debug!("Monitor not started: no persisted session");
            return;
        };

        if self.inspector.classify(Some(&refresh_token)).is_unusable() {
            warn!("Monitor not started: refresh token expired or invalid");
            self.expire_session();
            return;
        }

        let state = Arc::new(Mutex::new(MonitorState::Running));
        let task = tokio::spawn(run_monitor(
            Arc::downgrade(self),
            Arc::clone(&state),
            self.monitor_interval,
        ));

        *lock(&self.monitor) = Some(MonitorHandle { task, state });
        info!("Token monitor started ({:?} interval)", self.monitor_interval);
    }

    /// Cancel the periodic monitor if running
    pub fn stop_monitor(&self) {
        if let Some(handle) = lock(&self.monitor).take() {
            handle.task.abort();
            *lock(&handle.state) = MonitorState::Stopped;
            info!("Token monitor stopped");
        }
    }

    pub fn monitor_state(&self) -> MonitorState {
        lock(&self.monitor)
            .as_ref()
            .map_or(MonitorState::Stopped, |handle| *lock(&handle.state))
    }

    /// One monitor tick; returns `false` when the monitor should stop
    async fn on_tick(&self, state: &Mutex<MonitorState>) -> bool {
        if *lock(state) == MonitorState::RefreshInFlight {
            debug!("Monitor tick skipped: refresh in flight");
            return true;
        }

        if self.is_refreshing() {
            debug!("Monitor tick skipped: another refresh is outstanding");
            return true;
        }

        let Some(access_token) = self.access_token() else {
            info!("No access token left, monitor stopping");
            return false;
        };

        if !self.inspector.classify(Some(&access_token)).needs_refresh() {
            return true;
        }

        let generation = self.generation();
        *lock(state) = MonitorState::RefreshInFlight;
        let refreshed = self.refresh_proactively().await;
        *lock(state) = MonitorState::Running;

        // A failed refresh has already cleared and announced; only a token
        // that is somehow still in place needs expiring here.
        if !refreshed && generation == self.generation() && self.access_token().is_some() {
            self.expire_session();
        }

        true
    }

    fn read_slot(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!("Failed to read {} from storage: {}", key, e);
                None
            }
        }
    }
}

/// Counts one outstanding refresh call for as long as it lives
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for TokenLifecycleManager {
    fn drop(&mut self) {
        self.stop_monitor();
    }
}

async fn run_monitor(
    manager: Weak<TokenLifecycleManager>,
    state: Arc<Mutex<MonitorState>>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    // Ticks that come due while a refresh is outstanding are dropped, not queued
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let Some(manager) = manager.upgrade() else {
            break;
        };
        if !manager.on_tick(&state).await {
            break;
        }
    }

    *lock(&state) = MonitorState::Stopped;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
