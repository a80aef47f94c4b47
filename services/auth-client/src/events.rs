//! Process-wide publish/subscribe channel for auth lifecycle events
//!
//! Handlers run synchronously inside `publish`, in the order they were
//! registered, so a component that publishes `SessionExpired` knows every
//! subscriber has reacted by the time `publish` returns. Async consumers can
//! additionally `listen()` on a broadcast channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::models::User;

const BROADCAST_CAPACITY: usize = 64;

/// Event discriminant, used as the subscription key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthEventKind {
    LoginSuccess,
    Logout,
    TokenRefreshed,
    SessionExpired,
    Error,
}

impl AuthEventKind {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            AuthEventKind::LoginSuccess => "auth:login_success",
            AuthEventKind::Logout => "auth:logout",
            AuthEventKind::TokenRefreshed => "auth:token_refreshed",
            AuthEventKind::SessionExpired => "auth:session_expired",
            AuthEventKind::Error => "auth:error",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "auth:login_success" => Some(AuthEventKind::LoginSuccess),
            "auth:logout" => Some(AuthEventKind::Logout),
            "auth:token_refreshed" => Some(AuthEventKind::TokenRefreshed),
            "auth:session_expired" => Some(AuthEventKind::SessionExpired),
            "auth:error" => Some(AuthEventKind::Error),
            _ => None,
        }
    }
}

impl fmt::Display for AuthEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a logout happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    UserInitiated,
    /// The logout request failed; the local session is dropped anyway
    Error,
}

/// Auth lifecycle event with its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    LoginSuccess { user: User },
    /// `reason` is `None` for the bare legacy `auth:logout` trigger
    Logout { reason: Option<LogoutReason> },
    TokenRefreshed { access_token: String },
    SessionExpired,
    Error { message: Option<String> },
}

impl AuthEvent {
    pub fn kind(&self) -> AuthEventKind {
        match self {
            AuthEvent::LoginSuccess { .. } => AuthEventKind::LoginSuccess,
            AuthEvent::Logout { .. } => AuthEventKind::Logout,
            AuthEvent::TokenRefreshed { .. } => AuthEventKind::TokenRefreshed,
            AuthEvent::SessionExpired => AuthEventKind::SessionExpired,
            AuthEvent::Error { .. } => AuthEventKind::Error,
        }
    }
}

/// One-line summary that never includes token material
impl fmt::Display for AuthEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthEvent::LoginSuccess { user } => {
                write!(f, "{}: {} ({})", self.kind(), user.email, user.role)
            }
            AuthEvent::Logout {
                reason: Some(reason),
            } => write!(f, "{}: {:?}", self.kind(), reason),
            AuthEvent::Error {
                message: Some(message),
            } => write!(f, "{}: {}", self.kind(), message),
            _ => write!(f, "{}", self.kind()),
        }
    }
}

type Handler = Arc<dyn Fn(&AuthEvent) + Send + Sync>;

struct BusInner {
    handlers: Mutex<HashMap<AuthEventKind, Vec<(u64, Handler)>>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<AuthEvent>,
}

/// Cloneable handle to the event bus
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                handlers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                sender,
            }),
        }
    }

    /// Register a handler for one event kind
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// dropped or explicitly unsubscribed.
    pub fn subscribe<F>(&self, kind: AuthEventKind, handler: F) -> Subscription
    where
        F: Fn(&AuthEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        match self.inner.handlers.lock() {
            Ok(mut handlers) => handlers
                .entry(kind)
                .or_default()
                .push((id, Arc::new(handler))),
            Err(_) => warn!("Event bus lock poisoned, subscription to {} dropped", kind),
        }

        debug!("Subscribed handler {} to {}", id, kind);

        Subscription {
            bus: Arc::downgrade(&self.inner),
            kind,
            id,
        }
    }

    /// Deliver an event to every handler of its kind, then to listeners
    pub fn publish(&self, event: AuthEvent) {
        let kind = event.kind();

        // Snapshot so handlers may subscribe, unsubscribe or publish re-entrantly
        let handlers: Vec<Handler> = match self.inner.handlers.lock() {
            Ok(handlers) => handlers
                .get(&kind)
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default(),
            Err(_) => {
                warn!("Event bus lock poisoned, {} not delivered", kind);
                return;
            }
        };

        debug!("Publishing {} to {} handler(s)", kind, handlers.len());

        for handler in handlers {
            handler(&event);
        }

        // No listeners is the normal case
        let _ = self.inner.sender.send(event);
    }

    /// Publish a payload-less event by wire name
    ///
    /// Returns `false` for unknown names and for kinds that require a payload.
    pub fn publish_named(&self, name: &str) -> bool {
        let event = match AuthEventKind::from_name(name) {
            Some(AuthEventKind::Logout) => AuthEvent::Logout { reason: None },
            Some(AuthEventKind::SessionExpired) => AuthEvent::SessionExpired,
            Some(AuthEventKind::Error) => AuthEvent::Error { message: None },
            Some(kind) => {
                warn!("Event {} needs a payload and cannot be published by name", kind);
                return false;
            }
            None => {
                warn!("Unknown auth event name: {}", name);
                return false;
            }
        };

        self.publish(event);
        true
    }

    /// Receive every published event asynchronously
    pub fn listen(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.sender.subscribe()
    }

    /// Number of handlers registered for a kind
    pub fn subscriber_count(&self, kind: AuthEventKind) -> usize {
        self.inner
            .handlers
            .lock()
            .map(|handlers| handlers.get(&kind).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration handle returned by [`EventBus::subscribe`]
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    bus: Weak<BusInner>,
    kind: AuthEventKind,
    id: u64,
}

impl Subscription {
    pub fn kind(&self) -> AuthEventKind {
        self.kind
    }

    /// Remove the handler now
    pub fn unsubscribe(self) {
        drop(self);
    }

    fn remove(&self) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };

        if let Ok(mut handlers) = bus.handlers.lock() {
            if let Some(list) = handlers.get_mut(&self.kind) {
                list.retain(|(id, _)| *id != self.id);
            }
        }
        debug!("Unsubscribed handler {} from {}", self.id, self.kind);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}
