//! Shared fixtures for unit tests

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use common::storage::MemoryStore;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::json;
use tokio::sync::Notify;

use crate::error::TransportError;
use crate::events::EventBus;
use crate::lifecycle::{LifecycleConfig, TokenLifecycleManager};
use crate::models::{LoginResult, Role};
use crate::token::now_unix;
use crate::transport::RefreshTransport;

/// HS256 token with the given `exp`
pub fn mint_token(exp: i64) -> String {
    let claims = json!({ "sub": 42, "iat": exp - 3600, "exp": exp, "token_type": "access" });
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test-secret"))
        .expect("encoding a test token")
}

pub fn mint_token_without_exp() -> String {
    let claims = json!({ "sub": "42", "iat": now_unix() });
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test-secret"))
        .expect("encoding a test token")
}

/// Token expiring `secs` from now
pub fn token_expiring_in(secs: i64) -> String {
    mint_token(now_unix() + secs)
}

pub fn login_result(role: Role) -> LoginResult {
    LoginResult {
        access_token: token_expiring_in(3600),
        refresh_token: token_expiring_in(7 * 24 * 3600),
        full_name: "Nguyen Van A".to_string(),
        email: "a@corp.vn".to_string(),
        role,
    }
}

/// Refresh transport replaying scripted outcomes
///
/// When `gate` is set, each call waits for a notification before answering,
/// which lets tests hold a refresh in flight.
#[derive(Default)]
pub struct ScriptedRefresh {
    outcomes: Mutex<VecDeque<Result<String, TransportError>>>,
    calls: AtomicUsize,
    pub gate: Option<Arc<Notify>>,
}

impl ScriptedRefresh {
    pub fn new(outcomes: Vec<Result<String, TransportError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    pub fn gated(outcomes: Vec<Result<String, TransportError>>, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(outcomes)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RefreshTransport for ScriptedRefresh {
    async fn refresh(&self, _refresh_token: &str) -> Result<String, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.outcomes
            .lock()
            .expect("outcomes lock")
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("no scripted outcome".to_string())))
    }
}

/// Lifecycle manager over a fresh memory store
pub fn lifecycle_with(
    transport: Arc<ScriptedRefresh>,
    config: LifecycleConfig,
) -> (Arc<TokenLifecycleManager>, EventBus) {
    let bus = EventBus::new();
    let manager = TokenLifecycleManager::new(
        Arc::new(MemoryStore::new()),
        transport,
        bus.clone(),
        config,
    );
    (Arc::new(manager), bus)
}
