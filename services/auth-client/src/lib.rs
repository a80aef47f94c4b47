//! Authentication session client for the attendance platform
//!
//! Keeps the user signed in against the attendance API: it persists the
//! token pair, refreshes the access token before it expires, retries
//! requests rejected with 401 after a single shared refresh, and announces
//! session changes on an event bus.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use auth_client::{AuthClient, ClientConfig, NoopQueryCache};
//! use auth_client::context::Navigator;
//! use common::storage::FileStore;
//!
//! struct Terminal;
//!
//! impl Navigator for Terminal {
//!     fn current_path(&self) -> String {
//!         "/".to_string()
//!     }
//!
//!     fn redirect_to_login(&self) {
//!         println!("Please sign in again");
//!     }
//! }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ClientConfig::from_env()?;
//! let store = Arc::new(FileStore::open(&config.storage_path)?);
//! let client = AuthClient::new(&config, store, Arc::new(Terminal), Arc::new(NoopQueryCache));
//! client.context.restore();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod guard;
pub mod interceptor;
pub mod lifecycle;
pub mod models;
pub mod service;
pub mod token;
pub mod transport;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use client::AuthClient;
pub use config::ClientConfig;
pub use context::{NoopQueryCache, RestoreOutcome, SessionContext};
pub use error::{ApiError, ApiResult, AuthError, LoginError, TransportError};
pub use events::{AuthEvent, AuthEventKind, EventBus, LogoutReason, Subscription};
pub use guard::{RouteDecision, authorize};
pub use interceptor::RequestInterceptor;
pub use lifecycle::{MonitorState, TokenLifecycleManager};
pub use models::{ActiveSession, LoginCredentials, LoginResult, Role, User};
pub use service::LoginService;
pub use token::{TokenInspector, TokenStatus};
pub use transport::{ApiRequest, ApiResponse, AuthApi, HttpTransport, ReqwestTransport};
