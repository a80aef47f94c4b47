//! Fully wired client

use std::sync::Arc;

use common::storage::KeyValueStore;

use crate::config::ClientConfig;
use crate::context::{ContextOptions, Navigator, QueryCache, SessionContext};
use crate::events::EventBus;
use crate::interceptor::RequestInterceptor;
use crate::lifecycle::{LifecycleConfig, TokenLifecycleManager};
use crate::service::LoginService;
use crate::transport::{AuthApi, HttpTransport, ReqwestTransport};

/// Every component of the auth client, sharing one store, bus and transport
pub struct AuthClient {
    pub bus: EventBus,
    pub lifecycle: Arc<TokenLifecycleManager>,
    pub context: Arc<SessionContext>,
    pub interceptor: RequestInterceptor,
    pub login: LoginService,
}

impl AuthClient {
    /// Build the client over `reqwest`
    pub fn new(
        config: &ClientConfig,
        store: Arc<dyn KeyValueStore>,
        navigator: Arc<dyn Navigator>,
        query_cache: Arc<dyn QueryCache>,
    ) -> Self {
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(config));
        Self::with_transport(config, store, transport, navigator, query_cache)
    }

    /// Build the client over any transport
    pub fn with_transport(
        config: &ClientConfig,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn HttpTransport>,
        navigator: Arc<dyn Navigator>,
        query_cache: Arc<dyn QueryCache>,
    ) -> Self {
        let bus = EventBus::new();
        let api = AuthApi::new(Arc::clone(&transport));

        let lifecycle = Arc::new(TokenLifecycleManager::new(
            store,
            Arc::new(api.clone()),
            bus.clone(),
            LifecycleConfig::from(config),
        ));

        let context = Arc::new(SessionContext::new(
            Arc::clone(&lifecycle),
            navigator,
            query_cache,
            ContextOptions::from(config),
        ));

        let interceptor = RequestInterceptor::new(transport, Arc::clone(&lifecycle));
        let login = LoginService::new(api, Arc::clone(&context));

        Self {
            bus,
            lifecycle,
            context,
            interceptor,
            login,
        }
    }
}
