//! Request interceptor chain
//!
//! Attaches the persisted access token to outbound requests and turns a
//! `401 Unauthorized` into at most one refresh-and-replay per request. While
//! a refresh is in flight every other request that hits a 401 is parked in
//! a queue and settled by that same refresh.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiResult, AuthError, TransportError};
use crate::lifecycle::TokenLifecycleManager;
use crate::transport::{ApiRequest, ApiResponse, HttpTransport};

const UNAUTHORIZED: u16 = 401;

/// A request waiting on the in-flight refresh
struct PendingRequest {
    request: ApiRequest,
    responder: oneshot::Sender<Result<ApiRequest, AuthError>>,
}

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    queue: Vec<PendingRequest>,
}

/// Authenticated API client
pub struct RequestInterceptor {
    transport: Arc<dyn HttpTransport>,
    lifecycle: Arc<TokenLifecycleManager>,
    refresh: Arc<Mutex<RefreshState>>,
}

impl RequestInterceptor {
    pub fn new(transport: Arc<dyn HttpTransport>, lifecycle: Arc<TokenLifecycleManager>) -> Self {
        Self {
            transport,
            lifecycle,
            refresh: Arc::new(Mutex::new(RefreshState::default())),
        }
    }

    /// Send a request, refreshing and replaying once on 401
    pub async fn send(&self, mut request: ApiRequest) -> ApiResult<ApiResponse> {
        self.decorate(&mut request);

        let response = self
            .transport
            .execute(&request)
            .await
            .map_err(ApiError::Transport)?;

        if response.status != UNAUTHORIZED {
            return settle(response);
        }

        self.recover_unauthorized(request, response).await
    }

    /// Send a request and decode its JSON body
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> ApiResult<T> {
        let response = self.send(request).await?;
        response.json().map_err(ApiError::Transport)
    }

    /// Whether a refresh is currently outstanding
    pub fn is_refreshing(&self) -> bool {
        lock(&self.refresh).in_flight
    }

    /// Requests parked behind the outstanding refresh
    pub fn pending_count(&self) -> usize {
        lock(&self.refresh).queue.len()
    }

    /// Outbound stage: attach the bearer token if one is persisted
    fn decorate(&self, request: &mut ApiRequest) {
        request.set_bearer(self.lifecycle.access_token());
    }

    async fn recover_unauthorized(
        &self,
        mut request: ApiRequest,
        response: ApiResponse,
    ) -> ApiResult<ApiResponse> {
        if request.is_retried() {
            warn!("{} still unauthorized after refresh, giving up", request.path);
            return Err(ApiError::Unauthorized {
                body: response.body,
            });
        }

        let Some(refresh_token) = self.lifecycle.refresh_token() else {
            warn!("401 on {} with no refresh token", request.path);
            self.terminal_failure();
            return Err(ApiError::Unauthorized {
                body: response.body,
            });
        };

        let status = self.lifecycle.inspector().classify(Some(&refresh_token));
        if status.is_unusable() {
            warn!("401 on {} with refresh token {:?}", request.path, status);
            self.terminal_failure();
            return Err(ApiError::Unauthorized {
                body: response.body,
            });
        }

        request.mark_retried();
        let (responder, settled) = oneshot::channel();

        // Check-and-set with no suspension in between
        let start_refresh = {
            let mut state = lock(&self.refresh);
            state.queue.push(PendingRequest { request, responder });
            if state.in_flight {
                false
            } else {
                state.in_flight = true;
                true
            }
        };

        if start_refresh {
            self.spawn_refresh();
        } else {
            debug!("Refresh already in flight, request queued");
        }

        let replay = match settled.await {
            Ok(Ok(replay)) => replay,
            Ok(Err(e)) => return Err(ApiError::Refresh(e)),
            Err(_) => {
                return Err(ApiError::Refresh(AuthError::RefreshRejected(
                    "refresh task ended without settling".to_string(),
                )));
            }
        };

        debug!("Replaying {} with refreshed token", replay.path);
        let response = self
            .transport
            .execute(&replay)
            .await
            .map_err(ApiError::Transport)?;

        if response.status == UNAUTHORIZED {
            warn!("Replay of {} was rejected again", replay.path);
            return Err(ApiError::Unauthorized {
                body: response.body,
            });
        }

        settle(response)
    }

    /// Run the refresh detached so a cancelled caller cannot strand the queue
    fn spawn_refresh(&self) {
        let lifecycle = Arc::clone(&self.lifecycle);
        let state = Arc::clone(&self.refresh);

        tokio::spawn(async move {
            let outcome = lifecycle.refresh().await;

            let queued = {
                let mut state = lock(&state);
                state.in_flight = false;
                std::mem::take(&mut state.queue)
            };

            match &outcome {
                Ok(_) => info!("Refresh settled, replaying {} request(s)", queued.len()),
                Err(e) => warn!("Refresh failed, rejecting {} request(s): {}", queued.len(), e),
            }

            for entry in queued {
                let reply = match &outcome {
                    Ok(token) => {
                        let mut request = entry.request;
                        request.set_bearer(Some(token.clone()));
                        Ok(request)
                    }
                    Err(e) => Err(e.clone()),
                };
                // The waiter may have been cancelled
                let _ = entry.responder.send(reply);
            }
        });
    }

    /// Session cannot be recovered without a new login
    fn terminal_failure(&self) {
        self.lifecycle.expire_session();
    }
}

/// Map a non-401 response to the caller's result
fn settle(response: ApiResponse) -> ApiResult<ApiResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ApiError::Transport(TransportError::Status {
            status: response.status,
            body: response.body,
        }))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
