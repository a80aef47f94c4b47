//! HTTP plumbing to the attendance backend
//!
//! `HttpTransport` is the raw, unauthenticated pipe: it sends exactly the
//! request it is given and reports whatever status comes back. Token
//! handling lives one layer up in the interceptor, and the auth endpoints in
//! [`AuthApi`] talk to the raw pipe directly so a refresh never recurses
//! through the interceptor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::{LoginError, TransportError};
use crate::models::{LoginCredentials, LoginResult};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REFRESH_PATH: &str = "/auth/token/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Which timeout budget a request gets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestClass {
    #[default]
    Standard,
    /// Face-recognition check-in, which runs model inference server side
    FaceRecognition,
}

/// Replayable description of an outbound call
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL, starting with `/`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub class: RequestClass,
    bearer: Option<String>,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            class: RequestClass::Standard,
            bearer: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Face-recognition check-in upload
    pub fn face_recognition(path: impl Into<String>, body: Value) -> Self {
        Self {
            class: RequestClass::FaceRecognition,
            ..Self::post(path, body)
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Bearer credential that will be sent, if any
    pub fn bearer(&self) -> Option<&str> {
        self.bearer.as_deref()
    }

    pub fn set_bearer(&mut self, token: Option<String>) {
        self.bearer = token;
    }

    /// Whether this request already went through one refresh-and-replay
    pub fn is_retried(&self) -> bool {
        self.retried
    }

    pub(crate) fn mark_retried(&mut self) {
        self.retried = true;
    }
}

/// Status and raw body of a completed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_str(&self.body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

/// Sends requests to the backend
///
/// Non-2xx answers are returned as `Ok`; only failures to obtain an answer
/// at all are errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// Exchanges a refresh token for a new access token
#[async_trait]
pub trait RefreshTransport: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<String, TransportError>;
}

/// `reqwest` implementation of [`HttpTransport`]
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
    face_recognition_timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.api_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout(),
            face_recognition_timeout: config.face_recognition_timeout(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn timeout_for(&self, class: RequestClass) -> Duration {
        match class {
            RequestClass::Standard => self.request_timeout,
            RequestClass::FaceRecognition => self.face_recognition_timeout,
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);
        debug!("{:?} {}", request.method, url);

        let mut builder = self
            .client
            .request(request.method.into(), &url)
            .timeout(self.timeout_for(request.class));

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = request.bearer() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            warn!("Request to {} failed: {}", url, e);
            TransportError::from(e)
        })?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(ApiResponse { status, body })
    }
}

/// Refresh request body
#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh: String,
}

/// Refresh response body
#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshTokenResponse {
    #[serde(default)]
    pub access: Option<String>,
}

/// Logout request body
#[derive(Debug, Serialize, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct ServerMessage {
    #[serde(alias = "detail")]
    message: Option<String>,
}

/// Client for the authentication endpoints
#[derive(Clone)]
pub struct AuthApi {
    transport: Arc<dyn HttpTransport>,
}

impl AuthApi {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Exchange credentials for a token pair
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<LoginResult, LoginError> {
        info!("Login attempt for user: {}", credentials.email);

        let request = ApiRequest::post(
            LOGIN_PATH,
            json!({ "email": credentials.email, "password": credentials.password }),
        );

        let response = self.transport.execute(&request).await.map_err(|e| {
            error!("Login request failed: {}", e);
            LoginError::Unknown
        })?;

        if !response.is_success() {
            return Err(translate_login_failure(&response));
        }

        response.json::<LoginResult>().map_err(|e| {
            error!("Login response could not be decoded: {}", e);
            LoginError::Unknown
        })
    }

    /// Tell the backend to revoke a refresh token
    pub async fn logout(
        &self,
        refresh_token: &str,
        access_token: Option<&str>,
    ) -> Result<(), TransportError> {
        info!("Logout request");

        let body = serde_json::to_value(LogoutRequest {
            refresh_token: refresh_token.to_string(),
        })
        .map_err(|e| TransportError::Decode(e.to_string()))?;

        let mut request = ApiRequest::post(LOGOUT_PATH, body);
        request.set_bearer(access_token.map(str::to_string));

        let response = self.transport.execute(&request).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(TransportError::Status {
                status: response.status,
                body: response.body,
            })
        }
    }
}

#[async_trait]
impl RefreshTransport for AuthApi {
    async fn refresh(&self, refresh_token: &str) -> Result<String, TransportError> {
        info!("Token refresh request");

        let body = serde_json::to_value(RefreshTokenRequest {
            refresh: refresh_token.to_string(),
        })
        .map_err(|e| TransportError::Decode(e.to_string()))?;

        let response = self
            .transport
            .execute(&ApiRequest::post(REFRESH_PATH, body))
            .await?;

        if !response.is_success() {
            return Err(TransportError::Status {
                status: response.status,
                body: response.body,
            });
        }

        match response.json::<RefreshTokenResponse>()?.access {
            Some(access) if !access.is_empty() => Ok(access),
            _ => Err(TransportError::Decode(
                "refresh response carries no access token".to_string(),
            )),
        }
    }
}

fn translate_login_failure(response: &ApiResponse) -> LoginError {
    match response.status {
        401 => LoginError::InvalidCredentials,
        404 => LoginError::AccountNotFound,
        403 => LoginError::AccountDisabled,
        status => {
            warn!("Login failed with status {}", status);
            serde_json::from_str::<ServerMessage>(&response.body)
                .ok()
                .and_then(|m| m.message)
                .filter(|m| !m.is_empty())
                .map(LoginError::Server)
                .unwrap_or(LoginError::Unknown)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use std::sync::Mutex;

    /// Transport answering every call with one canned response
    struct Canned {
        response: Result<ApiResponse, TransportError>,
        seen: Mutex<Vec<ApiRequest>>,
    }

    impl Canned {
        fn new(response: Result<ApiResponse, TransportError>) -> Arc<Self> {
            Arc::new(Self {
                response,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpTransport for Canned {
        async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
            self.seen.lock().expect("seen").push(request.clone());
            self.response.clone()
        }
    }

    fn credentials() -> LoginCredentials {
        LoginCredentials {
            email: "a@corp.vn".to_string(),
            password: "secret1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_login_decodes_result() {
        let body = r#"{"access_token":"A","refresh_token":"R","full_name":"Nguyen Van A","email":"a@corp.vn","role":"staff"}"#;
        let transport = Canned::new(Ok(ApiResponse::new(200, body)));
        let api = AuthApi::new(transport.clone());

        let result = api.login(&credentials()).await.expect("login should succeed");
        assert_eq!(result.access_token, "A");
        assert_eq!(result.role, Role::Employee);

        let seen = transport.seen.lock().expect("seen");
        assert_eq!(seen[0].path, LOGIN_PATH);
        assert_eq!(seen[0].bearer(), None);
    }

    #[tokio::test]
    async fn test_login_errors_are_translated() {
        let cases = [
            (401, "", "Incorrect email or password"),
            (404, "", "No account found for this email"),
            (403, "", "Your account is locked or not yet activated"),
            (400, r#"{"message":"Email is required"}"#, "Email is required"),
            (500, "oops", "Login failed, please try again"),
        ];

        for (status, body, expected) in cases {
            let api = AuthApi::new(Canned::new(Ok(ApiResponse::new(status, body))));
            let err = api.login(&credentials()).await.expect_err("login should fail");
            assert_eq!(err.to_string(), expected, "status {}", status);
        }
    }

    #[tokio::test]
    async fn test_refresh_requires_access_value() {
        let api = AuthApi::new(Canned::new(Ok(ApiResponse::new(200, r#"{"access":""}"#))));
        assert!(matches!(api.refresh("R").await, Err(TransportError::Decode(_))));

        let api = AuthApi::new(Canned::new(Ok(ApiResponse::new(200, r#"{}"#))));
        assert!(matches!(api.refresh("R").await, Err(TransportError::Decode(_))));

        let api = AuthApi::new(Canned::new(Ok(ApiResponse::new(401, "expired"))));
        let err = api.refresh("R").await.expect_err("401 should fail");
        assert_eq!(err.status(), Some(401));
    }

    #[tokio::test]
    async fn test_refresh_sends_refresh_body() {
        let transport = Canned::new(Ok(ApiResponse::new(200, r#"{"access":"T2"}"#)));
        let api = AuthApi::new(transport.clone());

        assert_eq!(api.refresh("R1").await.expect("refresh"), "T2");

        let seen = transport.seen.lock().expect("seen");
        assert_eq!(seen[0].path, REFRESH_PATH);
        assert_eq!(seen[0].body, Some(json!({ "refresh": "R1" })));
    }

    #[test]
    fn test_face_recognition_requests_get_their_own_class() {
        let request = ApiRequest::face_recognition("/attendance/check-in", json!({}));
        assert_eq!(request.class, RequestClass::FaceRecognition);
        assert_eq!(request.method, Method::Post);
        assert!(!request.is_retried());
    }
}
