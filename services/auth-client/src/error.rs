//! Custom error types for the auth client

use common::error::StorageError;
use thiserror::Error;

/// Failure talking to the backend, independent of authentication
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Connection refused, DNS failure, reset, ...
    #[error("Network error: {0}")]
    Network(String),

    /// The request did not complete within its timeout
    #[error("Request timed out")]
    Timeout,

    /// The backend answered with a non-2xx status
    #[error("Unexpected status {status}")]
    Status { status: u16, body: String },

    /// The response body was not what the endpoint promises
    #[error("Invalid response body: {0}")]
    Decode(String),
}

impl TransportError {
    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Session-level failure
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    /// No refresh token is persisted
    #[error("No refresh token available")]
    MissingRefreshToken,

    /// The persisted refresh token is expired or undecodable
    #[error("Session expired")]
    SessionExpired,

    /// The refresh endpoint answered but gave no usable access token
    #[error("Refresh rejected: {0}")]
    RefreshRejected(String),

    /// A login or logout replaced the session while the refresh was in flight
    #[error("Session was replaced during refresh")]
    SessionSuperseded,

    #[error("Refresh transport failed: {0}")]
    Transport(#[from] TransportError),
}

/// Error surfaced to the issuer of an API request
#[derive(Error, Debug)]
pub enum ApiError {
    /// The backend rejected the credentials and no retry could fix it
    #[error("Unauthorized")]
    Unauthorized { body: String },

    /// Non-authentication transport failure, returned unchanged
    #[error(transparent)]
    Transport(TransportError),

    /// The refresh this request waited on failed
    #[error("Token refresh failed: {0}")]
    Refresh(#[from] AuthError),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }
}

/// Login failure, already translated for display on the login form
#[derive(Error, Debug)]
pub enum LoginError {
    /// Form input rejected before any request was sent
    #[error("{0}")]
    Validation(String),

    #[error("Incorrect email or password")]
    InvalidCredentials,

    #[error("No account found for this email")]
    AccountNotFound,

    #[error("Your account is locked or not yet activated")]
    AccountDisabled,

    /// The account exists but belongs to the other portal
    #[error("Role mismatch: you are trying to sign in to the {expected} portal")]
    RoleMismatch { expected: String },

    /// Message supplied by the backend
    #[error("{0}")]
    Server(String),

    #[error("Login failed, please try again")]
    Unknown,

    #[error("Could not persist session: {0}")]
    Storage(#[from] StorageError),
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;
