//! Login and logout flows

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::context::SessionContext;
use crate::error::LoginError;
use crate::events::{AuthEvent, LogoutReason};
use crate::models::{LoginCredentials, Role};
use crate::transport::AuthApi;
use crate::validation::{validate_email, validate_password};

/// Login/logout on top of the auth endpoints and the session context
pub struct LoginService {
    api: AuthApi,
    context: Arc<SessionContext>,
}

impl LoginService {
    pub fn new(api: AuthApi, context: Arc<SessionContext>) -> Self {
        Self { api, context }
    }

    /// Sign in and install the session
    ///
    /// With `expected_role` set, a user of another role is rejected without
    /// touching the current session. Returns the landing page of the user's
    /// role.
    pub async fn login(
        &self,
        credentials: &LoginCredentials,
        expected_role: Option<Role>,
    ) -> Result<&'static str, LoginError> {
        validate_email(&credentials.email).map_err(LoginError::Validation)?;
        validate_password(&credentials.password).map_err(LoginError::Validation)?;

        let credentials = LoginCredentials {
            email: credentials.email.trim().to_string(),
            password: credentials.password.clone(),
        };

        let result = match self.api.login(&credentials).await {
            Ok(result) => result,
            Err(e) => {
                self.context.lifecycle().bus().publish(AuthEvent::Error {
                    message: Some(e.to_string()),
                });
                return Err(e);
            }
        };

        if let Some(expected) = expected_role {
            if result.role != expected {
                warn!(
                    "User {} with role {} tried the {} portal",
                    result.email, result.role, expected
                );
                return Err(LoginError::RoleMismatch {
                    expected: expected.to_string(),
                });
            }
        }

        if result.is_empty() {
            error!("Login response for {} carries no tokens", result.email);
            return Err(LoginError::Unknown);
        }

        self.context.set_auth_data(Some(&result))?;
        info!("User logged in successfully: {}", result.email);
        Ok(result.role.home_path())
    }

    /// Sign out; the local session ends whether or not the backend answers
    pub async fn logout(&self) -> LogoutReason {
        let reason = match self.context.refresh_token() {
            Some(refresh_token) => {
                let access_token = self.context.access_token();
                match self.api.logout(&refresh_token, access_token.as_deref()).await {
                    Ok(()) => LogoutReason::UserInitiated,
                    Err(e) => {
                        warn!("Logout request failed: {}", e);
                        LogoutReason::Error
                    }
                }
            }
            None => LogoutReason::UserInitiated,
        };

        self.context
            .lifecycle()
            .bus()
            .publish(AuthEvent::Logout { reason: Some(reason) });
        info!("User logged out ({:?})", reason);
        reason
    }
}
