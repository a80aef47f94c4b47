//! In-memory session model

use serde::{Deserialize, Serialize};

use super::user::{LoginResult, Role, User};

/// Authenticated identity held by the session context
///
/// The user and the access token live in one value so that one cannot exist
/// without the other.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveSession {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

impl ActiveSession {
    pub fn has_role(&self, role: Role) -> bool {
        self.user.role == role
    }
}

impl From<&LoginResult> for ActiveSession {
    fn from(result: &LoginResult) -> Self {
        Self {
            user: result.user(),
            access_token: result.access_token.clone(),
            refresh_token: result.refresh_token.clone(),
        }
    }
}
