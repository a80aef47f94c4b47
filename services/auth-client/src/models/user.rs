//! User model and login payloads

use serde::{Deserialize, Serialize};
use std::fmt;

/// Application role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    /// The backend calls this role `staff`
    #[serde(alias = "staff")]
    Employee,
}

impl Role {
    /// Get the role name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Employee => "employee",
        }
    }

    /// Landing page for users with this role
    pub fn home_path(&self) -> &'static str {
        match self {
            Role::Admin => "/admin",
            Role::Employee => "/employee",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signed-in user, as persisted in the `user` slot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub full_name: String,
    pub email: String,
    pub role: Role,
}

/// User login credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

/// Response of the login endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginResult {
    pub access_token: String,
    pub refresh_token: String,
    pub full_name: String,
    pub email: String,
    pub role: Role,
}

impl LoginResult {
    pub fn user(&self) -> User {
        User {
            full_name: self.full_name.clone(),
            email: self.email.clone(),
            role: self.role,
        }
    }

    /// A result without both tokens cannot start a session
    pub fn is_empty(&self) -> bool {
        self.access_token.is_empty() || self.refresh_token.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_staff_role_maps_to_employee() {
        let user: User =
            serde_json::from_str(r#"{"full_name":"Lan","email":"lan@corp.vn","role":"staff"}"#)
                .expect("valid user json");
        assert_eq!(user.role, Role::Employee);

        let json = serde_json::to_string(&user).expect("serializable");
        assert!(json.contains(r#""role":"employee""#));
    }
}
