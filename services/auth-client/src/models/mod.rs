//! Auth client models

pub mod session;
pub mod user;

// Re-export for convenience
pub use session::ActiveSession;
pub use user::{LoginCredentials, LoginResult, Role, User};
