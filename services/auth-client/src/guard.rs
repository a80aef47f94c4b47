//! Role-based route authorization

use crate::context::{LOGIN_ROUTE, SessionContext};
use crate::models::{ActiveSession, Role};

/// Outcome of checking a protected route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    /// Session restoration has not finished yet
    Pending,
    RedirectToLogin,
    /// Authenticated but not allowed here; go to the role's landing page
    RedirectTo(&'static str),
}

impl RouteDecision {
    /// Route to navigate to, if any
    pub fn target(&self) -> Option<&'static str> {
        match self {
            RouteDecision::RedirectToLogin => Some(LOGIN_ROUTE),
            RouteDecision::RedirectTo(path) => Some(path),
            RouteDecision::Allow | RouteDecision::Pending => None,
        }
    }
}

/// Decide access for a session; an empty `allowed_roles` admits any role
pub fn authorize(session: Option<&ActiveSession>, allowed_roles: &[Role]) -> RouteDecision {
    let Some(session) = session else {
        return RouteDecision::RedirectToLogin;
    };

    let role = session.user.role;
    if allowed_roles.is_empty() || allowed_roles.contains(&role) {
        RouteDecision::Allow
    } else {
        RouteDecision::RedirectTo(role.home_path())
    }
}

/// Decide access against the live context
pub fn authorize_context(context: &SessionContext, allowed_roles: &[Role]) -> RouteDecision {
    if !context.is_restored() {
        return RouteDecision::Pending;
    }
    authorize(context.session().as_ref(), allowed_roles)
}
