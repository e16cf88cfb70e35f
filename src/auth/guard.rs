use axum::{
    extract::{FromRef, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use super::extractors::AuthUser;
use crate::{error::AppError, state::AppState, users::model::Role};

pub const ADMIN: &[Role] = &[Role::Admin];
pub const ADMIN_LEAD: &[Role] = &[Role::Admin, Role::LeadGuide];
pub const STAFF: &[Role] = &[Role::Admin, Role::LeadGuide, Role::Guide];
pub const USER: &[Role] = &[Role::User];
pub const USER_ADMIN: &[Role] = &[Role::User, Role::Admin];

/// Middleware state for [`restrict_to`].
#[derive(Clone)]
pub struct Gate {
    state: AppState,
    roles: &'static [Role],
}

impl Gate {
    pub fn new(state: &AppState, roles: &'static [Role]) -> Self {
        Self {
            state: state.clone(),
            roles,
        }
    }
}

impl FromRef<Gate> for AppState {
    fn from_ref(gate: &Gate) -> Self {
        gate.state.clone()
    }
}

/// Authenticates the request and lets it through only for the gate's roles.
pub async fn restrict_to(
    State(gate): State<Gate>,
    AuthUser(user): AuthUser,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !gate.roles.contains(&user.role) {
        warn!(user_id = %user.id, role = ?user.role, "forbidden");
        return Err(AppError::Forbidden);
    }
    Ok(next.run(req).await)
}

/// Authentication only, for routes open to every role.
pub async fn require_login(AuthUser(user): AuthUser, req: Request, next: Next) -> Response {
    debug!(user_id = %user.id, "login required");
    next.run(req).await
}
