use std::convert::Infallible;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, warn};

use super::{
    jwt::is_stale_for,
    session::{COOKIE_NAME, LOGGED_OUT},
};
use crate::{
    error::AppError,
    state::AppState,
    users::{model::User, repo::UserStore},
};

/// The authenticated, active user behind the request's session token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

/// Session for rendered pages: cookie only, never rejects.
#[derive(Debug, Clone)]
pub struct OptionalUser(pub Option<User>);

fn bearer_token(parts: &Parts) -> Option<String> {
    let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn cookie_token(parts: &Parts) -> Option<String> {
    CookieJar::from_headers(&parts.headers)
        .get(COOKIE_NAME)
        .map(|c| c.value().to_string())
}

/// Verifies the token and loads its user, rejecting deleted users and
/// tokens issued before the last password change.
pub async fn authenticate(state: &AppState, token: &str) -> Result<User, AppError> {
    let claims = state.keys.verify(token)?;
    let user = UserStore::new(state.store.as_ref())
        .find_active(claims.sub)
        .await?
        .ok_or_else(|| {
            warn!(user_id = %claims.sub, "token for missing user");
            AppError::Unauthorized("The user belonging to this token does no longer exist.".into())
        })?;
    if is_stale_for(&user, &claims) {
        warn!(user_id = %user.id, "stale token");
        return Err(AppError::Unauthorized(
            "User recently changed password! Please log in again.".into(),
        ));
    }
    Ok(user)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }
        let state = AppState::from_ref(state);
        let token = bearer_token(parts).or_else(|| cookie_token(parts)).ok_or_else(|| {
            AppError::Unauthorized("You are not logged in! Please log in to get access.".into())
        })?;
        let user = authenticate(&state, &token).await?;
        debug!(user_id = %user.id, "authenticated");
        let auth = AuthUser(user);
        parts.extensions.insert(auth.clone());
        Ok(auth)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for OptionalUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(AuthUser(user)) = parts.extensions.get::<AuthUser>() {
            return Ok(OptionalUser(Some(user.clone())));
        }
        let Some(token) = cookie_token(parts).filter(|t| t != LOGGED_OUT) else {
            return Ok(OptionalUser(None));
        };
        let state = AppState::from_ref(state);
        match authenticate(&state, &token).await {
            Ok(user) => Ok(OptionalUser(Some(user))),
            Err(err) => {
                debug!(error = %err, "ignoring invalid session cookie");
                Ok(OptionalUser(None))
            }
        }
    }
}
