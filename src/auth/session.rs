//! Session cookie handling and the token-bearing auth responses.

use axum::{
    http::{header::HOST, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde_json::json;
use time::{Duration, OffsetDateTime};
use tracing::info;

use crate::{error::AppResult, state::AppState, users::model::User};

pub const COOKIE_NAME: &str = "jwt";
pub const LOGGED_OUT: &str = "loggedout";

/// HTTPS as seen by the client; the proxy header is trusted.
pub fn is_secure(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.eq_ignore_ascii_case("https"))
}

/// `{scheme}://{host}` of the current request, for links in emails and
/// payment redirects.
pub fn origin(headers: &HeaderMap) -> String {
    let scheme = if is_secure(headers) { "https" } else { "http" };
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("{scheme}://{host}")
}

pub fn session_cookie(token: String, ttl_days: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((COOKIE_NAME, token))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .expires(OffsetDateTime::now_utc() + Duration::days(ttl_days))
        .build()
}

pub fn logout_cookie() -> Cookie<'static> {
    Cookie::build((COOKIE_NAME, LOGGED_OUT))
        .path("/")
        .http_only(true)
        .expires(OffsetDateTime::now_utc() + Duration::seconds(10))
        .build()
}

/// Issues a token for `user`, sets the cookie and returns it in the body.
pub fn establish(
    state: &AppState,
    jar: CookieJar,
    headers: &HeaderMap,
    user: &User,
    status: StatusCode,
) -> AppResult<Response> {
    let token = state.keys.sign(user.id)?;
    let jar = jar.add(session_cookie(
        token.clone(),
        state.config.jwt.cookie_ttl_days,
        is_secure(headers),
    ));
    info!(user_id = %user.id, "session established");
    let body = json!({
        "status": "success",
        "token": token,
        "data": { "user": user.public_json() },
    });
    Ok((status, jar, Json(body)).into_response())
}
