use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    middleware::from_fn_with_state,
    response::Response,
    routing::{get, patch, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};

use super::{
    dto::{
        ForgotPasswordRequest, LoginRequest, ResetPasswordRequest, SignupRequest,
        UpdatePasswordRequest,
    },
    extractors::AuthUser,
    guard::require_login,
    reset::{self, ResetState},
    session::{establish, logout_cookie, origin},
};
use crate::{
    error::{AppError, AppResult},
    extract::JsonBody,
    mail::{send_password_reset, send_welcome},
    state::AppState,
    users::{
        model::validate_new_password,
        repo::{NewUser, UserStore},
    },
};

pub fn auth_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/users/signup", post(signup))
        .route("/users/login", post(login))
        .route("/users/logout", get(logout))
        .route("/users/forgotPassword", post(forgot_password))
        .route("/users/resetPassword/:token", patch(reset_password))
        .route(
            "/users/updateMyPassword",
            patch(update_password).route_layer(from_fn_with_state(state.clone(), require_login)),
        )
}

#[instrument(skip(state, jar, headers, payload))]
pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<SignupRequest>,
) -> AppResult<Response> {
    let user = UserStore::new(state.store.as_ref())
        .create(NewUser {
            name: payload.name,
            email: payload.email,
            password: payload.password,
            password_confirm: payload.password_confirm,
        })
        .await?;
    info!(user_id = %user.id, "user signed up");

    let url = format!("{}/me", origin(&headers));
    if let Err(err) = send_welcome(&state, &user, &url).await {
        error!(user_id = %user.id, error = ?err, "welcome email failed");
    }
    establish(&state, jar, &headers, &user, StatusCode::CREATED)
}

/// Unknown email and wrong password get the same answer.
#[instrument(skip(state, jar, headers, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> AppResult<Response> {
    let (Some(email), Some(password)) = (
        payload.email.filter(|e| !e.trim().is_empty()),
        payload.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::BadRequest("Please provide email and password!".into()));
    };
    let user = UserStore::new(state.store.as_ref())
        .check_credentials(&email, &password)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Incorrect email or password".into()))?;
    info!(user_id = %user.id, "user logged in");
    establish(&state, jar, &headers, &user, StatusCode::OK)
}

pub async fn logout(jar: CookieJar) -> (CookieJar, Json<Value>) {
    (jar.add(logout_cookie()), Json(json!({ "status": "success" })))
}

#[instrument(skip(state, headers, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<ForgotPasswordRequest>,
) -> AppResult<Json<Value>> {
    let users = UserStore::new(state.store.as_ref());
    let mut user = users
        .find_by_email(&payload.email)
        .await?
        .ok_or_else(|| AppError::NotFound("There is no user with that email address.".into()))?;

    let token = reset::generate(state.config.jwt.secret.as_bytes(), OffsetDateTime::now_utc());
    token.apply(&mut user);
    let mut user = users.save(&user).await?;

    let url = format!("{}/api/v1/users/resetPassword/{}", origin(&headers), token.plain);
    if let Err(err) = send_password_reset(&state, &user, &url).await {
        error!(user_id = %user.id, error = ?err, "reset email failed");
        user.clear_reset();
        users.save(&user).await?;
        return Err(AppError::EmailDelivery);
    }
    info!(user_id = %user.id, "reset token sent");
    Ok(Json(json!({ "status": "success", "message": "Token sent to email!" })))
}

#[instrument(skip(state, jar, headers, token, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Path(token): Path<String>,
    JsonBody(payload): JsonBody<ResetPasswordRequest>,
) -> AppResult<Response> {
    let users = UserStore::new(state.store.as_ref());
    let hash = reset::hash_token(state.config.jwt.secret.as_bytes(), &token);
    let now = OffsetDateTime::now_utc();
    let user = users
        .find_by_reset_hash(&hash)
        .await?
        .filter(|u| ResetState::of(u, now) == ResetState::ResetRequested)
        .ok_or_else(|| {
            warn!("invalid or expired reset token");
            AppError::InvalidOrExpiredToken
        })?;

    let errors = validate_new_password(&payload.password, &payload.password_confirm);
    if !errors.is_empty() {
        return Err(AppError::InvalidInput(errors));
    }
    let user = users.change_password(user, payload.password).await?;
    info!(user_id = %user.id, "password reset");
    establish(&state, jar, &headers, &user, StatusCode::OK)
}

#[instrument(skip(state, user, jar, headers, payload), fields(user_id = %user.id))]
pub async fn update_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    jar: CookieJar,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<UpdatePasswordRequest>,
) -> AppResult<Response> {
    let users = UserStore::new(state.store.as_ref());
    if !users.verify_password(&user, &payload.password_current).await? {
        return Err(AppError::Unauthorized("Your current password is wrong.".into()));
    }
    let errors = validate_new_password(&payload.password, &payload.password_confirm);
    if !errors.is_empty() {
        return Err(AppError::InvalidInput(errors));
    }
    let user = users.change_password(user, payload.password).await?;
    info!("password updated");
    establish(&state, jar, &headers, &user, StatusCode::OK)
}
