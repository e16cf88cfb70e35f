use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};
use tracing::{info, instrument};

use super::{
    model::validate_profile,
    repo::UserStore,
    Users,
};
use crate::{
    auth::extractors::AuthUser,
    error::{AppError, AppResult},
    factory,
    images::{discard_images, store_user_photo, UploadForm},
    response::success_one,
    state::AppState,
};

/// Profile fields a user may change about themselves.
const SELF_EDITABLE: &[&str] = &["name", "email"];

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> AppResult<impl IntoResponse> {
    Ok(success_one(factory::get_one::<Users>(&state, &user.id.to_string()).await?))
}

/// Name, email and an optional photo; anything else in the body is ignored.
#[instrument(skip(state, user, form), fields(user_id = %user.id))]
pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    form: UploadForm,
) -> AppResult<Json<Value>> {
    if form.fields.contains_key("password") || form.fields.contains_key("passwordConfirm") {
        return Err(AppError::BadRequest(
            "This route is not for password updates. Please use /updateMyPassword.".into(),
        ));
    }
    form.limit_files(&[("photo", 1)])?;

    let mut patch: Map<String, Value> = form
        .fields
        .iter()
        .filter(|(k, _)| SELF_EDITABLE.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let errors = validate_profile(
        patch.get("name").and_then(Value::as_str),
        patch.get("email").and_then(Value::as_str),
    );
    if !errors.is_empty() {
        return Err(AppError::InvalidInput(errors));
    }
    let id = user.id.to_string();
    factory::check_update::<Users>(&state, &id, &patch).await?;
    let photo = store_user_photo(&state, user.id, &form).await?;
    if let Some(photo) = &photo {
        patch.insert("photo".into(), Value::String(photo.clone()));
    }

    let updated = match factory::update_one::<Users>(&state, &id, patch).await {
        Ok(updated) => updated,
        Err(err) => {
            discard_images(&state, "users", photo.as_slice()).await;
            return Err(err);
        }
    };
    info!("profile updated");
    Ok(Json(json!({ "status": "success", "data": { "user": updated } })))
}

/// Soft delete: the account stays but every lookup ignores it.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn delete_me(
    State(state): State<AppState>,
    AuthUser(mut user): AuthUser,
) -> AppResult<StatusCode> {
    user.active = false;
    UserStore::new(state.store.as_ref()).save(&user).await?;
    info!("account deactivated");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_user() -> AppResult<()> {
    Err(AppError::Unavailable(
        "This route is not defined! Please use /signup instead".into(),
    ))
}
