//! Users: account resource, self-service profile routes and admin CRUD.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{delete, get, patch},
    Router,
};
use serde_json::{Map, Value};

use crate::{
    auth::guard::{require_login, restrict_to, Gate, ADMIN},
    error::AppResult,
    factory::{find_docs, handlers as crud, parse_id, Resource},
    images::UPLOAD_BODY_LIMIT,
    query::{Operator, Predicate},
    state::AppState,
    store::Collection,
};

pub mod handlers;
pub mod model;
pub mod repo;

use model::{normalize_email, DEFAULT_PHOTO};

/// Fields that only the password flows may write.
const PASSWORD_FIELDS: &[&str] = &[
    "password",
    "passwordConfirm",
    "passwordChangedAt",
    "passwordResetToken",
    "passwordResetExpires",
];

pub struct Users;

#[async_trait]
impl Resource for Users {
    const COLLECTION: Collection = Collection::Users;
    const HIDDEN_FIELDS: &'static [&'static str] = model::HIDDEN_FIELDS;

    fn validate(body: &Map<String, Value>) -> Vec<String> {
        model::validate_body(body)
    }

    fn prepare(body: &mut Map<String, Value>) {
        if let Some(email) = body.get("email").and_then(Value::as_str).map(normalize_email) {
            body.insert("email".into(), Value::String(email));
        }
        body.entry("photo").or_insert(Value::String(DEFAULT_PHOTO.into()));
        body.entry("role").or_insert(Value::String("user".into()));
        body.entry("active").or_insert(Value::Bool(true));
    }

    fn base_filters() -> Vec<Predicate> {
        vec![repo::active_only()]
    }

    fn sanitize_patch(patch: &mut Map<String, Value>) {
        for field in PASSWORD_FIELDS {
            patch.remove(*field);
        }
    }
}

/// Public profiles of the active users among `ids`, keyed by id.
pub async fn public_users_by_id(
    state: &AppState,
    ids: HashSet<String>,
) -> AppResult<HashMap<String, Value>> {
    let ids: Vec<Value> = ids
        .into_iter()
        .filter(|id| parse_id(id).is_ok())
        .map(Value::String)
        .collect();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let docs = find_docs::<Users>(state, vec![Predicate::new("id", Operator::In, ids)]).await?;
    Ok(docs
        .iter()
        .map(|d| (d.id.to_string(), Users::present(d)))
        .collect())
}

pub fn router(state: &AppState) -> Router<AppState> {
    let login = || from_fn_with_state(state.clone(), require_login);
    let admin = || from_fn_with_state(Gate::new(state, ADMIN), restrict_to);

    Router::new()
        .route("/users/me", get(handlers::get_me).route_layer(login()))
        .route(
            "/users/updateMe",
            patch(handlers::update_me)
                .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
                .route_layer(login()),
        )
        .route("/users/deleteMe", delete(handlers::delete_me).route_layer(login()))
        .route(
            "/users",
            get(crud::list::<Users>)
                .post(handlers::create_user)
                .route_layer(admin()),
        )
        .route(
            "/users/:id",
            get(crud::read::<Users>)
                .patch(crud::update::<Users>)
                .delete(crud::delete::<Users>)
                .route_layer(admin()),
        )
}
