use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::{Map, Value};
use tracing::{info, instrument};

use super::{recalc_ratings, Reviews};
use crate::{
    auth::extractors::AuthUser,
    error::AppResult,
    extract::JsonBody,
    factory::{self, find_by_id, parse_id},
    query::{Predicate, QueryParams},
    response::{created, success_many, success_one},
    state::AppState,
    tours::Tours,
    users::model::User,
};

fn tour_of(review: &Value) -> Option<String> {
    review.get("tour").and_then(Value::as_str).map(str::to_string)
}

#[instrument(skip(state, params))]
pub async fn list_for_tour(
    State(state): State<AppState>,
    Path(tour_id): Path<String>,
    Query(params): Query<QueryParams>,
) -> AppResult<impl IntoResponse> {
    let tour_id = parse_id(&tour_id)?;
    let extra = vec![Predicate::eq("tour", tour_id.to_string())];
    Ok(success_many(factory::get_all::<Reviews>(&state, &params, extra).await?))
}

/// The author is always the session user unless the body names one; the
/// tour comes from the body or the nested route.
async fn create(
    state: &AppState,
    user: &User,
    tour_from_path: Option<String>,
    mut body: Map<String, Value>,
) -> AppResult<impl IntoResponse> {
    if let Some(tour) = tour_from_path {
        body.entry("tour").or_insert(Value::String(tour));
    }
    body.entry("user").or_insert(Value::String(user.id.to_string()));
    if let Some(tour) = body.get("tour").and_then(Value::as_str) {
        find_by_id::<Tours>(state, parse_id(tour)?).await?;
    }
    let review = factory::create_one::<Reviews>(state, body).await?;
    if let Some(tour) = tour_of(&review) {
        recalc_ratings(state, &tour).await?;
    }
    info!(user_id = %user.id, "review created");
    Ok(created(review))
}

#[instrument(skip(state, user, body))]
pub async fn create_review(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    JsonBody(body): JsonBody<Map<String, Value>>,
) -> AppResult<impl IntoResponse> {
    create(&state, &user, None, body).await
}

#[instrument(skip(state, user, body))]
pub async fn create_for_tour(
    State(state): State<AppState>,
    Path(tour_id): Path<String>,
    AuthUser(user): AuthUser,
    JsonBody(body): JsonBody<Map<String, Value>>,
) -> AppResult<impl IntoResponse> {
    let tour_id = parse_id(&tour_id)?;
    create(&state, &user, Some(tour_id.to_string()), body).await
}

#[instrument(skip(state, patch))]
pub async fn update_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(patch): JsonBody<Map<String, Value>>,
) -> AppResult<impl IntoResponse> {
    let review = factory::update_one::<Reviews>(&state, &id, patch).await?;
    if let Some(tour) = tour_of(&review) {
        recalc_ratings(&state, &tour).await?;
    }
    Ok(success_one(review))
}

#[instrument(skip(state))]
pub async fn delete_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let review = find_by_id::<Reviews>(&state, parse_id(&id)?).await?;
    factory::delete_one::<Reviews>(&state, &id).await?;
    if let Some(tour) = review.body.get("tour").and_then(Value::as_str) {
        recalc_ratings(&state, tour).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}
