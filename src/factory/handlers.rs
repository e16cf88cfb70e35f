//! Axum handlers generic over a [`Resource`], mounted per collection.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::{Map, Value};

use super::{create_one, delete_one, get_all, get_one, update_one, Resource};
use crate::{
    error::AppResult,
    extract::JsonBody,
    query::QueryParams,
    response::{created, success_many, success_one},
    state::AppState,
};

pub async fn list<R: Resource>(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> AppResult<impl IntoResponse> {
    Ok(success_many(get_all::<R>(&state, &params, Vec::new()).await?))
}

pub async fn read<R: Resource>(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    Ok(success_one(get_one::<R>(&state, &id).await?))
}

pub async fn create<R: Resource>(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<Map<String, Value>>,
) -> AppResult<impl IntoResponse> {
    Ok(created(create_one::<R>(&state, body).await?))
}

pub async fn update<R: Resource>(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(patch): JsonBody<Map<String, Value>>,
) -> AppResult<impl IntoResponse> {
    Ok(success_one(update_one::<R>(&state, &id, patch).await?))
}

pub async fn delete<R: Resource>(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    delete_one::<R>(&state, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
