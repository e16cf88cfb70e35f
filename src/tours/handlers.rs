use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use tracing::{info, instrument};

use super::{
    stats::{self, parse_latlng, Unit},
    Tours,
};
use crate::{
    error::{AppError, AppResult},
    factory::{self, find_docs, handlers, Resource},
    images::{discard_images, store_tour_images, tour_image_names, UploadForm},
    query::QueryParams,
    response::{success_many, success_one},
    state::AppState,
};

const TOP_CHEAP_FIELDS: &str = "name,price,ratingsAverage,summary,difficulty";

/// Presets the query for the five best rated, cheapest tours.
pub async fn top_cheap(
    state: State<AppState>,
    Query(mut params): Query<QueryParams>,
) -> AppResult<impl IntoResponse> {
    params.set("limit", "5");
    params.set("sort", "-ratingsAverage,price");
    params.set("fields", TOP_CHEAP_FIELDS);
    handlers::list::<Tours>(state, Query(params)).await
}

async fn visible_tours(state: &AppState) -> AppResult<Vec<Value>> {
    let docs = find_docs::<Tours>(state, Vec::new()).await?;
    Ok(docs.iter().map(Tours::present).collect())
}

#[instrument(skip(state))]
pub async fn tour_stats(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let stats = stats::tour_stats(&visible_tours(&state).await?);
    Ok(Json(json!({ "status": "success", "data": { "stats": stats } })))
}

#[instrument(skip(state))]
pub async fn monthly_plan(
    State(state): State<AppState>,
    Path(year): Path<String>,
) -> AppResult<Json<Value>> {
    let year: i32 = year
        .trim()
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid year: {year}")))?;
    let plan = stats::monthly_plan(&visible_tours(&state).await?, year);
    Ok(Json(json!({ "status": "success", "data": { "plan": plan } })))
}

#[instrument(skip(state))]
pub async fn tours_within(
    State(state): State<AppState>,
    Path((distance, latlng, unit)): Path<(String, String, String)>,
) -> AppResult<impl IntoResponse> {
    let center = parse_latlng(&latlng)?;
    let distance: f64 = distance
        .trim()
        .parse()
        .ok()
        .filter(|d: &f64| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| AppError::BadRequest(format!("Invalid distance: {distance}")))?;
    let tours = stats::within(visible_tours(&state).await?, center, distance, Unit::parse(&unit));
    Ok(success_many(tours))
}

#[instrument(skip(state))]
pub async fn distances(
    State(state): State<AppState>,
    Path((latlng, unit)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let origin = parse_latlng(&latlng)?;
    let tours = visible_tours(&state).await?;
    Ok(success_many(stats::distances(&tours, origin, Unit::parse(&unit))))
}

/// JSON patch or multipart form with `imageCover` and up to three `images`.
/// The patch is checked before any image is stored; files from a write that
/// still fails are removed.
#[instrument(skip(state, form))]
pub async fn update_tour(
    State(state): State<AppState>,
    Path(id): Path<String>,
    form: UploadForm,
) -> AppResult<impl IntoResponse> {
    form.limit_files(&[("imageCover", 1), ("images", 3)])?;
    let mut patch = form.fields.clone();
    if form.files.is_empty() {
        return Ok(success_one(factory::update_one::<Tours>(&state, &id, patch).await?));
    }

    let tour = factory::check_update::<Tours>(&state, &id, &patch).await?;
    let stored = store_tour_images(&state, tour.id, &form).await?;
    info!(tour_id = %tour.id, files = form.files.len(), "tour images uploaded");
    patch.extend(stored.clone());
    match factory::update_one::<Tours>(&state, &id, patch).await {
        Ok(updated) => Ok(success_one(updated)),
        Err(err) => {
            discard_images(&state, "tours", &tour_image_names(&stored)).await;
            Err(err)
        }
    }
}
