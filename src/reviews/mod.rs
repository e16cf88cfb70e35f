//! Reviews: one per user and tour, rolled up into the tour's ratings.

use std::collections::HashSet;

use async_trait::async_trait;
use axum::{
    middleware::from_fn_with_state,
    routing::{get, patch, post},
    Router,
};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::{
    auth::guard::{require_login, restrict_to, Gate, USER, USER_ADMIN},
    error::AppResult,
    factory::{
        fields::{check_range, is_present, str_of},
        find_docs, handlers as crud, parse_id, Resource,
    },
    query::Predicate,
    state::AppState,
    store::{Collection, StoreError},
    tours::model::DEFAULT_RATING,
    users::public_users_by_id,
};

pub mod handlers;

pub struct Reviews;

#[async_trait]
impl Resource for Reviews {
    const COLLECTION: Collection = Collection::Reviews;

    fn validate(body: &Map<String, Value>) -> Vec<String> {
        let mut errors = Vec::new();
        if !is_present(body, "review") {
            errors.push("Review can not be empty!".to_string());
        }
        check_range(body, "rating", 1.0, 5.0, "Rating must be between 1 and 5", &mut errors);
        if !str_of(body, "tour").map_or(false, |t| parse_id(t).is_ok()) {
            errors.push("Review must belong to a tour.".to_string());
        }
        if !str_of(body, "user").map_or(false, |u| parse_id(u).is_ok()) {
            errors.push("Review must belong to a user".to_string());
        }
        errors
    }

    fn prepare(body: &mut Map<String, Value>) {
        if let Some(text) = str_of(body, "review").map(|r| r.trim().to_string()) {
            body.insert("review".into(), Value::String(text));
        }
    }

    /// Authorship and target are fixed once written.
    fn sanitize_patch(patch: &mut Map<String, Value>) {
        patch.remove("tour");
        patch.remove("user");
    }

    async fn expand(state: &AppState, docs: &mut [Value]) -> AppResult<()> {
        let ids: HashSet<String> = docs
            .iter()
            .filter_map(|d| d.get("user").and_then(Value::as_str).map(str::to_string))
            .collect();
        if ids.is_empty() {
            return Ok(());
        }
        let authors = public_users_by_id(state, ids).await?;
        for doc in docs.iter_mut() {
            let Some(author) = doc
                .get("user")
                .and_then(Value::as_str)
                .and_then(|id| authors.get(id))
            else {
                continue;
            };
            let summary: Map<String, Value> = ["id", "name", "photo"]
                .into_iter()
                .filter_map(|k| author.get(k).map(|v| (k.to_string(), v.clone())))
                .collect();
            doc["user"] = Value::Object(summary);
        }
        Ok(())
    }
}

/// Bounded: each conflict means another writer touched the tour in between.
const RECALC_ATTEMPTS: usize = 5;

/// Recomputes a tour's `ratingsAverage` and `ratingsQuantity` from its
/// reviews. A tour without reviews falls back to the default rating.
/// Reviews and tour are re-read whenever the tour write loses a race.
#[instrument(skip(state))]
pub async fn recalc_ratings(state: &AppState, tour_id: &str) -> AppResult<()> {
    let id = parse_id(tour_id)?;
    let mut attempt = 1;
    loop {
        let reviews = find_docs::<Reviews>(state, vec![Predicate::eq("tour", tour_id)]).await?;
        let ratings: Vec<f64> = reviews
            .iter()
            .filter_map(|r| r.body.get("rating").and_then(Value::as_f64))
            .collect();
        let (quantity, average) = if ratings.is_empty() {
            (0, DEFAULT_RATING)
        } else {
            let avg = ratings.iter().sum::<f64>() / ratings.len() as f64;
            (ratings.len(), (avg * 10.0).round() / 10.0)
        };

        let Some(tour) = state.store.get(Collection::Tours, id).await? else {
            debug!(%id, "ratings target tour is gone");
            return Ok(());
        };
        let mut body = tour.body;
        body.insert("ratingsQuantity".into(), Value::from(quantity));
        body.insert("ratingsAverage".into(), Value::from(average));
        match state
            .store
            .replace(Collection::Tours, id, tour.version, body)
            .await
        {
            Ok(_) => {
                debug!(%id, quantity, average, attempt, "tour ratings updated");
                return Ok(());
            }
            Err(StoreError::VersionConflict(_)) if attempt < RECALC_ATTEMPTS => {
                warn!(%id, attempt, "tour changed while updating ratings, retrying");
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

pub fn router(state: &AppState) -> Router<AppState> {
    let login = || from_fn_with_state(state.clone(), require_login);
    let authors = from_fn_with_state(Gate::new(state, USER), restrict_to);
    let owners = from_fn_with_state(Gate::new(state, USER_ADMIN), restrict_to);

    Router::new()
        .route(
            "/reviews",
            get(crud::list::<Reviews>)
                .route_layer(login())
                .merge(post(handlers::create_review).route_layer(authors.clone())),
        )
        .route(
            "/tours/:id/reviews",
            get(handlers::list_for_tour)
                .route_layer(login())
                .merge(post(handlers::create_for_tour).route_layer(authors)),
        )
        .route(
            "/reviews/:id",
            get(crud::read::<Reviews>).route_layer(login()).merge(
                patch(handlers::update_review)
                    .delete(handlers::delete_review)
                    .route_layer(owners),
            ),
        )
}
