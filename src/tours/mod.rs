//! Tours: the catalogue resource, its aggregations and routes.

use std::collections::HashSet;

use async_trait::async_trait;
use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, patch, post},
    Router,
};
use serde_json::{Map, Value};

use crate::{
    auth::guard::{restrict_to, Gate, ADMIN_LEAD, STAFF},
    error::AppResult,
    factory::{find_docs, handlers as crud, Resource},
    images::UPLOAD_BODY_LIMIT,
    query::Predicate,
    reviews::Reviews,
    state::AppState,
    store::Collection,
    users::public_users_by_id,
};

pub mod handlers;
pub mod model;
pub mod stats;

pub struct Tours;

#[async_trait]
impl Resource for Tours {
    const COLLECTION: Collection = Collection::Tours;
    const MULTI_VALUE_FIELDS: &'static [&'static str] = &[
        "duration",
        "ratingsQuantity",
        "ratingsAverage",
        "maxGroupSize",
        "difficulty",
        "price",
    ];

    fn validate(body: &Map<String, Value>) -> Vec<String> {
        model::validate(body)
    }

    fn prepare(body: &mut Map<String, Value>) {
        model::prepare(body)
    }

    /// Secret tours never show up in any read.
    fn base_filters() -> Vec<Predicate> {
        vec![Predicate::ne("secretTour", true)]
    }

    async fn populate(state: &AppState, doc: &mut Value) -> AppResult<()> {
        let Some(id) = doc.get("id").cloned() else {
            return Ok(());
        };
        let mut reviews: Vec<Value> = find_docs::<Reviews>(state, vec![Predicate::eq("tour", id)])
            .await?
            .iter()
            .map(Reviews::present)
            .collect();
        Reviews::expand(state, &mut reviews).await?;
        if let Value::Object(map) = doc {
            map.insert("reviews".into(), Value::Array(reviews));
        }
        Ok(())
    }

    /// Embeds the guides' public profiles in place of their ids.
    async fn expand(state: &AppState, docs: &mut [Value]) -> AppResult<()> {
        let ids: HashSet<String> = docs
            .iter()
            .filter_map(|d| d.get("guides").and_then(Value::as_array))
            .flatten()
            .filter_map(|g| g.as_str().map(str::to_string))
            .collect();
        if ids.is_empty() {
            return Ok(());
        }
        let guides = public_users_by_id(state, ids).await?;
        for doc in docs.iter_mut() {
            if let Some(Value::Array(list)) = doc.get_mut("guides") {
                for guide in list.iter_mut() {
                    if let Some(user) = guide.as_str().and_then(|id| guides.get(id)) {
                        *guide = user.clone();
                    }
                }
            }
        }
        Ok(())
    }
}

pub fn router(state: &AppState) -> Router<AppState> {
    let staff = from_fn_with_state(Gate::new(state, STAFF), restrict_to);
    let managers = || from_fn_with_state(Gate::new(state, ADMIN_LEAD), restrict_to);

    Router::new()
        .route("/tours/top-5-cheap", get(handlers::top_cheap))
        .route("/tours/tour-stats", get(handlers::tour_stats))
        .route(
            "/tours/monthly-plan/:year",
            get(handlers::monthly_plan).route_layer(staff),
        )
        .route(
            "/tours/tours-within/:distance/center/:latlng/unit/:unit",
            get(handlers::tours_within),
        )
        .route("/tours/distances/:latlng/unit/:unit", get(handlers::distances))
        .route(
            "/tours",
            get(crud::list::<Tours>).merge(post(crud::create::<Tours>).route_layer(managers())),
        )
        .route(
            "/tours/:id",
            get(crud::read::<Tours>).merge(
                patch(handlers::update_tour)
                    .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
                    .delete(crud::delete::<Tours>)
                    .route_layer(managers()),
            ),
        )
}
