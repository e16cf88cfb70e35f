//! Bookings: paid tour reservations created from completed checkouts.

use std::collections::HashSet;

use async_trait::async_trait;
use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use serde_json::{Map, Value};

use crate::{
    auth::guard::{require_login, restrict_to, Gate, ADMIN_LEAD},
    error::AppResult,
    factory::{
        fields::{f64_of, is_present, str_of},
        find_docs, handlers as crud, parse_id, Resource,
    },
    query::{Operator, Predicate},
    state::AppState,
    store::Collection,
    tours::Tours,
    users::public_users_by_id,
};

pub mod handlers;

/// Stripe sends whole event objects; the API-wide limit is too small.
const WEBHOOK_BODY_LIMIT: usize = 1024 * 1024;

pub struct Bookings;

#[async_trait]
impl Resource for Bookings {
    const COLLECTION: Collection = Collection::Bookings;

    fn validate(body: &Map<String, Value>) -> Vec<String> {
        let mut errors = Vec::new();
        if !str_of(body, "tour").map_or(false, |t| parse_id(t).is_ok()) {
            errors.push("Booking must belong to a Tour!".to_string());
        }
        if !str_of(body, "user").map_or(false, |u| parse_id(u).is_ok()) {
            errors.push("Booking must belong to a User!".to_string());
        }
        if !is_present(body, "price") {
            errors.push("Booking must have a price.".to_string());
        } else if !f64_of(body, "price").map_or(false, |p| p >= 0.0) {
            errors.push("Booking price must be a positive number".to_string());
        }
        errors
    }

    fn prepare(body: &mut Map<String, Value>) {
        body.entry("paid").or_insert(Value::Bool(true));
    }

    /// Embeds the user's public profile and the tour's name.
    async fn expand(state: &AppState, docs: &mut [Value]) -> AppResult<()> {
        let refs = |key: &str| -> HashSet<String> {
            docs.iter()
                .filter_map(|d| d.get(key).and_then(Value::as_str).map(str::to_string))
                .collect()
        };
        let (user_ids, tour_ids) = (refs("user"), refs("tour"));
        if user_ids.is_empty() && tour_ids.is_empty() {
            return Ok(());
        }
        let users = public_users_by_id(state, user_ids).await?;
        let tour_ids: Vec<Value> = tour_ids.into_iter().map(Value::String).collect();
        let tours: Map<String, Value> =
            find_docs::<Tours>(state, vec![Predicate::new("id", Operator::In, tour_ids)])
                .await?
                .iter()
                .map(|t| {
                    let mut summary = Map::new();
                    summary.insert("id".into(), Value::String(t.id.to_string()));
                    if let Some(name) = t.body.get("name") {
                        summary.insert("name".into(), name.clone());
                    }
                    (t.id.to_string(), Value::Object(summary))
                })
                .collect();

        for doc in docs.iter_mut() {
            if let Some(user) = doc.get("user").and_then(Value::as_str).and_then(|id| users.get(id)) {
                doc["user"] = user.clone();
            }
            if let Some(tour) = doc.get("tour").and_then(Value::as_str).and_then(|id| tours.get(id)) {
                doc["tour"] = tour.clone();
            }
        }
        Ok(())
    }
}

pub fn router(state: &AppState) -> Router<AppState> {
    let managers = from_fn_with_state(Gate::new(state, ADMIN_LEAD), restrict_to);

    Router::new()
        .route(
            "/bookings/checkout-session/:tourId",
            get(handlers::checkout_session).route_layer(from_fn_with_state(state.clone(), require_login)),
        )
        .route(
            "/bookings",
            get(crud::list::<Bookings>)
                .post(crud::create::<Bookings>)
                .route_layer(managers.clone()),
        )
        .route(
            "/bookings/:id",
            get(crud::read::<Bookings>)
                .patch(crud::update::<Bookings>)
                .delete(crud::delete::<Bookings>)
                .route_layer(managers),
        )
}

/// Mounted outside `/api/v1`: the raw body is needed for signature checks.
pub fn webhook_router() -> Router<AppState> {
    Router::new().route(
        "/webhook-checkout",
        post(handlers::webhook_checkout).layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT)),
    )
}
