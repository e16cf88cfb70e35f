use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use bytes::Bytes;
use serde_json::{json, Map, Value};
use tracing::{info, instrument, warn};

use super::Bookings;
use crate::{
    auth::{extractors::AuthUser, session::origin},
    error::{AppError, AppResult},
    factory::{create_one, find_by_id, parse_id},
    payments::{CheckoutRequest, WebhookError, CHECKOUT_COMPLETED},
    state::AppState,
    store::{Collection, Document},
    tours::Tours,
    users::repo::UserStore,
};

const CURRENCY: &str = "usd";

fn text(tour: &Document, key: &str) -> String {
    tour.body
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn checkout_request(tour: &Document, customer_email: &str, site: &str) -> CheckoutRequest {
    let price = tour.body.get("price").and_then(Value::as_f64).unwrap_or_default();
    CheckoutRequest {
        success_url: format!("{site}/my-tours?alert=booking"),
        cancel_url: format!("{site}/tour/{}", text(tour, "slug")),
        customer_email: customer_email.to_string(),
        client_reference_id: tour.id.to_string(),
        name: format!("{} Tour", text(tour, "name")),
        description: text(tour, "summary"),
        image_url: format!("{site}/img/tours/{}", text(tour, "imageCover")),
        unit_amount: (price * 100.0).round() as i64,
        currency: CURRENCY.to_string(),
    }
}

#[instrument(skip(state, user, headers), fields(user_id = %user.id))]
pub async fn checkout_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    headers: HeaderMap,
    Path(tour_id): Path<String>,
) -> AppResult<Json<Value>> {
    let tour = find_by_id::<Tours>(&state, parse_id(&tour_id)?).await?;
    let request = checkout_request(&tour, &user.email, &origin(&headers));
    let session = state.payments.create_checkout_session(request).await?;
    info!(tour_id = %tour.id, "checkout session created");
    Ok(Json(json!({ "status": "success", "session": session })))
}

/// Books the tour a completed checkout paid for. Sessions that point at a
/// vanished tour or user are acknowledged and skipped.
async fn create_booking_checkout(state: &AppState, session: &Value) -> AppResult<()> {
    let tour_ref = session.get("client_reference_id").and_then(Value::as_str).unwrap_or_default();
    let email = session.get("customer_email").and_then(Value::as_str).unwrap_or_default();

    let tour = match parse_id(tour_ref) {
        Ok(id) => state.store.get(Collection::Tours, id).await?,
        Err(_) => None,
    };
    let Some(tour) = tour else {
        warn!(tour = tour_ref, "checkout for unknown tour");
        return Ok(());
    };
    let Some(user) = UserStore::new(state.store.as_ref()).find_by_email(email).await? else {
        warn!(tour_id = %tour.id, "checkout for unknown customer");
        return Ok(());
    };

    let mut body = Map::new();
    body.insert("tour".into(), Value::String(tour.id.to_string()));
    body.insert("user".into(), Value::String(user.id.to_string()));
    body.insert("price".into(), tour.body.get("price").cloned().unwrap_or(Value::Null));
    let booking = create_one::<Bookings>(state, body).await?;
    info!(booking = %booking["id"], tour_id = %tour.id, user_id = %user.id, "booking created");
    Ok(())
}

#[instrument(skip(state, headers, payload))]
pub async fn webhook_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Bytes,
) -> AppResult<Json<Value>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::MalformedHeader)?;
    let event = state.payments.construct_event(&payload, signature).map_err(|err| {
        warn!(error = %err, "webhook rejected");
        AppError::from(err)
    })?;
    if event.kind == CHECKOUT_COMPLETED {
        create_booking_checkout(&state, &event.data.object).await?;
    }
    Ok(Json(json!({ "received": true })))
}
