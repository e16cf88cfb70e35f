use axum::{
    extract::{Path, Query, State},
    http::{header::CONTENT_SECURITY_POLICY, HeaderValue},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::instrument;

use crate::{
    auth::extractors::{AuthUser, OptionalUser},
    bookings::Bookings,
    error::{AppError, AppResult},
    extract::FormBody,
    factory::{find_docs, update_one, Resource},
    query::{Operator, Predicate},
    state::AppState,
    tours::Tours,
    users::{model::validate_profile, Users},
};

pub const BOOKING_ALERT: &str = "Your booking was successful! Please check your email for a confirmation. If your booking doesn't show up here immediately, please come back later.";

/// Tour pages load the map and payment scripts.
pub const TOUR_CSP: &str = "default-src 'self' https://*.mapbox.com https://js.stripe.com/ ;base-uri 'self';block-all-mixed-content;font-src 'self' https: data:;frame-ancestors 'self';img-src 'self' data:;object-src 'none';script-src https://cdnjs.cloudflare.com https://api.mapbox.com https://js.stripe.com/v3/ 'self' blob: ;script-src-attr 'none';style-src 'self' https: 'unsafe-inline';upgrade-insecure-requests;";
pub const FORM_CSP: &str = "default-src 'self' ;base-uri 'self';block-all-mixed-content;font-src 'self' https: data:;frame-ancestors 'self';img-src 'self' data:;object-src 'none';script-src https://cdnjs.cloudflare.com 'self' blob: ;script-src-attr 'none';style-src 'self' https: 'unsafe-inline';upgrade-insecure-requests;";

#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    alert: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserDataForm {
    name: Option<String>,
    email: Option<String>,
}

fn with_csp(page: impl IntoResponse, policy: &'static str) -> Response {
    let mut res = page.into_response();
    res.headers_mut()
        .insert(CONTENT_SECURITY_POLICY, HeaderValue::from_static(policy));
    res
}

fn session_json(user: &OptionalUser) -> Option<Value> {
    user.0.as_ref().map(|u| u.public_json())
}

fn tours_page(
    state: &AppState,
    title: &str,
    user: Option<Value>,
    tours: Vec<Value>,
    alert: Option<&str>,
) -> AppResult<Response> {
    let mut ctx = Map::new();
    ctx.insert("tours".into(), Value::Array(tours));
    if let Some(alert) = alert {
        ctx.insert("alert".into(), Value::String(alert.to_string()));
    }
    Ok(state.views.page("overview.html", title, user, ctx)?.into_response())
}

#[instrument(skip(state, user))]
pub async fn overview(
    State(state): State<AppState>,
    user: OptionalUser,
    Query(query): Query<AlertQuery>,
) -> AppResult<Response> {
    let tours = find_docs::<Tours>(&state, Vec::new())
        .await?
        .iter()
        .map(Tours::present)
        .collect();
    let alert = (query.alert.as_deref() == Some("booking")).then_some(BOOKING_ALERT);
    tours_page(&state, "All Tours", session_json(&user), tours, alert)
}

#[instrument(skip(state, user))]
pub async fn tour(
    State(state): State<AppState>,
    user: OptionalUser,
    Path(slug): Path<String>,
) -> AppResult<Response> {
    let doc = find_docs::<Tours>(&state, vec![Predicate::eq("slug", slug)])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound("There is no tour with that name.".into()))?;
    let mut tour = Tours::present(&doc);
    Tours::populate(&state, &mut tour).await?;
    Tours::expand(&state, std::slice::from_mut(&mut tour)).await?;

    let title = format!("{} Tour", doc.body.get("name").and_then(Value::as_str).unwrap_or_default());
    let mut ctx = Map::new();
    ctx.insert("tour".into(), tour);
    let page = state.views.page("tour.html", &title, session_json(&user), ctx)?;
    Ok(with_csp(page, TOUR_CSP))
}

pub async fn login_form(State(state): State<AppState>, user: OptionalUser) -> AppResult<Response> {
    let page = state
        .views
        .page("login.html", "Log into your account", session_json(&user), Map::new())?;
    Ok(with_csp(page, FORM_CSP))
}

pub async fn account(State(state): State<AppState>, AuthUser(user): AuthUser) -> AppResult<Response> {
    let page = state
        .views
        .page("account.html", "Your account", Some(user.public_json()), Map::new())?;
    Ok(with_csp(page, FORM_CSP))
}

/// Tours the signed-in user has booked.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn my_tours(State(state): State<AppState>, AuthUser(user): AuthUser) -> AppResult<Response> {
    let bookings = find_docs::<Bookings>(&state, vec![Predicate::eq("user", user.id.to_string())]).await?;
    let ids: Vec<Value> = bookings
        .iter()
        .filter_map(|b| b.body.get("tour").cloned())
        .collect();
    let tours = if ids.is_empty() {
        Vec::new()
    } else {
        find_docs::<Tours>(&state, vec![Predicate::new("id", Operator::In, ids)])
            .await?
            .iter()
            .map(Tours::present)
            .collect()
    };
    tours_page(&state, "My Tours", Some(user.public_json()), tours, None)
}

#[instrument(skip(state, user, form), fields(user_id = %user.id))]
pub async fn update_user_data(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    FormBody(form): FormBody<UserDataForm>,
) -> AppResult<Response> {
    let errors = validate_profile(form.name.as_deref(), form.email.as_deref());
    if !errors.is_empty() {
        return Err(AppError::InvalidInput(errors));
    }
    let mut patch = Map::new();
    if let Some(name) = form.name {
        patch.insert("name".into(), Value::String(name));
    }
    if let Some(email) = form.email {
        patch.insert("email".into(), Value::String(email));
    }
    let updated = update_one::<Users>(&state, &user.id.to_string(), patch).await?;
    let page = state
        .views
        .page("account.html", "Your account", Some(updated), Map::new())?;
    Ok(with_csp(page, FORM_CSP))
}
