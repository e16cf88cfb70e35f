use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{DefaultBodyLimit, OriginalUri},
    http::{header, HeaderValue},
    middleware::from_fn_with_state,
    Router,
};
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, services::ServeDir,
    set_header::SetResponseHeaderLayer, trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    auth, bookings,
    config::AppConfig,
    error::{render_errors, AppError},
    reviews,
    state::AppState,
    tours, users, views,
};

/// JSON and form bodies; upload and webhook routes raise their own limit.
pub const BODY_LIMIT: usize = 10 * 1024;

const DEFAULT_CSP: &str = "default-src 'self';base-uri 'self';font-src 'self' https: data:;frame-ancestors 'self';img-src 'self' data:;object-src 'none';script-src 'self';script-src-attr 'none';style-src 'self' https: 'unsafe-inline';upgrade-insecure-requests";

async fn not_found(OriginalUri(uri): OriginalUri) -> AppError {
    AppError::NotFound(format!("Can't find {uri} on this server!"))
}

fn api_router(state: &AppState) -> Router<AppState> {
    let api = Router::new()
        .merge(tours::router(state))
        .merge(auth::router(state))
        .merge(users::router(state))
        .merge(reviews::router(state))
        .merge(bookings::router(state));

    let per_hour = state.config.rate_limit_per_hour;
    if per_hour == 0 {
        return api;
    }
    let governor = GovernorConfigBuilder::default()
        .key_extractor(SmartIpKeyExtractor)
        .per_millisecond(3_600_000 / u64::from(per_hour))
        .burst_size(per_hour)
        .finish();
    match governor {
        Some(config) => api.layer(GovernorLayer {
            config: Arc::new(config),
        }),
        None => {
            warn!(per_hour, "invalid rate limit, limiter disabled");
            api
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    let public = state.config.public_dir.clone();

    Router::new()
        .nest("/api/v1", api_router(&state))
        .merge(bookings::webhook_router())
        .merge(views::router(&state))
        .nest_service("/img", ServeDir::new(public.join("img")))
        .nest_service("/css", ServeDir::new(public.join("css")))
        .nest_service("/js", ServeDir::new(public.join("js")))
        .fallback(not_found)
        .layer(from_fn_with_state(state.clone(), render_errors))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(DEFAULT_CSP),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, ?latency, "response");
                        } else {
                            tracing::info!(%status, ?latency, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router, config: &AppConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use time::{Duration, OffsetDateTime};

    use crate::{
        factory::{create_one, parse_id},
        payments::sign_payload,
        store::{Collection, DocumentStore},
        testing::{
            fake_state, fake_state_failing_mail, fake_state_with_config, fake_state_with_fakes,
            json_request, multipart_body, send, test_config, tiny_png, tour_body, user_with_role,
            BOUNDARY, PASSWORD, WEBHOOK_SECRET,
        },
        tours::Tours,
        users::{model::Role, repo::UserStore},
    };

    fn reset_token_from(text: &str) -> String {
        let start = text.find("resetPassword/").expect("reset link") + "resetPassword/".len();
        text[start..]
            .chars()
            .take_while(char::is_ascii_hexdigit)
            .collect()
    }

    #[tokio::test]
    async fn unknown_routes_answer_in_kind() {
        let app = build_app(fake_state());

        let res = send(&app, json_request(Method::GET, "/api/v1/nothing-here", None, None)).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert_eq!(res.json()["status"], "fail");
        assert_eq!(res.json()["message"], "Can't find /api/v1/nothing-here on this server!");

        let res = send(&app, json_request(Method::GET, "/nothing-here", None, None)).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert!(res.headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/html"));
        assert!(res.text.contains("on this server!"));
    }

    #[tokio::test]
    async fn security_headers_are_set() {
        let app = build_app(fake_state());
        let res = send(&app, json_request(Method::GET, "/api/v1/tours", None, None)).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(res.headers[header::X_FRAME_OPTIONS], "SAMEORIGIN");
        assert!(res.headers.contains_key(header::CONTENT_SECURITY_POLICY));
    }

    #[tokio::test]
    async fn api_requests_are_rate_limited_per_client() {
        let mut config = test_config();
        config.rate_limit_per_hour = 2;
        let (state, _fakes) = fake_state_with_config(config);
        let app = build_app(state);
        let request = |ip: &str| {
            Request::builder()
                .uri("/api/v1/tours")
                .header("x-forwarded-for", ip)
                .body(Body::empty())
                .unwrap()
        };

        for _ in 0..2 {
            assert_eq!(send(&app, request("203.0.113.7")).await.status, StatusCode::OK);
        }
        assert_eq!(send(&app, request("203.0.113.7")).await.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(send(&app, request("203.0.113.8")).await.status, StatusCode::OK);
        let page = send(&app, Request::builder().uri("/login").body(Body::empty()).unwrap()).await;
        assert_eq!(page.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn oversized_json_bodies_are_rejected() {
        let app = build_app(fake_state());
        let body = json!({ "email": "a".repeat(BODY_LIMIT + 1), "password": PASSWORD });
        let res = send(&app, json_request(Method::POST, "/api/v1/users/login", Some(body), None)).await;
        assert!(res.status.is_client_error());
        assert!(res.json()["token"].is_null());
    }

    #[tokio::test]
    async fn login_does_not_reveal_which_credential_failed() {
        let state = fake_state();
        user_with_role(&state, "ann@natours.io", Role::User).await;
        let app = build_app(state);

        let missing = send(
            &app,
            json_request(Method::POST, "/api/v1/users/login", Some(json!({"email": "ann@natours.io"})), None),
        )
        .await;
        assert_eq!(missing.status, StatusCode::BAD_REQUEST);
        assert_eq!(missing.json()["message"], "Please provide email and password!");

        let wrong_password = send(
            &app,
            json_request(
                Method::POST,
                "/api/v1/users/login",
                Some(json!({"email": "ann@natours.io", "password": "not-the-one"})),
                None,
            ),
        )
        .await;
        let unknown_email = send(
            &app,
            json_request(
                Method::POST,
                "/api/v1/users/login",
                Some(json!({"email": "nobody@natours.io", "password": PASSWORD})),
                None,
            ),
        )
        .await;
        assert_eq!(wrong_password.status, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong_password.status, unknown_email.status);
        assert_eq!(wrong_password.text, unknown_email.text);

        let ok = send(
            &app,
            json_request(
                Method::POST,
                "/api/v1/users/login",
                Some(json!({"email": "ANN@natours.io", "password": PASSWORD})),
                None,
            ),
        )
        .await;
        assert_eq!(ok.status, StatusCode::OK);
        assert!(ok.json()["token"].is_string());
        assert!(ok.json()["data"]["user"].get("password").is_none());
        let cookie = ok.headers[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("jwt=") && cookie.contains("HttpOnly"));
    }

    #[tokio::test]
    async fn signup_logs_in_and_sends_welcome() {
        let (state, fakes) = fake_state_with_fakes();
        let app = build_app(state);
        let res = send(
            &app,
            json_request(
                Method::POST,
                "/api/v1/users/signup",
                Some(json!({
                    "name": "Ann Example",
                    "email": "ann@natours.io",
                    "password": PASSWORD,
                    "passwordConfirm": PASSWORD,
                    "role": "admin"
                })),
                None,
            ),
        )
        .await;
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.json()["data"]["user"]["role"], "user");

        let sent = fakes.mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ann@natours.io");
        assert!(sent[0].text.contains("http://natours.test/me"));
    }

    #[tokio::test]
    async fn password_change_invalidates_older_tokens() {
        let state = fake_state();
        let user = user_with_role(&state, "ann@natours.io", Role::User).await;
        let old = state
            .keys
            .sign_at(user.id, OffsetDateTime::now_utc() - Duration::minutes(10))
            .unwrap();
        let app = build_app(state);

        let res = send(&app, json_request(Method::GET, "/api/v1/users/me", None, Some(&old))).await;
        assert_eq!(res.status, StatusCode::OK);

        let wrong = send(
            &app,
            json_request(
                Method::PATCH,
                "/api/v1/users/updateMyPassword",
                Some(json!({"passwordCurrent": "guess-again", "password": "newpass123", "passwordConfirm": "newpass123"})),
                Some(&old),
            ),
        )
        .await;
        assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong.json()["message"], "Your current password is wrong.");

        let changed = send(
            &app,
            json_request(
                Method::PATCH,
                "/api/v1/users/updateMyPassword",
                Some(json!({"passwordCurrent": PASSWORD, "password": "newpass123", "passwordConfirm": "newpass123"})),
                Some(&old),
            ),
        )
        .await;
        assert_eq!(changed.status, StatusCode::OK);
        let fresh = changed.json()["token"].as_str().unwrap().to_string();

        let res = send(&app, json_request(Method::GET, "/api/v1/users/me", None, Some(&old))).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.json()["message"], "User recently changed password! Please log in again.");

        let res = send(&app, json_request(Method::GET, "/api/v1/users/me", None, Some(&fresh))).await;
        assert_eq!(res.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn reset_token_works_once() {
        let (state, fakes) = fake_state_with_fakes();
        user_with_role(&state, "ann@natours.io", Role::User).await;
        let app = build_app(state);

        let unknown = send(
            &app,
            json_request(Method::POST, "/api/v1/users/forgotPassword", Some(json!({"email": "x@natours.io"})), None),
        )
        .await;
        assert_eq!(unknown.status, StatusCode::NOT_FOUND);

        let res = send(
            &app,
            json_request(Method::POST, "/api/v1/users/forgotPassword", Some(json!({"email": "ann@natours.io"})), None),
        )
        .await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.json()["message"], "Token sent to email!");
        let token = reset_token_from(&fakes.mailer.sent.lock().unwrap()[0].text);
        assert_eq!(token.len(), 64);

        let uri = format!("/api/v1/users/resetPassword/{token}");
        let body = json!({"password": "brandnew1", "passwordConfirm": "brandnew1"});
        let first = send(&app, json_request(Method::PATCH, &uri, Some(body.clone()), None)).await;
        assert_eq!(first.status, StatusCode::OK);
        assert!(first.json()["token"].is_string());

        let second = send(&app, json_request(Method::PATCH, &uri, Some(body), None)).await;
        assert_eq!(second.status, StatusCode::BAD_REQUEST);
        assert_eq!(second.json()["message"], "Token is invalid or has expired");

        let login = send(
            &app,
            json_request(
                Method::POST,
                "/api/v1/users/login",
                Some(json!({"email": "ann@natours.io", "password": "brandnew1"})),
                None,
            ),
        )
        .await;
        assert_eq!(login.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn expired_reset_token_is_rejected() {
        let (state, fakes) = fake_state_with_fakes();
        user_with_role(&state, "ann@natours.io", Role::User).await;
        let app = build_app(state.clone());
        send(
            &app,
            json_request(Method::POST, "/api/v1/users/forgotPassword", Some(json!({"email": "ann@natours.io"})), None),
        )
        .await;
        let token = reset_token_from(&fakes.mailer.sent.lock().unwrap()[0].text);

        let users = UserStore::new(state.store.as_ref());
        let mut user = users.find_by_email("ann@natours.io").await.unwrap().unwrap();
        user.password_reset_expires = Some(OffsetDateTime::now_utc() - Duration::seconds(1));
        users.save(&user).await.unwrap();

        let res = send(
            &app,
            json_request(
                Method::PATCH,
                &format!("/api/v1/users/resetPassword/{token}"),
                Some(json!({"password": "brandnew1", "passwordConfirm": "brandnew1"})),
                None,
            ),
        )
        .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn failed_reset_mail_clears_the_token() {
        let (state, _fakes) = fake_state_failing_mail();
        user_with_role(&state, "ann@natours.io", Role::User).await;
        let app = build_app(state.clone());

        let res = send(
            &app,
            json_request(Method::POST, "/api/v1/users/forgotPassword", Some(json!({"email": "ann@natours.io"})), None),
        )
        .await;
        assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.json()["message"], "There was an error sending the email. Try again later!");

        let user = UserStore::new(state.store.as_ref())
            .find_by_email("ann@natours.io")
            .await
            .unwrap()
            .unwrap();
        assert!(user.password_reset_token.is_none());
        assert!(user.password_reset_expires.is_none());
    }

    #[tokio::test]
    async fn tour_listing_filters_sorts_and_pages() {
        let state = fake_state();
        for (name, price) in [
            ("The Forest Hiker", 397.0),
            ("The Sea Explorer", 497.0),
            ("The Snow Adventurer", 997.0),
            ("The City Wanderer", 97.0),
        ] {
            create_one::<Tours>(&state, tour_body(name, price)).await.unwrap();
        }
        let app = build_app(state);

        let res = send(
            &app,
            json_request(Method::GET, "/api/v1/tours?price[gte]=100&sort=-price&limit=2&page=1", None, None),
        )
        .await;
        assert_eq!(res.status, StatusCode::OK);
        let body = res.json();
        assert_eq!(body["results"], 2);
        let prices: Vec<f64> = body["data"]["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["price"].as_f64().unwrap())
            .collect();
        assert_eq!(prices, vec![997.0, 497.0]);

        let res = send(&app, json_request(Method::GET, "/api/v1/tours?page=5&limit=2", None, None)).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert_eq!(res.json()["message"], "This page does not exist");

        let res = send(&app, json_request(Method::GET, "/api/v1/tours/top-5-cheap", None, None)).await;
        assert_eq!(res.json()["data"]["data"][0]["name"], "The City Wanderer");
    }

    #[tokio::test]
    async fn tour_writes_are_role_gated_and_deletes_are_final() {
        let state = fake_state();
        let admin = user_with_role(&state, "admin@natours.io", Role::Admin).await;
        let plain = user_with_role(&state, "ann@natours.io", Role::User).await;
        let admin_token = state.keys.sign(admin.id).unwrap();
        let user_token = state.keys.sign(plain.id).unwrap();
        let app = build_app(state);
        let body = Value::Object(tour_body("The Park Camper", 1497.0));

        let res = send(&app, json_request(Method::POST, "/api/v1/tours", Some(body.clone()), None)).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        let res = send(&app, json_request(Method::POST, "/api/v1/tours", Some(body.clone()), Some(&user_token))).await;
        assert_eq!(res.status, StatusCode::FORBIDDEN);
        assert_eq!(res.json()["message"], "You do not have permission to perform this action");

        let res = send(&app, json_request(Method::POST, "/api/v1/tours", Some(body), Some(&admin_token))).await;
        assert_eq!(res.status, StatusCode::CREATED);
        let id = res.json()["data"]["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(res.json()["data"]["data"]["slug"], "the-park-camper");

        let uri = format!("/api/v1/tours/{id}");
        let res = send(&app, json_request(Method::DELETE, &uri, None, Some(&admin_token))).await;
        assert_eq!(res.status, StatusCode::NO_CONTENT);
        let res = send(&app, json_request(Method::DELETE, &uri, None, Some(&admin_token))).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        let res = send(&app, json_request(Method::GET, &uri, None, None)).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert_eq!(res.json()["message"], "No document found with that ID");

        let res = send(&app, json_request(Method::GET, "/api/v1/tours/not-an-id", None, None)).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.json()["message"], "Invalid id: not-an-id");
    }

    fn multipart_request(method: Method, uri: &str, token: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn rejected_tour_patch_leaves_no_images_behind() {
        let (state, fakes) = fake_state_with_fakes();
        let admin = user_with_role(&state, "admin@natours.io", Role::Admin).await;
        let token = state.keys.sign(admin.id).unwrap();
        let tour = create_one::<Tours>(&state, tour_body("The Forest Hiker", 397.0)).await.unwrap();
        create_one::<Tours>(&state, tour_body("The Sea Explorer", 497.0)).await.unwrap();
        let uri = format!("/api/v1/tours/{}", tour["id"].as_str().unwrap());
        let app = build_app(state);
        let png = tiny_png();

        let invalid = multipart_body(&[
            ("price", None, b"-5".as_slice()),
            ("imageCover", Some(("cover.png", "image/png")), &png[..]),
        ]);
        let res = send(&app, multipart_request(Method::PATCH, &uri, &token, invalid)).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert!(res.json()["message"]
            .as_str()
            .unwrap()
            .contains("A tour price must be a number greater than zero"));
        assert!(fakes.storage.keys.lock().unwrap().is_empty());

        let duplicate = multipart_body(&[
            ("name", None, b"The Sea Explorer".as_slice()),
            ("imageCover", Some(("cover.png", "image/png")), &png[..]),
            ("images", Some(("one.png", "image/png")), &png[..]),
        ]);
        let res = send(&app, multipart_request(Method::PATCH, &uri, &token, duplicate)).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            res.json()["message"],
            "Duplicate field value: The Sea Explorer. Please use another value!"
        );
        assert!(fakes.storage.keys.lock().unwrap().is_empty());

        let valid = multipart_body(&[("imageCover", Some(("cover.png", "image/png")), &png[..])]);
        let res = send(&app, multipart_request(Method::PATCH, &uri, &token, valid)).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(fakes.storage.keys.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_profile_update_leaves_no_photo_behind() {
        let (state, fakes) = fake_state_with_fakes();
        let user = user_with_role(&state, "ann@natours.io", Role::User).await;
        user_with_role(&state, "bob@natours.io", Role::User).await;
        let token = state.keys.sign(user.id).unwrap();
        let app = build_app(state);
        let png = tiny_png();

        let body = multipart_body(&[
            ("email", None, b"bob@natours.io".as_slice()),
            ("photo", Some(("me.png", "image/png")), &png[..]),
        ]);
        let res = send(&app, multipart_request(Method::PATCH, "/api/v1/users/updateMe", &token, body)).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert!(res.json()["message"].as_str().unwrap().starts_with("Duplicate field value"));
        assert!(fakes.storage.keys.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn hidden_documents_cannot_be_deleted() {
        let state = fake_state();
        let admin = user_with_role(&state, "admin@natours.io", Role::Admin).await;
        let token = state.keys.sign(admin.id).unwrap();
        let mut secret = tour_body("The Secret Hideaway", 500.0);
        secret.insert("secretTour".into(), json!(true));
        let secret = create_one::<Tours>(&state, secret).await.unwrap();
        let id = secret["id"].as_str().unwrap().to_string();
        let app = build_app(state.clone());

        let res = send(&app, json_request(Method::DELETE, &format!("/api/v1/tours/{id}"), None, Some(&token))).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        let still_there = state.store.get(Collection::Tours, parse_id(&id).unwrap()).await.unwrap();
        assert!(still_there.is_some());
    }

    #[tokio::test]
    async fn non_image_uploads_never_reach_storage() {
        let (state, fakes) = fake_state_with_fakes();
        let user = user_with_role(&state, "ann@natours.io", Role::User).await;
        let token = state.keys.sign(user.id).unwrap();
        let app = build_app(state);

        let body = multipart_body(&[
            ("name", None, b"Ann Renamed".as_slice()),
            ("photo", Some(("notes.txt", "text/plain")), b"definitely not a picture".as_slice()),
        ]);
        let req = Request::builder()
            .method(Method::PATCH)
            .uri("/api/v1/users/updateMe")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap();
        let res = send(&app, req).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.json()["message"], "Not an image! Please upload only images.");
        assert!(fakes.storage.keys.lock().unwrap().is_empty());

        let res = send(&app, json_request(Method::GET, "/api/v1/users/me", None, Some(&token))).await;
        assert_eq!(res.json()["data"]["data"]["name"], "Test User");
    }

    #[tokio::test]
    async fn webhook_requires_a_valid_signature() {
        let state = fake_state();
        let tour = create_one::<Tours>(&state, tour_body("The Forest Hiker", 397.0)).await.unwrap();
        user_with_role(&state, "ann@natours.io", Role::User).await;
        let app = build_app(state.clone());
        let payload = json!({
            "type": "checkout.session.completed",
            "data": {"object": {"client_reference_id": tour["id"], "customer_email": "ann@natours.io"}}
        })
        .to_string();

        let webhook = |signature: Option<String>| {
            let mut builder = Request::builder().method(Method::POST).uri("/webhook-checkout");
            if let Some(sig) = signature {
                builder = builder.header("stripe-signature", sig);
            }
            builder.body(Body::from(payload.clone())).unwrap()
        };

        let res = send(&app, webhook(None)).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let forged = sign_payload("whsec_other", payload.as_bytes(), now);
        let res = send(&app, webhook(Some(forged))).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert!(res.json()["message"].as_str().unwrap().starts_with("Webhook error:"));

        let signed = sign_payload(WEBHOOK_SECRET, payload.as_bytes(), now);
        let res = send(&app, webhook(Some(signed))).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.json(), json!({"received": true}));

        let bookings = crate::factory::get_all::<crate::bookings::Bookings>(
            &state,
            &Default::default(),
            Vec::new(),
        )
        .await
        .unwrap();
        assert_eq!(bookings.len(), 1);
    }

    #[tokio::test]
    async fn overview_page_lists_public_tours() {
        let state = fake_state();
        create_one::<Tours>(&state, tour_body("The Forest Hiker", 397.0)).await.unwrap();
        let app = build_app(state);
        let res = send(&app, Request::builder().uri("/").body(Body::empty()).unwrap()).await;
        assert_eq!(res.status, StatusCode::OK);
        assert!(res.text.contains("The Forest Hiker"));
        assert!(res.headers.contains_key(header::CONTENT_SECURITY_POLICY));
    }
}
