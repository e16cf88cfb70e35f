//! Fakes and request helpers shared by the unit and router tests.

use std::{
    io::Cursor,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use bytes::Bytes;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use serde_json::{json, Map, Value};
use time::OffsetDateTime;
use tower::ServiceExt;

use crate::{
    config::{AppConfig, Environment, JwtConfig, MailConfig, StripeConfig},
    mail::{Email, Mailer},
    payments::{verify_signature, CheckoutRequest, PaymentGateway, WebhookError, WebhookEvent},
    state::AppState,
    storage::StorageClient,
    store::{DocumentStore, MemoryStore},
    users::{
        model::{Role, User},
        repo::{NewUser, UserStore},
    },
};

pub const BOUNDARY: &str = "natours-test-boundary";
pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const PASSWORD: &str = "pass1234";

#[derive(Default)]
pub struct RecordingStorage {
    pub keys: Mutex<Vec<String>>,
}

#[async_trait]
impl StorageClient for RecordingStorage {
    async fn put_object(&self, key: &str, _body: Bytes, _content_type: &str) -> anyhow::Result<()> {
        self.keys.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.keys.lock().unwrap().retain(|k| k != key);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<Email>>,
    pub fail: bool,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: Email) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("smtp unavailable");
        }
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePayments {
    pub sessions: Mutex<Vec<CheckoutRequest>>,
}

#[async_trait]
impl PaymentGateway for FakePayments {
    async fn create_checkout_session(&self, req: CheckoutRequest) -> anyhow::Result<Value> {
        let session = json!({
            "id": "cs_test_1",
            "url": "https://checkout.stripe.test/cs_test_1",
            "client_reference_id": req.client_reference_id,
            "customer_email": req.customer_email,
        });
        self.sessions.lock().unwrap().push(req);
        Ok(session)
    }

    fn construct_event(&self, payload: &[u8], signature: &str) -> Result<WebhookEvent, WebhookError> {
        verify_signature(
            WEBHOOK_SECRET,
            payload,
            signature,
            OffsetDateTime::now_utc().unix_timestamp(),
        )?;
        Ok(serde_json::from_slice(payload)?)
    }
}

pub struct Fakes {
    pub storage: Arc<RecordingStorage>,
    pub mailer: Arc<RecordingMailer>,
    pub payments: Arc<FakePayments>,
}

pub fn test_config() -> AppConfig {
    AppConfig {
        environment: Environment::Development,
        host: "127.0.0.1".into(),
        port: 0,
        database_url: None,
        jwt: JwtConfig {
            secret: "test-secret".into(),
            ttl_minutes: 60,
            cookie_ttl_days: 1,
        },
        mail: MailConfig {
            from_address: "hello@natours.io".into(),
            from_name: "Natours".into(),
            host: None,
            port: 587,
            username: None,
            password: None,
        },
        stripe: StripeConfig {
            secret_key: None,
            webhook_secret: Some(WEBHOOK_SECRET.into()),
        },
        public_dir: PathBuf::from("public"),
        rate_limit_per_hour: 0,
    }
}

fn build_state(config: AppConfig, failing_mail: bool) -> (AppState, Fakes) {
    build_state_on(config, Arc::new(MemoryStore::new()), failing_mail)
}

fn build_state_on(config: AppConfig, store: Arc<dyn DocumentStore>, failing_mail: bool) -> (AppState, Fakes) {
    let fakes = Fakes {
        storage: Arc::new(RecordingStorage::default()),
        mailer: Arc::new(RecordingMailer {
            fail: failing_mail,
            ..Default::default()
        }),
        payments: Arc::new(FakePayments::default()),
    };
    let state = AppState::from_parts(
        Arc::new(config),
        store,
        fakes.storage.clone(),
        fakes.mailer.clone(),
        fakes.payments.clone(),
    )
    .expect("test state");
    (state, fakes)
}

pub fn fake_state() -> AppState {
    fake_state_with_fakes().0
}

pub fn fake_state_with_fakes() -> (AppState, Fakes) {
    build_state(test_config(), false)
}

pub fn fake_state_failing_mail() -> (AppState, Fakes) {
    build_state(test_config(), true)
}

pub fn fake_state_with_config(config: AppConfig) -> (AppState, Fakes) {
    build_state(config, false)
}

/// Fake state over a caller-provided document store.
pub fn fake_state_with_store(store: Arc<dyn DocumentStore>) -> AppState {
    build_state_on(test_config(), store, false).0
}

pub fn tour_body(name: &str, price: f64) -> Map<String, Value> {
    json!({
        "name": name,
        "duration": 5,
        "maxGroupSize": 25,
        "difficulty": "easy",
        "price": price,
        "summary": "Breathtaking hike through the Canadian Banff National Park",
        "imageCover": "tour-1-cover.jpg",
        "startLocation": {
            "type": "Point",
            "coordinates": [-115.570154, 51.178456],
            "description": "Banff, CAN"
        },
        "startDates": ["2021-04-25T09:00:00.000Z"]
    })
    .as_object()
    .cloned()
    .unwrap()
}

/// Creates an active account named "Test User" with password [`PASSWORD`].
pub async fn user_with_role(state: &AppState, email: &str, role: Role) -> User {
    let users = UserStore::new(state.store.as_ref());
    let mut user = users
        .create(NewUser {
            name: "Test User".into(),
            email: email.into(),
            password: PASSWORD.into(),
            password_confirm: PASSWORD.into(),
        })
        .await
        .unwrap();
    if role != Role::User {
        user.role = role;
        user = users.save(&user).await.unwrap();
    }
    user
}

pub fn multipart_body(parts: &[(&str, Option<(&str, &str)>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, file, data) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match file {
            Some((file_name, content_type)) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                     Content-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn tiny_png() -> Bytes {
    let img = ImageBuffer::from_pixel(8, 6, Rgb([200u8, 120, 40]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    Bytes::from(out.into_inner())
}

pub fn json_request(method: Method, uri: &str, body: Option<Value>, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri).header(header::HOST, "natours.test");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub text: String,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.text).unwrap_or(Value::Null)
    }
}

pub async fn send(app: &Router, req: Request<Body>) -> TestResponse {
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let headers = res.headers().clone();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    TestResponse {
        status,
        headers,
        text: String::from_utf8_lossy(&bytes).into_owned(),
    }
}
