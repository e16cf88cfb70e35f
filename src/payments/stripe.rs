use anyhow::Context;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use time::OffsetDateTime;
use tracing::{debug, instrument};

use super::{CheckoutRequest, PaymentGateway, WebhookError, WebhookEvent};
use crate::config::StripeConfig;

const API_BASE: &str = "https://api.stripe.com/v1";
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

pub struct StripeGateway {
    http: reqwest::Client,
    secret_key: Option<String>,
    webhook_secret: Option<String>,
}

impl StripeGateway {
    pub fn new(cfg: &StripeConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key: cfg.secret_key.clone(),
            webhook_secret: cfg.webhook_secret.clone(),
        }
    }
}

fn checkout_form(req: &CheckoutRequest) -> Vec<(String, String)> {
    let item = "line_items[0]";
    vec![
        ("mode".into(), "payment".into()),
        ("payment_method_types[0]".into(), "card".into()),
        ("success_url".into(), req.success_url.clone()),
        ("cancel_url".into(), req.cancel_url.clone()),
        ("customer_email".into(), req.customer_email.clone()),
        ("client_reference_id".into(), req.client_reference_id.clone()),
        (format!("{item}[quantity]"), "1".into()),
        (format!("{item}[price_data][currency]"), req.currency.clone()),
        (format!("{item}[price_data][unit_amount]"), req.unit_amount.to_string()),
        (format!("{item}[price_data][product_data][name]"), req.name.clone()),
        (format!("{item}[price_data][product_data][description]"), req.description.clone()),
        (format!("{item}[price_data][product_data][images][0]"), req.image_url.clone()),
    ]
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, req), fields(tour = %req.client_reference_id))]
    async fn create_checkout_session(&self, req: CheckoutRequest) -> anyhow::Result<Value> {
        let key = self
            .secret_key
            .as_deref()
            .context("payment gateway is not configured")?;
        let res = self
            .http
            .post(format!("{API_BASE}/checkout/sessions"))
            .bearer_auth(key)
            .form(&checkout_form(&req))
            .send()
            .await
            .context("stripe request")?;
        let status = res.status();
        let body: Value = res.json().await.context("stripe response")?;
        if !status.is_success() {
            anyhow::bail!("stripe returned {status}: {}", body["error"]["message"]);
        }
        debug!(session = %body["id"], "checkout session created");
        Ok(body)
    }

    fn construct_event(&self, payload: &[u8], signature: &str) -> Result<WebhookEvent, WebhookError> {
        let secret = self.webhook_secret.as_deref().ok_or(WebhookError::MissingSecret)?;
        verify_signature(
            secret,
            payload,
            signature,
            OffsetDateTime::now_utc().unix_timestamp(),
        )?;
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Checks a `t=…,v1=…` signature header: HMAC-SHA256 of `"{t}.{payload}"`
/// must match one `v1` entry and `t` must be within the tolerance of `now`.
pub fn verify_signature(secret: &str, payload: &[u8], header: &str, now: i64) -> Result<(), WebhookError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse::<i64>().ok(),
            Some(("v1", v)) => candidates.push(v),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
    if candidates.is_empty() {
        return Err(WebhookError::MalformedHeader);
    }

    let matched = candidates.iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    });
    if !matched {
        return Err(WebhookError::SignatureMismatch);
    }
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(WebhookError::Expired);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(payload);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}
